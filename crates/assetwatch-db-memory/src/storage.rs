use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};

use assetwatch_storage::{
    AtomicOperation, CommitResult, Entry, Key, KvStore, ListPage, Mutation, StorageError,
    Versionstamp,
};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

/// Storage-specific configuration options.
#[derive(Debug, Clone)]
pub struct StorageOptions {
    /// Page size used by `list` when the caller does not pass a limit.
    pub page_size: usize,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self { page_size: 100 }
    }
}

#[derive(Debug, Clone)]
struct StoredValue {
    value: Value,
    versionstamp: Versionstamp,
}

/// Counters of the operations served by an [`InMemoryStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationStats {
    pub gets: u64,
    pub lists: u64,
    /// Commits that applied their mutations.
    pub commits: u64,
    /// Commits rejected because a check failed.
    pub conflicts: u64,
}

impl OperationStats {
    /// Total number of commit attempts, successful or not.
    #[must_use]
    pub fn commit_attempts(&self) -> u64 {
        self.commits + self.conflicts
    }
}

#[derive(Debug, Default)]
struct Counters {
    gets: AtomicU64,
    lists: AtomicU64,
    commits: AtomicU64,
    conflicts: AtomicU64,
}

/// In-memory versioned key-value store.
///
/// This storage implementation provides:
/// - An ordered key space, so prefix listings come back in key order
/// - Strictly increasing versionstamps shared by all keys
/// - Atomic multi-key commits: checks and mutations run under one write lock
/// - Operation counters for asserting on the traffic a caller generated
#[derive(Debug)]
pub struct InMemoryStore {
    data: RwLock<BTreeMap<Key, StoredValue>>,
    version_counter: AtomicU64,
    counters: Counters,
    options: StorageOptions,
}

impl InMemoryStore {
    /// Creates a new in-memory store with default options.
    pub fn new() -> Self {
        Self::with_options(StorageOptions::default())
    }

    /// Creates a new in-memory store with the given options.
    pub fn with_options(options: StorageOptions) -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
            version_counter: AtomicU64::new(1),
            counters: Counters::default(),
            options,
        }
    }

    /// Generates the next versionstamp.
    ///
    /// Zero-padded so that versionstamps also sort in commit order.
    fn next_version(&self) -> Versionstamp {
        let n = self.version_counter.fetch_add(1, Ordering::SeqCst);
        Versionstamp::new(format!("{n:020}"))
    }

    /// Returns a snapshot of the operation counters.
    pub fn stats(&self) -> OperationStats {
        OperationStats {
            gets: self.counters.gets.load(Ordering::SeqCst),
            lists: self.counters.lists.load(Ordering::SeqCst),
            commits: self.counters.commits.load(Ordering::SeqCst),
            conflicts: self.counters.conflicts.load(Ordering::SeqCst),
        }
    }

    /// Returns the number of stored keys.
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    /// Returns true if no keys are stored.
    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }

    /// Returns every stored key in order.
    pub async fn keys(&self) -> Vec<Key> {
        self.data.read().await.keys().cloned().collect()
    }

    /// Writes a value without any precondition and without touching the
    /// counters. Intended for seeding fixtures.
    pub async fn seed(&self, key: Key, value: Value) -> Versionstamp {
        let versionstamp = self.next_version();
        self.data.write().await.insert(
            key,
            StoredValue {
                value,
                versionstamp: versionstamp.clone(),
            },
        );
        versionstamp
    }

    fn entry_for(key: &Key, stored: Option<&StoredValue>) -> Entry {
        match stored {
            Some(stored) => Entry {
                key: key.clone(),
                value: Some(stored.value.clone()),
                versionstamp: Some(stored.versionstamp.clone()),
            },
            None => Entry::missing(key.clone()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn encode_cursor(key: &Key) -> Result<String, StorageError> {
    Ok(serde_json::to_string(key)?)
}

fn decode_cursor(cursor: &str) -> Result<Key, StorageError> {
    serde_json::from_str(cursor)
        .map_err(|e| StorageError::invalid_key(format!("Malformed cursor {cursor:?}: {e}")))
}

#[async_trait]
impl KvStore for InMemoryStore {
    async fn get(&self, key: &Key) -> Result<Entry, StorageError> {
        self.counters.gets.fetch_add(1, Ordering::SeqCst);
        let guard = self.data.read().await;
        Ok(Self::entry_for(key, guard.get(key)))
    }

    async fn get_many(&self, keys: &[Key]) -> Result<Vec<Entry>, StorageError> {
        self.counters.gets.fetch_add(1, Ordering::SeqCst);
        // One read guard for all keys gives a consistent snapshot.
        let guard = self.data.read().await;
        Ok(keys
            .iter()
            .map(|key| Self::entry_for(key, guard.get(key)))
            .collect())
    }

    async fn list(
        &self,
        prefix: &Key,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> Result<ListPage<Entry>, StorageError> {
        self.counters.lists.fetch_add(1, Ordering::SeqCst);
        let limit = limit.unwrap_or(self.options.page_size).max(1);
        let start = match cursor {
            Some(cursor) => Bound::Excluded(decode_cursor(cursor)?),
            None => Bound::Included(prefix.clone()),
        };

        let guard = self.data.read().await;
        let mut items: Vec<Entry> = guard
            .range((start, Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .take(limit + 1)
            .map(|(key, stored)| Self::entry_for(key, Some(stored)))
            .collect();

        let cursor = if items.len() > limit {
            items.truncate(limit);
            items.last().map(|entry| encode_cursor(&entry.key)).transpose()?
        } else {
            None
        };

        Ok(ListPage { items, cursor })
    }

    async fn commit(&self, op: AtomicOperation) -> Result<CommitResult, StorageError> {
        if let Some(mutation) = op.mutations.iter().find(|m| m.key().is_empty()) {
            return Err(StorageError::invalid_key(format!(
                "Empty key in mutation {mutation:?}"
            )));
        }

        let mut guard = self.data.write().await;

        let checks_hold = op.checks.iter().all(|check| {
            let current = guard.get(&check.key).map(|stored| &stored.versionstamp);
            current == check.versionstamp.as_ref()
        });
        if !checks_hold {
            self.counters.conflicts.fetch_add(1, Ordering::SeqCst);
            return Ok(CommitResult::Conflict);
        }

        let versionstamp = self.next_version();
        for mutation in op.mutations {
            match mutation {
                Mutation::Set { key, value } => {
                    guard.insert(
                        key,
                        StoredValue {
                            value,
                            versionstamp: versionstamp.clone(),
                        },
                    );
                }
                Mutation::Delete { key } => {
                    guard.remove(&key);
                }
            }
        }
        self.counters.commits.fetch_add(1, Ordering::SeqCst);

        Ok(CommitResult::Committed { versionstamp })
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
