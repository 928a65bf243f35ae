use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};

use assetwatch_storage::{
    AppPlatform, InstallationStatus, InstallationSummary, ListPage, StorageError,
};
use async_trait::async_trait;
use tokio::sync::RwLock;

/// In-memory installation directory.
///
/// Installations are listed in id order and the cursor is the last id
/// served, so removals during a walk never shift later pages. Removal
/// notifications drop the installation and are recorded for inspection.
#[derive(Debug)]
pub struct InMemoryPlatform {
    installations: RwLock<BTreeMap<String, InstallationStatus>>,
    removals: RwLock<Vec<String>>,
    page_requests: AtomicU64,
    page_size: usize,
}

impl InMemoryPlatform {
    pub fn new() -> Self {
        Self::with_page_size(100)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            installations: RwLock::new(BTreeMap::new()),
            removals: RwLock::new(Vec::new()),
            page_requests: AtomicU64::new(0),
            page_size: page_size.max(1),
        }
    }

    /// Adds an installation, or changes the status of an existing one.
    pub async fn upsert(&self, id: impl Into<String>, status: InstallationStatus) {
        self.installations.write().await.insert(id.into(), status);
    }

    /// Returns the current status of an installation, if listed.
    pub async fn status(&self, id: &str) -> Option<InstallationStatus> {
        self.installations.read().await.get(id).copied()
    }

    /// Returns the ids passed to `remove_installation`, in call order.
    pub async fn removals(&self) -> Vec<String> {
        self.removals.read().await.clone()
    }

    /// Number of `list_installations` pages served so far.
    pub fn page_requests(&self) -> u64 {
        self.page_requests.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AppPlatform for InMemoryPlatform {
    async fn list_installations(
        &self,
        cursor: Option<&str>,
    ) -> Result<ListPage<InstallationSummary>, StorageError> {
        self.page_requests.fetch_add(1, Ordering::SeqCst);
        let start = match cursor {
            Some(last) => Bound::Excluded(last.to_string()),
            None => Bound::Unbounded,
        };

        let guard = self.installations.read().await;
        let mut items: Vec<InstallationSummary> = guard
            .range((start, Bound::Unbounded))
            .take(self.page_size + 1)
            .map(|(id, status)| InstallationSummary::new(id.clone(), *status))
            .collect();

        let cursor = if items.len() > self.page_size {
            items.truncate(self.page_size);
            items.last().map(|last| last.id.clone())
        } else {
            None
        };

        Ok(ListPage { items, cursor })
    }

    async fn remove_installation(&self, id: &str) -> Result<(), StorageError> {
        self.installations.write().await.remove(id);
        self.removals.write().await.push(id.to_string());
        Ok(())
    }
}
