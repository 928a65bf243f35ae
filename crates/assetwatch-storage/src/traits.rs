//! Storage traits for the remote store abstraction layer.
//!
//! Backends implement [`KvStore`] for the versioned key space and
//! [`AppPlatform`] for the installation directory owned by the platform.

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};

use crate::error::StorageError;
use crate::types::{AtomicOperation, CommitResult, Entry, InstallationSummary, Key, ListPage};

/// A versioned key-value store with multi-key conditional commits.
///
/// Implementations must be thread-safe (`Send + Sync`). Every successful
/// commit must hand out a versionstamp that no earlier read returned, so
/// that a check against a stale versionstamp always fails.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Reads a key. Missing keys yield [`Entry::missing`], not an error.
    ///
    /// # Errors
    ///
    /// Returns an error only for transport or protocol failures.
    async fn get(&self, key: &Key) -> Result<Entry, StorageError>;

    /// Reads several keys.
    ///
    /// The default implementation issues one `get` per key; backends that
    /// can read a consistent snapshot should override it.
    async fn get_many(&self, keys: &[Key]) -> Result<Vec<Entry>, StorageError> {
        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            entries.push(self.get(key).await?);
        }
        Ok(entries)
    }

    /// Lists one page of entries whose key starts with `prefix`, in key order.
    ///
    /// The prefix itself is included when it exists as a key.
    async fn list(
        &self,
        prefix: &Key,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> Result<ListPage<Entry>, StorageError>;

    /// Applies an atomic operation.
    ///
    /// Returns [`CommitResult::Conflict`] when any check fails; in that case
    /// nothing is written.
    ///
    /// # Errors
    ///
    /// Returns an error for transport or protocol failures. The outcome of
    /// the commit is then unknown.
    async fn commit(&self, op: AtomicOperation) -> Result<CommitResult, StorageError>;

    /// Returns the name of this backend for logging/debugging.
    fn backend_name(&self) -> &'static str;
}

/// The app platform that owns the installation directory.
#[async_trait]
pub trait AppPlatform: Send + Sync {
    /// Lists one page of installations.
    async fn list_installations(
        &self,
        cursor: Option<&str>,
    ) -> Result<ListPage<InstallationSummary>, StorageError>;

    /// Notifies the platform that an installation has been fully removed.
    ///
    /// Must be idempotent: notifying twice is not an error.
    async fn remove_installation(&self, id: &str) -> Result<(), StorageError>;
}

/// Streams every entry under `prefix`, fetching one page at a time.
pub fn list_entries<'a, S>(
    store: &'a S,
    prefix: Key,
    limit: Option<usize>,
) -> BoxStream<'a, Result<Entry, StorageError>>
where
    S: KvStore + ?Sized,
{
    stream::try_unfold(Some(None::<String>), move |cursor| {
        let prefix = prefix.clone();
        async move {
            let Some(cursor) = cursor else {
                return Ok(None);
            };
            let page = store.list(&prefix, cursor.as_deref(), limit).await?;
            Ok::<_, StorageError>(Some((page.items, page.cursor.map(Some))))
        }
    })
    .map_ok(|items| stream::iter(items.into_iter().map(Ok)))
    .try_flatten()
    .boxed()
}

/// Streams every installation known to the platform, one page at a time.
pub fn list_installations<P>(
    platform: &P,
) -> BoxStream<'_, Result<InstallationSummary, StorageError>>
where
    P: AppPlatform + ?Sized,
{
    stream::try_unfold(Some(None::<String>), move |cursor| async move {
        let Some(cursor) = cursor else {
            return Ok(None);
        };
        let page = platform.list_installations(cursor.as_deref()).await?;
        Ok::<_, StorageError>(Some((page.items, page.cursor.map(Some))))
    })
    .map_ok(|items| stream::iter(items.into_iter().map(Ok)))
    .try_flatten()
    .boxed()
}
