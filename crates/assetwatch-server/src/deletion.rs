//! Removal of uninstalled installations.
//!
//! The tombstone goes in first, so any update that read the document before
//! the tombstone existed fails its commit check. The purge that follows may
//! stop half way; running the whole protocol again converges to the same end
//! state.

use assetwatch_storage::{AppPlatform, AtomicOperation, CommitResult, KvStore, list_entries};
use futures_util::TryStreamExt;

use crate::error::AppError;
use crate::installation::{installation_key, tombstone_key, validate_installation_id};

/// Outcome of [`remove_installation`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeletionReport {
    /// Records deleted by this run.
    pub purged: usize,
}

/// Tombstones an installation, deletes every record scoped to it and
/// notifies the platform.
///
/// Idempotent, and safe to run concurrently with updates for the same id.
pub async fn remove_installation<S, P>(
    store: &S,
    platform: &P,
    id: &str,
) -> Result<DeletionReport, AppError>
where
    S: KvStore + ?Sized,
    P: AppPlatform + ?Sized,
{
    validate_installation_id(id)?;

    let tombstone = AtomicOperation::new().set(tombstone_key(id), serde_json::Value::Bool(true));
    if let CommitResult::Conflict = store.commit(tombstone).await? {
        return Err(AppError::invariant(format!(
            "unconditional tombstone write for {id} reported a conflict"
        )));
    }

    let mut purged = 0;
    let mut records = list_entries(store, installation_key(id), None);
    while let Some(entry) = records.try_next().await? {
        store
            .commit(AtomicOperation::new().delete(entry.key))
            .await?;
        purged += 1;
    }

    platform.remove_installation(id).await?;

    tracing::info!(installation_id = %id, purged, "Installation removed");
    Ok(DeletionReport { purged })
}
