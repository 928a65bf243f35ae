//! Per-installation documents and the conditional update primitive.
//!
//! Every write to `installations/{id}` goes through [`update_installation`]:
//! read the document and its tombstone, let the caller compute a patch on a
//! private copy, then commit with two checks (tombstone absent, document
//! unchanged). A failed check restarts the cycle from a fresh read.

use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;

use assetwatch_storage::{Asset, AtomicOperation, CommitResult, Entry, Key, KvStore};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::AppError;

pub const INSTALLATIONS: &str = "installations";
pub const TOMBSTONES: &str = "tombstones";

static INSTALLATION_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[a-z0-9_-]+$").expect("installation id pattern is valid")
});

pub fn is_valid_installation_id(id: &str) -> bool {
    INSTALLATION_ID.is_match(id)
}

pub fn validate_installation_id(id: &str) -> Result<(), AppError> {
    if is_valid_installation_id(id) {
        Ok(())
    } else {
        Err(AppError::invariant(format!("invalid installation ID {id:?}")))
    }
}

pub fn installation_key(id: &str) -> Key {
    Key::new([INSTALLATIONS, id])
}

pub fn tombstone_key(id: &str) -> Key {
    Key::new([TOMBSTONES, id])
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// User-owned state of an installation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationState {
    #[serde(default, deserialize_with = "null_as_default")]
    pub domains: Vec<String>,
}

/// The document stored under `installations/{id}`.
///
/// State and published assets share one document so a single versionstamp
/// guards both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstallationDocument {
    #[serde(default, deserialize_with = "null_as_default")]
    pub state: InstallationState,
    #[serde(default, deserialize_with = "null_as_default")]
    pub assets: Vec<Asset>,
}

impl InstallationDocument {
    /// Decodes a stored entry. Missing and `null` values read as empty.
    pub fn from_entry(entry: &Entry) -> Result<Self, AppError> {
        match &entry.value {
            None | Some(serde_json::Value::Null) => Ok(Self::default()),
            Some(value) => Ok(Self::deserialize(value)?),
        }
    }
}

/// Changes to apply to an installation document. `None` fields are kept.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    pub state: Option<InstallationState>,
    pub assets: Option<Vec<Asset>>,
}

impl Patch {
    pub fn state(state: InstallationState) -> Self {
        Self {
            state: Some(state),
            assets: None,
        }
    }

    pub fn assets(assets: Vec<Asset>) -> Self {
        Self {
            state: None,
            assets: Some(assets),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_none() && self.assets.is_none()
    }

    fn apply_to(self, document: &mut InstallationDocument) {
        if let Some(state) = self.state {
            document.state = state;
        }
        if let Some(assets) = self.assets {
            document.assets = assets;
        }
    }
}

/// Bounds on conflict retries. The default retries forever without delay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total read-mutate-commit attempts; `None` means unbounded.
    pub max_attempts: Option<u32>,
    /// Pause before re-reading after a conflict.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    fn allows_another_attempt(&self, attempts: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempts < max)
    }
}

/// Result of [`update_installation`].
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOutcome {
    /// The document as committed, or as read when nothing was written.
    pub document: InstallationDocument,
    /// Whether a write was committed.
    pub committed: bool,
    /// Read-mutate-commit cycles performed, including the final one.
    pub attempts: u32,
}

/// Reads the current document of an installation.
pub async fn get_installation<S>(store: &S, id: &str) -> Result<InstallationDocument, AppError>
where
    S: KvStore + ?Sized,
{
    validate_installation_id(id)?;
    let entry = store.get(&installation_key(id)).await?;
    InstallationDocument::from_entry(&entry)
}

/// Applies `mutate` to an installation document without losing concurrent
/// updates.
///
/// `mutate` receives an owned copy of the current document and returns the
/// patch to write, or `None` for no change (in which case nothing is
/// committed). It may be invoked several times, once per conflict.
///
/// # Errors
///
/// - [`AppError::Gone`] once the installation has a tombstone.
/// - [`AppError::RetriesExhausted`] when `policy` bounds the attempts.
/// - [`AppError::Transport`] for store failures, which are never retried here.
/// - Any error returned by `mutate`.
pub async fn update_installation<S, F, Fut>(
    store: &S,
    id: &str,
    policy: &RetryPolicy,
    mut mutate: F,
) -> Result<UpdateOutcome, AppError>
where
    S: KvStore + ?Sized,
    F: FnMut(InstallationDocument) -> Fut,
    Fut: Future<Output = Result<Option<Patch>, AppError>>,
{
    validate_installation_id(id)?;
    let key = installation_key(id);
    let tombstone = tombstone_key(id);
    let mut attempts = 0u32;

    loop {
        attempts += 1;

        let entries = store.get_many(&[key.clone(), tombstone.clone()]).await?;
        let [entry, tombstone_entry]: [Entry; 2] = entries
            .try_into()
            .map_err(|_| AppError::invariant("store returned the wrong number of entries"))?;
        if tombstone_entry.exists() {
            return Err(AppError::gone(id));
        }

        let current = InstallationDocument::from_entry(&entry)?;
        let patch = match mutate(current.clone()).await? {
            Some(patch) if !patch.is_empty() => patch,
            _ => {
                return Ok(UpdateOutcome {
                    document: current,
                    committed: false,
                    attempts,
                });
            }
        };

        let mut next = current;
        patch.apply_to(&mut next);

        let op = AtomicOperation::new()
            .check_absent(tombstone.clone())
            .check_entry(&entry)
            .set(key.clone(), serde_json::to_value(&next)?);

        match store.commit(op).await? {
            CommitResult::Committed { versionstamp } => {
                tracing::debug!(
                    installation_id = %id,
                    versionstamp = %versionstamp,
                    attempts,
                    "Installation updated"
                );
                return Ok(UpdateOutcome {
                    document: next,
                    committed: true,
                    attempts,
                });
            }
            CommitResult::Conflict => {
                // A conflict does not say which check failed.
                if store.get(&tombstone).await?.exists() {
                    return Err(AppError::gone(id));
                }
                tracing::debug!(installation_id = %id, attempt = attempts, "Update conflicted");
                if !policy.allows_another_attempt(attempts) {
                    return Err(AppError::RetriesExhausted {
                        id: id.to_string(),
                        attempts,
                    });
                }
                if !policy.backoff.is_zero() {
                    tokio::time::sleep(policy.backoff).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assetwatch_db_memory::InMemoryStore;
    use assetwatch_storage::AssetType;
    use serde_json::json;

    #[test]
    fn test_installation_id_validation() {
        assert!(is_valid_installation_id("abc-DEF_123"));
        assert!(!is_valid_installation_id(""));
        assert!(!is_valid_installation_id("../etc"));
        assert!(!is_valid_installation_id("a/b"));
        assert!(!is_valid_installation_id("a b"));
    }

    #[test]
    fn test_document_from_missing_or_null() {
        let missing = Entry::missing(installation_key("a"));
        assert_eq!(
            InstallationDocument::from_entry(&missing).unwrap(),
            InstallationDocument::default()
        );

        let mut null_state = Entry::missing(installation_key("a"));
        null_state.value = Some(json!({"state": null}));
        let doc = InstallationDocument::from_entry(&null_state).unwrap();
        assert!(doc.state.domains.is_empty());

        let mut legacy = Entry::missing(installation_key("a"));
        legacy.value = Some(json!({"state": {"domains": ["a.example"]}}));
        let doc = InstallationDocument::from_entry(&legacy).unwrap();
        assert_eq!(doc.state.domains, vec!["a.example"]);
        assert!(doc.assets.is_empty());
    }

    #[test]
    fn test_malformed_document() {
        let mut entry = Entry::missing(installation_key("a"));
        entry.value = Some(json!({"state": {"domains": "not a list"}}));
        assert!(matches!(
            InstallationDocument::from_entry(&entry),
            Err(AppError::Serialization(_))
        ));
    }

    #[test]
    fn test_retry_policy() {
        let unbounded = RetryPolicy::unbounded();
        assert!(unbounded.allows_another_attempt(u32::MAX - 1));

        let bounded = RetryPolicy::unbounded().with_max_attempts(2);
        assert!(bounded.allows_another_attempt(1));
        assert!(!bounded.allows_another_attempt(2));
    }

    #[tokio::test]
    async fn test_patch_merges_into_document() {
        let store = InMemoryStore::new();
        store
            .seed(
                installation_key("a"),
                json!({"state": {"domains": ["a.example"]}, "assets": []}),
            )
            .await;

        let outcome = update_installation(&store, "a", &RetryPolicy::unbounded(), |_| async {
            Ok(Some(Patch::assets(vec![Asset::new(AssetType::Ip, "10.0.0.1")])))
        })
        .await
        .unwrap();

        assert!(outcome.committed);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.document.state.domains, vec!["a.example"]);
        assert_eq!(outcome.document.assets.len(), 1);
        assert_eq!(get_installation(&store, "a").await.unwrap(), outcome.document);
    }

    #[tokio::test]
    async fn test_empty_patch_is_a_noop() {
        let store = InMemoryStore::new();
        let outcome = update_installation(&store, "a", &RetryPolicy::unbounded(), |_| async {
            Ok(Some(Patch::default()))
        })
        .await
        .unwrap();

        assert!(!outcome.committed);
        assert_eq!(store.stats().commit_attempts(), 0);
    }

    #[tokio::test]
    async fn test_invalid_id_fails_before_io() {
        let store = InMemoryStore::new();
        let err = update_installation(&store, "../x", &RetryPolicy::unbounded(), |_| async {
            Ok(None)
        })
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::Invariant(_)));
        assert_eq!(store.stats().gets, 0);
    }

    #[tokio::test]
    async fn test_mutate_error_propagates_without_write() {
        let store = InMemoryStore::new();
        let err = update_installation(&store, "a", &RetryPolicy::unbounded(), |_| async {
            Err(AppError::invariant("refused"))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::Invariant(ref m) if m == "refused"));
        assert_eq!(store.stats().commit_attempts(), 0);
    }
}
