//! Storage types for the remote store abstraction layer.
//!
//! This module defines the key space, the conditional transaction builder,
//! paginated listings and the app platform records shared by all backends.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A hierarchical key, e.g. `["installations", "abc"]`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key(Vec<String>);

impl Key {
    /// Creates a key from its parts.
    #[must_use]
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    /// Returns the parts of this key.
    #[must_use]
    pub fn parts(&self) -> &[String] {
        &self.0
    }

    /// Returns a new key with `part` appended.
    #[must_use]
    pub fn child(&self, part: impl Into<String>) -> Self {
        let mut parts = self.0.clone();
        parts.push(part.into());
        Self(parts)
    }

    /// Part-wise prefix match. A key is a prefix of itself.
    #[must_use]
    pub fn starts_with(&self, prefix: &Key) -> bool {
        self.0.len() >= prefix.0.len() && self.0.iter().zip(&prefix.0).all(|(a, b)| a == b)
    }

    /// Returns true if the key has no parts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<const N: usize> From<[&str; N]> for Key {
    fn from(parts: [&str; N]) -> Self {
        Self::new(parts)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

/// Opaque version token handed out by the store on every read and write.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Versionstamp(String);

impl Versionstamp {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Versionstamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A key together with its current value and version, as read from the store.
///
/// A missing key is represented with `value: None` and `versionstamp: None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub key: Key,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub versionstamp: Option<Versionstamp>,
}

impl Entry {
    /// Creates the entry for a key that does not exist.
    #[must_use]
    pub fn missing(key: Key) -> Self {
        Self {
            key,
            value: None,
            versionstamp: None,
        }
    }

    /// Returns true if the key exists in the store.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.versionstamp.is_some()
    }
}

/// A precondition of an atomic commit.
///
/// `versionstamp: None` asserts that the key is absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Check {
    pub key: Key,
    pub versionstamp: Option<Versionstamp>,
}

/// A write performed by an atomic commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Mutation {
    Set { key: Key, value: Value },
    Delete { key: Key },
}

impl Mutation {
    #[must_use]
    pub fn key(&self) -> &Key {
        match self {
            Self::Set { key, .. } | Self::Delete { key } => key,
        }
    }
}

/// A multi-key conditional write: either all checks hold and every
/// mutation is applied, or nothing is written.
///
/// ```ignore
/// let op = AtomicOperation::new()
///     .check_absent(Key::from(["tombstones", id]))
///     .check_entry(&entry)
///     .set(entry.key.clone(), value);
/// store.commit(op).await?;
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AtomicOperation {
    pub checks: Vec<Check>,
    pub mutations: Vec<Mutation>,
}

impl AtomicOperation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Asserts that `key` is currently at `versionstamp` (or absent for `None`).
    #[must_use]
    pub fn check(mut self, key: Key, versionstamp: Option<Versionstamp>) -> Self {
        self.checks.push(Check { key, versionstamp });
        self
    }

    /// Asserts that `key` does not exist.
    #[must_use]
    pub fn check_absent(self, key: Key) -> Self {
        self.check(key, None)
    }

    /// Asserts that the entry has not changed since it was read.
    #[must_use]
    pub fn check_entry(self, entry: &Entry) -> Self {
        self.check(entry.key.clone(), entry.versionstamp.clone())
    }

    #[must_use]
    pub fn set(mut self, key: Key, value: Value) -> Self {
        self.mutations.push(Mutation::Set { key, value });
        self
    }

    #[must_use]
    pub fn delete(mut self, key: Key) -> Self {
        self.mutations.push(Mutation::Delete { key });
        self
    }

    /// Returns true if the operation would not write anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }
}

/// Outcome of an atomic commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitResult {
    /// All checks held; the mutations were applied under this version.
    Committed { versionstamp: Versionstamp },
    /// At least one check failed; nothing was written.
    Conflict,
}

impl CommitResult {
    #[must_use]
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }
}

/// One page of a cursor-based listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListPage<T> {
    pub items: Vec<T>,
    /// Cursor for the next page; `None` on the last page.
    #[serde(default)]
    pub cursor: Option<String>,
}

impl<T> ListPage<T> {
    #[must_use]
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            cursor: None,
        }
    }

    #[must_use]
    pub fn is_last(&self) -> bool {
        self.cursor.is_none()
    }
}

/// Lifecycle status of an installation, controlled by the app platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallationStatus {
    Active,
    Paused,
    Uninstalled,
}

impl fmt::Display for InstallationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Paused => write!(f, "paused"),
            Self::Uninstalled => write!(f, "uninstalled"),
        }
    }
}

/// An installation as enumerated by the app platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawInstallationSummary")]
pub struct InstallationSummary {
    pub id: String,
    pub status: InstallationStatus,
}

impl InstallationSummary {
    #[must_use]
    pub fn new(id: impl Into<String>, status: InstallationStatus) -> Self {
        Self {
            id: id.into(),
            status,
        }
    }
}

/// Wire shape accepting both `status` and the legacy `removed` flag.
#[derive(Deserialize)]
struct RawInstallationSummary {
    id: String,
    #[serde(default)]
    status: Option<InstallationStatus>,
    #[serde(default)]
    removed: Option<bool>,
}

impl From<RawInstallationSummary> for InstallationSummary {
    fn from(raw: RawInstallationSummary) -> Self {
        let status = match (raw.status, raw.removed) {
            (Some(status), _) => status,
            (None, Some(true)) => InstallationStatus::Uninstalled,
            (None, _) => InstallationStatus::Active,
        };
        Self { id: raw.id, status }
    }
}

/// Kinds of asset the platform understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    Ip,
    Domain,
    Email,
    Opaque,
}

/// A derived fact published for an installation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    #[serde(rename = "type")]
    pub asset_type: AssetType,
    pub value: String,
    /// Stable identity used by the platform to replace the asset across passes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub props: Map<String, Value>,
}

impl Asset {
    #[must_use]
    pub fn new(asset_type: AssetType, value: impl Into<String>) -> Self {
        Self {
            asset_type,
            value: value.into(),
            key: None,
            props: Map::new(),
        }
    }

    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_prop(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.props.insert(name.into(), value.into());
        self
    }
}
