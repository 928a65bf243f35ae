//! Error taxonomy for installation updates, derivation and deletion.

use assetwatch_storage::{ErrorCategory, StorageError};

use crate::resolver::ResolveError;

/// Errors surfaced by the installation operations.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// The remote store or platform failed; never retried here.
    #[error(transparent)]
    Transport(#[from] StorageError),

    /// The installation has a tombstone; no further writes are possible.
    #[error("Installation {id} has been removed")]
    Gone { id: String },

    /// The retry policy ran out before a conflict-free commit.
    #[error("Gave up updating installation {id} after {attempts} conflicting attempts")]
    RetriesExhausted { id: String, attempts: u32 },

    /// A caller or the store broke a contract (e.g. malformed installation id).
    #[error("Invariant violated: {0}")]
    Invariant(String),

    /// A resolver failure under the fail-closed policy.
    #[error("Failed to resolve {domain}: {source}")]
    Resolve {
        domain: String,
        #[source]
        source: ResolveError,
    },

    /// A stored document could not be decoded or encoded.
    #[error("Malformed installation document: {0}")]
    Serialization(String),
}

/// Closed set of error kinds for exhaustive dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Transport,
    Conflict,
    NotFound,
    Invariant,
}

impl AppError {
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant(message.into())
    }

    pub fn gone(id: impl Into<String>) -> Self {
        Self::Gone { id: id.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(err) => match err.category() {
                ErrorCategory::Validation | ErrorCategory::Internal => ErrorKind::Invariant,
                ErrorCategory::Transport | ErrorCategory::Protocol => ErrorKind::Transport,
            },
            Self::Gone { .. } => ErrorKind::NotFound,
            Self::RetriesExhausted { .. } => ErrorKind::Conflict,
            Self::Invariant(_) | Self::Serialization(_) => ErrorKind::Invariant,
            Self::Resolve { .. } => ErrorKind::Transport,
        }
    }

    pub fn is_gone(&self) -> bool {
        matches!(self, Self::Gone { .. })
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
