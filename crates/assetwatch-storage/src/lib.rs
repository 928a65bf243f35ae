//! # assetwatch-storage
//!
//! Contracts for the remote services assetwatch depends on.
//!
//! This crate defines the traits and types that every backend must
//! implement. It does not contain any implementations - those are provided
//! by separate crates (`assetwatch-db-memory`, and the HTTP client in
//! `assetwatch-server`).
//!
//! ## Overview
//!
//! - [`KvStore`]: versioned reads, prefix listing and multi-key conditional
//!   commits (compare-and-swap on a [`Versionstamp`]).
//! - [`AppPlatform`]: the installation directory and the removal
//!   notification.
//!
//! ## Example
//!
//! ```ignore
//! use assetwatch_storage::{AtomicOperation, CommitResult, Key, KvStore};
//!
//! async fn mark_seen(store: &dyn KvStore, id: &str) -> Result<bool, StorageError> {
//!     let entry = store.get(&Key::from(["seen", id])).await?;
//!     let op = AtomicOperation::new()
//!         .check_entry(&entry)
//!         .set(entry.key.clone(), serde_json::json!(true));
//!     Ok(store.commit(op).await?.is_committed())
//! }
//! ```

mod error;
mod traits;
mod types;

pub use error::{ErrorCategory, StorageError};
pub use traits::{AppPlatform, KvStore, list_entries, list_installations};
pub use types::{
    Asset, AssetType, AtomicOperation, Check, CommitResult, Entry, InstallationStatus,
    InstallationSummary, Key, ListPage, Mutation, Versionstamp,
};

/// Type alias for a shared key-value store trait object.
pub type DynKvStore = std::sync::Arc<dyn KvStore>;

/// Type alias for a shared app platform trait object.
pub type DynAppPlatform = std::sync::Arc<dyn AppPlatform>;
