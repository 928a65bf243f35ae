//! In-memory backend for assetwatch.
//!
//! This crate provides in-process implementations of the `KvStore` and
//! `AppPlatform` traits from `assetwatch-storage`. They back the test suite
//! and local runs without a remote API.
//!
//! # Example
//!
//! ```ignore
//! use assetwatch_db_memory::InMemoryStore;
//! use assetwatch_storage::{AtomicOperation, Key, KvStore};
//!
//! let store = InMemoryStore::new();
//! let key = Key::from(["installations", "abc"]);
//! let entry = store.get(&key).await?;
//! store
//!     .commit(AtomicOperation::new().check_entry(&entry).set(key, serde_json::json!({})))
//!     .await?;
//! ```

mod platform;
mod storage;

pub use assetwatch_storage::{AppPlatform, KvStore, StorageError};

pub use platform::InMemoryPlatform;
pub use storage::{InMemoryStore, OperationStats, StorageOptions};

/// Creates a shareable in-memory store.
pub fn create_store() -> std::sync::Arc<InMemoryStore> {
    std::sync::Arc::new(InMemoryStore::new())
}

/// Creates a shareable in-memory platform.
pub fn create_platform() -> std::sync::Arc<InMemoryPlatform> {
    std::sync::Arc::new(InMemoryPlatform::new())
}
