pub mod assets;
pub mod client;
pub mod config;
pub mod deletion;
pub mod domains;
pub mod error;
pub mod installation;
pub mod observability;
pub mod poller;
pub mod resolver;

use std::sync::Arc;

use assetwatch_storage::{DynAppPlatform, DynKvStore, StorageError};

pub use assets::{ResolverFailurePolicy, asset_key, derive_assets};
pub use client::ApiClient;
pub use config::{ApiBackend, AppConfig};
pub use deletion::{DeletionReport, remove_installation};
pub use domains::{add_domain, get_domains, remove_domain};
pub use error::{AppError, ErrorKind};
pub use installation::{
    InstallationDocument, InstallationState, Patch, RetryPolicy, UpdateOutcome, get_installation,
    update_installation,
};
pub use observability::init_tracing;
pub use poller::{Poller, PollerConfig, PollerHandle, SweepReport};
pub use resolver::{ResolveError, Resolver, StaticResolver, SystemResolver};

/// Create the store and platform for the configured backend.
///
/// ## Backends
///
/// - **http**: one [`ApiClient`] serves both roles
/// - **memory**: in-process store and an empty platform, for local runs
pub fn create_backends(config: &AppConfig) -> Result<(DynKvStore, DynAppPlatform), StorageError> {
    match config.api.backend {
        ApiBackend::Http => {
            let client = Arc::new(ApiClient::from_config(&config.api)?);
            tracing::info!(url = %client.base_url(), "Using remote app API");
            let store: DynKvStore = client.clone();
            let platform: DynAppPlatform = client;
            Ok((store, platform))
        }
        ApiBackend::Memory => {
            tracing::warn!("Using in-memory backend; nothing will be persisted");
            let store: DynKvStore = assetwatch_db_memory::create_store();
            let platform: DynAppPlatform = assetwatch_db_memory::create_platform();
            Ok((store, platform))
        }
    }
}
