//! Background reconciliation of installation assets.
//!
//! Every sweep walks the installation directory page by page. Uninstalled
//! installations are removed, paused ones are skipped and active ones get
//! their asset list recomputed from their domains. A failure is contained to
//! the installation it happened on; the sweep moves on and the loop never
//! stops on its own.

use std::sync::Arc;
use std::time::Duration;

use assetwatch_storage::{
    AppPlatform, DynAppPlatform, DynKvStore, InstallationStatus, InstallationSummary, KvStore,
    StorageError, list_installations,
};
use futures_util::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::assets::{ResolverFailurePolicy, derive_patch};
use crate::deletion::remove_installation;
use crate::error::AppError;
use crate::installation::{RetryPolicy, update_installation};
use crate::resolver::Resolver;

/// Configuration for the poller.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Pause between the end of one sweep and the start of the next.
    pub interval: Duration,
    /// Installations processed in parallel within a sweep.
    pub concurrency: usize,
    pub retry: RetryPolicy,
    pub resolver_failures: ResolverFailurePolicy,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            concurrency: 1,
            retry: RetryPolicy::unbounded(),
            resolver_failures: ResolverFailurePolicy::FailOpen,
        }
    }
}

/// Counts of what one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub seen: usize,
    /// Active installations whose asset list was written.
    pub updated: usize,
    /// Active installations where nothing needed writing.
    pub unchanged: usize,
    pub removed: usize,
    pub paused: usize,
    /// Active installations found tombstoned mid-sweep.
    pub gone: usize,
    pub failed: usize,
    /// False when enumeration failed before reaching the last page.
    pub complete: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Updated,
    Unchanged,
    Removed,
    Paused,
}

enum Step {
    Processed(InstallationSummary, Result<Action, AppError>),
    ListFailed(StorageError),
}

/// Drives the reconciliation loop over all installations.
pub struct Poller {
    store: DynKvStore,
    platform: DynAppPlatform,
    resolver: Arc<dyn Resolver>,
    config: PollerConfig,
}

/// Handle to a poller running in a background task.
pub struct PollerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Signals shutdown and waits for the current sweep or sleep to stop.
    pub async fn shutdown(self) -> Result<(), tokio::task::JoinError> {
        let _ = self.shutdown.send(true);
        self.task.await
    }

    /// Waits for the task to finish, which only happens on panic or shutdown.
    pub async fn join(&mut self) -> Result<(), tokio::task::JoinError> {
        (&mut self.task).await
    }
}

impl Poller {
    pub fn new(
        store: DynKvStore,
        platform: DynAppPlatform,
        resolver: Arc<dyn Resolver>,
        config: PollerConfig,
    ) -> Self {
        Self {
            store,
            platform,
            resolver,
            config,
        }
    }

    /// Start the poller in a background task.
    pub fn spawn(self) -> PollerHandle {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move { self.run(shutdown_rx).await });
        PollerHandle { shutdown, task }
    }

    /// Runs sweeps until `shutdown` turns true or its sender is dropped.
    ///
    /// Shutdown interrupts both the sleep and an in-flight sweep. Dropping a
    /// sweep mid-way is safe: updates commit atomically or not at all, and
    /// deletion resumes on the next run.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            interval_secs = self.config.interval.as_secs(),
            concurrency = self.config.concurrency,
            store = self.store.backend_name(),
            "Asset poller started"
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown.wait_for(|stop| *stop) => break,
                report = self.sweep() => {
                    tracing::info!(
                        seen = report.seen,
                        updated = report.updated,
                        unchanged = report.unchanged,
                        removed = report.removed,
                        paused = report.paused,
                        gone = report.gone,
                        failed = report.failed,
                        complete = report.complete,
                        "Sweep finished"
                    );
                }
            }

            tokio::select! {
                biased;

                _ = shutdown.wait_for(|stop| *stop) => break,
                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }

        tracing::info!("Asset poller shutting down");
    }

    /// Processes every installation once.
    ///
    /// Never fails: per-installation errors and enumeration errors are
    /// logged and counted in the report.
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport {
            complete: true,
            ..SweepReport::default()
        };

        let mut steps = list_installations(self.platform.as_ref())
            .map(|item| async move {
                match item {
                    Ok(installation) => {
                        let span = tracing::info_span!(
                            "installation",
                            installation_id = %installation.id,
                            status = %installation.status
                        );
                        let result = self.reconcile(&installation).instrument(span).await;
                        Step::Processed(installation, result)
                    }
                    Err(err) => Step::ListFailed(err),
                }
            })
            .buffer_unordered(self.config.concurrency.max(1));

        while let Some(step) = steps.next().await {
            match step {
                Step::Processed(_, Ok(action)) => {
                    report.seen += 1;
                    match action {
                        Action::Updated => report.updated += 1,
                        Action::Unchanged => report.unchanged += 1,
                        Action::Removed => report.removed += 1,
                        Action::Paused => report.paused += 1,
                    }
                }
                Step::Processed(installation, Err(err)) if err.is_gone() => {
                    report.seen += 1;
                    report.gone += 1;
                    tracing::info!(
                        installation_id = %installation.id,
                        "Installation removed during sweep"
                    );
                }
                Step::Processed(installation, Err(err)) => {
                    report.seen += 1;
                    report.failed += 1;
                    tracing::error!(
                        installation_id = %installation.id,
                        status = %installation.status,
                        kind = ?err.kind(),
                        error = %err,
                        "Failed to reconcile installation"
                    );
                }
                Step::ListFailed(err) => {
                    report.complete = false;
                    tracing::error!(
                        error = %err,
                        category = %err.category(),
                        http_status = ?err.status(),
                        "Failed to list installations"
                    );
                }
            }
        }

        report
    }

    async fn reconcile(&self, installation: &InstallationSummary) -> Result<Action, AppError> {
        reconcile_installation(
            self.store.as_ref(),
            self.platform.as_ref(),
            self.resolver.as_ref(),
            &self.config,
            installation,
        )
        .await
    }
}

async fn reconcile_installation(
    store: &dyn KvStore,
    platform: &dyn AppPlatform,
    resolver: &dyn Resolver,
    config: &PollerConfig,
    installation: &InstallationSummary,
) -> Result<Action, AppError> {
    match installation.status {
        InstallationStatus::Uninstalled => {
            remove_installation(store, platform, &installation.id).await?;
            Ok(Action::Removed)
        }
        InstallationStatus::Paused => Ok(Action::Paused),
        InstallationStatus::Active => {
            let policy = config.resolver_failures;
            let outcome = update_installation(store, &installation.id, &config.retry, |document| {
                derive_patch(resolver, document, policy)
            })
            .await?;
            if outcome.committed {
                tracing::debug!(
                    assets = outcome.document.assets.len(),
                    attempts = outcome.attempts,
                    "Assets published"
                );
                Ok(Action::Updated)
            } else {
                Ok(Action::Unchanged)
            }
        }
    }
}
