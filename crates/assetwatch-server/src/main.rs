use std::env;
use std::sync::Arc;

use anyhow::Context;
use assetwatch_server::config::loader::load_config;
use assetwatch_server::{AppConfig, Poller, SystemResolver, create_backends, init_tracing};

const DEFAULT_CONFIG_PATH: &str = "assetwatch.toml";

/// Config file path and where it came from: `--config`, then
/// `ASSETWATCH_CONFIG`, then the default.
fn config_path() -> (String, &'static str) {
    if let Some(path) = env::args().skip_while(|arg| arg != "--config").nth(1) {
        return (path, "--config");
    }
    match env::var("ASSETWATCH_CONFIG") {
        Ok(path) if !path.is_empty() => (path, "ASSETWATCH_CONFIG"),
        _ => (DEFAULT_CONFIG_PATH.to_string(), "default"),
    }
}

#[tokio::main]
async fn main() {
    // A missing .env is fine
    if let Err(e) = dotenvy::dotenv()
        && !e.not_found()
    {
        eprintln!("Warning: Failed to load .env file: {e}");
    }

    let (path, source) = config_path();
    let cfg = match load_config(Some(&path)) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error ({path}, from {source}): {e}");
            std::process::exit(2);
        }
    };

    init_tracing(&cfg.logging);
    tracing::info!(
        path = %path,
        source,
        backend = ?cfg.api.backend,
        interval_secs = cfg.poller.interval_secs,
        "Configuration loaded"
    );

    if let Err(e) = run(cfg).await {
        tracing::error!(error = %format!("{e:#}"), "Asset poller exited");
        std::process::exit(1);
    }
}

async fn run(cfg: AppConfig) -> anyhow::Result<()> {
    let (store, platform) = create_backends(&cfg).context("failed to initialize backend")?;
    let resolver = Arc::new(SystemResolver::new(cfg.resolver_timeout()));

    let mut poller = Poller::new(store, platform, resolver, cfg.poller_config()).spawn();

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res.context("failed to listen for shutdown signal")?;
            tracing::info!("Shutdown signal received");
        }
        res = poller.join() => {
            res.context("poller task failed")?;
            anyhow::bail!("poller stopped unexpectedly");
        }
    }

    poller.shutdown().await.context("poller task failed")?;
    Ok(())
}
