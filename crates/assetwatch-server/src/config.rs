use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::assets::ResolverFailurePolicy;
use crate::installation::RetryPolicy;
use crate::poller::PollerConfig;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub poller: PollerSettings,
    /// Conditional update retry policy
    #[serde(default)]
    pub update: UpdateSettings,
    #[serde(default)]
    pub resolver: ResolverSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // API validations
        if self.api.backend == ApiBackend::Http {
            if self.api.url.as_deref().unwrap_or("").is_empty() {
                return Err("api.url is required for the http backend".into());
            }
            if self.api.token.as_deref().unwrap_or("").is_empty() {
                return Err("api.token is required for the http backend".into());
            }
        }
        if self.api.request_timeout_ms == 0 {
            return Err("api.request_timeout_ms must be > 0".into());
        }
        // Poller validations
        if self.poller.interval_secs == 0 {
            return Err("poller.interval_secs must be > 0".into());
        }
        if self.poller.concurrency == 0 {
            return Err("poller.concurrency must be > 0".into());
        }
        if self.update.max_attempts == Some(0) {
            return Err("update.max_attempts must be > 0 when set".into());
        }
        if self.resolver.timeout_ms == 0 {
            return Err("resolver.timeout_ms must be > 0".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.api.request_timeout_ms)
    }

    pub fn resolver_timeout(&self) -> Duration {
        Duration::from_millis(self.resolver.timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.update.max_attempts,
            backoff: Duration::from_millis(self.update.backoff_ms),
        }
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            interval: Duration::from_secs(self.poller.interval_secs),
            concurrency: self.poller.concurrency,
            retry: self.retry_policy(),
            resolver_failures: if self.resolver.fail_open {
                ResolverFailurePolicy::FailOpen
            } else {
                ResolverFailurePolicy::FailClosed
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApiBackend {
    /// Remote app API over HTTP
    #[default]
    Http,
    /// In-process store, for local runs without an API
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub backend: ApiBackend,
    /// Base URL of the app API, e.g. https://api.example.com/v1
    #[serde(default)]
    pub url: Option<String>,
    /// Bearer token. Prefer ASSETWATCH__API__TOKEN (or API_TOKEN) over the file.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    90_000
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            backend: ApiBackend::default(),
            url: None,
            token: None,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerSettings {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Installations reconciled in parallel within one sweep
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_interval_secs() -> u64 {
    15
}
fn default_concurrency() -> usize {
    1
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            concurrency: default_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateSettings {
    /// Unset means retry conflicts until the commit succeeds
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverSettings {
    /// Treat resolver errors other than "not found" as an empty answer
    #[serde(default = "default_fail_open")]
    pub fail_open: bool,
    #[serde(default = "default_resolver_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_fail_open() -> bool {
    true
}
fn default_resolver_timeout_ms() -> u64 {
    10_000
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            fail_open: default_fail_open(),
            timeout_ms: default_resolver_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Print the module path of each event
    #[serde(default = "default_with_target")]
    pub with_target: bool,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_with_target() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            with_target: default_with_target(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        // Legacy deployments configure the API with bare API_URL / API_TOKEN.
        // They only fill in what neither the file nor ASSETWATCH__* sets.
        for (var, key) in [("API_URL", "api.url"), ("API_TOKEN", "api.token")] {
            if let Ok(value) = std::env::var(var) {
                builder = builder
                    .set_default(key, value)
                    .map_err(|e| format!("config default error: {e}"))?;
            }
        }
        let pathbuf = PathBuf::from(path.unwrap_or("assetwatch.toml"));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., ASSETWATCH__POLLER__INTERVAL_SECS=30
        builder = builder.add_source(
            Environment::with_prefix("ASSETWATCH")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}
