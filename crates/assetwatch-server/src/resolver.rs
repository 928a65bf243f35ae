//! Name resolution behind a trait, so derivation can be driven by fixed
//! answers in tests and by the system resolver in production.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

/// Why a name could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    /// The name does not exist. This is data, not a failure.
    #[error("name not found")]
    NotFound,

    #[error("resolution timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Other(String),
}

/// Resolves a domain name to its IPv4 addresses.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, domain: &str) -> Result<Vec<IpAddr>, ResolveError>;
}

/// Resolver backed by the operating system (`getaddrinfo`).
#[derive(Debug, Clone)]
pub struct SystemResolver {
    timeout: Duration,
}

impl SystemResolver {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for SystemResolver {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

/// Message fragments getaddrinfo uses for names that do not exist.
/// `WSAHOST_NOT_FOUND` and `WSANO_DATA`.
const WINDOWS_NOT_FOUND_CODES: &[i32] = &[11001, 11004];

/// getaddrinfo messages for a name without A records. Unix lookups carry no
/// OS error code, so the message is all there is.
const NOT_FOUND_MARKERS: &[&str] = &[
    "name or service not known",
    "nodename nor servname provided",
    "no address associated with hostname",
    "name does not resolve",
    "no such host is known",
];

fn classify_lookup_error(err: &std::io::Error) -> ResolveError {
    if err.kind() == std::io::ErrorKind::NotFound {
        return ResolveError::NotFound;
    }
    if cfg!(windows)
        && err
            .raw_os_error()
            .is_some_and(|code| WINDOWS_NOT_FOUND_CODES.contains(&code))
    {
        return ResolveError::NotFound;
    }

    let message = err.to_string();
    let lower = message.to_ascii_lowercase();
    if NOT_FOUND_MARKERS.iter().any(|marker| lower.contains(marker)) {
        ResolveError::NotFound
    } else {
        ResolveError::Other(message)
    }
}

#[async_trait]
impl Resolver for SystemResolver {
    async fn resolve(&self, domain: &str) -> Result<Vec<IpAddr>, ResolveError> {
        let lookup = tokio::net::lookup_host((domain, 0));
        let addrs = match tokio::time::timeout(self.timeout, lookup).await {
            Err(_) => return Err(ResolveError::Timeout(self.timeout)),
            Ok(Err(err)) => return Err(classify_lookup_error(&err)),
            Ok(Ok(addrs)) => addrs,
        };

        // A records only, in answer order, without duplicates.
        let mut ips: Vec<IpAddr> = Vec::new();
        for addr in addrs {
            let ip = addr.ip();
            if ip.is_ipv4() && !ips.contains(&ip) {
                ips.push(ip);
            }
        }
        Ok(ips)
    }
}

/// Resolver with fixed answers. Unknown names resolve to `NotFound`.
///
/// Counts every call, so callers can assert each domain was resolved once.
#[derive(Debug, Default)]
pub struct StaticResolver {
    answers: HashMap<String, Result<Vec<IpAddr>, ResolveError>>,
    calls: AtomicUsize,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_answer(mut self, domain: impl Into<String>, ips: &[IpAddr]) -> Self {
        self.answers.insert(domain.into(), Ok(ips.to_vec()));
        self
    }

    pub fn with_error(mut self, domain: impl Into<String>, err: ResolveError) -> Self {
        self.answers.insert(domain.into(), Err(err));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, domain: &str) -> Result<Vec<IpAddr>, ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answers
            .get(domain)
            .cloned()
            .unwrap_or(Err(ResolveError::NotFound))
    }
}
