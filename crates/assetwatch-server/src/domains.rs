//! Domain list operations used by the interactive layer.
//!
//! All writes go through [`update_installation`], so they interleave safely
//! with reconciliation passes and with each other.

use assetwatch_storage::KvStore;

use crate::error::AppError;
use crate::installation::{Patch, RetryPolicy, get_installation, update_installation};

/// Returns the domains configured for an installation.
pub async fn get_domains<S>(store: &S, id: &str) -> Result<Vec<String>, AppError>
where
    S: KvStore + ?Sized,
{
    Ok(get_installation(store, id).await?.state.domains)
}

/// Appends a domain unless it is already present. Returns the resulting list.
pub async fn add_domain<S>(
    store: &S,
    id: &str,
    domain: &str,
    policy: &RetryPolicy,
) -> Result<Vec<String>, AppError>
where
    S: KvStore + ?Sized,
{
    let domain = domain.trim();
    if domain.is_empty() {
        return Err(AppError::invariant("domain must not be empty"));
    }

    let outcome = update_installation(store, id, policy, |document| {
        let domain = domain.to_string();
        async move {
            let mut state = document.state;
            if state.domains.contains(&domain) {
                return Ok(None);
            }
            state.domains.push(domain);
            Ok(Some(Patch::state(state)))
        }
    })
    .await?;

    Ok(outcome.document.state.domains)
}

/// Removes a domain if present. Returns the resulting list.
pub async fn remove_domain<S>(
    store: &S,
    id: &str,
    domain: &str,
    policy: &RetryPolicy,
) -> Result<Vec<String>, AppError>
where
    S: KvStore + ?Sized,
{
    let outcome = update_installation(store, id, policy, |document| {
        let domain = domain.to_string();
        async move {
            let mut state = document.state;
            let Some(index) = state.domains.iter().position(|d| *d == domain) else {
                return Ok(None);
            };
            state.domains.remove(index);
            Ok(Some(Patch::state(state)))
        }
    })
    .await?;

    Ok(outcome.document.state.domains)
}
