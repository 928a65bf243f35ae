//! Derivation of IP assets from an installation's domain list.

use assetwatch_storage::{Asset, AssetType};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use sha2::{Digest, Sha256};

use crate::error::AppError;
use crate::installation::{InstallationDocument, Patch};
use crate::resolver::{ResolveError, Resolver};

/// What to do when the resolver fails with anything other than `NotFound`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolverFailurePolicy {
    /// Log the failure and publish no assets for that domain.
    #[default]
    FailOpen,
    /// Fail the whole derivation for this installation.
    FailClosed,
}

/// Stable asset key for a domain: base64(sha256(domain)).
pub fn asset_key(domain: &str) -> String {
    STANDARD.encode(Sha256::digest(domain.as_bytes()))
}

/// Resolves every domain once and turns each address into an `ip` asset.
///
/// Names that do not exist yield no assets. Under [`ResolverFailurePolicy::FailOpen`]
/// other resolver failures are logged and skipped, so one bad domain never
/// keeps the others from being published.
pub async fn derive_assets<R>(
    resolver: &R,
    domains: &[String],
    policy: ResolverFailurePolicy,
) -> Result<Vec<Asset>, AppError>
where
    R: Resolver + ?Sized,
{
    let mut assets = Vec::new();
    for domain in domains {
        let ips = match resolver.resolve(domain).await {
            Ok(ips) => ips,
            Err(ResolveError::NotFound) => Vec::new(),
            Err(err) => match policy {
                ResolverFailurePolicy::FailOpen => {
                    tracing::warn!(domain = %domain, error = %err, "Domain resolution failed");
                    Vec::new()
                }
                ResolverFailurePolicy::FailClosed => {
                    return Err(AppError::Resolve {
                        domain: domain.clone(),
                        source: err,
                    });
                }
            },
        };
        if ips.is_empty() {
            continue;
        }

        let key = asset_key(domain);
        assets.extend(ips.into_iter().map(|ip| {
            Asset::new(AssetType::Ip, ip.to_string())
                .with_key(key.clone())
                .with_prop("title", domain.as_str())
        }));
    }
    Ok(assets)
}

/// Patch function for the reconciliation pass: recompute the full asset
/// list from the document's current domains. State is left untouched.
pub async fn derive_patch<R>(
    resolver: &R,
    document: InstallationDocument,
    policy: ResolverFailurePolicy,
) -> Result<Option<Patch>, AppError>
where
    R: Resolver + ?Sized,
{
    let assets = derive_assets(resolver, &document.state.domains, policy).await?;
    Ok(Some(Patch::assets(assets)))
}
