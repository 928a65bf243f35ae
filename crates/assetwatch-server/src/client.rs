//! HTTP client for the remote app API.
//!
//! One [`ApiClient`] serves both the key-value store and the installation
//! directory; all routes live under `{url}/app/`.

use std::time::Duration;

use assetwatch_storage::{
    AppPlatform, AtomicOperation, CommitResult, Entry, InstallationSummary, Key, KvStore,
    ListPage, StorageError, Versionstamp,
};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::ApiConfig;
use crate::installation::is_valid_installation_id;

pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    token: String,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct GetRequest<'a> {
    key: &'a Key,
}

#[derive(Serialize)]
struct ListRequest<'a> {
    prefix: &'a Key,
    cursor: Option<&'a str>,
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct ListResponse {
    #[serde(default)]
    entries: Vec<Entry>,
    #[serde(default)]
    cursor: Option<String>,
}

#[derive(Deserialize)]
struct AtomicResponse {
    ok: bool,
    #[serde(default)]
    versionstamp: Option<Versionstamp>,
}

/// Older API versions answer with a bare array and never paginate.
#[derive(Deserialize)]
#[serde(untagged)]
enum InstallationsResponse {
    Page {
        installations: Vec<InstallationSummary>,
        #[serde(default)]
        cursor: Option<String>,
    },
    Legacy(Vec<InstallationSummary>),
}

impl ApiClient {
    /// Creates a client for the API rooted at `base_url`.
    ///
    /// `timeout` bounds every request end to end.
    pub fn new(
        base_url: &str,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, StorageError> {
        let mut root = Url::parse(base_url)
            .map_err(|e| StorageError::internal(format!("invalid API url {base_url:?}: {e}")))?;
        if !root.path().ends_with('/') {
            let path = format!("{}/", root.path());
            root.set_path(&path);
        }
        let base_url = root
            .join("app/")
            .map_err(|e| StorageError::internal(format!("invalid API url {base_url:?}: {e}")))?;

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StorageError::internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url,
            token: token.into(),
        })
    }

    pub fn from_config(config: &ApiConfig) -> Result<Self, StorageError> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| StorageError::internal("api.url is not configured"))?;
        Self::new(
            url,
            config.token.clone().unwrap_or_default(),
            Duration::from_millis(config.request_timeout_ms),
        )
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, StorageError> {
        self.base_url
            .join(path)
            .map_err(|e| StorageError::internal(format!("invalid endpoint {path:?}: {e}")))
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, StorageError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let resp = send(self.request(reqwest::Method::POST, self.endpoint(path)?).json(body)).await?;
        handle_response(resp).await
    }
}

async fn send(req: reqwest::RequestBuilder) -> Result<reqwest::Response, StorageError> {
    req.send().await.map_err(|e| {
        if e.is_timeout() {
            StorageError::timeout(e.to_string())
        } else {
            StorageError::transport(e.to_string())
        }
    })
}

async fn error_for_status(resp: reqwest::Response) -> StorageError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    let message = if body.trim().is_empty() {
        status.canonical_reason().unwrap_or("unknown status").to_string()
    } else {
        body
    };
    StorageError::http(status.as_u16(), message)
}

async fn handle_response<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, StorageError> {
    if !resp.status().is_success() {
        return Err(error_for_status(resp).await);
    }
    let body = resp.bytes().await.map_err(|e| {
        if e.is_timeout() {
            StorageError::timeout(e.to_string())
        } else {
            StorageError::transport(e.to_string())
        }
    })?;
    Ok(serde_json::from_slice(&body)?)
}

#[async_trait]
impl KvStore for ApiClient {
    async fn get(&self, key: &Key) -> Result<Entry, StorageError> {
        let entry: Entry = self.post("kv/get", &GetRequest { key }).await?;
        if entry.key != *key {
            return Err(StorageError::serialization(format!(
                "kv/get for {key} answered for {}",
                entry.key
            )));
        }
        Ok(entry)
    }

    async fn list(
        &self,
        prefix: &Key,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> Result<ListPage<Entry>, StorageError> {
        let resp: ListResponse = self
            .post(
                "kv/list",
                &ListRequest {
                    prefix,
                    cursor,
                    limit,
                },
            )
            .await?;
        Ok(ListPage {
            items: resp.entries,
            cursor: resp.cursor.filter(|c| !c.is_empty()),
        })
    }

    async fn commit(&self, op: AtomicOperation) -> Result<CommitResult, StorageError> {
        let resp = send(
            self.request(reqwest::Method::POST, self.endpoint("kv/atomic")?)
                .json(&op),
        )
        .await?;
        if resp.status() == StatusCode::CONFLICT {
            return Ok(CommitResult::Conflict);
        }

        let body: AtomicResponse = handle_response(resp).await?;
        match (body.ok, body.versionstamp) {
            (true, Some(versionstamp)) => Ok(CommitResult::Committed { versionstamp }),
            (true, None) => Err(StorageError::serialization(
                "kv/atomic succeeded without a versionstamp",
            )),
            (false, _) => Ok(CommitResult::Conflict),
        }
    }

    fn backend_name(&self) -> &'static str {
        "http"
    }
}

#[async_trait]
impl AppPlatform for ApiClient {
    async fn list_installations(
        &self,
        cursor: Option<&str>,
    ) -> Result<ListPage<InstallationSummary>, StorageError> {
        let mut req = self.request(reqwest::Method::GET, self.endpoint("installations")?);
        if let Some(cursor) = cursor {
            req = req.query(&[("cursor", cursor)]);
        }
        let resp: InstallationsResponse = handle_response(send(req).await?).await?;
        Ok(match resp {
            InstallationsResponse::Page {
                installations,
                cursor,
            } => ListPage {
                items: installations,
                cursor: cursor.filter(|c| !c.is_empty()),
            },
            InstallationsResponse::Legacy(installations) => ListPage::last(installations),
        })
    }

    async fn remove_installation(&self, id: &str) -> Result<(), StorageError> {
        if !is_valid_installation_id(id) {
            return Err(StorageError::invalid_key(format!(
                "invalid installation ID {id:?}"
            )));
        }
        let url = self.endpoint(&format!("installations/{id}"))?;
        let resp = send(self.request(reqwest::Method::DELETE, url)).await?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            tracing::debug!(installation_id = %id, "Installation already removed from platform");
            return Ok(());
        }
        if !status.is_success() {
            return Err(error_for_status(resp).await);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_joins_app_prefix() {
        let client = ApiClient::new("https://api.example.com/v1", "t", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url().as_str(), "https://api.example.com/v1/app/");

        let client = ApiClient::new("https://api.example.com/v1/", "t", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url().as_str(), "https://api.example.com/v1/app/");

        let client = ApiClient::new("https://api.example.com", "t", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url().as_str(), "https://api.example.com/app/");
    }

    #[test]
    fn test_invalid_url_rejected() {
        let err = ApiClient::new("not a url", "t", Duration::from_secs(1)).unwrap_err();
        assert!(err.to_string().contains("invalid API url"));
    }

    #[test]
    fn test_installations_response_shapes() {
        let page: InstallationsResponse = serde_json::from_str(
            r#"{"installations":[{"id":"a","status":"paused"}],"cursor":"2"}"#,
        )
        .unwrap();
        assert!(matches!(page, InstallationsResponse::Page { ref cursor, .. } if cursor.as_deref() == Some("2")));

        let legacy: InstallationsResponse =
            serde_json::from_str(r#"[{"id":"a","removed":true}]"#).unwrap();
        assert!(matches!(legacy, InstallationsResponse::Legacy(ref items) if items.len() == 1));
    }
}
