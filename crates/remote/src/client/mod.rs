//! HTTP clients for the remote cache services

pub mod module;
pub mod project;

pub use module::ModuleCacheClient;
pub use project::ProjectCacheClient;

use crate::config::RemoteConfig;
use crate::error::{RemoteError, Result};
use crate::multipart::{CompletedPart, PartRequest};
use artifex_cache::{CacheCategory, CacheStorableItem};
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Operations a remote tier needs from its service
#[async_trait]
pub trait RemoteCacheClient: Send + Sync {
    /// Download the payload archive for `item` to `destination`
    async fn download(
        &self,
        item: &CacheStorableItem,
        category: CacheCategory,
        destination: &Path,
    ) -> Result<()>;

    /// Open a multipart upload session, returning its id
    async fn start_upload(&self, item: &CacheStorableItem, category: CacheCategory)
    -> Result<String>;

    /// Presigned URL for one part of an open session
    async fn generate_upload_url(
        &self,
        item: &CacheStorableItem,
        category: CacheCategory,
        upload_id: &str,
        part: PartRequest,
    ) -> Result<String>;

    /// Finish a session with its ordered parts
    async fn complete_upload(
        &self,
        item: &CacheStorableItem,
        category: CacheCategory,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<()>;

    /// Whether a selective-test action item is recorded for `hash`
    async fn action_item_exists(&self, hash: &str) -> Result<bool>;

    /// Record a selective-test action item for `hash`
    async fn put_action_item(&self, hash: &str) -> Result<()>;
}

/// How a service reports failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusMapping {
    /// Only 404 is meaningful; everything else is an unexpected status
    Generic,
    /// 401, 402, 403 and 404 map to dedicated error values
    Typed,
}

/// Authenticated connection to one remote cache server
#[derive(Clone)]
pub struct HttpChannel {
    http: reqwest::Client,
    base_url: String,
    token: SecretString,
    mapping: StatusMapping,
}

impl std::fmt::Debug for HttpChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpChannel")
            .field("base_url", &self.base_url)
            .field("mapping", &self.mapping)
            .finish_non_exhaustive()
    }
}

impl HttpChannel {
    /// Create a channel to `base_url`
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        token: SecretString,
        mapping: StatusMapping,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            mapping,
        }
    }

    /// The shared HTTP client
    #[must_use]
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Server base URL without a trailing slash
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET `path` on this server, authenticated
    pub fn get(&self, path: &str) -> RequestBuilder {
        self.authorized(self.http.get(format!("{}{path}", self.base_url)))
    }

    /// POST `path` on this server, authenticated
    pub fn post(&self, path: &str) -> RequestBuilder {
        self.authorized(self.http.post(format!("{}{path}", self.base_url)))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(self.token.expose_secret())
    }

    /// Send `request`, mapping transport failures and error statuses
    pub async fn send(&self, operation: &str, request: RequestBuilder) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::from_reqwest(operation, &e))?;
        self.check(operation, response).await
    }

    /// Send `request` and decode a JSON body
    pub async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        operation: &str,
        request: RequestBuilder,
    ) -> Result<T> {
        self.send(operation, request)
            .await?
            .json()
            .await
            .map_err(|e| RemoteError::invalid_response(operation, e.to_string()))
    }

    async fn check(&self, operation: &str, response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(RemoteError::not_found(operation));
        }
        if self.mapping == StatusMapping::Typed {
            let operation = operation.to_string();
            match status {
                StatusCode::UNAUTHORIZED => return Err(RemoteError::Unauthorized { operation }),
                StatusCode::FORBIDDEN => return Err(RemoteError::Forbidden { operation }),
                StatusCode::PAYMENT_REQUIRED => {
                    return Err(RemoteError::PaymentRequired { operation });
                }
                _ => {}
            }
        }
        Err(RemoteError::unexpected_status(
            operation,
            status.as_u16(),
            error_message(response).await,
        ))
    }
}

/// Build the `reqwest` client shared by every remote request
pub fn http_client(config: &RemoteConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("artifex/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| RemoteError::configuration(format!("failed to build HTTP client: {e}")))
}

/// Split an `account/project` handle
pub fn split_handle(full_handle: &str) -> Result<(String, String)> {
    match full_handle.split_once('/') {
        Some((account, project))
            if !account.is_empty() && !project.is_empty() && !project.contains('/') =>
        {
            Ok((account.to_string(), project.to_string()))
        }
        _ => Err(RemoteError::configuration(format!(
            "'{full_handle}' is not a valid handle, expected 'account/project'"
        ))),
    }
}

/// Stream a response body to `destination`, replacing any previous contents
pub async fn stream_to_file(operation: &str, mut response: Response, destination: &Path) -> Result<()> {
    let mut file = tokio::fs::File::create(destination)
        .await
        .map_err(|e| RemoteError::io(e, destination, "create"))?;
    let mut written = 0usize;
    while let Some(chunk) = response.chunk().await.map_err(|e| {
        if e.is_timeout() {
            RemoteError::timeout(operation)
        } else {
            RemoteError::transfer(operation, e.to_string())
        }
    })? {
        file.write_all(&chunk)
            .await
            .map_err(|e| RemoteError::io(e, destination, "write"))?;
        written += chunk.len();
    }
    file.flush()
        .await
        .map_err(|e| RemoteError::io(e, destination, "flush"))?;
    debug!(bytes = written, destination = %destination.display(), "Downloaded payload");
    Ok(())
}

/// Check a response from a presigned object-storage URL.
///
/// Any rejection is an [`RemoteError::ObjectStorage`], never one of the typed
/// auth errors: the URL carries its own authorization.
pub(crate) async fn check_presigned(operation: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    Err(RemoteError::object_storage(
        operation,
        status.as_u16(),
        error_message(response).await,
    ))
}

/// Body of the action item endpoints
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ActionItemBody<'a> {
    pub hash: &'a str,
}

/// Body of the multipart completion endpoints
#[derive(Debug, Serialize)]
pub(crate) struct CompleteBody<'a> {
    pub parts: &'a [CompletedPart],
}

/// Presigned URL returned by the part endpoints
#[derive(Debug, Deserialize)]
pub(crate) struct UrlResponse {
    pub url: String,
}

/// Session id returned by the start endpoints
#[derive(Debug, Deserialize)]
pub(crate) struct StartResponse {
    pub upload_id: String,
}

/// Look up a selective-test action item
pub(crate) async fn get_action_item(channel: &HttpChannel, account: &str, project: &str, hash: &str) -> Result<bool> {
    const OPERATION: &str = "action item lookup";
    let request = channel.get(&format!("/api/projects/{account}/{project}/cache/ac/{hash}"));
    match channel.send(OPERATION, request).await {
        Ok(_) => Ok(true),
        Err(RemoteError::NotFound { .. }) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Record a selective-test action item
pub(crate) async fn post_action_item(channel: &HttpChannel, account: &str, project: &str, hash: &str) -> Result<()> {
    const OPERATION: &str = "action item upload";
    let request = channel
        .post(&format!("/api/projects/{account}/{project}/cache/ac"))
        .json(&ActionItemBody { hash });
    channel.send(OPERATION, request).await?;
    Ok(())
}

async fn error_message(response: Response) -> String {
    const MAX_LEN: usize = 512;
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_LEN {
        let mut end = MAX_LEN;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_handle() {
        assert_eq!(
            split_handle("acme/app").unwrap(),
            ("acme".to_string(), "app".to_string())
        );
        assert!(split_handle("acme").is_err());
        assert!(split_handle("acme/").is_err());
        assert!(split_handle("a/b/c").is_err());
    }
}
