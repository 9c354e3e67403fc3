//! Client for the project-scoped binary cache
//!
//! Downloads go through a short-lived signed URL handed out by the lookup
//! service; uploads use the multipart endpoints under `/api/cache/multipart`.

use super::{
    CompleteBody, HttpChannel, RemoteCacheClient, StartResponse, UrlResponse, check_presigned,
    get_action_item, post_action_item, split_handle, stream_to_file,
};
use crate::error::{RemoteError, Result};
use crate::multipart::{CompletedPart, PartRequest};
use artifex_cache::{CacheCategory, CacheStorableItem};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

/// Download descriptor returned by the lookup service
#[derive(Debug, Clone, Deserialize)]
pub struct DownloadDescriptor {
    /// Signed URL of the payload archive
    pub url: String,
    /// Unix timestamp after which `url` stops working
    #[serde(default)]
    pub expires_at: Option<i64>,
}

/// Client scoped to one project handle
#[derive(Debug, Clone)]
pub struct ProjectCacheClient {
    channel: HttpChannel,
    project_id: String,
    account: String,
    project: String,
}

impl ProjectCacheClient {
    /// Create a client for `full_handle` (`account/project`)
    pub fn new(channel: HttpChannel, full_handle: &str) -> Result<Self> {
        let (account, project) = split_handle(full_handle)?;
        Ok(Self {
            channel,
            project_id: full_handle.to_string(),
            account,
            project,
        })
    }

    fn query<'a>(
        &'a self,
        item: &'a CacheStorableItem,
        category: CacheCategory,
    ) -> [(&'static str, &'a str); 4] {
        [
            ("project_id", self.project_id.as_str()),
            ("hash", item.hash.as_str()),
            ("name", item.name.as_str()),
            ("cache_category", category.wire_name()),
        ]
    }

    /// Whether the server holds a payload for `item`
    pub async fn exists(&self, item: &CacheStorableItem, category: CacheCategory) -> Result<bool> {
        const OPERATION: &str = "cache exists";
        let request = self
            .channel
            .get("/api/cache/exists")
            .query(&self.query(item, category));
        match self.channel.send(OPERATION, request).await {
            Ok(_) => Ok(true),
            Err(RemoteError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Ask the lookup service for a download descriptor
    pub async fn get(
        &self,
        item: &CacheStorableItem,
        category: CacheCategory,
    ) -> Result<DownloadDescriptor> {
        let request = self
            .channel
            .get("/api/cache")
            .query(&self.query(item, category));
        self.channel.send_json("cache get", request).await
    }
}

#[async_trait]
impl RemoteCacheClient for ProjectCacheClient {
    async fn download(
        &self,
        item: &CacheStorableItem,
        category: CacheCategory,
        destination: &Path,
    ) -> Result<()> {
        const OPERATION: &str = "cache download";
        let descriptor = self.get(item, category).await?;
        debug!(item = %item.name, hash = %item.hash, expires_at = ?descriptor.expires_at, "Resolved download URL");

        // The signed URL carries its own authorization
        let response = self
            .channel
            .http()
            .get(&descriptor.url)
            .send()
            .await
            .map_err(|e| RemoteError::from_reqwest(OPERATION, &e))?;
        let response = check_presigned(OPERATION, response).await?;
        stream_to_file(OPERATION, response, destination).await
    }

    async fn start_upload(
        &self,
        item: &CacheStorableItem,
        category: CacheCategory,
    ) -> Result<String> {
        let request = self
            .channel
            .post("/api/cache/multipart/start")
            .query(&self.query(item, category));
        let response: StartResponse = self.channel.send_json("multipart start", request).await?;
        Ok(response.upload_id)
    }

    async fn generate_upload_url(
        &self,
        item: &CacheStorableItem,
        category: CacheCategory,
        upload_id: &str,
        part: PartRequest,
    ) -> Result<String> {
        let request = self
            .channel
            .post("/api/cache/multipart/generate-url")
            .query(&self.query(item, category))
            .query(&[("upload_id", upload_id)])
            .query(&[
                ("part_number", part.number.to_string()),
                ("content_length", part.content_length.to_string()),
            ]);
        let response: UrlResponse = self
            .channel
            .send_json("multipart generate url", request)
            .await?;
        Ok(response.url)
    }

    async fn complete_upload(
        &self,
        item: &CacheStorableItem,
        category: CacheCategory,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<()> {
        let request = self
            .channel
            .post("/api/cache/multipart/complete")
            .query(&self.query(item, category))
            .query(&[("upload_id", upload_id)])
            .json(&CompleteBody { parts });
        self.channel.send("multipart complete", request).await?;
        Ok(())
    }

    async fn action_item_exists(&self, hash: &str) -> Result<bool> {
        get_action_item(&self.channel, &self.account, &self.project, hash).await
    }

    async fn put_action_item(&self, hash: &str) -> Result<()> {
        post_action_item(&self.channel, &self.account, &self.project, hash).await
    }
}
