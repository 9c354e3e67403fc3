//! Client for the account-scoped module cache
//!
//! Downloads are a single authenticated request against the cache endpoint,
//! which may differ from the server handling uploads. Authorization and
//! billing failures come back as dedicated error values.

use super::{
    CompleteBody, HttpChannel, RemoteCacheClient, StartResponse, UrlResponse, get_action_item,
    post_action_item, split_handle, stream_to_file,
};
use crate::error::Result;
use crate::multipart::{CompletedPart, PartRequest};
use artifex_cache::{CacheCategory, CacheStorableItem};
use async_trait::async_trait;
use std::path::Path;

/// Client scoped to one account and project
#[derive(Debug, Clone)]
pub struct ModuleCacheClient {
    server: HttpChannel,
    cache: HttpChannel,
    account_handle: String,
    project_handle: String,
}

impl ModuleCacheClient {
    /// Create a client uploading through `server` and downloading from `cache`
    pub fn new(server: HttpChannel, cache: HttpChannel, full_handle: &str) -> Result<Self> {
        let (account_handle, project_handle) = split_handle(full_handle)?;
        Ok(Self {
            server,
            cache,
            account_handle,
            project_handle,
        })
    }

    fn query<'a>(
        &'a self,
        item: &'a CacheStorableItem,
        category: CacheCategory,
    ) -> [(&'static str, &'a str); 4] {
        [
            ("account_handle", self.account_handle.as_str()),
            ("project_handle", self.project_handle.as_str()),
            ("name", item.name.as_str()),
            ("cache_category", category.wire_name()),
        ]
    }
}

#[async_trait]
impl RemoteCacheClient for ModuleCacheClient {
    async fn download(
        &self,
        item: &CacheStorableItem,
        category: CacheCategory,
        destination: &Path,
    ) -> Result<()> {
        const OPERATION: &str = "module download";
        let request = self
            .cache
            .get(&format!("/api/cache/module/{}", item.hash))
            .query(&self.query(item, category));
        let response = self.cache.send(OPERATION, request).await?;
        stream_to_file(OPERATION, response, destination).await
    }

    async fn start_upload(
        &self,
        item: &CacheStorableItem,
        category: CacheCategory,
    ) -> Result<String> {
        let request = self
            .server
            .post("/api/cache/module/start")
            .query(&self.query(item, category))
            .query(&[("hash", item.hash.as_str())]);
        let response: StartResponse = self.server.send_json("module upload start", request).await?;
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
            .server
            .post("/api/cache/module/part")
            .query(&self.query(item, category))
            .query(&[("hash", item.hash.as_str()), ("upload_id", upload_id)])
            .query(&[
                ("part_number", part.number.to_string()),
                ("content_length", part.content_length.to_string()),
            ]);
        let response: UrlResponse = self.server.send_json("module upload part", request).await?;
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
            .server
            .post("/api/cache/module/complete")
            .query(&self.query(item, category))
            .query(&[("hash", item.hash.as_str()), ("upload_id", upload_id)])
            .json(&CompleteBody { parts });
        self.server.send("module upload complete", request).await?;
        Ok(())
    }

    async fn action_item_exists(&self, hash: &str) -> Result<bool> {
        get_action_item(&self.server, &self.account_handle, &self.project_handle, hash).await
    }

    async fn put_action_item(&self, hash: &str) -> Result<()> {
        post_action_item(&self.server, &self.account_handle, &self.project_handle, hash).await
    }
}
