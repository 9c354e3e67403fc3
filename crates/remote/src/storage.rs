//! Remote cache tier
//!
//! Every item of a batch runs as its own task, gated by one semaphore for the
//! whole call. Results are gathered once every task has settled; per-item
//! failures are classified into a [`FailureReport`] instead of failing the
//! batch. Remote hits are installed into the local tier before they are
//! reported, so the next fetch of the same hash is a local hit.

use crate::archive;
use crate::client::RemoteCacheClient;
use crate::error::{RemoteError, Result};
use crate::failures::{Direction, FailureReport};
use crate::multipart::MultipartUploader;
use crate::retry::RetryPolicy;
use artifex_cache::{
    Alerts, CacheCategory, CacheItem, CacheSource, CacheStorableItem, CacheStoring, FetchResult,
    LocalStorage,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

const ARCHIVE_NAME: &str = "payload.tar.zst";

struct Shared<C> {
    client: C,
    local: LocalStorage,
    alerts: Alerts,
    retry: RetryPolicy,
    uploader: MultipartUploader,
}

/// A remote tier backed by client `C`
pub struct RemoteStorage<C> {
    shared: Arc<Shared<C>>,
    concurrency_limit: usize,
}

impl<C> std::fmt::Debug for RemoteStorage<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStorage")
            .field("concurrency_limit", &self.concurrency_limit)
            .finish_non_exhaustive()
    }
}

impl<C: RemoteCacheClient + 'static> RemoteStorage<C> {
    /// Create a tier populating `local` with its hits
    #[must_use]
    pub fn new(
        client: C,
        local: LocalStorage,
        alerts: Alerts,
        retry: RetryPolicy,
        uploader: MultipartUploader,
        concurrency_limit: usize,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                client,
                local,
                alerts,
                retry,
                uploader,
            }),
            concurrency_limit: concurrency_limit.max(1),
        }
    }

    /// The service client
    #[must_use]
    pub fn client(&self) -> &C {
        &self.shared.client
    }
}

impl<C: RemoteCacheClient + 'static> Shared<C> {
    async fn fetch_item(&self, item: &CacheStorableItem, category: CacheCategory) -> Result<PathBuf> {
        let local = self.local.clone();
        let staging = local.staging_dir(category)?;

        match category {
            CacheCategory::SelectiveTests => {
                let exists = self
                    .retry
                    .run("action item lookup", || self.client.action_item_exists(&item.hash))
                    .await?;
                if !exists {
                    return Err(RemoteError::not_found("action item lookup"));
                }
                let hash = item.hash.clone();
                let installed = blocking(move || {
                    let installed = local.install(category, &hash, &[], staging.path())?;
                    Ok(installed)
                })
                .await?;
                first(installed)
            }
            CacheCategory::Binaries => {
                let archive_path = staging.path().join(ARCHIVE_NAME);
                self.retry
                    .run("download", || {
                        self.client.download(item, category, &archive_path)
                    })
                    .await?;

                let name = item.name.clone();
                let hash = item.hash.clone();
                let installed = blocking(move || {
                    let unpack_dir = staging.path().join("unpacked");
                    std::fs::create_dir_all(&unpack_dir)
                        .map_err(|e| RemoteError::io(e, &unpack_dir, "create_dir_all"))?;
                    let staged = archive::unpack(&archive_path, &unpack_dir)?.rename_for(&name)?;
                    let installed = local.install(category, &hash, &staged, staging.path())?;
                    Ok(installed)
                })
                .await?;
                first(installed)
            }
        }
    }

    async fn store_item(
        &self,
        item: &CacheStorableItem,
        paths: Vec<PathBuf>,
        category: CacheCategory,
    ) -> Result<()> {
        if category == CacheCategory::SelectiveTests {
            return self
                .retry
                .run("action item upload", || self.client.put_action_item(&item.hash))
                .await;
        }
        if paths.is_empty() {
            return Err(RemoteError::configuration(format!(
                "no artifact paths supplied for {}",
                item.name
            )));
        }

        let scratch = tempfile::Builder::new()
            .prefix("artifex-upload-")
            .tempdir()
            .map_err(|e| RemoteError::io_no_path(e, "create upload scratch"))?;
        let archive_path = scratch.path().join(ARCHIVE_NAME);
        {
            let archive_path = archive_path.clone();
            blocking(move || archive::pack(&paths, &archive_path)).await?;
        }

        let client = &self.client;
        let upload_id = self
            .retry
            .run("multipart start", || client.start_upload(item, category))
            .await?;
        let upload_id = upload_id.as_str();
        let parts = self
            .uploader
            .upload(&archive_path, move |part| {
                client.generate_upload_url(item, category, upload_id, part)
            })
            .await?;
        self.retry
            .run("multipart complete", || {
                client.complete_upload(item, category, upload_id, &parts)
            })
            .await?;
        debug!(item = %item.name, hash = %item.hash, parts = parts.len(), "Uploaded artifact");
        Ok(())
    }
}

#[async_trait]
impl<C: RemoteCacheClient + 'static> CacheStoring for RemoteStorage<C> {
    async fn fetch(
        &self,
        items: &HashSet<CacheStorableItem>,
        category: CacheCategory,
    ) -> artifex_cache::Result<FetchResult> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency_limit));
        let mut join_set = JoinSet::new();

        for item in items.iter().cloned() {
            let shared = self.shared.clone();
            let semaphore = semaphore.clone();
            join_set.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => shared.fetch_item(&item, category).await,
                    Err(e) => Err(RemoteError::configuration(e.to_string())),
                };
                (item, result)
            });
        }

        let mut hits = HashMap::new();
        let mut report = FailureReport::new(Direction::Fetch);
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((item, Ok(path))) => {
                    debug!(item = %item.name, hash = %item.hash, category = %category, "Remote cache hit");
                    hits.insert(CacheItem::new(&item, CacheSource::Remote, category), path);
                }
                Ok((item, Err(e))) => report.record(&item, &e),
                Err(e) => warn!(error = %e, "Remote fetch task did not complete"),
            }
        }
        report.flush(&self.shared.alerts);

        info!(
            category = %category,
            requested = items.len(),
            hits = hits.len(),
            "Remote cache fetch complete"
        );
        Ok(hits)
    }

    async fn store(
        &self,
        items: &HashMap<CacheStorableItem, Vec<PathBuf>>,
        category: CacheCategory,
    ) -> artifex_cache::Result<Vec<CacheStorableItem>> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency_limit));
        let mut join_set = JoinSet::new();

        for (item, paths) in items {
            let shared = self.shared.clone();
            let semaphore = semaphore.clone();
            let item = item.clone();
            let paths = paths.clone();
            join_set.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => shared.store_item(&item, paths, category).await,
                    Err(e) => Err(RemoteError::configuration(e.to_string())),
                };
                (item, result)
            });
        }

        let mut stored = Vec::with_capacity(items.len());
        let mut report = FailureReport::new(Direction::Store);
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((item, Ok(()))) => stored.push(item),
                Ok((item, Err(e))) => report.record(&item, &e),
                Err(e) => warn!(error = %e, "Remote store task did not complete"),
            }
        }
        report.flush(&self.shared.alerts);
        stored.sort();

        info!(
            category = %category,
            requested = items.len(),
            stored = stored.len(),
            "Remote cache store complete"
        );
        Ok(stored)
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| RemoteError::io_no_path(std::io::Error::other(e.to_string()), "spawn_blocking"))?
}

fn first(installed: Vec<PathBuf>) -> Result<PathBuf> {
    installed
        .into_iter()
        .next()
        .ok_or_else(|| RemoteError::invalid_artifact("nothing was installed"))
}
