//! The tier capability and the façade composing tiers

use crate::{CacheCategory, CacheItem, CacheStorableItem, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

/// Fetch hits keyed by item and provenance
pub type FetchResult = HashMap<CacheItem, PathBuf>;

/// A storage tier able to fetch and store artifacts.
///
/// Implementations absorb per-item failures: a miss or a recoverable error
/// drops the item from the result. `Err` is reserved for failures that make
/// the whole tier unusable.
#[async_trait]
pub trait CacheStoring: Send + Sync {
    /// Resolve the subset of `items` available in this tier to local paths
    async fn fetch(
        &self,
        items: &HashSet<CacheStorableItem>,
        category: CacheCategory,
    ) -> Result<FetchResult>;

    /// Persist `items`, returning the ones now available from this tier
    async fn store(
        &self,
        items: &HashMap<CacheStorableItem, Vec<PathBuf>>,
        category: CacheCategory,
    ) -> Result<Vec<CacheStorableItem>>;
}

/// One local tier plus an optional remote tier behind a single contract
#[derive(Clone)]
pub struct CacheStorage {
    local: Arc<dyn CacheStoring>,
    remote: Option<Arc<dyn CacheStoring>>,
}

impl std::fmt::Debug for CacheStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStorage")
            .field("remote", &self.remote.is_some())
            .finish_non_exhaustive()
    }
}

impl CacheStorage {
    /// Compose a local tier with an optional remote tier
    #[must_use]
    pub fn new(local: Arc<dyn CacheStoring>, remote: Option<Arc<dyn CacheStoring>>) -> Self {
        Self { local, remote }
    }

    /// Whether a remote tier is configured
    #[must_use]
    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }
}

#[async_trait]
impl CacheStoring for CacheStorage {
    async fn fetch(
        &self,
        items: &HashSet<CacheStorableItem>,
        category: CacheCategory,
    ) -> Result<FetchResult> {
        let mut hits = self.local.fetch(items, category).await?;
        let Some(remote) = &self.remote else {
            return Ok(hits);
        };

        let found: HashSet<CacheStorableItem> = hits.keys().map(CacheItem::storable).collect();
        let remaining: HashSet<CacheStorableItem> = items.difference(&found).cloned().collect();
        if remaining.is_empty() {
            return Ok(hits);
        }

        let remote_hits = remote.fetch(&remaining, category).await?;
        tracing::debug!(
            category = %category,
            local = hits.len(),
            remote = remote_hits.len(),
            "Cache fetch complete"
        );
        hits.extend(remote_hits);
        Ok(hits)
    }

    async fn store(
        &self,
        items: &HashMap<CacheStorableItem, Vec<PathBuf>>,
        category: CacheCategory,
    ) -> Result<Vec<CacheStorableItem>> {
        let stored_locally = self.local.store(items, category).await?;
        match &self.remote {
            // Only the shared tier can attest an item is usable by other machines
            Some(remote) => remote.store(items, category).await,
            None => Ok(stored_locally),
        }
    }
}
