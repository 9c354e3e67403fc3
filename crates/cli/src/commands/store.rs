use crate::cli::StoreEntry;
use crate::errors::CliError;
use artifex_cache::{CacheCategory, CacheStorableItem, CacheStoring};
use artifex_remote::CacheFactory;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::info;

pub async fn execute(
    factory: &CacheFactory,
    category: CacheCategory,
    entries: Vec<StoreEntry>,
) -> Result<String, CliError> {
    let items: HashMap<CacheStorableItem, Vec<PathBuf>> = entries
        .into_iter()
        .map(|entry| (entry.item, entry.paths))
        .collect();
    let storage = factory.build()?;
    let stored = storage.store(&items, category).await?;
    info!(
        category = %category,
        requested = items.len(),
        stored = stored.len(),
        remote = storage.has_remote(),
        "Store complete"
    );
    serde_json::to_string_pretty(&stored).map_err(CliError::output)
}
