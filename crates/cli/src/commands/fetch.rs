use crate::errors::CliError;
use artifex_cache::{
    Alerts, CacheCategory, CacheSource, CacheStorableItem, CacheStoring, FetchResult,
};
use artifex_remote::{CacheFactory, Direction, FailureReport};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use tracing::debug;

/// One entry of the printed fetch report, keyed by item name
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct FetchedEntry {
    pub hash: String,
    pub source: CacheSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

pub async fn execute(
    factory: &CacheFactory,
    alerts: &Alerts,
    category: CacheCategory,
    items: Vec<CacheStorableItem>,
    dry_run: bool,
) -> Result<String, CliError> {
    let requested: HashSet<CacheStorableItem> = items.into_iter().collect();
    let entries = if dry_run {
        check_availability(factory, alerts, &requested, category).await?
    } else {
        let storage = factory.build()?;
        to_entries(storage.fetch(&requested, category).await?)
    };
    serde_json::to_string_pretty(&entries).map_err(CliError::output)
}

fn to_entries(hits: FetchResult) -> BTreeMap<String, FetchedEntry> {
    hits.into_iter()
        .map(|(item, path)| {
            (
                item.name,
                FetchedEntry {
                    hash: item.hash,
                    source: item.source,
                    path: Some(path),
                },
            )
        })
        .collect()
}

/// Report availability without downloading: local hits, then remote
/// existence checks for the rest
async fn check_availability(
    factory: &CacheFactory,
    alerts: &Alerts,
    requested: &HashSet<CacheStorableItem>,
    category: CacheCategory,
) -> Result<BTreeMap<String, FetchedEntry>, CliError> {
    let local_hits = factory.local()?.fetch(requested, category).await?;
    let found: HashSet<CacheStorableItem> = local_hits.keys().map(|hit| hit.storable()).collect();
    let mut report_entries = to_entries(local_hits);

    let Some(client) = factory.project_client()? else {
        return Ok(report_entries);
    };
    let mut missing: Vec<&CacheStorableItem> = requested
        .iter()
        .filter(|item| !found.contains(*item))
        .collect();
    missing.sort();

    let mut report = FailureReport::new(Direction::Fetch);
    for item in missing {
        match client.exists(item, category).await {
            Ok(true) => {
                report_entries.insert(
                    item.name.clone(),
                    FetchedEntry {
                        hash: item.hash.clone(),
                        source: CacheSource::Remote,
                        path: None,
                    },
                );
            }
            Ok(false) => debug!(item = %item.name, hash = %item.hash, "Not in the remote cache"),
            Err(e) => report.record(item, &e),
        }
    }
    report.flush(alerts);
    Ok(report_entries)
}
