//! End-to-end behavior of the local tier through the façade

#![allow(clippy::unwrap_used, clippy::expect_used)]

use artifex_cache::{
    Alerts, CacheCategory, CacheDirectories, CacheSource, CacheStorableItem, CacheStorage,
    CacheStoring, LocalStorage,
};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use walkdir::WalkDir;

fn local(root: &Path) -> LocalStorage {
    LocalStorage::new(CacheDirectories::new(root.join("cache")), Alerts::new())
}

fn storage_at(root: &Path) -> CacheStorage {
    CacheStorage::new(Arc::new(local(root)), None)
}

fn framework(root: &Path, name: &str, files: &[(&str, &str)]) -> PathBuf {
    let path = root.join(format!("{name}.framework"));
    fs::create_dir_all(&path).unwrap();
    for (file, contents) in files {
        let file = path.join(file);
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(file, contents).unwrap();
    }
    path
}

fn tree(root: &Path) -> Vec<(PathBuf, Vec<u8>)> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .map(Result::unwrap)
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            (
                e.path().strip_prefix(root).unwrap().to_path_buf(),
                fs::read(e.path()).unwrap(),
            )
        })
        .collect()
}

#[tokio::test]
async fn test_store_then_fetch_is_a_local_hit() {
    let tmp = TempDir::new().unwrap();
    let storage = storage_at(tmp.path());
    let source = framework(&tmp.path().join("build"), "Alpha", &[("marker.txt", "hi")]);
    let item = CacheStorableItem::new("Alpha", "abc123");

    let stored = storage
        .store(
            &HashMap::from([(item.clone(), vec![source])]),
            CacheCategory::Binaries,
        )
        .await
        .unwrap();
    assert_eq!(stored, vec![item.clone()]);

    let hits = storage
        .fetch(&HashSet::from([item]), CacheCategory::Binaries)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    let (hit, path) = hits.into_iter().next().unwrap();
    assert_eq!(hit.source, CacheSource::Local);
    assert_eq!(fs::read_to_string(path.join("marker.txt")).unwrap(), "hi");
}

#[tokio::test]
async fn test_fetch_with_nothing_stored_is_empty() {
    let tmp = TempDir::new().unwrap();
    let storage = storage_at(tmp.path());

    let hits = storage
        .fetch(
            &HashSet::from([CacheStorableItem::new("Beta", "zzz999")]),
            CacheCategory::Binaries,
        )
        .await
        .unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn test_round_trip_preserves_tree() {
    let tmp = TempDir::new().unwrap();
    let storage = storage_at(tmp.path());
    let source = framework(
        &tmp.path().join("build"),
        "Alpha",
        &[
            ("Alpha", "binary"),
            ("Headers/Alpha.h", "#pragma once"),
            ("Modules/module.modulemap", "framework module Alpha {}"),
        ],
    );
    let item = CacheStorableItem::new("Alpha", "abc123");

    storage
        .store(
            &HashMap::from([(item.clone(), vec![source.clone()])]),
            CacheCategory::Binaries,
        )
        .await
        .unwrap();
    let hits = storage
        .fetch(&HashSet::from([item]), CacheCategory::Binaries)
        .await
        .unwrap();

    let cached = hits.values().next().unwrap();
    assert_eq!(tree(cached), tree(&source));
}

#[tokio::test]
async fn test_store_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let storage = storage_at(tmp.path());
    let source = framework(&tmp.path().join("build"), "Alpha", &[("marker.txt", "hi")]);
    let item = CacheStorableItem::new("Alpha", "abc123");
    let request = HashMap::from([(item.clone(), vec![source])]);

    storage.store(&request, CacheCategory::Binaries).await.unwrap();
    let first = storage
        .fetch(&HashSet::from([item.clone()]), CacheCategory::Binaries)
        .await
        .unwrap();
    storage.store(&request, CacheCategory::Binaries).await.unwrap();
    let second = storage
        .fetch(&HashSet::from([item]), CacheCategory::Binaries)
        .await
        .unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn test_one_unwritable_item_does_not_affect_the_rest() {
    let tmp = TempDir::new().unwrap();
    let alerts = Alerts::new();
    let local = LocalStorage::new(CacheDirectories::new(tmp.path().join("cache")), alerts.clone());
    let storage = CacheStorage::new(Arc::new(local), None);
    let build = tmp.path().join("build");

    let mut request = HashMap::new();
    for name in ["One", "Two", "Three"] {
        let source = framework(&build, name, &[("marker.txt", name)]);
        request.insert(CacheStorableItem::new(name, format!("{name}-hash")), vec![source]);
    }
    let broken = CacheStorableItem::new("Broken", "broken-hash");
    request.insert(broken.clone(), vec![build.join("Broken.framework")]);

    let stored = storage.store(&request, CacheCategory::Binaries).await.unwrap();
    assert_eq!(stored.len(), 3);
    assert!(!stored.contains(&broken));
    assert_eq!(alerts.warnings().len(), 1);

    let hits = storage
        .fetch(&request.keys().cloned().collect(), CacheCategory::Binaries)
        .await
        .unwrap();
    let names: HashSet<_> = hits.keys().map(|k| k.name.as_str()).collect();
    assert_eq!(names, HashSet::from(["One", "Two", "Three"]));
}

#[tokio::test]
async fn test_categories_are_isolated() {
    let tmp = TempDir::new().unwrap();
    let storage = storage_at(tmp.path());
    let item = CacheStorableItem::new("AppTests", "abc");

    storage
        .store(
            &HashMap::from([(item.clone(), Vec::new())]),
            CacheCategory::SelectiveTests,
        )
        .await
        .unwrap();

    let tests = storage
        .fetch(&HashSet::from([item.clone()]), CacheCategory::SelectiveTests)
        .await
        .unwrap();
    let binaries = storage
        .fetch(&HashSet::from([item]), CacheCategory::Binaries)
        .await
        .unwrap();
    assert_eq!(tests.len(), 1);
    assert!(binaries.is_empty());
}

#[test]
fn test_concurrent_stores_of_one_hash_never_mix() {
    let tmp = TempDir::new().unwrap();
    let item = CacheStorableItem::new("Alpha", "abc123");
    let files: Vec<String> = (0..20).map(|i| format!("file-{i:02}.txt")).collect();

    let sources: Vec<PathBuf> = ["first", "second"]
        .iter()
        .map(|payload| {
            let contents: Vec<(&str, &str)> =
                files.iter().map(|f| (f.as_str(), *payload)).collect();
            framework(&tmp.path().join(payload), "Alpha", &contents)
        })
        .collect();

    std::thread::scope(|scope| {
        for source in &sources {
            let storage = local(tmp.path());
            let item = item.clone();
            scope.spawn(move || {
                for _ in 0..5 {
                    storage
                        .store_blocking(
                            &HashMap::from([(item.clone(), vec![source.clone()])]),
                            CacheCategory::Binaries,
                        )
                        .unwrap();
                }
            });
        }
    });

    let hits = local(tmp.path()).fetch_blocking(&HashSet::from([item]), CacheCategory::Binaries);
    assert_eq!(hits.len(), 1);
    let cached = hits.values().next().unwrap();
    let payloads: HashSet<Vec<u8>> = tree(cached).into_iter().map(|(_, bytes)| bytes).collect();
    assert_eq!(payloads.len(), 1, "cached artifact mixes both payloads");
    assert_eq!(tree(cached).len(), files.len());
}
