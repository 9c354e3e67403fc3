//! Filesystem-backed cache tier
//!
//! Artifacts live under `<root>/<category>/<hash>/`. Writes are staged in a
//! per-writer directory inside the category root, swapped into place with
//! renames and signed last, so a concurrent reader only ever observes an
//! absent, unsigned or fully signed artifact.

use crate::fs::{copy_recursively, remove_existing, swap_into_place, touch};
use crate::storage::{CacheStoring, FetchResult};
use crate::{
    Alerts, ArtifactKind, ArtifactSigner, CacheCategory, CacheDirectories, CacheItem, CacheSource,
    CacheStorableItem, Error, METADATA_FILE_NAME, Result,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

const MAX_SIGN_ATTEMPTS: usize = 5;

/// Local cache tier rooted at an explicit cache directory
#[derive(Debug, Clone)]
pub struct LocalStorage {
    directories: CacheDirectories,
    signer: ArtifactSigner,
    alerts: Alerts,
}

impl LocalStorage {
    /// Create a local tier over `directories`
    #[must_use]
    pub fn new(directories: CacheDirectories, alerts: Alerts) -> Self {
        Self {
            directories,
            signer: ArtifactSigner::new(),
            alerts,
        }
    }

    /// Directory layout of this tier
    #[must_use]
    pub fn directories(&self) -> &CacheDirectories {
        &self.directories
    }

    /// Signer used for every artifact written or read by this tier
    #[must_use]
    pub fn signer(&self) -> ArtifactSigner {
        self.signer
    }

    /// Resolve every item present and signed on disk
    #[must_use]
    pub fn fetch_blocking(
        &self,
        items: &HashSet<CacheStorableItem>,
        category: CacheCategory,
    ) -> FetchResult {
        let mut hits = HashMap::new();
        let mut untrusted = Vec::new();

        for item in items {
            match self.lookup(item, category) {
                Lookup::Hit(path) => {
                    hits.insert(CacheItem::new(item, CacheSource::Local, category), path);
                }
                Lookup::Untrusted(reason) => untrusted.push(format!("{} ({reason})", item.name)),
                Lookup::Miss => {}
            }
        }

        if !untrusted.is_empty() {
            untrusted.sort();
            self.alerts.warning(format!(
                "The following artifacts were skipped because they are not valid cache artifacts: {}",
                untrusted.join(", ")
            ));
        }
        debug!(
            category = %category,
            requested = items.len(),
            hits = hits.len(),
            "Local cache lookup complete"
        );
        hits
    }

    fn lookup(&self, item: &CacheStorableItem, category: CacheCategory) -> Lookup {
        let hash_dir = self.directories.hash_dir(category, &item.hash);
        let lookup = match category {
            CacheCategory::SelectiveTests => {
                if !hash_dir.is_dir() {
                    return Lookup::Miss;
                }
                self.trusted(hash_dir.clone())
            }
            CacheCategory::Binaries => self.lookup_artifact(&hash_dir, &item.name),
        };
        if matches!(lookup, Lookup::Hit(_)) {
            touch(&hash_dir);
        }
        lookup
    }

    fn lookup_artifact(&self, hash_dir: &Path, name: &str) -> Lookup {
        // The first extension present decides; a stale lower-precedence
        // artifact never shadows an unsigned higher-precedence one.
        let Some((kind, candidate)) = ArtifactKind::ALL
            .into_iter()
            .map(|kind| (kind, hash_dir.join(kind.file_name(name))))
            .find(|(_, path)| fs::symlink_metadata(path).is_ok())
        else {
            return Lookup::Miss;
        };

        if kind == ArtifactKind::Macro {
            let metadata = hash_dir.join(METADATA_FILE_NAME);
            if fs::symlink_metadata(&metadata).is_ok()
                && !matches!(self.trusted(metadata), Lookup::Hit(_))
            {
                return Lookup::Untrusted(format!("{METADATA_FILE_NAME} signature does not match"));
            }
        }
        self.trusted(candidate)
    }

    fn trusted(&self, path: PathBuf) -> Lookup {
        match self.signer.is_valid(&path) {
            Ok(true) => Lookup::Hit(path),
            Ok(false) => {
                debug!(path = %path.display(), "Artifact is unsigned or its signature does not match");
                Lookup::Untrusted("signature does not match contents".to_string())
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to validate artifact signature");
                Lookup::Untrusted(e.to_string())
            }
        }
    }

    /// Copy and sign every item, isolating per-item failures.
    ///
    /// Returns the items that were fully written and signed. Only failures
    /// that make the cache root itself unusable are returned as errors.
    pub fn store_blocking(
        &self,
        items: &HashMap<CacheStorableItem, Vec<PathBuf>>,
        category: CacheCategory,
    ) -> Result<Vec<CacheStorableItem>> {
        let category_dir = self.directories.category_dir(category);
        fs::create_dir_all(&category_dir)
            .map_err(|e| Error::io(e, &category_dir, "create_dir_all"))?;

        let mut ordered: Vec<_> = items.iter().collect();
        ordered.sort_by(|a, b| a.0.cmp(b.0));

        let mut stored = Vec::with_capacity(items.len());
        for (item, paths) in ordered {
            match self.store_item(item, paths, category) {
                Ok(()) => {
                    debug!(item = %item.name, hash = %item.hash, category = %category, "Stored artifact locally");
                    stored.push(item.clone());
                }
                Err(e) if self.is_fatal(&e) => return Err(e),
                Err(e) => {
                    self.alerts.warning(format!(
                        "Failed to store {} with hash {} in the local cache: {e}",
                        item.name, item.hash
                    ));
                }
            }
        }

        info!(
            category = %category,
            requested = items.len(),
            stored = stored.len(),
            "Local cache store complete"
        );
        Ok(stored)
    }

    fn store_item(
        &self,
        item: &CacheStorableItem,
        paths: &[PathBuf],
        category: CacheCategory,
    ) -> Result<()> {
        if category == CacheCategory::Binaries && paths.is_empty() {
            return Err(Error::configuration(format!(
                "no artifact paths supplied for {}",
                item.name
            )));
        }

        let staging = self.staging_dir(category)?;
        let mut staged = Vec::with_capacity(paths.len());
        for source in paths {
            let file_name = source.file_name().ok_or_else(|| {
                Error::configuration(format!("artifact path {} has no file name", source.display()))
            })?;
            let destination = staging.path().join(file_name);
            copy_recursively(source, &destination)?;
            staged.push(destination);
        }

        self.install(category, &item.hash, &staged, staging.path())?;
        Ok(())
    }

    /// Create a scratch directory on the same filesystem as `category`'s hash
    /// directories, so staged artifacts can be renamed into place.
    pub fn staging_dir(&self, category: CacheCategory) -> Result<TempDir> {
        let category_dir = self.directories.category_dir(category);
        fs::create_dir_all(&category_dir)
            .map_err(|e| Error::io(e, &category_dir, "create_dir_all"))?;
        tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&category_dir)
            .map_err(|e| Error::io(e, &category_dir, "create_staging"))
    }

    /// Move fully staged artifacts into the hash directory and sign them.
    ///
    /// `staged` paths keep their file names. For [`CacheCategory::SelectiveTests`]
    /// the hash directory itself is the signed artifact. Returns the signed
    /// artifact roots.
    pub fn install(
        &self,
        category: CacheCategory,
        hash: &str,
        staged: &[PathBuf],
        scratch: &Path,
    ) -> Result<Vec<PathBuf>> {
        let hash_dir = self.directories.hash_dir(category, hash);
        fs::create_dir_all(&hash_dir).map_err(|e| Error::io(e, &hash_dir, "create_dir_all"))?;

        let destinations = staged
            .iter()
            .map(|path| {
                path.file_name()
                    .map(|name| hash_dir.join(name))
                    .ok_or_else(|| {
                        Error::configuration(format!("staged path {} has no file name", path.display()))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        match category {
            CacheCategory::Binaries => {
                for (source, destination) in staged.iter().zip(&destinations) {
                    self.evict_other_kinds(destination)?;
                    self.signer.invalidate(destination)?;
                    swap_into_place(source, destination, scratch)?;
                }
                for destination in &destinations {
                    self.sign_settled(destination)?;
                }
                Ok(destinations)
            }
            CacheCategory::SelectiveTests => {
                self.signer.invalidate(&hash_dir)?;
                for (source, destination) in staged.iter().zip(&destinations) {
                    swap_into_place(source, destination, scratch)?;
                }
                self.sign_settled(&hash_dir)?;
                Ok(vec![hash_dir])
            }
        }
    }

    /// Remove same-named artifacts of other kinds next to `destination`.
    ///
    /// Lookup stops at the first existing kind, whether or not it is signed.
    fn evict_other_kinds(&self, destination: &Path) -> Result<()> {
        let (Some(kind), Some(hash_dir)) = (ArtifactKind::from_path(destination), destination.parent())
        else {
            return Ok(());
        };
        let Some(name) = destination.file_stem().and_then(|s| s.to_str()) else {
            return Ok(());
        };
        for other in ArtifactKind::ALL.into_iter().filter(|k| *k != kind) {
            let sibling = hash_dir.join(other.file_name(name));
            if fs::symlink_metadata(&sibling).is_err() {
                continue;
            }
            debug!(path = %sibling.display(), "Removing artifact of another kind with the same name");
            self.signer.invalidate(&sibling)?;
            remove_existing(&sibling)?;
        }
        Ok(())
    }

    /// Sign `path` and confirm the signature still matches.
    ///
    /// A concurrent writer of the same hash may swap content in while the
    /// digest is computed; whoever persists last re-signs the settled tree.
    fn sign_settled(&self, path: &Path) -> Result<()> {
        for attempt in 1..=MAX_SIGN_ATTEMPTS {
            self.signer.sign(path)?;
            if self.signer.is_valid(path)? {
                return Ok(());
            }
            debug!(path = %path.display(), attempt, "Artifact changed while signing, re-signing");
        }
        Err(Error::configuration(format!(
            "artifact at {} kept changing while it was signed",
            path.display()
        )))
    }

    fn is_fatal(&self, error: &Error) -> bool {
        match error {
            Error::Io {
                source,
                path: Some(path),
                ..
            } => {
                path.starts_with(self.directories.root())
                    && matches!(
                        source.kind(),
                        ErrorKind::PermissionDenied | ErrorKind::StorageFull | ErrorKind::ReadOnlyFilesystem
                    )
            }
            _ => false,
        }
    }
}

enum Lookup {
    Hit(PathBuf),
    Untrusted(String),
    Miss,
}

#[async_trait]
impl CacheStoring for LocalStorage {
    async fn fetch(
        &self,
        items: &HashSet<CacheStorableItem>,
        category: CacheCategory,
    ) -> Result<FetchResult> {
        let this = self.clone();
        let items = items.clone();
        tokio::task::spawn_blocking(move || this.fetch_blocking(&items, category))
            .await
            .map_err(|e| Error::io_no_path(std::io::Error::other(e.to_string()), "local fetch"))
    }

    async fn store(
        &self,
        items: &HashMap<CacheStorableItem, Vec<PathBuf>>,
        category: CacheCategory,
    ) -> Result<Vec<CacheStorableItem>> {
        let this = self.clone();
        let items = items.clone();
        tokio::task::spawn_blocking(move || this.store_blocking(&items, category))
            .await
            .map_err(|e| Error::io_no_path(std::io::Error::other(e.to_string()), "local store"))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AlertSeverity;

    fn storage(root: &Path) -> (LocalStorage, Alerts) {
        let alerts = Alerts::new();
        (
            LocalStorage::new(CacheDirectories::new(root.join("cache")), alerts.clone()),
            alerts,
        )
    }

    fn items(list: &[(&str, &str)]) -> HashSet<CacheStorableItem> {
        list.iter()
            .map(|(name, hash)| CacheStorableItem::new(*name, *hash))
            .collect()
    }

    fn signed_dir(storage: &LocalStorage, path: &Path) {
        fs::create_dir_all(path).unwrap();
        storage.signer().sign(path).unwrap();
    }

    #[test]
    fn test_fetch_framework_with_valid_signature() {
        let tmp = TempDir::new().unwrap();
        let (subject, _) = storage(tmp.path());
        let artifact = subject
            .directories()
            .hash_dir(CacheCategory::Binaries, "123")
            .join("Test.framework");
        signed_dir(&subject, &artifact);

        let got = subject.fetch_blocking(&items(&[("Test", "123")]), CacheCategory::Binaries);

        assert_eq!(got.len(), 1);
        let (hit, path) = got.into_iter().next().unwrap();
        assert_eq!(hit.name, "Test");
        assert_eq!(hit.hash, "123");
        assert_eq!(hit.source, CacheSource::Local);
        assert_eq!(path, artifact);
    }

    #[test]
    fn test_fetch_ignores_unsigned_artifact_and_warns() {
        let tmp = TempDir::new().unwrap();
        let (subject, alerts) = storage(tmp.path());
        let artifact = subject
            .directories()
            .hash_dir(CacheCategory::Binaries, "123")
            .join("Test.xcframework");
        fs::create_dir_all(&artifact).unwrap();

        let got = subject.fetch_blocking(&items(&[("Test", "123")]), CacheCategory::Binaries);

        assert!(got.is_empty());
        let warnings = alerts.warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("Test (signature does not match contents)"));
    }

    #[test]
    fn test_fetch_requires_exact_name() {
        let tmp = TempDir::new().unwrap();
        let (subject, alerts) = storage(tmp.path());
        let artifact = subject
            .directories()
            .hash_dir(CacheCategory::Binaries, "123")
            .join("DifferentName.xcframework");
        signed_dir(&subject, &artifact);

        let got = subject.fetch_blocking(&items(&[("Test", "123")]), CacheCategory::Binaries);
        assert!(got.is_empty());
        assert!(alerts.is_empty());
    }

    #[test]
    fn test_fetch_macro_file() {
        let tmp = TempDir::new().unwrap();
        let (subject, _) = storage(tmp.path());
        let hash_dir = subject.directories().hash_dir(CacheCategory::Binaries, "123");
        fs::create_dir_all(&hash_dir).unwrap();
        let artifact = hash_dir.join("Test.macro");
        fs::write(&artifact, b"macro").unwrap();
        subject.signer().sign(&artifact).unwrap();

        let got = subject.fetch_blocking(&items(&[("Test", "123")]), CacheCategory::Binaries);
        assert_eq!(got.values().next(), Some(&artifact));
    }

    #[test]
    fn test_fetch_macro_rejects_tampered_metadata() {
        let tmp = TempDir::new().unwrap();
        let (subject, _) = storage(tmp.path());
        let hash_dir = subject.directories().hash_dir(CacheCategory::Binaries, "123");
        fs::create_dir_all(&hash_dir).unwrap();
        let artifact = hash_dir.join("Test.macro");
        let metadata = hash_dir.join(METADATA_FILE_NAME);
        fs::write(&artifact, b"macro").unwrap();
        fs::write(&metadata, b"<plist/>").unwrap();
        subject.signer().sign(&artifact).unwrap();
        subject.signer().sign(&metadata).unwrap();
        fs::write(&metadata, b"<plist>tampered</plist>").unwrap();

        let got = subject.fetch_blocking(&items(&[("Test", "123")]), CacheCategory::Binaries);
        assert!(got.is_empty());
    }

    #[test]
    fn test_fetch_prefers_xcframework() {
        let tmp = TempDir::new().unwrap();
        let (subject, _) = storage(tmp.path());
        let hash_dir = subject.directories().hash_dir(CacheCategory::Binaries, "123");
        signed_dir(&subject, &hash_dir.join("Test.framework"));
        signed_dir(&subject, &hash_dir.join("Test.xcframework"));

        let got = subject.fetch_blocking(&items(&[("Test", "123")]), CacheCategory::Binaries);
        assert_eq!(got.values().next(), Some(&hash_dir.join("Test.xcframework")));
    }

    #[test]
    fn test_fetch_selective_tests_uses_hash_directory() {
        let tmp = TempDir::new().unwrap();
        let (subject, _) = storage(tmp.path());
        let hash_dir = subject
            .directories()
            .hash_dir(CacheCategory::SelectiveTests, "abc");
        signed_dir(&subject, &hash_dir);

        let got = subject.fetch_blocking(&items(&[("AppTests", "abc")]), CacheCategory::SelectiveTests);
        assert_eq!(got.values().next(), Some(&hash_dir));

        let other = subject.fetch_blocking(&items(&[("AppTests", "abc")]), CacheCategory::Binaries);
        assert!(other.is_empty());
    }

    #[test]
    fn test_store_macro_with_metadata() {
        let tmp = TempDir::new().unwrap();
        let (subject, _) = storage(tmp.path());
        let macro_path = tmp.path().join("Test.macro");
        let metadata_path = tmp.path().join(METADATA_FILE_NAME);
        fs::write(&macro_path, b"macro").unwrap();
        fs::write(&metadata_path, b"<plist/>").unwrap();

        let item = CacheStorableItem::new("Test", "123");
        let stored = subject
            .store_blocking(
                &HashMap::from([(item.clone(), vec![macro_path, metadata_path])]),
                CacheCategory::Binaries,
            )
            .unwrap();

        assert_eq!(stored, vec![item]);
        let hash_dir = subject.directories().hash_dir(CacheCategory::Binaries, "123");
        assert!(subject.signer().is_valid(&hash_dir.join("Test.macro")).unwrap());
        assert!(subject
            .signer()
            .is_valid(&hash_dir.join(METADATA_FILE_NAME))
            .unwrap());
    }

    #[test]
    fn test_store_isolates_failing_items() {
        let tmp = TempDir::new().unwrap();
        let (subject, alerts) = storage(tmp.path());
        let good = tmp.path().join("Good.framework");
        fs::create_dir_all(&good).unwrap();
        fs::write(good.join("Good"), b"ok").unwrap();

        let good_item = CacheStorableItem::new("Good", "h1");
        let bad_item = CacheStorableItem::new("Bad", "h2");
        let stored = subject
            .store_blocking(
                &HashMap::from([
                    (good_item.clone(), vec![good]),
                    (bad_item, vec![tmp.path().join("Missing.framework")]),
                ]),
                CacheCategory::Binaries,
            )
            .unwrap();

        assert_eq!(stored, vec![good_item]);
        let snapshot = alerts.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].severity, AlertSeverity::Warning);
        assert!(snapshot[0].message.contains("Failed to store Bad with hash h2"));
    }

    #[test]
    fn test_store_selective_tests_marker_without_paths() {
        let tmp = TempDir::new().unwrap();
        let (subject, _) = storage(tmp.path());
        let item = CacheStorableItem::new("AppTests", "abc");

        let stored = subject
            .store_blocking(
                &HashMap::from([(item.clone(), Vec::new())]),
                CacheCategory::SelectiveTests,
            )
            .unwrap();
        assert_eq!(stored, vec![item.clone()]);

        let got = subject.fetch_blocking(&HashSet::from([item]), CacheCategory::SelectiveTests);
        assert_eq!(got.len(), 1);
    }

    #[test]
    fn test_store_without_paths_fails_for_binaries() {
        let tmp = TempDir::new().unwrap();
        let (subject, _) = storage(tmp.path());
        let stored = subject
            .store_blocking(
                &HashMap::from([(CacheStorableItem::new("Empty", "h"), Vec::new())]),
                CacheCategory::Binaries,
            )
            .unwrap();
        assert!(stored.is_empty());
    }

    #[test]
    fn test_restore_replaces_previous_payload() {
        let tmp = TempDir::new().unwrap();
        let (subject, _) = storage(tmp.path());
        let item = CacheStorableItem::new("Alpha", "abc123");

        for payload in ["first", "second"] {
            let source = tmp.path().join(payload).join("Alpha.framework");
            fs::create_dir_all(&source).unwrap();
            fs::write(source.join("payload.txt"), payload).unwrap();
            subject
                .store_blocking(
                    &HashMap::from([(item.clone(), vec![source])]),
                    CacheCategory::Binaries,
                )
                .unwrap();
        }

        let got = subject.fetch_blocking(&HashSet::from([item]), CacheCategory::Binaries);
        let path = got.values().next().unwrap();
        assert_eq!(fs::read_to_string(path.join("payload.txt")).unwrap(), "second");
    }

    #[test]
    fn test_store_evicts_stale_artifact_of_another_kind() {
        let tmp = TempDir::new().unwrap();
        let (subject, alerts) = storage(tmp.path());
        let hash_dir = subject.directories().hash_dir(CacheCategory::Binaries, "abc123");
        let stale = hash_dir.join("Alpha.xcframework");
        fs::create_dir_all(&stale).unwrap();
        fs::write(stale.join("leftover.txt"), b"partial").unwrap();

        let source = tmp.path().join("build").join("Alpha.framework");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("Alpha"), b"binary").unwrap();
        let item = CacheStorableItem::new("Alpha", "abc123");
        subject
            .store_blocking(
                &HashMap::from([(item.clone(), vec![source])]),
                CacheCategory::Binaries,
            )
            .unwrap();

        assert!(!stale.exists());
        let got = subject.fetch_blocking(&HashSet::from([item]), CacheCategory::Binaries);
        assert_eq!(got.values().next(), Some(&hash_dir.join("Alpha.framework")));
        assert!(alerts.is_empty());
    }
}
