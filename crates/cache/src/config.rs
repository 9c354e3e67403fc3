//! Cache root configuration and directory layout

use crate::{CacheCategory, Error, Result};
use dirs::{cache_dir, home_dir};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding the cache root
pub const CACHE_DIR_ENV: &str = "ARTIFEX_CACHE_DIR";

/// Local cache configuration, usually the `[cache]` table of `artifex.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheConfig {
    /// Explicit cache root; resolved from the environment when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_root: Option<PathBuf>,
}

impl CacheConfig {
    /// Resolve the cache root, falling back to platform defaults
    pub fn resolve_root(&self) -> Result<PathBuf> {
        if let Some(root) = self.cache_root.as_ref().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(root).map_err(|e| Error::io(e, root, "create_dir_all"))?;
            return Ok(root.clone());
        }
        default_cache_root()
    }
}

/// Inputs for determining cache root directory
#[derive(Debug, Clone)]
struct CacheInputs {
    artifex_cache_dir: Option<PathBuf>,
    xdg_cache_home: Option<PathBuf>,
    os_cache_dir: Option<PathBuf>,
    home_dir: Option<PathBuf>,
    temp_dir: PathBuf,
}

fn cache_root_from_inputs(inputs: CacheInputs) -> Result<PathBuf> {
    // Resolution order (first writable wins):
    // 1) ARTIFEX_CACHE_DIR (explicit override)
    // 2) XDG_CACHE_HOME/artifex
    // 3) OS cache dir/artifex
    // 4) ~/.artifex/cache
    // 5) TMPDIR/artifex/cache (fallback)
    let mut candidates: Vec<PathBuf> = Vec::new();

    if let Some(dir) = inputs.artifex_cache_dir.filter(|p| !p.as_os_str().is_empty()) {
        candidates.push(dir);
    }
    if let Some(xdg) = inputs.xdg_cache_home {
        candidates.push(xdg.join("artifex"));
    }
    if let Some(os_cache) = inputs.os_cache_dir {
        candidates.push(os_cache.join("artifex"));
    }
    if let Some(home) = inputs.home_dir {
        candidates.push(home.join(".artifex/cache"));
    }
    candidates.push(inputs.temp_dir.join("artifex/cache"));

    for path in candidates {
        // CI images often ship read-only cache directories under $HOME.
        if path.exists() {
            let marker = path.join(".write_check");
            match std::fs::OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(&marker)
            {
                Ok(_) => {
                    let _ = std::fs::remove_file(&marker);
                    return Ok(path);
                }
                Err(_) => continue,
            }
        }
        if std::fs::create_dir_all(&path).is_ok() {
            return Ok(path);
        }
    }
    Err(Error::configuration(
        "Failed to determine a writable cache directory",
    ))
}

fn default_cache_root() -> Result<PathBuf> {
    let inputs = CacheInputs {
        artifex_cache_dir: std::env::var(CACHE_DIR_ENV)
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from),
        xdg_cache_home: std::env::var("XDG_CACHE_HOME")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from),
        os_cache_dir: cache_dir(),
        home_dir: home_dir(),
        temp_dir: std::env::temp_dir(),
    };
    cache_root_from_inputs(inputs)
}

/// On-disk layout of the cache root.
///
/// ```text
/// <root>/<category>/<hash>/<name>.<ext>
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheDirectories {
    root: PathBuf,
}

impl CacheDirectories {
    /// Layout rooted at `root`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The cache root
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every hash directory of `category`
    #[must_use]
    pub fn category_dir(&self, category: CacheCategory) -> PathBuf {
        self.root.join(category.directory_name())
    }

    /// The hash directory for `hash` within `category`
    #[must_use]
    pub fn hash_dir(&self, category: CacheCategory, hash: &str) -> PathBuf {
        self.category_dir(category).join(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn inputs(temp: &Path) -> CacheInputs {
        CacheInputs {
            artifex_cache_dir: None,
            xdg_cache_home: None,
            os_cache_dir: None,
            home_dir: None,
            temp_dir: temp.to_path_buf(),
        }
    }

    #[test]
    fn test_explicit_override_wins() {
        let tmp = TempDir::new().unwrap();
        let explicit = tmp.path().join("explicit");
        let root = cache_root_from_inputs(CacheInputs {
            artifex_cache_dir: Some(explicit.clone()),
            xdg_cache_home: Some(tmp.path().join("xdg")),
            ..inputs(tmp.path())
        })
        .unwrap();
        assert_eq!(root, explicit);
        assert!(explicit.is_dir());
    }

    #[test]
    fn test_xdg_before_os_cache_dir() {
        let tmp = TempDir::new().unwrap();
        let root = cache_root_from_inputs(CacheInputs {
            xdg_cache_home: Some(tmp.path().join("xdg")),
            os_cache_dir: Some(tmp.path().join("os")),
            ..inputs(tmp.path())
        })
        .unwrap();
        assert_eq!(root, tmp.path().join("xdg/artifex"));
    }

    #[test]
    fn test_falls_back_to_temp_dir() {
        let tmp = TempDir::new().unwrap();
        let root = cache_root_from_inputs(inputs(tmp.path())).unwrap();
        assert_eq!(root, tmp.path().join("artifex/cache"));
    }

    #[test]
    fn test_configured_root_is_created() {
        let tmp = TempDir::new().unwrap();
        let config = CacheConfig {
            cache_root: Some(tmp.path().join("configured")),
        };
        let root = config.resolve_root().unwrap();
        assert!(root.is_dir());
    }

    #[test]
    fn test_layout() {
        let dirs = CacheDirectories::new("/cache");
        assert_eq!(
            dirs.hash_dir(CacheCategory::Binaries, "abc123"),
            Path::new("/cache/Binaries/abc123")
        );
        assert_eq!(
            dirs.category_dir(CacheCategory::SelectiveTests),
            Path::new("/cache/SelectiveTests")
        );
    }
}
