//! Cache request identities and artifact kinds

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Name of the companion manifest stored next to macro artifacts
pub const METADATA_FILE_NAME: &str = "Metadata.plist";

/// Namespace partition within the cache.
///
/// Selects both the local subdirectory and the remote namespace. Artifacts
/// stored under one category are invisible to queries against another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheCategory {
    /// Compiled binaries (frameworks, bundles, macros)
    Binaries,
    /// Markers recording that a test target passed for a given hash
    SelectiveTests,
}

impl CacheCategory {
    /// Every category, in a stable order
    pub const ALL: [Self; 2] = [Self::Binaries, Self::SelectiveTests];

    /// Directory name under the cache root
    #[must_use]
    pub const fn directory_name(self) -> &'static str {
        match self {
            Self::Binaries => "Binaries",
            Self::SelectiveTests => "SelectiveTests",
        }
    }

    /// Name used for this category in remote requests
    #[must_use]
    pub const fn wire_name(self) -> &'static str {
        match self {
            Self::Binaries => "binaries",
            Self::SelectiveTests => "selective_tests",
        }
    }
}

impl fmt::Display for CacheCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Binaries => write!(f, "binaries"),
            Self::SelectiveTests => write!(f, "selective-tests"),
        }
    }
}

impl FromStr for CacheCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "binaries" => Ok(Self::Binaries),
            "selective-tests" | "selective_tests" => Ok(Self::SelectiveTests),
            other => Err(format!(
                "unknown cache category '{other}' (expected 'binaries' or 'selective-tests')"
            )),
        }
    }
}

/// Identity of a fetch or store request.
///
/// Equality covers both fields: two items with the same hash but different
/// names are distinct, since the name also selects the on-disk file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheStorableItem {
    /// Artifact name, without extension
    pub name: String,
    /// Content hash of the buildable unit
    pub hash: String,
}

impl CacheStorableItem {
    /// Create a new storable item
    #[must_use]
    pub fn new(name: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hash: hash.into(),
        }
    }
}

impl fmt::Display for CacheStorableItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.hash)
    }
}

/// Where a fetch hit was served from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheSource {
    /// Found on disk under the cache root
    Local,
    /// Downloaded from the remote tier during this fetch
    Remote,
}

/// A fetch hit: the requested item plus its provenance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheItem {
    /// Artifact name
    pub name: String,
    /// Content hash
    pub hash: String,
    /// Tier that satisfied the request
    pub source: CacheSource,
    /// Category the item was fetched from
    pub category: CacheCategory,
}

impl CacheItem {
    /// Build a hit for `item`
    #[must_use]
    pub fn new(item: &CacheStorableItem, source: CacheSource, category: CacheCategory) -> Self {
        Self {
            name: item.name.clone(),
            hash: item.hash.clone(),
            source,
            category,
        }
    }

    /// The request identity this hit answers
    #[must_use]
    pub fn storable(&self) -> CacheStorableItem {
        CacheStorableItem::new(self.name.clone(), self.hash.clone())
    }
}

/// Recognized artifact kinds, in lookup precedence order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// `.xcframework`
    XcFramework,
    /// `.framework`
    Framework,
    /// `.bundle`
    Bundle,
    /// `.macro`
    Macro,
}

impl ArtifactKind {
    /// All kinds, highest precedence first
    pub const ALL: [Self; 4] = [Self::XcFramework, Self::Framework, Self::Bundle, Self::Macro];

    /// File extension, without the leading dot
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::XcFramework => "xcframework",
            Self::Framework => "framework",
            Self::Bundle => "bundle",
            Self::Macro => "macro",
        }
    }

    /// File name an artifact of this kind called `name` is stored under
    #[must_use]
    pub fn file_name(self, name: &str) -> String {
        format!("{name}.{}", self.extension())
    }

    /// Kind of the artifact at `path`, judged by its extension
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?;
        Self::ALL
            .into_iter()
            .find(|kind| kind.extension() == extension)
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ".{}", self.extension())
    }
}
