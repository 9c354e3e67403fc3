//! Signed, content-addressed artifact cache for artifex
//!
//! This crate provides the local half of the artifact cache:
//! - The data model shared by every tier (categories, items, artifact kinds)
//! - Signing and validation of artifacts on disk
//! - The filesystem-backed local tier
//! - The [`CacheStoring`] capability and the [`CacheStorage`] façade that
//!   composes a local tier with an optional remote tier
//!
//! # Layout
//!
//! ```text
//! <root>/<category>/<hash>/<name>.<ext>     one artifact
//! <root>/<category>/<hash>/Metadata.plist   macro artifacts only
//! <root>/<category>/<hash>/                 itself signed for selective tests
//! ```
//!
//! An artifact is only ever returned from a fetch when its signature
//! validates at read time. Unsigned or tampered artifacts are misses.

mod alerts;
mod config;
mod error;
mod fs;
mod item;
mod local;
mod signer;
mod storage;

pub use alerts::{Alert, AlertSeverity, Alerts};
pub use config::{CACHE_DIR_ENV, CacheConfig, CacheDirectories};
pub use error::{Error, Result};
pub use item::{
    ArtifactKind, CacheCategory, CacheItem, CacheSource, CacheStorableItem, METADATA_FILE_NAME,
};
pub use local::LocalStorage;
pub use signer::{ArtifactSigner, is_signature_file, signature_path};
pub use storage::{CacheStorage, CacheStoring, FetchResult};
