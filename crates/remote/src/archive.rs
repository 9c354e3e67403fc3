//! Wire archives for remote payloads
//!
//! A payload is a tar stream compressed with zstd whose top-level entries are
//! the basenames of the stored paths. On the way back in, the unpacked root
//! must hold exactly one recognized artifact, optionally accompanied by the
//! macro metadata manifest.

use crate::error::{RemoteError, Result};
use artifex_cache::{ArtifactKind, METADATA_FILE_NAME, is_signature_file};
use std::fs;
use std::path::{Path, PathBuf};

const COMPRESSION_LEVEL: i32 = 3;

/// Pack `paths` into a zstd-compressed tar at `archive`
pub fn pack(paths: &[PathBuf], archive: &Path) -> Result<()> {
    let file = fs::File::create(archive).map_err(|e| RemoteError::io(e, archive, "create"))?;
    let enc = zstd::Encoder::new(file, COMPRESSION_LEVEL)
        .map_err(|e| RemoteError::io(e, archive, "zstd encoder"))?;
    let mut builder = tar::Builder::new(enc);
    builder.follow_symlinks(false);

    for path in paths {
        let name = path.file_name().ok_or_else(|| {
            RemoteError::configuration(format!("artifact path {} has no file name", path.display()))
        })?;
        let metadata = fs::symlink_metadata(path).map_err(|e| RemoteError::io(e, path, "stat"))?;
        let result = if metadata.is_dir() {
            builder.append_dir_all(name, path)
        } else {
            builder.append_path_with_name(path, name)
        };
        result.map_err(|e| RemoteError::io(e, path, "tar append"))?;
    }

    let enc = builder
        .into_inner()
        .map_err(|e| RemoteError::io(e, archive, "tar finalize"))?;
    enc.finish()
        .map_err(|e| RemoteError::io(e, archive, "zstd finish"))?;
    Ok(())
}

/// A validated artifact unpacked from a payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnpackedArtifact {
    /// Kind of the artifact
    pub kind: ArtifactKind,
    /// Path of the artifact root
    pub root: PathBuf,
    /// Companion manifest, macro artifacts only
    pub metadata: Option<PathBuf>,
}

impl UnpackedArtifact {
    /// Rename the artifact to `<name>.<ext>` so lookups by name find it.
    ///
    /// Returns every staged path to install, artifact first.
    pub fn rename_for(self, name: &str) -> Result<Vec<PathBuf>> {
        let target = self
            .root
            .with_file_name(self.kind.file_name(name));
        if target != self.root {
            fs::rename(&self.root, &target).map_err(|e| RemoteError::io(e, &target, "rename"))?;
        }
        let mut staged = vec![target];
        staged.extend(self.metadata);
        Ok(staged)
    }
}

/// Unpack `archive` into `into` and check it holds one recognized artifact
pub fn unpack(archive: &Path, into: &Path) -> Result<UnpackedArtifact> {
    let file = fs::File::open(archive).map_err(|e| RemoteError::io(e, archive, "open"))?;
    let dec = zstd::Decoder::new(file).map_err(|e| RemoteError::io(e, archive, "zstd decoder"))?;
    let mut tar = tar::Archive::new(dec);
    tar.set_preserve_permissions(true);
    tar.unpack(into)
        .map_err(|e| RemoteError::invalid_artifact(format!("archive could not be unpacked: {e}")))?;

    classify(into)
}

fn classify(dir: &Path) -> Result<UnpackedArtifact> {
    let mut artifacts = Vec::new();
    let mut metadata = None;
    let mut unexpected = Vec::new();

    let entries = fs::read_dir(dir).map_err(|e| RemoteError::io(e, dir, "read_dir"))?;
    for entry in entries {
        let entry = entry.map_err(|e| RemoteError::io(e, dir, "read_dir"))?;
        let path = entry.path();
        if is_signature_file(&path) {
            continue;
        }
        if entry.file_name() == METADATA_FILE_NAME {
            metadata = Some(path);
        } else if let Some(kind) = ArtifactKind::from_path(&path) {
            artifacts.push((kind, path));
        } else {
            unexpected.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    unexpected.sort();

    let (kind, root) = match artifacts.len() {
        0 if unexpected.is_empty() => {
            return Err(RemoteError::invalid_artifact("the archive is empty"));
        }
        0 => {
            return Err(RemoteError::invalid_artifact(format!(
                "{} is not an xcframework, framework, bundle or macro",
                unexpected.join(", ")
            )));
        }
        1 => artifacts.remove(0),
        n => {
            return Err(RemoteError::invalid_artifact(format!(
                "expected a single artifact but found {n}"
            )));
        }
    };

    if !unexpected.is_empty() {
        return Err(RemoteError::invalid_artifact(format!(
            "unexpected entries next to the artifact: {}",
            unexpected.join(", ")
        )));
    }
    if metadata.is_some() && kind != ArtifactKind::Macro {
        return Err(RemoteError::invalid_artifact(format!(
            "{METADATA_FILE_NAME} is only expected next to a macro"
        )));
    }

    Ok(UnpackedArtifact {
        kind,
        root,
        metadata,
    })
}
