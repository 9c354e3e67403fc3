//! Artifact signing
//!
//! A signature is a sidecar file written next to the artifact it covers:
//!
//! ```text
//! <dir>/Alpha.framework            artifact (file or directory tree)
//! <dir>/.Alpha.framework.signature sidecar holding the tree digest
//! ```
//!
//! The digest is a SHA-256 over the artifact's relative paths, entry kinds,
//! file contents and symlink targets, walked in file-name order. Validation
//! recomputes it, so an artifact modified or left half-written after signing
//! no longer validates.

use crate::fs::walk_error;
use crate::{Error, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const SIGNATURE_DOMAIN: &[u8] = b"artifex-artifact-signature-v1";
const SIGNATURE_SUFFIX: &str = ".signature";
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Signs artifacts after they are written and validates them before use
#[derive(Debug, Clone, Copy, Default)]
pub struct ArtifactSigner;

impl ArtifactSigner {
    /// Create a new signer
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Write a signature for the artifact rooted at `path`.
    ///
    /// Must run only after the artifact is fully in place.
    pub fn sign(&self, path: &Path) -> Result<()> {
        ensure_exists(path)?;
        let digest = self.digest(path)?;
        let signature_path = signature_path(path)?;
        let parent = signature_path
            .parent()
            .ok_or_else(|| Error::configuration("signature path has no parent"))?;

        // Write then rename, so readers never see a truncated sidecar.
        let mut tmp = tempfile::Builder::new()
            .prefix(".signing-")
            .tempfile_in(parent)
            .map_err(|e| Error::io(e, parent, "create_temp"))?;
        tmp.write_all(digest.as_bytes())
            .map_err(|e| Error::io(e, tmp.path(), "write"))?;
        tmp.persist(&signature_path)
            .map_err(|e| Error::io(e.error, &signature_path, "persist"))?;

        tracing::trace!(artifact = %path.display(), "Signed artifact");
        Ok(())
    }

    /// Whether the artifact at `path` still matches its signature.
    ///
    /// A missing signature is `Ok(false)`; a missing artifact is an error.
    pub fn is_valid(&self, path: &Path) -> Result<bool> {
        ensure_exists(path)?;
        let signature_path = signature_path(path)?;
        let expected = match fs::read_to_string(&signature_path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(Error::io(e, &signature_path, "read")),
        };
        Ok(expected.trim() == self.digest(path)?)
    }

    /// Remove the signature for `path`, if any
    pub fn invalidate(&self, path: &Path) -> Result<()> {
        let signature_path = signature_path(path)?;
        match fs::remove_file(&signature_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(e, &signature_path, "remove_file")),
        }
    }

    fn digest(&self, path: &Path) -> Result<String> {
        let mut hasher = Sha256::new();
        hasher.update(SIGNATURE_DOMAIN);

        for entry in WalkDir::new(path).sort_by_file_name() {
            let entry = entry.map_err(|e| walk_error(e, path))?;
            if entry.depth() > 0 && is_signature_file(entry.path()) {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(path)
                .map_err(|_| Error::configuration("walked outside of artifact root"))?;
            let relative: Vec<_> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            hasher.update(relative.join("/").as_bytes());
            hasher.update([0]);

            let file_type = entry.file_type();
            if file_type.is_symlink() {
                let target = fs::read_link(entry.path())
                    .map_err(|e| Error::io(e, entry.path(), "read_link"))?;
                hasher.update(b"l");
                hasher.update(target.to_string_lossy().as_bytes());
            } else if file_type.is_dir() {
                hasher.update(b"d");
            } else {
                hasher.update(b"f");
                hash_file_contents(&mut hasher, entry.path())?;
            }
            hasher.update([0]);
        }

        Ok(hex::encode(hasher.finalize()))
    }
}

/// Location of the sidecar signature for `path`
pub fn signature_path(path: &Path) -> Result<PathBuf> {
    let file_name = path.file_name().ok_or_else(|| {
        Error::configuration(format!(
            "cannot derive a signature path for {}",
            path.display()
        ))
    })?;
    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    Ok(parent.join(format!(
        ".{}{SIGNATURE_SUFFIX}",
        file_name.to_string_lossy()
    )))
}

/// Whether `path` names a signature sidecar
#[must_use]
pub fn is_signature_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.') && n.ends_with(SIGNATURE_SUFFIX))
}

fn ensure_exists(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::artifact_not_found(path)),
        Err(e) => Err(Error::io(e, path, "stat")),
    }
}

fn hash_file_contents(hasher: &mut Sha256, path: &Path) -> Result<()> {
    let mut file = fs::File::open(path).map_err(|e| Error::io(e, path, "open"))?;
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let read = file
            .read(&mut buffer)
            .map_err(|e| Error::io(e, path, "read"))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn framework(root: &Path) -> PathBuf {
        let path = root.join("Alpha.framework");
        fs::create_dir_all(path.join("Headers")).unwrap();
        fs::write(path.join("Alpha"), b"binary").unwrap();
        fs::write(path.join("Headers/Alpha.h"), b"#import <Foundation/Foundation.h>").unwrap();
        path
    }

    #[test]
    fn test_sign_then_validate_directory() {
        let tmp = TempDir::new().unwrap();
        let path = framework(tmp.path());
        let signer = ArtifactSigner::new();

        assert!(!signer.is_valid(&path).unwrap());
        signer.sign(&path).unwrap();
        assert!(signer.is_valid(&path).unwrap());
        assert!(tmp.path().join(".Alpha.framework.signature").exists());
    }

    #[test]
    fn test_modified_contents_invalidate_signature() {
        let tmp = TempDir::new().unwrap();
        let path = framework(tmp.path());
        let signer = ArtifactSigner::new();
        signer.sign(&path).unwrap();

        fs::write(path.join("Headers/Alpha.h"), b"changed").unwrap();
        assert!(!signer.is_valid(&path).unwrap());
    }

    #[test]
    fn test_added_file_invalidates_signature() {
        let tmp = TempDir::new().unwrap();
        let path = framework(tmp.path());
        let signer = ArtifactSigner::new();
        signer.sign(&path).unwrap();

        fs::write(path.join("Extra"), b"").unwrap();
        assert!(!signer.is_valid(&path).unwrap());
    }

    #[test]
    fn test_sign_single_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("Tool.macro");
        fs::write(&path, b"macro executable").unwrap();
        let signer = ArtifactSigner::new();

        signer.sign(&path).unwrap();
        assert!(signer.is_valid(&path).unwrap());

        fs::write(&path, b"tampered").unwrap();
        assert!(!signer.is_valid(&path).unwrap());
    }

    #[test]
    fn test_missing_artifact_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let signer = ArtifactSigner::new();
        let missing = tmp.path().join("Missing.framework");

        assert!(matches!(
            signer.sign(&missing),
            Err(Error::ArtifactNotFound { .. })
        ));
        assert!(matches!(
            signer.is_valid(&missing),
            Err(Error::ArtifactNotFound { .. })
        ));
    }

    #[test]
    fn test_invalidate_removes_signature() {
        let tmp = TempDir::new().unwrap();
        let path = framework(tmp.path());
        let signer = ArtifactSigner::new();
        signer.sign(&path).unwrap();

        signer.invalidate(&path).unwrap();
        assert!(!signer.is_valid(&path).unwrap());
        // Idempotent
        signer.invalidate(&path).unwrap();
    }

    #[test]
    fn test_nested_signatures_do_not_affect_parent_digest() {
        let tmp = TempDir::new().unwrap();
        let hash_dir = tmp.path().join("abc123");
        fs::create_dir_all(&hash_dir).unwrap();
        fs::write(hash_dir.join("Marker"), b"passed").unwrap();
        let signer = ArtifactSigner::new();

        signer.sign(&hash_dir).unwrap();
        signer.sign(&hash_dir.join("Marker")).unwrap();
        assert!(signer.is_valid(&hash_dir).unwrap());
    }

    #[test]
    fn test_signature_path_and_detection() {
        let path = signature_path(Path::new("/cache/Binaries/abc/Alpha.framework")).unwrap();
        assert_eq!(
            path,
            Path::new("/cache/Binaries/abc/.Alpha.framework.signature")
        );
        assert!(is_signature_file(&path));
        assert!(!is_signature_file(Path::new("Alpha.framework")));
    }
}
