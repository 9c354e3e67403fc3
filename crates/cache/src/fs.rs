//! Filesystem helpers shared by the local tier and the signer

use crate::signer::is_signature_file;
use crate::{Error, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::SystemTime;
use walkdir::WalkDir;

const MAX_SWAP_ATTEMPTS: usize = 3;

pub(crate) fn walk_error(err: walkdir::Error, root: &Path) -> Error {
    let path = err.path().map_or_else(|| root.to_path_buf(), Path::to_path_buf);
    let source = err
        .into_io_error()
        .unwrap_or_else(|| std::io::Error::other("filesystem loop detected"));
    Error::io(source, path, "walk")
}

/// Copy a file, symlink or directory tree, preserving symlinks
pub(crate) fn copy_recursively(source: &Path, destination: &Path) -> Result<()> {
    let metadata = fs::symlink_metadata(source).map_err(|e| Error::io(e, source, "stat"))?;
    if metadata.file_type().is_symlink() {
        return copy_symlink(source, destination);
    }
    if metadata.is_file() {
        fs::copy(source, destination).map_err(|e| Error::io(e, destination, "copy"))?;
        return Ok(());
    }

    for entry in WalkDir::new(source) {
        let entry = entry.map_err(|e| walk_error(e, source))?;
        if entry.depth() > 0 && is_signature_file(entry.path()) {
            continue;
        }
        let relative = entry.path().strip_prefix(source).map_err(|_| {
            Error::configuration(format!(
                "path {} is not under {}",
                entry.path().display(),
                source.display()
            ))
        })?;
        let target = destination.join(relative);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(|e| Error::io(e, &target, "create_dir_all"))?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target).map_err(|e| Error::io(e, &target, "copy"))?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(source: &Path, destination: &Path) -> Result<()> {
    let target = fs::read_link(source).map_err(|e| Error::io(e, source, "read_link"))?;
    std::os::unix::fs::symlink(&target, destination)
        .map_err(|e| Error::io(e, destination, "symlink"))
}

#[cfg(not(unix))]
fn copy_symlink(source: &Path, destination: &Path) -> Result<()> {
    fs::copy(source, destination).map_err(|e| Error::io(e, destination, "copy"))?;
    Ok(())
}

/// Move `staged` to `destination`, retiring whatever is there into `scratch`.
///
/// Both renames stay within one filesystem, so a concurrent reader sees the
/// old entry, no entry, or the complete new one.
pub(crate) fn swap_into_place(staged: &Path, destination: &Path, scratch: &Path) -> Result<()> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        retire_existing(destination, scratch, attempt)?;
        match fs::rename(staged, destination) {
            Ok(()) => return Ok(()),
            // Another writer landed the same artifact between the two renames.
            Err(_) if attempt < MAX_SWAP_ATTEMPTS && fs::symlink_metadata(destination).is_ok() => {
                tracing::debug!(
                    destination = %destination.display(),
                    attempt,
                    "Destination reappeared while swapping, retrying"
                );
            }
            Err(e) => return Err(Error::io(e, destination, "rename")),
        }
    }
}

fn retire_existing(destination: &Path, scratch: &Path, attempt: usize) -> Result<()> {
    let metadata = match fs::symlink_metadata(destination) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(Error::io(e, destination, "stat")),
    };
    // rename(2) replaces plain files atomically on unix
    if cfg!(unix) && !metadata.is_dir() {
        return Ok(());
    }
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let retired = scratch.join(format!(".retired-{attempt}-{name}"));
    match fs::rename(destination, &retired) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io(e, destination, "rename")),
    }
}

/// Delete a file, symlink or directory tree at `path` if one exists
pub(crate) fn remove_existing(path: &Path) -> Result<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(Error::io(e, path, "stat")),
    };
    let result = if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io(e, path, "remove")),
    }
}

/// Refresh the modification time of `path`, ignoring failures
pub(crate) fn touch(path: &Path) {
    let result = fs::File::open(path).and_then(|f| f.set_modified(SystemTime::now()));
    if let Err(e) = result {
        tracing::trace!(path = %path.display(), error = %e, "Could not refresh modification time");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_copy_directory_tree() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("Alpha.framework");
        fs::create_dir_all(source.join("Modules")).unwrap();
        fs::write(source.join("Modules/module.modulemap"), b"framework module Alpha {}").unwrap();
        fs::write(source.join(".Nested.signature"), b"stale").unwrap();

        let destination = tmp.path().join("copy.framework");
        copy_recursively(&source, &destination).unwrap();

        assert_eq!(
            fs::read(destination.join("Modules/module.modulemap")).unwrap(),
            b"framework module Alpha {}"
        );
        assert!(!destination.join(".Nested.signature").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_preserves_symlinks() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("Alpha.framework");
        fs::create_dir_all(source.join("Versions/A")).unwrap();
        std::os::unix::fs::symlink("A", source.join("Versions/Current")).unwrap();

        let destination = tmp.path().join("copy.framework");
        copy_recursively(&source, &destination).unwrap();

        let link = fs::read_link(destination.join("Versions/Current")).unwrap();
        assert_eq!(link, Path::new("A"));
    }

    #[test]
    fn test_swap_replaces_existing_directory() {
        let tmp = TempDir::new().unwrap();
        let scratch = tmp.path().join("scratch");
        fs::create_dir_all(&scratch).unwrap();

        let destination = tmp.path().join("Alpha.framework");
        fs::create_dir_all(&destination).unwrap();
        fs::write(destination.join("old"), b"old").unwrap();

        let staged = scratch.join("Alpha.framework");
        fs::create_dir_all(&staged).unwrap();
        fs::write(staged.join("new"), b"new").unwrap();

        swap_into_place(&staged, &destination, &scratch).unwrap();
        assert!(destination.join("new").exists());
        assert!(!destination.join("old").exists());
        assert!(!staged.exists());
    }
}
