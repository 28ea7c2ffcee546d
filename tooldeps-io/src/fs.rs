// tooldeps-io/src/fs.rs
//! Primitive synchronous filesystem operations.
use std::{
    fs::{self, Permissions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use tempfile::NamedTempFile;
use tooldeps_common::error::{DepsError, Result};
use tracing::{debug, error, warn};

/// Checks if a path exists without following symlinks.
pub fn check_symlink_exists(path: &Path) -> bool {
    path.symlink_metadata().is_ok()
}

/// True if `path` itself is a symbolic link (dangling or not).
pub fn is_symlink(path: &Path) -> bool {
    path.symlink_metadata()
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}

/// Creates a directory and all its parent components if they are missing.
pub fn create_dir_all(path: &Path) -> Result<()> {
    debug!("Creating directory recursively: {}", path.display());
    fs::create_dir_all(path).map_err(|e| {
        error!("Failed create dir {}: {}", path.display(), e);
        DepsError::from(e)
    })
}

/// Removes a file.
pub fn remove_file(path: &Path) -> Result<()> {
    debug!("Removing file: {}", path.display());
    fs::remove_file(path).map_err(|e| {
        if e.kind() != io::ErrorKind::NotFound {
            error!("Failed remove file {}: {}", path.display(), e);
        }
        DepsError::from(e)
    })
}

/// Removes a directory and all its contents recursively.
pub fn remove_directory_recursive(path: &Path) -> Result<()> {
    debug!("Removing directory recursively: {}", path.display());
    fs::remove_dir_all(path).map_err(|e| {
        if e.kind() != io::ErrorKind::NotFound {
            error!("Failed remove dir_all {}: {}", path.display(), e);
        }
        DepsError::from(e)
    })
}

/// Sets file permissions (Unix only). Mode is standard Unix octal mode.
#[cfg(unix)]
pub fn set_permissions(path: &Path, mode: u32) -> Result<()> {
    debug!("Setting permissions on {}: {:o}", path.display(), mode);
    fs::set_permissions(path, Permissions::from_mode(mode)).map_err(|e| {
        error!("Failed set permissions on {}: {}", path.display(), e);
        DepsError::from(e)
    })
}

#[cfg(not(unix))]
pub fn set_permissions(path: &Path, _mode: u32) -> Result<()> {
    warn!(
        "Setting permissions not fully supported on this platform: {}",
        path.display()
    );
    let _unused: Option<Permissions> = None;
    Ok(())
}

/// True if the current process could create entries inside `dir`.
pub fn is_writable_dir(dir: &Path) -> bool {
    if !dir.is_dir() {
        return false;
    }
    match tempfile::Builder::new().prefix(".tooldeps-probe").tempfile_in(dir) {
        Ok(_) => true,
        Err(e) => {
            debug!("{} is not writable: {}", dir.display(), e);
            false
        }
    }
}

/// Atomically writes data to a file using a temporary file in the same directory.
pub fn atomic_write_file(original_path: &Path, content: &[u8]) -> Result<()> {
    let dir = original_path.parent().ok_or_else(|| {
        DepsError::Generic(format!(
            "Cannot get parent directory for {}",
            original_path.display()
        ))
    })?;

    create_dir_all(dir)?;

    let mut temp_file = NamedTempFile::new_in(dir)?;
    let temp_path = temp_file.path().to_path_buf(); // Store path before consuming temp_file

    debug!(
        "Atomically writing {} bytes to {} via temp file {}",
        content.len(),
        original_path.display(),
        temp_path.display()
    );

    temp_file.write_all(content)?;
    temp_file.flush()?;
    temp_file.as_file().sync_all()?;

    temp_file.persist(original_path).map_err(|e| {
        error!(
            "Failed to persist temporary file {} over {}: {}",
            temp_path.display(),
            original_path.display(),
            e.error
        );
        DepsError::Io(Arc::new(e.error))
    })?;
    Ok(())
}

/// Lists directory entries as (name, path, is_dir).
/// Skips entries that cause errors during reading.
pub fn list_directory_entries(dir_path: &Path) -> Result<Vec<(String, PathBuf, bool)>> {
    debug!("Listing directory entries for: {}", dir_path.display());
    let mut entries = Vec::new();

    match fs::read_dir(dir_path) {
        Ok(read_dir) => {
            for entry_res in read_dir {
                match entry_res {
                    Ok(entry) => {
                        let path = entry.path();
                        let name = entry.file_name().to_string_lossy().to_string();
                        // Follow symlinks so linked environments count as directories.
                        entries.push((name, path.clone(), path.is_dir()));
                    }
                    Err(e) => {
                        warn!("Error reading entry in {}: {}", dir_path.display(), e);
                    }
                }
            }
            Ok(entries)
        }
        Err(e) => {
            error!("Failed to read directory {}: {}", dir_path.display(), e);
            Err(DepsError::from(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_then_list() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("sub").join("report.json");
        atomic_write_file(&target, b"{}").unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "{}");

        let entries = list_directory_entries(&dir.path().join("sub")).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "report.json");
        assert!(!entries[0].2);
        assert!(is_writable_dir(dir.path()));
        assert!(!is_writable_dir(&target));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_detection() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("default");
        std::os::unix::fs::symlink(dir.path().join("missing"), &link).unwrap();
        assert!(is_symlink(&link));
        assert!(check_symlink_exists(&link));
        assert!(!link.exists());
        assert!(!is_symlink(dir.path()));
    }
}
