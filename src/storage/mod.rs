//! Shared storage layout
//!
//! Every instance owns one directory under the shared root:
//!
//! ```text
//! <shared_root>/instances/<name>/
//! ├── data/<staging key>   staged file content, flat
//! └── meta/
//!     ├── <hostname>.txt   file list published by each node
//!     └── lock.txt         staging descriptor written by the master
//! ```

pub mod crawler;
pub mod key;
pub mod lock;
pub mod metadata;

pub use crawler::{crawl, crawl_all, RelativePath};
pub use key::{staging_key, KeyScheme, StagingKey};
pub use lock::StagingDescriptor;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::Result;

/// The lock descriptor lives where a node of this name would publish its
/// metadata, so no node may use it
pub const RESERVED_HOSTNAME: &str = "lock";

/// Paths of one instance inside the shared folder
#[derive(Debug, Clone)]
pub struct InstanceLayout {
    instance_dir: PathBuf,
}

impl InstanceLayout {
    pub fn new(shared_root: &Path, instance: &str) -> Self {
        Self {
            instance_dir: shared_root.join("instances").join(instance),
        }
    }

    /// Staging directory
    pub fn data_dir(&self) -> PathBuf {
        self.instance_dir.join("data")
    }

    /// Metadata directory
    pub fn meta_dir(&self) -> PathBuf {
        self.instance_dir.join("meta")
    }

    /// Lock descriptor file
    pub fn lock_path(&self) -> PathBuf {
        self.meta_file(RESERVED_HOSTNAME)
    }

    /// Metadata file published by `hostname`
    pub fn meta_file(&self, hostname: &str) -> PathBuf {
        self.meta_dir().join(format!("{}.txt", hostname))
    }

    /// Staged file for `key`
    pub fn staged_file(&self, key: &StagingKey) -> PathBuf {
        self.data_dir().join(key.as_str())
    }

    /// Create the staging and metadata directories if missing
    pub fn create_dirs(&self) -> Result<()> {
        for dir in [self.data_dir(), self.meta_dir()] {
            ensure_dir(&dir)?;
        }
        Ok(())
    }

    /// Both shared directories have been propagated to this node
    pub fn dirs_exist(&self) -> bool {
        self.data_dir().is_dir() && self.meta_dir().is_dir()
    }

    /// Names currently present in the staging directory
    pub fn staged_keys(&self) -> Result<Vec<StagingKey>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(self.data_dir())? {
            let entry = entry?;
            keys.push(StagingKey::new(entry.file_name().to_string_lossy()));
        }
        keys.sort();
        Ok(keys)
    }
}

/// Create a directory and its parents, ignoring "already exists"
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.is_dir() {
        fs::create_dir_all(path)?;
        info!("Created directory {:?}", path);
    }
    Ok(())
}

/// Copy `src` to `dest` unless `dest` already exists. Returns whether a copy
/// was made. A failed copy removes whatever part of `dest` was written so a
/// later pass does not mistake it for a complete file.
pub fn copy_if_absent(src: &Path, dest: &Path) -> Result<bool> {
    if dest.exists() {
        return Ok(false);
    }

    if let Some(parent) = dest.parent() {
        ensure_dir(parent)?;
    }

    if let Err(e) = fs::copy(src, dest) {
        if let Err(cleanup) = fs::remove_file(dest) {
            if cleanup.kind() != io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove partial copy {:?}: {}", dest, cleanup);
            }
        }
        return Err(e.into());
    }

    Ok(true)
}

/// Replace `path` with `payload` via a sibling temp file and a rename
pub fn write_atomic(path: &Path, payload: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, payload)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_layout_paths() {
        let layout = InstanceLayout::new(Path::new("/sync"), "photos");
        assert_eq!(layout.data_dir(), PathBuf::from("/sync/instances/photos/data"));
        assert_eq!(layout.meta_dir(), PathBuf::from("/sync/instances/photos/meta"));
        assert_eq!(
            layout.lock_path(),
            PathBuf::from("/sync/instances/photos/meta/lock.txt")
        );
        assert_eq!(
            layout.meta_file("laptop"),
            PathBuf::from("/sync/instances/photos/meta/laptop.txt")
        );
    }

    #[test]
    fn test_create_dirs_is_idempotent() {
        let dir = tempdir().unwrap();
        let layout = InstanceLayout::new(dir.path(), "docs");
        assert!(!layout.dirs_exist());

        layout.create_dirs().unwrap();
        layout.create_dirs().unwrap();
        assert!(layout.dirs_exist());
        assert!(layout.staged_keys().unwrap().is_empty());
    }

    #[test]
    fn test_copy_if_absent_never_overwrites() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src.txt");
        let dest = dir.path().join("nested/dir/dest.txt");
        fs::write(&src, b"first").unwrap();

        assert!(copy_if_absent(&src, &dest).unwrap());
        assert_eq!(fs::read(&dest).unwrap(), b"first");

        fs::write(&src, b"second").unwrap();
        assert!(!copy_if_absent(&src, &dest).unwrap());
        assert_eq!(fs::read(&dest).unwrap(), b"first");
    }

    #[test]
    fn test_copy_missing_source_leaves_no_file() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("dest.txt");

        assert!(copy_if_absent(&dir.path().join("missing"), &dest).is_err());
        assert!(!dest.exists());
    }

    #[test]
    fn test_write_atomic_replaces() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("host.txt");

        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");
        assert!(!dir.path().join("host.tmp").exists());
    }
}
