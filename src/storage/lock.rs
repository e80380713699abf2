//! Staging lock
//!
//! The master seals every successful staging refresh with a descriptor of
//! the staging directory: total size of the staged files and a digest of
//! their sorted names. A slave recomputes the descriptor from what the sync
//! service has delivered so far and only pulls when both agree.

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::key::KeyScheme;
use super::write_atomic;
use crate::error::{Error, Result};

/// Size and name digest of a staging directory.
///
/// Stored as a two element JSON array, `[total_bytes, content_hash]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(u64, String)", into = "(u64, String)")]
pub struct StagingDescriptor {
    /// Sum of staged file sizes
    pub total_bytes: u64,
    /// Digest of the concatenated, sorted staged names
    pub content_hash: String,
}

impl From<(u64, String)> for StagingDescriptor {
    fn from((total_bytes, content_hash): (u64, String)) -> Self {
        Self {
            total_bytes,
            content_hash,
        }
    }
}

impl From<StagingDescriptor> for (u64, String) {
    fn from(descriptor: StagingDescriptor) -> Self {
        (descriptor.total_bytes, descriptor.content_hash)
    }
}

/// Describe the live contents of `data_dir`.
///
/// A file that disappears between listing and stat means the directory is
/// being rewritten; that surfaces as [`Error::StagingChanged`].
pub fn compute(data_dir: &Path, scheme: KeyScheme) -> Result<StagingDescriptor> {
    let mut names = Vec::new();
    for entry in fs::read_dir(data_dir)? {
        names.push(entry?.file_name().to_string_lossy().into_owned());
    }
    names.sort();

    let mut total_bytes = 0u64;
    for name in &names {
        let path = data_dir.join(name);
        let metadata = fs::metadata(&path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => Error::StagingChanged { path, source },
            _ => Error::Io(source),
        })?;
        total_bytes += metadata.len();
    }

    let content_hash = scheme.digest_bytes(names.concat().as_bytes());
    debug!(
        "Staging descriptor for {:?}: {} files, {} bytes, {}",
        data_dir,
        names.len(),
        total_bytes,
        content_hash
    );

    Ok(StagingDescriptor {
        total_bytes,
        content_hash,
    })
}

/// Overwrite the lock file with `descriptor`
pub fn persist(descriptor: &StagingDescriptor, lock_path: &Path) -> Result<()> {
    let payload = serde_json::to_vec(descriptor)?;
    write_atomic(lock_path, &payload)
}

/// Read the persisted descriptor, `None` if no lock was written yet
pub fn load(lock_path: &Path) -> Result<Option<StagingDescriptor>> {
    match fs::read(lock_path) {
        Ok(payload) => Ok(Some(serde_json::from_slice(&payload)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Compare the live staging directory against the lock.
///
/// Returns the agreed descriptor, or [`Error::LockMismatch`] describing why
/// the two differ. A missing or unreadable lock counts as a mismatch.
pub fn check(data_dir: &Path, lock_path: &Path, scheme: KeyScheme) -> Result<StagingDescriptor> {
    let live = compute(data_dir, scheme)?;

    let persisted = match load(lock_path) {
        Ok(Some(persisted)) => persisted,
        Ok(None) => return Err(Error::LockMismatch(format!("no lock at {:?}", lock_path))),
        Err(Error::Metadata(e)) => {
            return Err(Error::LockMismatch(format!("unreadable lock {:?}: {}", lock_path, e)))
        }
        Err(e) => return Err(e),
    };

    if live != persisted {
        return Err(Error::LockMismatch(format!(
            "staging has {} bytes/{}, lock says {} bytes/{}",
            live.total_bytes, live.content_hash, persisted.total_bytes, persisted.content_hash
        )));
    }

    Ok(live)
}

/// True iff the live descriptor equals the persisted one
pub fn verify(data_dir: &Path, lock_path: &Path, scheme: KeyScheme) -> Result<bool> {
    match check(data_dir, lock_path, scheme) {
        Ok(_) => Ok(true),
        Err(Error::LockMismatch(reason)) => {
            debug!("Staging lock does not verify: {}", reason);
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, std::path::PathBuf, std::path::PathBuf) {
        let dir = tempdir().unwrap();
        let data = dir.path().join("data");
        let lock = dir.path().join("lock.txt");
        fs::create_dir_all(&data).unwrap();
        (dir, data, lock)
    }

    #[test]
    fn test_compute_empty_staging() {
        let (_dir, data, _lock) = setup();
        let descriptor = compute(&data, KeyScheme::Legacy).unwrap();
        assert_eq!(descriptor.total_bytes, 0);
        assert_eq!(descriptor.content_hash, "e6fda0f0d3e0adfff69e334462d1ef6a");
    }

    #[test]
    fn test_compute_ignores_listing_order() {
        let (_dir, data, _lock) = setup();
        fs::write(data.join("bbb"), b"12345").unwrap();
        fs::write(data.join("aaa"), b"123").unwrap();

        let descriptor = compute(&data, KeyScheme::Sha256).unwrap();
        assert_eq!(descriptor.total_bytes, 8);
        assert_eq!(descriptor.content_hash, KeyScheme::Sha256.digest_bytes(b"aaabbb"));
    }

    #[test]
    fn test_lock_format() {
        let (_dir, _data, lock) = setup();
        let descriptor = StagingDescriptor {
            total_bytes: 42,
            content_hash: "abc".into(),
        };

        persist(&descriptor, &lock).unwrap();
        assert_eq!(fs::read_to_string(&lock).unwrap(), "[42,\"abc\"]");

        fs::write(&lock, "[42, \"abc\"]").unwrap();
        assert_eq!(load(&lock).unwrap(), Some(descriptor));
    }

    #[test]
    fn test_verify_gate() {
        let (_dir, data, lock) = setup();
        fs::write(data.join("k1"), b"content").unwrap();

        // No lock yet
        assert!(!verify(&data, &lock, KeyScheme::Legacy).unwrap());

        persist(&compute(&data, KeyScheme::Legacy).unwrap(), &lock).unwrap();
        assert!(verify(&data, &lock, KeyScheme::Legacy).unwrap());

        // A second file arrives before its lock update
        fs::write(data.join("k2"), b"more").unwrap();
        assert!(!verify(&data, &lock, KeyScheme::Legacy).unwrap());

        // Same names, content still propagating
        fs::remove_file(data.join("k2")).unwrap();
        fs::write(data.join("k1"), b"conte").unwrap();
        assert!(!verify(&data, &lock, KeyScheme::Legacy).unwrap());
    }

    #[test]
    fn test_unreadable_lock_is_mismatch() {
        let (_dir, data, lock) = setup();
        fs::write(&lock, "not json").unwrap();

        let err = check(&data, &lock, KeyScheme::Legacy).unwrap_err();
        assert!(err.is_transient());
        assert!(!verify(&data, &lock, KeyScheme::Legacy).unwrap());
    }
}
