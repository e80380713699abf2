//! Local tree crawler
//!
//! Walks an instance's local root and yields every file as a
//! [`RelativePath`], the identity a file carries across nodes.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use tracing::warn;
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// A file path relative to an instance root, always `/`-separated UTF-8
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RelativePath(String);

impl RelativePath {
    /// Validate a path read from shared metadata. Absolute paths and
    /// `.`/`..` components are rejected so a path can never leave the root.
    pub fn new(path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let valid = !path.is_empty()
            && !path.starts_with('/')
            && path
                .split('/')
                .all(|part| !part.is_empty() && part != "." && part != "..");

        if valid {
            Ok(Self(path))
        } else {
            Err(Error::InvalidPath(path))
        }
    }

    /// Build from a path relative to the crawl root. Returns `None` when a
    /// component is not valid UTF-8.
    pub fn from_path(path: &Path) -> Option<Self> {
        let mut parts = Vec::new();
        for component in path.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_str()?),
                _ => return None,
            }
        }

        if parts.is_empty() {
            return None;
        }
        Some(Self(parts.join("/")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Location of this file under `root`
    pub fn under(&self, root: &Path) -> PathBuf {
        let mut full = root.to_path_buf();
        full.extend(self.0.split('/'));
        full
    }
}

impl fmt::Display for RelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lazy walk over the files of a local tree
pub struct Crawl {
    root: PathBuf,
    walker: walkdir::IntoIter,
}

impl Iterator for Crawl {
    type Item = Result<RelativePath>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                // An unreadable subtree is left out of this pass only
                Err(source) if source.depth() > 0 => {
                    warn!("Skipping unreadable {:?}: {}", source.path(), source);
                    continue;
                }
                Err(source) => {
                    return Some(Err(Error::Crawl {
                        root: self.root.clone(),
                        source,
                    }))
                }
            };

            // Symlinked directories are not descended into, like plain walks
            if entry.file_type().is_dir() || (entry.path_is_symlink() && entry.path().is_dir()) {
                continue;
            }

            let relative = match entry.path().strip_prefix(&self.root) {
                Ok(relative) => relative,
                Err(_) => continue,
            };

            match RelativePath::from_path(relative) {
                Some(path) => return Some(Ok(path)),
                None => warn!("Skipping {:?}: name is not valid UTF-8", entry.path()),
            }
        }
    }
}

/// Start a crawl of `root`. Fails immediately if the root is unreadable;
/// unreadable directories further down are skipped with a warning.
pub fn crawl(root: &Path) -> Result<Crawl> {
    std::fs::read_dir(root)?;

    let walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter();

    Ok(Crawl {
        root: root.to_path_buf(),
        walker,
    })
}

/// Crawl `root` to completion. Any error discards the partial listing.
pub fn crawl_all(root: &Path) -> Result<Vec<RelativePath>> {
    crawl(root)?.collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_crawl_lists_files_only() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        fs::create_dir_all(dir.path().join("empty")).unwrap();
        fs::write(dir.path().join("top.txt"), b"1").unwrap();
        fs::write(dir.path().join("a/one.txt"), b"2").unwrap();
        fs::write(dir.path().join("a/b/two.txt"), b"3").unwrap();

        let files = crawl_all(dir.path()).unwrap();
        let names: Vec<&str> = files.iter().map(|p| p.as_str()).collect();
        assert_eq!(names, vec!["a/b/two.txt", "a/one.txt", "top.txt"]);
    }

    #[test]
    fn test_crawl_is_restartable() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("x"), b"").unwrap();

        assert_eq!(crawl_all(dir.path()).unwrap().len(), 1);
        fs::write(dir.path().join("y"), b"").unwrap();
        assert_eq!(crawl_all(dir.path()).unwrap().len(), 2);
    }

    #[test]
    fn test_crawl_missing_root_fails() {
        let dir = tempdir().unwrap();
        let result = crawl(&dir.path().join("missing"));
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_crawl_skips_unreadable_subdir() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let locked = dir.path().join("locked");
        fs::create_dir_all(&locked).unwrap();
        fs::write(locked.join("hidden.txt"), b"1").unwrap();
        fs::write(dir.path().join("visible.txt"), b"2").unwrap();

        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        let restore = || fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        // Permission bits are not enforced for root
        if fs::read_dir(&locked).is_ok() {
            restore();
            return;
        }

        let result = crawl_all(dir.path());
        restore();

        let names: Vec<String> = result.unwrap().iter().map(|p| p.to_string()).collect();
        assert_eq!(names, vec!["visible.txt"]);
    }

    #[test]
    fn test_relative_path_validation() {
        assert!(RelativePath::new("a/b.txt").is_ok());
        assert!(RelativePath::new("").is_err());
        assert!(RelativePath::new("/etc/passwd").is_err());
        assert!(RelativePath::new("../outside").is_err());
        assert!(RelativePath::new("a/./b").is_err());
        assert!(RelativePath::new("a//b").is_err());
    }

    #[test]
    fn test_relative_path_under_root() {
        let path = RelativePath::new("photos/2020/img.jpg").unwrap();
        assert_eq!(
            path.under(Path::new("/home/user")),
            PathBuf::from("/home/user/photos/2020/img.jpg")
        );
        assert_eq!(
            RelativePath::from_path(Path::new("photos/2020/img.jpg")),
            Some(path)
        );
    }
}
