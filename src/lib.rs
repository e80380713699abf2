//! WolfSync - Directory Replication over a Shared Folder
//!
//! Replicates a directory tree from one master node to any number of slave
//! nodes that all see a common folder kept in sync by an external service
//! (Dropbox, Syncthing, a network share). Nodes never connect to each
//! other; all coordination happens through files in that folder.
//!
//! # Architecture
//!
//! Each configured instance has a master and a set of slaves, assigned by
//! hostname. On every run the master publishes its file list, reads the
//! lists its slaves published, and stages a bounded number of the least
//! replicated files under content-addressed names. A lock descriptor over
//! the staging directory tells slaves when the sync service has delivered a
//! complete snapshot; only then do they copy staged files into their own
//! tree and publish their updated file list.
//!
//! # Features
//!
//! - Quorum-style selection: files missing on the most slaves go first
//! - Staging bounded by file count and, optionally, total size
//! - Idempotent passes: nothing is copied twice
//! - Legacy-compatible staging keys and metadata layout

pub mod config;
pub mod error;
pub mod replication;
pub mod storage;

pub use config::{Config, InstanceConfig, Settings};
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Config, InstanceConfig, Settings};
    pub use crate::error::{Error, Result};
    pub use crate::replication::{PassReport, Reconciler, Role};
    pub use crate::storage::{InstanceLayout, KeyScheme, RelativePath, StagingDescriptor, StagingKey};
}
