//! Slave Node Implementation
//!
//! A slave only acts once the staging area it sees matches the master's
//! lock. It then pulls every staged file it does not have yet, recovering
//! each file's path from the master's published file list, and publishes
//! a fresh listing of its own tree.

use std::collections::{HashMap, HashSet};
use std::io;

use tracing::{debug, info, warn};

use crate::config::{InstanceConfig, Settings};
use crate::error::{Error, Result};
use crate::storage::{
    copy_if_absent, crawl_all, ensure_dir, lock, metadata, staging_key, InstanceLayout,
    RelativePath, StagingKey,
};

/// How the master's tree and this node's tree differ
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeDiff {
    pub master_files: usize,
    pub only_on_master: usize,
    pub slave_files: usize,
    pub only_on_slave: usize,
}

impl TreeDiff {
    pub fn between(master: &[RelativePath], slave: &[RelativePath]) -> Self {
        let master: HashSet<&RelativePath> = master.iter().collect();
        let slave: HashSet<&RelativePath> = slave.iter().collect();

        Self {
            master_files: master.len(),
            only_on_master: master.difference(&slave).count(),
            slave_files: slave.len(),
            only_on_slave: slave.difference(&master).count(),
        }
    }
}

/// Outcome of one slave pass
#[derive(Debug, Clone, Default)]
pub struct SlaveReport {
    /// Staging matched the lock and the pass ran
    pub ready: bool,
    /// Trees before pulling
    pub diff: TreeDiff,
    /// Files copied out of staging
    pub pulled: usize,
    /// Staged files already present locally
    pub already_present: usize,
    /// Staged keys no master path hashes to
    pub unresolved: usize,
    /// Entries in the published file list
    pub published: usize,
}

impl SlaveReport {
    fn not_ready() -> Self {
        Self::default()
    }
}

/// Slave side of one instance
#[derive(Debug, Clone)]
pub struct SlaveReconciler {
    settings: Settings,
    instance: InstanceConfig,
    hostname: String,
    layout: InstanceLayout,
}

impl SlaveReconciler {
    pub fn new(settings: Settings, instance: InstanceConfig, hostname: String) -> Self {
        let layout = InstanceLayout::new(&settings.shared_root, &instance.name);
        Self {
            settings,
            instance,
            hostname,
            layout,
        }
    }

    pub fn layout(&self) -> &InstanceLayout {
        &self.layout
    }

    /// Whether the staging area currently agrees with the master's lock.
    /// Transient conditions (lock mismatch, files vanishing mid-scan) read
    /// as not ready.
    pub fn is_ready(&self) -> Result<bool> {
        if !self.layout.dirs_exist() {
            info!("Shared directories for {} not present yet", self.instance.name);
            return Ok(false);
        }

        match lock::check(
            &self.layout.data_dir(),
            &self.layout.lock_path(),
            self.settings.key_scheme,
        ) {
            Ok(_) => Ok(true),
            Err(e) if e.is_transient() => {
                info!("Staging not settled: {}", e);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Run one full slave pass
    pub fn reconcile(&self) -> Result<SlaveReport> {
        if !self.is_ready()? {
            info!("Not ready, skipping {}", self.instance.name);
            return Ok(SlaveReport::not_ready());
        }
        info!("Ready, pulling {}", self.instance.name);

        ensure_dir(&self.instance.path)?;
        let local = crawl_all(&self.instance.path)?;
        info!("Found {} files in {:?}", local.len(), self.instance.path);

        let master_files = metadata::load(&self.instance.master, &self.layout.meta_dir())?;

        let diff = TreeDiff::between(&master_files, &local);
        info!(
            "master: {} files ({} not in slave), slave: {} files ({} not in master)",
            diff.master_files, diff.only_on_master, diff.slave_files, diff.only_on_slave
        );

        let staged = self.layout.staged_keys()?;
        info!("Found {} files in staging", staged.len());

        let (pulled, already_present, unresolved) = self.pull_staged(&staged, &master_files)?;

        let published = crawl_all(&self.instance.path)?;
        metadata::dump(&published, &self.layout.meta_file(&self.hostname))?;

        Ok(SlaveReport {
            ready: true,
            diff,
            pulled,
            already_present,
            unresolved,
            published: published.len(),
        })
    }

    /// Copy staged files into the local tree. Returns (pulled, already
    /// present, unresolved).
    fn pull_staged(
        &self,
        staged: &[StagingKey],
        master_files: &[RelativePath],
    ) -> Result<(usize, usize, usize)> {
        let scheme = self.settings.key_scheme;
        let by_key: HashMap<StagingKey, &RelativePath> = master_files
            .iter()
            .map(|path| (staging_key(path, scheme), path))
            .collect();

        let mut pulled = 0;
        let mut already_present = 0;
        let mut unresolved = 0;

        for key in staged {
            let path = match by_key.get(key) {
                Some(path) => *path,
                None => {
                    warn!(
                        "Staged file {} matches no path published by {}, skipping",
                        key, self.instance.master
                    );
                    unresolved += 1;
                    continue;
                }
            };

            let src = self.layout.staged_file(key);
            let dest = path.under(&self.instance.path);

            match copy_if_absent(&src, &dest) {
                Ok(true) => {
                    info!("{:?} -> {:?}", src, dest);
                    pulled += 1;
                }
                Ok(false) => {
                    debug!("{} already in local tree", path);
                    already_present += 1;
                }
                // Master removed it after the lock was checked
                Err(Error::Io(source))
                    if source.kind() == io::ErrorKind::NotFound && !src.exists() =>
                {
                    return Err(Error::StagingChanged { path: src, source });
                }
                Err(e) => return Err(e),
            }
        }

        Ok((pulled, already_present, unresolved))
    }
}
