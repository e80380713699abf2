//! Master Node Implementation
//!
//! The master publishes its own file list, works out which of its files
//! are missing on at least one slave, and keeps the staging directory
//! filled with the least replicated of them. The lock is written last, so
//! a pass that fails part way leaves the previous lock in place and slaves
//! skip the half-written staging area.

use std::collections::{HashMap, HashSet};
use std::fs;

use tracing::{debug, info};

use crate::config::{InstanceConfig, Settings};
use crate::error::Result;
use crate::storage::{
    copy_if_absent, crawl_all, lock, metadata, staging_key, InstanceLayout, RelativePath,
    StagingDescriptor, StagingKey,
};

/// A local file that at least one slave is missing
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Candidate {
    /// Number of slaves already holding the file. Declared first so the
    /// derived ordering is least replicated first, then by path.
    pub replicas: usize,
    pub path: RelativePath,
}

/// Outcome of one master pass
#[derive(Debug, Clone)]
pub struct MasterReport {
    /// Files found in the local tree
    pub local_files: usize,
    /// Files chosen for staging, in priority order
    pub selected: Vec<Candidate>,
    /// Staged files removed because they fell out of the selection
    pub removed: usize,
    /// Files copied into staging this pass
    pub copied: usize,
    /// Selected files that were already staged
    pub already_staged: usize,
    /// Descriptor written to the lock
    pub descriptor: StagingDescriptor,
}

/// Master side of one instance
#[derive(Debug, Clone)]
pub struct MasterReconciler {
    settings: Settings,
    instance: InstanceConfig,
    hostname: String,
    layout: InstanceLayout,
}

impl MasterReconciler {
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

    /// Run one full master pass
    pub fn reconcile(&self) -> Result<MasterReport> {
        self.layout.create_dirs()?;

        let local = crawl_all(&self.instance.path)?;
        info!("Found {} files in {:?}", local.len(), self.instance.path);

        metadata::dump(&local, &self.layout.meta_file(&self.hostname))?;

        let slave_lists = self.load_slave_metadata()?;

        let staged = self.layout.staged_keys()?;
        info!("Found {} files in staging", staged.len());

        let candidates = select_files(&local, &slave_lists, self.instance.slaves.len());
        let selected = self.limit_to_capacity(candidates)?;
        info!(
            "Selected {} files for staging (limit {})",
            selected.len(),
            self.settings.max_files
        );

        let (removed, copied, already_staged) = self.refresh_staging(&selected, &staged)?;

        let descriptor = lock::compute(&self.layout.data_dir(), self.settings.key_scheme)?;
        lock::persist(&descriptor, &self.layout.lock_path())?;
        info!(
            "Sealed staging: {} bytes, hash {}",
            descriptor.total_bytes, descriptor.content_hash
        );

        Ok(MasterReport {
            local_files: local.len(),
            selected,
            removed,
            copied,
            already_staged,
            descriptor,
        })
    }

    fn load_slave_metadata(&self) -> Result<Vec<Vec<RelativePath>>> {
        let meta_dir = self.layout.meta_dir();
        self.instance
            .slaves
            .iter()
            .map(|slave| metadata::load(slave, &meta_dir))
            .collect()
    }

    /// Cut the priority list down to what fits in staging. The size cap only
    /// applies when `enforce_max_size` is set; files that would overflow it
    /// are passed over in favour of later ones that still fit.
    fn limit_to_capacity(&self, candidates: Vec<Candidate>) -> Result<Vec<Candidate>> {
        let max_files = self.settings.max_files;

        if !self.settings.enforce_max_size {
            return Ok(candidates.into_iter().take(max_files).collect());
        }

        let mut selected = Vec::new();
        let mut total_bytes = 0u64;
        for candidate in candidates {
            if selected.len() >= max_files {
                break;
            }

            let size = fs::metadata(candidate.path.under(&self.instance.path))?.len();
            if total_bytes + size > self.settings.max_size {
                debug!(
                    "{} ({} bytes) does not fit in remaining staging space",
                    candidate.path, size
                );
                continue;
            }

            total_bytes += size;
            selected.push(candidate);
        }

        Ok(selected)
    }

    /// Make the staging directory hold exactly the selected files. Returns
    /// (removed, copied, already staged).
    fn refresh_staging(
        &self,
        selected: &[Candidate],
        staged: &[StagingKey],
    ) -> Result<(usize, usize, usize)> {
        let keyed: Vec<(&RelativePath, StagingKey)> = selected
            .iter()
            .map(|c| (&c.path, staging_key(&c.path, self.settings.key_scheme)))
            .collect();
        let wanted: HashSet<&StagingKey> = keyed.iter().map(|(_, key)| key).collect();

        let mut removed = 0;
        for key in staged.iter().filter(|key| !wanted.contains(key)) {
            let path = self.layout.staged_file(key);
            fs::remove_file(&path)?;
            info!("{:?} deleted from staging", path);
            removed += 1;
        }

        let mut copied = 0;
        let mut already_staged = 0;
        for (path, key) in &keyed {
            let src = path.under(&self.instance.path);
            let dest = self.layout.staged_file(key);

            if copy_if_absent(&src, &dest)? {
                info!("{:?} -> {:?}", src, dest);
                copied += 1;
            } else {
                debug!("{} already in staging", path);
                already_staged += 1;
            }
        }

        Ok((removed, copied, already_staged))
    }
}

/// Rank the master's files by how many slaves already hold them.
///
/// Files present on every slave are dropped; the rest are ordered least
/// replicated first, then by path.
pub fn select_files(
    local: &[RelativePath],
    slave_lists: &[Vec<RelativePath>],
    slave_count: usize,
) -> Vec<Candidate> {
    let mut replicas: HashMap<&RelativePath, usize> = HashMap::new();
    for list in slave_lists {
        let unique: HashSet<&RelativePath> = list.iter().collect();
        for path in unique {
            *replicas.entry(path).or_insert(0) += 1;
        }
    }

    let local: HashSet<&RelativePath> = local.iter().collect();
    let mut candidates: Vec<Candidate> = local
        .into_iter()
        .map(|path| Candidate {
            replicas: replicas.get(path).copied().unwrap_or(0),
            path: path.clone(),
        })
        .filter(|c| c.replicas < slave_count)
        .collect();

    candidates.sort();
    candidates
}
