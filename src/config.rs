//! WolfSync Configuration
//!
//! This module provides configuration structures for the WolfSync
//! directory replicator. Settings are process-wide; every `[instances.*]`
//! table describes one replication group with a single master and any
//! number of slaves, identified by hostname.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::storage::key::KeyScheme;
use crate::storage::RESERVED_HOSTNAME;

/// Main WolfSync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Process-wide settings
    pub settings: Settings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Replication instances keyed by name
    #[serde(default)]
    pub instances: BTreeMap<String, InstanceConfig>,
}

/// Process-wide settings shared by every instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Root of the folder mirrored by the external sync service
    pub shared_root: PathBuf,

    /// Maximum number of files staged at once
    #[serde(default = "default_max_files")]
    pub max_files: usize,

    /// Maximum total bytes staged at once
    #[serde(default = "default_max_size")]
    pub max_size: u64,

    /// Apply `max_size` when selecting files to stage
    #[serde(default)]
    pub enforce_max_size: bool,

    /// Digest used to name staged files
    #[serde(default)]
    pub key_scheme: KeyScheme,
}

/// One replication group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    /// Instance name, filled from the table key
    #[serde(skip)]
    pub name: String,

    /// Local directory tree to replicate
    pub path: PathBuf,

    /// Hostname of the master node
    pub master: String,

    /// Hostnames of the slave nodes
    #[serde(default)]
    pub slaves: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_max_files() -> usize {
    10
}

fn default_max_size() -> u64 {
    100 * 1024 * 1024 // 100MB
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Settings {
    /// Settings with defaults for everything but the shared root
    pub fn new(shared_root: impl Into<PathBuf>) -> Self {
        Self {
            shared_root: shared_root.into(),
            max_files: default_max_files(),
            max_size: default_max_size(),
            enforce_max_size: false,
            key_scheme: KeyScheme::default(),
        }
    }
}

impl InstanceConfig {
    /// Check whether `hostname` is one of this instance's slaves
    pub fn is_slave(&self, hostname: &str) -> bool {
        self.slaves.iter().any(|s| s == hostname)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        for (name, instance) in config.instances.iter_mut() {
            instance.name = name.clone();
        }
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.settings.shared_root.as_os_str().is_empty() {
            return Err(Error::Config("settings.shared_root cannot be empty".into()));
        }

        for (name, instance) in &self.instances {
            if instance.path.as_os_str().is_empty() {
                return Err(Error::Config(format!("instances.{}.path cannot be empty", name)));
            }

            if instance.master.is_empty() {
                return Err(Error::Config(format!("instances.{}.master cannot be empty", name)));
            }

            if instance.slaves.iter().any(|s| s.is_empty()) {
                return Err(Error::Config(format!(
                    "instances.{}.slaves contains an empty hostname",
                    name
                )));
            }

            if let Some(host) = std::iter::once(&instance.master)
                .chain(&instance.slaves)
                .find(|host| host.as_str() == RESERVED_HOSTNAME)
            {
                return Err(Error::Config(format!(
                    "instances.{}: hostname {} is reserved for the staging lock",
                    name, host
                )));
            }

            if instance.is_slave(&instance.master) {
                return Err(Error::Config(format!(
                    "instances.{}: master {} is also listed as a slave",
                    name, instance.master
                )));
            }
        }

        Ok(())
    }

    /// Iterate over instances in name order
    pub fn instances(&self) -> impl Iterator<Item = &InstanceConfig> {
        self.instances.values()
    }
}

/// Resolve the local hostname, preferring an explicit override
pub fn local_hostname(override_name: Option<&str>) -> Result<String> {
    if let Some(name) = override_name {
        return Ok(name.to_string());
    }

    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .map_err(|e| Error::Hostname(e.to_string()))
}
