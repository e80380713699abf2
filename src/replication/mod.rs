//! Replication Module
//!
//! Roles are fixed by configuration: the node whose hostname matches an
//! instance's `master` stages files for it, nodes listed in `slaves` pull
//! them, every other node leaves the instance alone. Nodes never talk to
//! each other directly; everything goes through the shared folder.

pub mod master;
pub mod slave;

pub use master::{select_files, Candidate, MasterReconciler, MasterReport};
pub use slave::{SlaveReconciler, SlaveReport, TreeDiff};

use std::fmt;

use tracing::{error, info};

use crate::config::{Config, InstanceConfig, Settings};
use crate::error::Result;

/// Part a node plays in one instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Master,
    Slave,
    None,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Master => write!(f, "master"),
            Role::Slave => write!(f, "slave"),
            Role::None => write!(f, "none"),
        }
    }
}

/// Reconciler for one instance, chosen by role
#[derive(Debug, Clone)]
pub enum Reconciler {
    Master(MasterReconciler),
    Slave(SlaveReconciler),
    /// This node takes no part in the instance
    Idle { instance: String },
}

/// Outcome of one pass
#[derive(Debug, Clone)]
pub enum PassReport {
    Master(MasterReport),
    Slave(SlaveReport),
    Idle,
}

impl Reconciler {
    /// Pick the reconciler for `hostname`
    pub fn resolve(settings: &Settings, instance: &InstanceConfig, hostname: &str) -> Self {
        if instance.master == hostname {
            Reconciler::Master(MasterReconciler::new(
                settings.clone(),
                instance.clone(),
                hostname.to_string(),
            ))
        } else if instance.is_slave(hostname) {
            Reconciler::Slave(SlaveReconciler::new(
                settings.clone(),
                instance.clone(),
                hostname.to_string(),
            ))
        } else {
            Reconciler::Idle {
                instance: instance.name.clone(),
            }
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Reconciler::Master(_) => Role::Master,
            Reconciler::Slave(_) => Role::Slave,
            Reconciler::Idle { .. } => Role::None,
        }
    }

    /// Run one pass for this instance
    pub fn reconcile(&self) -> Result<PassReport> {
        match self {
            Reconciler::Master(master) => master.reconcile().map(PassReport::Master),
            Reconciler::Slave(slave) => slave.reconcile().map(PassReport::Slave),
            Reconciler::Idle { instance } => {
                info!("Not participating in {}", instance);
                Ok(PassReport::Idle)
            }
        }
    }
}

/// Run one pass for every configured instance, in name order. A failing
/// instance is logged and does not stop the others.
pub fn reconcile_all(config: &Config, hostname: &str) -> Vec<(String, Result<PassReport>)> {
    config
        .instances()
        .map(|instance| {
            info!("Instance {} on {}", instance.name, hostname);
            let reconciler = Reconciler::resolve(&config.settings, instance, hostname);
            let result = reconciler.reconcile();

            if let Err(e) = &result {
                if e.is_transient() {
                    info!("Instance {} will retry next run: {}", instance.name, e);
                } else {
                    error!("Instance {} failed: {}", instance.name, e);
                }
            }

            (instance.name.clone(), result)
        })
        .collect()
}
