//! WolfSync - Directory Replication over a Shared Folder
//!
//! Runs one reconciliation pass per configured instance. Intended to be
//! invoked periodically (cron, systemd timer) on every participating node.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wolfsync::config::{local_hostname, Config};
use wolfsync::error::{Error, Result};
use wolfsync::replication::{reconcile_all, PassReport, Reconciler, Role};
use wolfsync::storage::{lock, InstanceLayout};

/// WolfSync - Directory Replication over a Shared Folder
#[derive(Parser)]
#[command(name = "wolfsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "wolfsync.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error), overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    /// Act as this host instead of the machine's hostname
    #[arg(long)]
    hostname: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one reconciliation pass for every instance (default)
    Run,

    /// Show this node's role and staging state per instance
    Status,

    /// Validate configuration file
    Validate,

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "wolfsync.toml")]
        output: PathBuf,

        /// Shared folder root
        #[arg(long, default_value = "/srv/dropbox/wolfsync")]
        shared_root: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Init {
            ref output,
            ref shared_root,
        }) => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"));
            run_init(output, shared_root)
        }
        Some(Commands::Validate) => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"));
            run_validate(&cli.config)
        }
        Some(Commands::Status) => with_config(&cli, run_status),
        Some(Commands::Run) | None => with_config(&cli, run_pass),
    };

    if let Err(e) = result {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

/// Initialize logging
fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Load the config, set up logging from it, and resolve the hostname
fn with_config(cli: &Cli, run: fn(&Config, &str) -> Result<()>) -> Result<()> {
    let config = match Config::from_file(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"));
            tracing::error!("Failed to load configuration from {:?}: {}", cli.config, e);
            return Err(e);
        }
    };

    init_logging(cli.log_level.as_deref().unwrap_or(&config.logging.level));

    let hostname = local_hostname(cli.hostname.as_deref())?;
    run(&config, &hostname)
}

/// Reconcile every instance once
fn run_pass(config: &Config, hostname: &str) -> Result<()> {
    tracing::info!(
        "Running as {} with {} instance(s)",
        hostname,
        config.instances.len()
    );

    let results = reconcile_all(config, hostname);
    let failed: Vec<String> = results
        .iter()
        .filter(|(_, result)| matches!(result, Err(e) if !e.is_transient()))
        .map(|(name, _)| name.clone())
        .collect();

    for (name, result) in &results {
        match result {
            Ok(PassReport::Master(report)) => tracing::info!(
                "{}: staged {} new, {} kept, {} removed",
                name,
                report.copied,
                report.already_staged,
                report.removed
            ),
            Ok(PassReport::Slave(report)) if report.ready => tracing::info!(
                "{}: pulled {}, {} already present, {} unresolved",
                name,
                report.pulled,
                report.already_present,
                report.unresolved
            ),
            Ok(PassReport::Slave(_)) => tracing::info!("{}: waiting for staging to settle", name),
            Ok(PassReport::Idle) | Err(_) => {}
        }
    }

    if failed.is_empty() {
        Ok(())
    } else {
        Err(Error::InstancesFailed(failed))
    }
}

/// Show role and lock state per instance
fn run_status(config: &Config, hostname: &str) -> Result<()> {
    println!("WolfSync Status");
    println!("===============");
    println!();
    println!("Hostname:         {}", hostname);
    println!("Shared Root:      {}", config.settings.shared_root.display());
    println!("Key Scheme:       {:?}", config.settings.key_scheme);
    println!();

    for instance in config.instances() {
        let reconciler = Reconciler::resolve(&config.settings, instance, hostname);
        let layout = InstanceLayout::new(&config.settings.shared_root, &instance.name);

        println!("[{}]", instance.name);
        println!("  Role:           {}", reconciler.role());
        println!("  Local Path:     {}", instance.path.display());
        println!("  Master:         {}", instance.master);
        println!("  Slaves:         {}", instance.slaves.join(", "));

        if reconciler.role() == Role::None {
            println!();
            continue;
        }

        let lock_state = if !layout.dirs_exist() {
            "shared directories missing".to_string()
        } else {
            match lock::check(&layout.data_dir(), &layout.lock_path(), config.settings.key_scheme) {
                Ok(descriptor) => format!(
                    "consistent ({} bytes, {} staged)",
                    descriptor.total_bytes,
                    layout.staged_keys()?.len()
                ),
                Err(e) if e.is_transient() => format!("not settled: {}", e),
                Err(e) => return Err(e),
            }
        };
        println!("  Staging:        {}", lock_state);
        println!();
    }

    Ok(())
}

/// Validate configuration file
fn run_validate(config_path: &Path) -> Result<()> {
    match Config::from_file(config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Shared Root: {}", config.settings.shared_root.display());
            println!("  Max Files: {}", config.settings.max_files);
            println!(
                "  Max Size: {} bytes ({})",
                config.settings.max_size,
                if config.settings.enforce_max_size { "enforced" } else { "not enforced" }
            );
            println!("  Instances: {}", config.instances.len());
            for instance in config.instances() {
                println!(
                    "    {} -> master {}, {} slave(s)",
                    instance.name,
                    instance.master,
                    instance.slaves.len()
                );
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}

/// Write a sample configuration file
fn run_init(output: &Path, shared_root: &Path) -> Result<()> {
    if output.exists() {
        return Err(Error::Config(format!("{:?} already exists", output)));
    }

    let hostname = local_hostname(None).unwrap_or_else(|_| "node-1".to_string());
    let config_content = format!(
        r#"# WolfSync Configuration
# Generated configuration file

[settings]
shared_root = "{shared_root}"
# Files staged at once
max_files = 10
# Bytes staged at once, only applied with enforce_max_size
max_size = 104857600
enforce_max_size = false
# "legacy" stays readable by older nodes, "sha256" does not
key_scheme = "legacy"

[logging]
level = "info"

[instances.documents]
path = "/home/user/Documents"
master = "{hostname}"
slaves = []
# slaves = ["laptop", "nas"]
"#,
        shared_root = shared_root.display(),
        hostname = hostname,
    );

    std::fs::write(output, config_content)?;
    println!("Configuration written to {:?}", output);
    Ok(())
}
