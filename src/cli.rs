//! Plumbing shared by the command-line tools

use clap::Args;
use std::path::PathBuf;
use tracing::info;

use crate::config::Config;
use crate::directory::{DirectoryService, ShellDirectory};
use crate::Error;

/// Options every tool accepts
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Configuration file
    #[arg(short, long, default_value = "hybrid-cert.yaml")]
    pub config: PathBuf,

    /// Log file (overrides the configuration)
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Log to the console instead of a file
    #[arg(long)]
    pub no_log_file: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,
}

/// Load configuration, apply overrides and install logging
pub fn init(args: &CommonArgs) -> anyhow::Result<Config> {
    let mut config = Config::load_or_default(&args.config)?;

    if let Some(file) = &args.log_file {
        config.logging.file = file.clone();
        config.logging.enabled = true;
    }
    if args.no_log_file {
        config.logging.enabled = false;
    }

    crate::logging::init(&config.logging, args.debug)?;
    info!("Hybrid certificate tool {}", crate::VERSION);
    if !args.config.exists() {
        info!("No config file found at {}, using defaults", args.config.display());
    }

    Ok(config)
}

/// Open the management session
///
/// A missing management module ends the process. Any other connection
/// failure is logged and the directory is returned anyway; later calls
/// then fail on their own.
pub async fn connect(config: &Config) -> ShellDirectory {
    let mut directory = ShellDirectory::new(config.session.clone());
    match directory.connect().await {
        Ok(()) => {}
        Err(Error::ModuleNotFound(detail)) => {
            eprintln!("Error: Exchange management tools are not installed: {detail}");
            eprintln!("Run this tool on a server or workstation with the Exchange Management Shell.");
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Warning: {e}");
        }
    }
    directory
}
