//! Configuration Init Tool

use anyhow::Result;
use clap::Parser;
use hybrid_cert::config::generate_example_config;
use std::path::PathBuf;

/// Write an example configuration file
#[derive(Parser, Debug)]
#[command(name = "hybrid-cert-init")]
#[command(about = "Write an example configuration file")]
#[command(version = hybrid_cert::VERSION)]
struct Args {
    /// Output file
    #[arg(short, long, default_value = "hybrid-cert.yaml")]
    output: PathBuf,

    /// Overwrite an existing file
    #[arg(short, long)]
    force: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.output.exists() && !args.force {
        eprintln!("Error: {} already exists", args.output.display());
        eprintln!("Use --force to overwrite it");
        std::process::exit(1);
    }

    if let Some(parent) = args.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&args.output, generate_example_config())?;

    println!("Configuration written to {}", args.output.display());
    println!();
    println!("Next steps:");
    println!("  1. Review the workflow section (connector prefix, intersection policy)");
    println!("  2. List servers:      hybrid-cert-servers -c {}", args.output.display());
    println!("  3. List certificates: hybrid-cert-certs -c {} -s <server> -s <server>", args.output.display());

    Ok(())
}
