//! List Servers Tool - Shows the mail servers in the farm

use anyhow::Result;
use clap::Parser;
use hybrid_cert::cli::{self, CommonArgs};
use hybrid_cert::DirectoryService;
use tracing::error;

/// List the mail servers in the farm
#[derive(Parser, Debug)]
#[command(name = "hybrid-cert-servers")]
#[command(about = "List the mail servers in the farm")]
#[command(version = hybrid_cert::VERSION)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Show the domain controller each server uses
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = cli::init(&args.common)?;
    let mut directory = cli::connect(&config).await;

    let servers = match directory.list_servers().await {
        Ok(servers) => servers,
        Err(e) => {
            error!(prefix = "Get-Servers", error = %e, "Server discovery failed");
            Vec::new()
        }
    };
    directory.disconnect().await;

    if servers.is_empty() {
        println!("No servers found");
        println!("Check the log for details");
        return Ok(());
    }

    println!("Servers ({}):", servers.len());
    println!("{}", "-".repeat(60));
    for server in &servers {
        if args.verbose {
            let dc = server.domain_controller.as_deref().unwrap_or("(unknown)");
            println!("  {:<24} DC: {}", server.name, dc);
        } else {
            println!("  {}", server.name);
        }
    }

    if !args.verbose {
        println!();
        println!("Use -v for detailed information");
    }

    Ok(())
}
