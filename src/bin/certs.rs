//! Candidate Certificates Tool - Lists certificates common to the selected servers

use anyhow::Result;
use clap::Parser;
use hybrid_cert::cli::{self, CommonArgs};
use hybrid_cert::intersect::common_certificates;
use hybrid_cert::workflow::select_servers;
use hybrid_cert::DirectoryService;
use tracing::error;

/// List certificates usable for hybrid mail flow on the selected servers
#[derive(Parser, Debug)]
#[command(name = "hybrid-cert-certs")]
#[command(about = "List certificates common to the selected servers")]
#[command(version = hybrid_cert::VERSION)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Server to include (can specify multiple; default: all servers)
    #[arg(short, long = "server")]
    servers: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = cli::init(&args.common)?;
    let mut directory = cli::connect(&config).await;

    let all = match directory.list_servers().await {
        Ok(all) => all,
        Err(e) => {
            error!(prefix = "Get-Servers", error = %e, "Server discovery failed");
            Vec::new()
        }
    };
    if all.is_empty() {
        directory.disconnect().await;
        eprintln!("Error: No servers found");
        std::process::exit(1);
    }

    let selected = match select_servers(&all, &args.servers) {
        Ok(selected) => selected,
        Err(e) => {
            directory.disconnect().await;
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let candidates = common_certificates(&mut directory, &selected, &config.workflow).await;
    directory.disconnect().await;

    let names: Vec<&str> = selected.iter().map(|s| s.name.as_str()).collect();
    match candidates {
        Some(candidates) if !candidates.is_empty() => {
            println!("Certificates on {} ({}):", names.join(", "), candidates.len());
            println!("{}", "-".repeat(60));
            for (i, candidate) in candidates.iter().enumerate() {
                println!("  [{}] {}", i + 1, candidate);
            }
            println!();
            println!("Apply one with: hybrid-cert-apply --thumbprint <thumbprint> --send-connector <name>");
        }
        _ => {
            println!("No valid certificates found on {}", names.join(", "));
            println!("Check the log for details");
            std::process::exit(1);
        }
    }

    Ok(())
}
