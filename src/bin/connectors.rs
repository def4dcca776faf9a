//! List Connectors Tool - Shows send connectors, or a server's receive connectors

use anyhow::Result;
use clap::Parser;
use hybrid_cert::cli::{self, CommonArgs};
use hybrid_cert::{DirectoryService, ServerRef};
use tracing::error;

/// List mail-flow connectors
#[derive(Parser, Debug)]
#[command(name = "hybrid-cert-connectors")]
#[command(about = "List send connectors, or the receive connectors of one server")]
#[command(version = hybrid_cert::VERSION)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// List this server's receive connectors instead
    #[arg(short, long)]
    server: Option<String>,

    /// Show the bound certificate
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = cli::init(&args.common)?;
    let mut directory = cli::connect(&config).await;

    let (title, result) = match &args.server {
        Some(name) => (
            format!("Receive connectors on {name}"),
            directory
                .list_receive_connectors(&ServerRef::new(name.as_str()))
                .await,
        ),
        None => (
            "Send connectors".to_string(),
            directory.list_send_connectors().await,
        ),
    };
    directory.disconnect().await;

    let connectors = match result {
        Ok(connectors) => connectors,
        Err(e) => {
            error!(prefix = "Get-Connectors", error = %e, "Connector listing failed");
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    if connectors.is_empty() {
        println!("No connectors found");
        return Ok(());
    }

    println!("{} ({}):", title, connectors.len());
    println!("{}", "-".repeat(60));
    for connector in &connectors {
        if args.verbose {
            println!("\n  {}:", connector.name);
            println!("    Identity: {}", connector.identity);
            println!(
                "    Certificate: {}",
                connector.tls_certificate_name.as_deref().unwrap_or("(none)")
            );
        } else {
            println!("  {}", connector.name);
        }
    }

    Ok(())
}
