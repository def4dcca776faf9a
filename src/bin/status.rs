//! Binding Status Tool - Shows which certificate each hybrid mail-flow target uses

use anyhow::Result;
use clap::Parser;
use hybrid_cert::apply::resolve_inbound_connector;
use hybrid_cert::cli::{self, CommonArgs};
use hybrid_cert::workflow::select_servers;
use hybrid_cert::{CertificateIdentity, DirectoryService};
use tracing::error;

/// Show the certificate currently bound to each hybrid mail-flow target
#[derive(Parser, Debug)]
#[command(name = "hybrid-cert-status")]
#[command(about = "Show current certificate bindings")]
#[command(version = hybrid_cert::VERSION)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Server to include (can specify multiple; default: all servers)
    #[arg(short, long = "server")]
    servers: Vec<String>,
}

fn describe(binding: Option<&str>) -> String {
    match binding {
        None => "(none)".to_string(),
        Some(raw) => match raw.parse::<CertificateIdentity>() {
            Ok(id) => format!("{} (issued by {})", id.subject, id.issuer),
            Err(_) => raw.to_string(),
        },
    }
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
    let servers = match select_servers(&all, &args.servers) {
        Ok(servers) => servers,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    println!("Inbound connectors:");
    for server in &servers {
        match resolve_inbound_connector(
            &mut directory,
            server,
            &config.workflow.inbound_connector_prefix,
        )
        .await
        {
            Ok(connector) => println!(
                "  {:<40} {}",
                connector.identity,
                describe(connector.tls_certificate_name.as_deref())
            ),
            Err(e) => println!("  {:<40} unavailable: {}", server.name, e),
        }
    }

    println!();
    println!("Send connectors:");
    match directory.list_send_connectors().await {
        Ok(connectors) => {
            for connector in &connectors {
                println!(
                    "  {:<40} {}",
                    connector.name,
                    describe(connector.tls_certificate_name.as_deref())
                );
            }
        }
        Err(e) => println!("  unavailable: {e}"),
    }

    println!();
    match directory.get_hybrid_config().await {
        Ok(hybrid) => println!(
            "Hybrid configuration: {}",
            describe(hybrid.tls_certificate_name.as_deref())
        ),
        Err(e) => println!("Hybrid configuration: unavailable: {e}"),
    }

    directory.disconnect().await;
    Ok(())
}
