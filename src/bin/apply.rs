//! Apply Certificate Tool - Binds the chosen certificate for hybrid mail flow

use anyhow::Result;
use clap::Parser;
use hybrid_cert::apply::{apply_certificate, plan_targets};
use hybrid_cert::cli::{self, CommonArgs};
use hybrid_cert::intersect::common_certificates;
use hybrid_cert::workflow::{
    domain_controller_for, resolve_certificate_identity, select_send_connector, select_servers,
};
use hybrid_cert::{ApplyPlan, ApplyStatus, DirectoryService, Thumbprint};
use tracing::error;

/// Bind a certificate to the inbound connectors, a send connector and the hybrid configuration
#[derive(Parser, Debug)]
#[command(name = "hybrid-cert-apply")]
#[command(about = "Bind a certificate for hybrid mail flow")]
#[command(version = hybrid_cert::VERSION)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Server whose inbound connector gets the certificate (can specify multiple; default: all)
    #[arg(short, long = "server")]
    servers: Vec<String>,

    /// Thumbprint of the certificate, as listed by hybrid-cert-certs
    #[arg(short, long)]
    thumbprint: Thumbprint,

    /// Send connector for outbound hybrid mail
    #[arg(long)]
    send_connector: String,

    /// Show what would change without changing it
    #[arg(long)]
    dry_run: bool,

    /// Do not ask for confirmation
    #[arg(short, long)]
    force: bool,

    /// Print the per-target report as JSON
    #[arg(long)]
    json: bool,
}

// The management shell exits on its own once our end of its stdin closes
fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("Error: {message}");
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = cli::init(&args.common)?;
    let mut directory = cli::connect(&config).await;

    // Servers
    let all = match directory.list_servers().await {
        Ok(all) => all,
        Err(e) => {
            error!(prefix = "Get-Servers", error = %e, "Server discovery failed");
            Vec::new()
        }
    };
    if all.is_empty() {
        fail("No servers found");
    }
    let servers = match select_servers(&all, &args.servers) {
        Ok(servers) => servers,
        Err(e) => fail(e),
    };

    // The certificate must be one the selected servers have in common
    let candidates = match common_certificates(&mut directory, &servers, &config.workflow).await {
        Some(candidates) if !candidates.is_empty() => candidates,
        _ => fail("No valid certificates found on the selected servers"),
    };
    let Some(chosen) = candidates.iter().find(|c| c.thumbprint == args.thumbprint) else {
        fail(
            format!("{} is not a candidate; run hybrid-cert-certs to list them", args.thumbprint),
        )
    };
    let identity = match resolve_certificate_identity(&mut directory, chosen, &servers).await {
        Ok(identity) => identity,
        Err(e) => fail(e),
    };

    // Send connector
    let send_connector = match directory.list_send_connectors().await {
        Ok(all) => match select_send_connector(&all, &args.send_connector) {
            Ok(connector) => connector,
            Err(e) => fail(e),
        },
        Err(e) => fail(e),
    };

    let plan = ApplyPlan {
        identity,
        domain_controller: domain_controller_for(
            &servers,
            config.workflow.domain_controller.as_deref(),
        ),
        servers,
        send_connector,
        inbound_prefix: config.workflow.inbound_connector_prefix.clone(),
    };

    println!("Certificate: {}", chosen);
    println!("Identity:    {}", plan.identity);
    println!(
        "Writes via:  {}",
        plan.domain_controller.as_deref().unwrap_or("(any domain controller)")
    );
    println!();
    println!("Targets:");
    let planned = plan_targets(&mut directory, &plan).await;
    for target in &planned {
        match (&target.error, &target.current_binding) {
            (Some(e), _) => println!("  {} [unresolved: {}]", target.target, e),
            (None, Some(current)) => println!("  {} [currently {}]", target.target, current),
            (None, None) => println!("  {} [currently unbound]", target.target),
        }
    }

    if args.dry_run {
        directory.disconnect().await;
        println!();
        println!("Dry run - nothing changed");
        return Ok(());
    }

    // Confirm
    if !args.force {
        print!("\nBind this certificate to {} target(s)? [y/N]: ", planned.len());
        std::io::Write::flush(&mut std::io::stdout())?;
        let mut response = String::new();
        std::io::stdin().read_line(&mut response)?;
        if response.trim().to_lowercase() != "y" {
            directory.disconnect().await;
            println!("Cancelled");
            return Ok(());
        }
    }

    let report = apply_certificate(&mut directory, &plan).await;
    directory.disconnect().await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!();
        for outcome in &report.outcomes {
            let mark = if outcome.succeeded() { "ok" } else { "FAILED" };
            println!("  [{mark}] {}", outcome.target);
            for detail in &outcome.errors {
                println!("         {detail}");
            }
        }
        println!();
    }

    match report.status() {
        ApplyStatus::Success => {
            println!("Certificate applied successfully");
            Ok(())
        }
        ApplyStatus::Error => {
            eprintln!("Certificate was not applied to every target; see the log for details");
            std::process::exit(1);
        }
    }
}
