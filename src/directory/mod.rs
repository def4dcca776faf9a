//! Directory service access
//!
//! [`DirectoryService`] is the seam between the workflow and the mail
//! platform's management session. [`ShellDirectory`] drives the real
//! platform through a PowerShell child process.

mod shell;

#[cfg(test)]
pub mod mock;

pub use shell::{ShellDirectory, ShellFailure, ShellSession};

use async_trait::async_trait;
use tracing::{debug, error};

use crate::config::WorkflowConfig;
use crate::model::{
    CertificateIdentity, CertificateRecord, ConnectorRef, HybridConfig, ServerRef, Thumbprint,
};
use crate::Result;

/// Remote management operations against the mail platform
///
/// Each setter is a single phase: `None` clears the binding, `Some` sets it.
/// Callers clear before setting to make the platform refresh the binding.
#[async_trait]
pub trait DirectoryService: Send {
    /// Establish the management session; no-op when one is already open
    async fn connect(&mut self) -> Result<()>;

    async fn list_servers(&mut self) -> Result<Vec<ServerRef>>;

    /// Every certificate installed on `server`, unfiltered
    async fn list_certificates(&mut self, server: &ServerRef) -> Result<Vec<CertificateRecord>>;

    async fn get_certificate(
        &mut self,
        thumbprint: &Thumbprint,
        server: &ServerRef,
    ) -> Result<CertificateRecord>;

    async fn list_receive_connectors(&mut self, server: &ServerRef) -> Result<Vec<ConnectorRef>>;

    async fn list_send_connectors(&mut self) -> Result<Vec<ConnectorRef>>;

    async fn get_hybrid_config(&mut self) -> Result<HybridConfig>;

    async fn set_connector_certificate(
        &mut self,
        connector: &ConnectorRef,
        identity: Option<&CertificateIdentity>,
        domain_controller: Option<&str>,
    ) -> Result<()>;

    async fn set_hybrid_config_certificate(
        &mut self,
        identity: Option<&CertificateIdentity>,
        domain_controller: Option<&str>,
    ) -> Result<()>;
}

/// Whether a certificate may be offered for hybrid mail flow
pub fn is_eligible(record: &CertificateRecord, rules: &WorkflowConfig) -> bool {
    !record
        .subject
        .trim()
        .eq_ignore_ascii_case(rules.auth_certificate_subject.trim())
        && record.services.contains(&rules.required_service)
}

/// Certificates on `server` that may be offered for hybrid mail flow
///
/// Drops the platform's internal auth certificate and anything not
/// enabled for the required transport service.
pub async fn list_eligible_certificates<D>(
    client: &mut D,
    server: &ServerRef,
    rules: &WorkflowConfig,
) -> Result<Vec<CertificateRecord>>
where
    D: DirectoryService + ?Sized,
{
    let all = match client.list_certificates(server).await {
        Ok(all) => all,
        Err(e) => {
            error!(
                prefix = "Get-Certificates",
                error = %e,
                "Failed to read certificates from {}",
                server
            );
            return Err(e);
        }
    };

    let total = all.len();
    let eligible: Vec<_> = all.into_iter().filter(|c| is_eligible(c, rules)).collect();
    debug!(
        "{}: {} of {} certificates eligible",
        server,
        eligible.len(),
        total
    );
    Ok(eligible)
}
