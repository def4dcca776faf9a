//! Selection helpers shared by the binaries

use tracing::{debug, info};

use crate::directory::DirectoryService;
use crate::model::{CertificateFingerprint, CertificateIdentity, ConnectorRef, ServerRef};
use crate::{Error, Result};

/// Pick servers by name, case-insensitively, in the order given
///
/// An empty `names` selects every server.
pub fn select_servers(all: &[ServerRef], names: &[String]) -> Result<Vec<ServerRef>> {
    if names.is_empty() {
        return Ok(all.to_vec());
    }

    let mut selected: Vec<ServerRef> = Vec::with_capacity(names.len());
    for name in names {
        let server = all
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| Error::InvalidSelection(format!("unknown server '{name}'")))?;
        if !selected.iter().any(|s| s.name == server.name) {
            selected.push(server.clone());
        }
    }
    Ok(selected)
}

/// Pick a send connector by name or identity
pub fn select_send_connector(all: &[ConnectorRef], name: &str) -> Result<ConnectorRef> {
    all.iter()
        .find(|c| c.name.eq_ignore_ascii_case(name) || c.identity.eq_ignore_ascii_case(name))
        .cloned()
        .ok_or_else(|| Error::InvalidSelection(format!("unknown send connector '{name}'")))
}

/// Domain controller for writes: the override, else the first selected server's
pub fn domain_controller_for(servers: &[ServerRef], configured: Option<&str>) -> Option<String> {
    configured
        .map(str::to_string)
        .or_else(|| servers.iter().find_map(|s| s.domain_controller.clone()))
}

/// Re-read the chosen certificate and build the identity the binding API wants
///
/// A candidate need not be on every selected server, so servers are tried in
/// order and the first one holding the certificate answers. Every server
/// holding it reports the same issuer and subject.
pub async fn resolve_certificate_identity<D>(
    client: &mut D,
    fingerprint: &CertificateFingerprint,
    servers: &[ServerRef],
) -> Result<CertificateIdentity>
where
    D: DirectoryService + ?Sized,
{
    let mut last_error = None;
    for server in servers {
        match client.get_certificate(&fingerprint.thumbprint, server).await {
            Ok(record) => {
                let identity = record.identity();
                info!(
                    prefix = "Get-CertificateDetails",
                    "{} resolved on {} to {}",
                    fingerprint.thumbprint,
                    server,
                    identity
                );
                return Ok(identity);
            }
            Err(e) => {
                debug!(prefix = "Get-CertificateDetails", error = %e, "Not readable on {}", server);
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) => Err(Error::CertificateFetch(format!(
            "{} could not be read from any selected server: {e}",
            fingerprint.thumbprint
        ))),
        None => Err(Error::InvalidSelection("no server selected".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::{ApplyPlan, ApplyStatus, apply_certificate};
    use crate::config::WorkflowConfig;
    use crate::directory::mock::{MockDirectory, cert};
    use crate::intersect::common_certificates;

    fn servers() -> Vec<ServerRef> {
        vec![
            ServerRef::new("EX01").with_domain_controller("dc01.contoso.com"),
            ServerRef::new("EX02").with_domain_controller("dc02.contoso.com"),
        ]
    }

    #[test]
    fn test_select_servers() {
        let all = servers();
        let picked = select_servers(&all, &["ex02".to_string(), "EX02".to_string()]).unwrap();
        assert_eq!(picked, vec![all[1].clone()]);

        assert_eq!(select_servers(&all, &[]).unwrap(), all);
        assert!(matches!(
            select_servers(&all, &["EX09".to_string()]),
            Err(Error::InvalidSelection(_))
        ));
    }

    #[test]
    fn test_domain_controller_for() {
        let all = servers();
        assert_eq!(domain_controller_for(&all, None).as_deref(), Some("dc01.contoso.com"));
        assert_eq!(
            domain_controller_for(&all, Some("dc09.contoso.com")).as_deref(),
            Some("dc09.contoso.com")
        );
        assert_eq!(domain_controller_for(&[ServerRef::new("EX01")], None), None);
    }

    #[tokio::test]
    async fn test_end_to_end_success() {
        let mut dir = MockDirectory::new()
            .with_server("S1", "dc01.contoso.com")
            .with_server("S2", "dc01.contoso.com")
            .with_send_connector("Outbound to Office 365")
            .with_cert("S1", cert("ABC", "CN=mail.example.com", &["SMTP"]))
            .with_cert("S2", cert("ABC", "CN=mail.example.com", &["SMTP"]));
        let rules = WorkflowConfig::default();

        dir.connect().await.unwrap();
        let all = dir.list_servers().await.unwrap();
        let selected = select_servers(&all, &["S1".to_string(), "S2".to_string()]).unwrap();

        let candidates = common_certificates(&mut dir, &selected, &rules).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].common_name, "mail.example.com");

        // the label round-trips through the selection surface
        let chosen: CertificateFingerprint = candidates[0].to_string().parse().unwrap();
        let identity = resolve_certificate_identity(&mut dir, &chosen, &selected)
            .await
            .unwrap();
        assert_eq!(identity.subject, "CN=mail.example.com");

        let sends = dir.list_send_connectors().await.unwrap();
        let plan = ApplyPlan {
            identity,
            send_connector: select_send_connector(&sends, "outbound to office 365").unwrap(),
            domain_controller: domain_controller_for(&selected, rules.domain_controller.as_deref()),
            servers: selected,
            inbound_prefix: rules.inbound_connector_prefix.clone(),
        };

        let report = apply_certificate(&mut dir, &plan).await;
        assert_eq!(report.status(), ApplyStatus::Success);
        assert_eq!(report.outcomes.len(), 4);
    }

    #[tokio::test]
    async fn test_identity_read_from_server_holding_certificate() {
        let mut dir = MockDirectory::new()
            .with_server("EX01", "dc01.contoso.com")
            .with_server("EX02", "dc01.contoso.com")
            .with_server("EX03", "dc01.contoso.com")
            .with_cert("EX01", cert("AA", "CN=owa.example.com", &["SMTP"]))
            .with_cert("EX02", cert("BB", "CN=mail.example.com", &["SMTP"]))
            .with_cert("EX03", cert("BB", "CN=mail.example.com", &["SMTP"]));
        let selected = dir.servers.clone();

        let candidates = common_certificates(&mut dir, &selected, &WorkflowConfig::default())
            .await
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].thumbprint.as_str(), "BB");

        let identity = resolve_certificate_identity(&mut dir, &candidates[0], &selected)
            .await
            .unwrap();
        assert_eq!(identity.subject, "CN=mail.example.com");
    }

    #[tokio::test]
    async fn test_identity_unreadable_everywhere() {
        let mut dir = MockDirectory::new()
            .with_server("EX01", "dc01.contoso.com")
            .with_server("EX02", "dc01.contoso.com")
            .with_cert("EX01", cert("AA", "CN=mail.example.com", &["SMTP"]));
        let selected = dir.servers.clone();
        let missing = cert("CC", "CN=mail.example.com", &["SMTP"]).fingerprint();

        let err = resolve_certificate_identity(&mut dir, &missing, &selected)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CertificateFetch(_)));

        let err = resolve_certificate_identity(&mut dir, &missing, &[]).await.unwrap_err();
        assert!(matches!(err, Error::InvalidSelection(_)));
    }

    #[tokio::test]
    async fn test_end_to_end_fetch_failure() {
        let mut dir = MockDirectory::new()
            .with_server("S1", "dc01.contoso.com")
            .with_server("S2", "dc01.contoso.com")
            .with_cert("S1", cert("ABC", "CN=mail.example.com", &["SMTP"]))
            .with_cert("S2", cert("ABC", "CN=mail.example.com", &["SMTP"]))
            .failing_fetch("S2");
        let selected = dir.servers.clone();

        let candidates = common_certificates(&mut dir, &selected, &WorkflowConfig::default()).await;
        assert!(candidates.is_none());
        assert!(dir.calls.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_identity_unknown_thumbprint() {
        let mut dir = MockDirectory::new().with_server("S1", "dc01");
        let servers = dir.servers.clone();
        let fp = cert("DEF", "CN=mail.example.com", &["SMTP"]).fingerprint();
        let result = resolve_certificate_identity(&mut dir, &fp, &servers).await;
        assert!(matches!(result, Err(Error::CertificateFetch(_))));
    }
}
