//! Certificate binding
//!
//! Binds one certificate identity to every server's default inbound
//! connector, one outbound connector and the hybrid configuration. Each
//! target is cleared and then set so the platform refreshes the binding.
//! Targets are processed one after another; a failure is recorded and the
//! run moves on. Nothing is rolled back.

use std::fmt;

use serde::Serialize;
use tracing::{debug, error, info};

use crate::directory::DirectoryService;
use crate::model::{CertificateIdentity, ConnectorRef, ServerRef};
use crate::{Error, Result};

/// Everything needed to bind a certificate across the farm
#[derive(Debug, Clone)]
pub struct ApplyPlan {
    pub identity: CertificateIdentity,
    pub servers: Vec<ServerRef>,
    pub send_connector: ConnectorRef,
    /// Domain controller every write goes through
    pub domain_controller: Option<String>,
    /// Name prefix of each server's default inbound connector
    pub inbound_prefix: String,
}

/// Something a certificate gets bound to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BindingTarget {
    /// A server's default inbound connector; `identity` is unset when it could not be resolved
    ReceiveConnector {
        server: String,
        identity: Option<String>,
    },
    SendConnector { identity: String },
    HybridConfiguration,
}

impl fmt::Display for BindingTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReceiveConnector {
                identity: Some(id), ..
            } => write!(f, "receive connector {id}"),
            Self::ReceiveConnector { server, .. } => {
                write!(f, "default inbound connector on {server}")
            }
            Self::SendConnector { identity } => write!(f, "send connector {identity}"),
            Self::HybridConfiguration => f.write_str("hybrid configuration"),
        }
    }
}

/// Binding progress of a single target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingState {
    Unbound,
    Clearing,
    Cleared,
    Setting,
    Bound,
    Failed,
}

/// Final state of one target
#[derive(Debug, Clone, Serialize)]
pub struct TargetOutcome {
    pub target: BindingTarget,
    pub state: BindingState,
    /// Error details in the order they happened
    pub errors: Vec<String>,
}

impl TargetOutcome {
    fn new(target: BindingTarget) -> Self {
        Self {
            target,
            state: BindingState::Unbound,
            errors: Vec::new(),
        }
    }

    fn fail(&mut self, detail: impl Into<String>) {
        self.state = BindingState::Failed;
        self.errors.push(detail.into());
    }

    pub fn succeeded(&self) -> bool {
        self.state == BindingState::Bound
    }
}

/// Aggregate result of an apply run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ApplyStatus {
    Success,
    Error,
}

impl fmt::Display for ApplyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("Success"),
            Self::Error => f.write_str("Error"),
        }
    }
}

/// Per-target outcomes of an apply run, in processing order
#[derive(Debug, Clone, Default, Serialize)]
pub struct ApplyReport {
    pub outcomes: Vec<TargetOutcome>,
}

impl ApplyReport {
    /// `Success` only when every target ended up bound
    pub fn status(&self) -> ApplyStatus {
        if self.outcomes.iter().all(TargetOutcome::succeeded) {
            ApplyStatus::Success
        } else {
            ApplyStatus::Error
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &TargetOutcome> {
        self.outcomes.iter().filter(|o| !o.succeeded())
    }
}

/// A target as it would be touched by [`apply_certificate`]
#[derive(Debug, Clone, Serialize)]
pub struct PlannedTarget {
    pub target: BindingTarget,
    /// Binding in place right now, when known
    pub current_binding: Option<String>,
    /// Why the target could not be resolved
    pub error: Option<String>,
}

/// Find a server's default inbound connector
pub async fn resolve_inbound_connector<D>(
    client: &mut D,
    server: &ServerRef,
    prefix: &str,
) -> Result<ConnectorRef>
where
    D: DirectoryService + ?Sized,
{
    let prefix = prefix.to_ascii_lowercase();
    client
        .list_receive_connectors(server)
        .await?
        .into_iter()
        .find(|c| c.name.to_ascii_lowercase().starts_with(&prefix))
        .ok_or_else(|| {
            Error::Discovery(format!(
                "no receive connector named '{prefix}*' on {server}"
            ))
        })
}

/// Resolve every target without changing anything
pub async fn plan_targets<D>(client: &mut D, plan: &ApplyPlan) -> Vec<PlannedTarget>
where
    D: DirectoryService + ?Sized,
{
    let mut planned = Vec::with_capacity(plan.servers.len() + 2);

    for server in &plan.servers {
        match resolve_inbound_connector(client, server, &plan.inbound_prefix).await {
            Ok(connector) => planned.push(PlannedTarget {
                target: BindingTarget::ReceiveConnector {
                    server: server.name.clone(),
                    identity: Some(connector.identity.clone()),
                },
                current_binding: connector.tls_certificate_name,
                error: None,
            }),
            Err(e) => planned.push(PlannedTarget {
                target: BindingTarget::ReceiveConnector {
                    server: server.name.clone(),
                    identity: None,
                },
                current_binding: None,
                error: Some(e.to_string()),
            }),
        }
    }

    planned.push(PlannedTarget {
        target: BindingTarget::SendConnector {
            identity: plan.send_connector.identity.clone(),
        },
        current_binding: plan.send_connector.tls_certificate_name.clone(),
        error: None,
    });

    let (current_binding, error) = match client.get_hybrid_config().await {
        Ok(hybrid) => (hybrid.tls_certificate_name, None),
        Err(e) => (None, Some(e.to_string())),
    };
    planned.push(PlannedTarget {
        target: BindingTarget::HybridConfiguration,
        current_binding,
        error,
    });

    planned
}

/// Bind `plan.identity` to every target
///
/// Always runs to the end. Inspect [`ApplyReport::status`] for the
/// aggregate and [`ApplyReport::failures`] for the details.
pub async fn apply_certificate<D>(client: &mut D, plan: &ApplyPlan) -> ApplyReport
where
    D: DirectoryService + ?Sized,
{
    let dc = plan.domain_controller.as_deref();
    let mut report = ApplyReport::default();

    info!(
        prefix = "Set-Certificate",
        "Binding {} to {} server(s), {} and the hybrid configuration",
        plan.identity,
        plan.servers.len(),
        plan.send_connector
    );

    for server in &plan.servers {
        let connector = match resolve_inbound_connector(client, server, &plan.inbound_prefix).await
        {
            Ok(connector) => connector,
            Err(e) => {
                error!(
                    prefix = "Set-Certificate",
                    error = %e,
                    "Could not resolve the default inbound connector on {}",
                    server
                );
                let mut outcome = TargetOutcome::new(BindingTarget::ReceiveConnector {
                    server: server.name.clone(),
                    identity: None,
                });
                outcome.fail(e.to_string());
                report.outcomes.push(outcome);
                continue;
            }
        };

        let target = BindingTarget::ReceiveConnector {
            server: server.name.clone(),
            identity: Some(connector.identity.clone()),
        };
        let outcome = rebind(client, Binding::Connector(&connector), target, &plan.identity, dc).await;
        report.outcomes.push(outcome);
    }

    let target = BindingTarget::SendConnector {
        identity: plan.send_connector.identity.clone(),
    };
    let outcome = rebind(
        client,
        Binding::Connector(&plan.send_connector),
        target,
        &plan.identity,
        dc,
    )
    .await;
    report.outcomes.push(outcome);

    let outcome = rebind(
        client,
        Binding::Hybrid,
        BindingTarget::HybridConfiguration,
        &plan.identity,
        dc,
    )
    .await;
    report.outcomes.push(outcome);

    match report.status() {
        ApplyStatus::Success => info!(prefix = "Set-Certificate", "All targets bound"),
        ApplyStatus::Error => error!(
            prefix = "Set-Certificate",
            "{} of {} target(s) failed",
            report.failures().count(),
            report.outcomes.len()
        ),
    }

    report
}

#[derive(Clone, Copy)]
enum Binding<'a> {
    Connector(&'a ConnectorRef),
    Hybrid,
}

async fn bind<D>(
    client: &mut D,
    binding: Binding<'_>,
    value: Option<&CertificateIdentity>,
    dc: Option<&str>,
) -> Result<()>
where
    D: DirectoryService + ?Sized,
{
    match binding {
        Binding::Connector(connector) => client.set_connector_certificate(connector, value, dc).await,
        Binding::Hybrid => client.set_hybrid_config_certificate(value, dc).await,
    }
}

/// Clear then set one target
///
/// A failed clear is recorded but the set is still attempted; the target
/// then ends `Failed` even if the set goes through.
async fn rebind<D>(
    client: &mut D,
    binding: Binding<'_>,
    target: BindingTarget,
    identity: &CertificateIdentity,
    dc: Option<&str>,
) -> TargetOutcome
where
    D: DirectoryService + ?Sized,
{
    let mut outcome = TargetOutcome::new(target);

    outcome.state = BindingState::Clearing;
    let cleared = match bind(client, binding, None, dc).await {
        Ok(()) => {
            outcome.state = BindingState::Cleared;
            debug!("Cleared {}", outcome.target);
            true
        }
        Err(e) => {
            error!(
                prefix = "Set-Certificate",
                error = %e,
                "Failed to clear the certificate on {}",
                outcome.target
            );
            outcome.errors.push(format!("clear: {e}"));
            false
        }
    };

    outcome.state = BindingState::Setting;
    match bind(client, binding, Some(identity), dc).await {
        Ok(()) if cleared => {
            outcome.state = BindingState::Bound;
            info!(prefix = "Set-Certificate", "Bound certificate to {}", outcome.target);
        }
        Ok(()) => {
            outcome.state = BindingState::Failed;
            info!(
                prefix = "Set-Certificate",
                "Set certificate on {} after a failed clear",
                outcome.target
            );
        }
        Err(e) => {
            error!(
                prefix = "Set-Certificate",
                error = %e,
                "Failed to set the certificate on {}",
                outcome.target
            );
            outcome.fail(format!("set: {e}"));
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::mock::{HYBRID, MockDirectory};

    const OUTBOUND: &str = "Outbound to Office 365";

    fn identity() -> CertificateIdentity {
        CertificateIdentity::new("CN=Contoso Issuing CA", "CN=mail.example.com")
    }

    fn farm() -> MockDirectory {
        MockDirectory::new()
            .with_server("EX01", "dc01.contoso.com")
            .with_server("EX02", "dc01.contoso.com")
            .with_send_connector(OUTBOUND)
    }

    fn plan_for(dir: &MockDirectory) -> ApplyPlan {
        ApplyPlan {
            identity: identity(),
            servers: dir.servers.clone(),
            send_connector: dir.send[0].clone(),
            domain_controller: Some("dc01.contoso.com".to_string()),
            inbound_prefix: "Default Frontend".to_string(),
        }
    }

    #[tokio::test]
    async fn test_all_targets_bound() {
        let mut dir = farm();
        let plan = plan_for(&dir);

        let report = apply_certificate(&mut dir, &plan).await;

        assert_eq!(report.status(), ApplyStatus::Success);
        assert_eq!(report.outcomes.len(), 4);
        assert!(report.outcomes.iter().all(|o| o.state == BindingState::Bound));

        let value = identity().to_string();
        assert_eq!(dir.hybrid.tls_certificate_name.as_deref(), Some(value.as_str()));
        assert_eq!(dir.send[0].tls_certificate_name.as_deref(), Some(value.as_str()));
        for server in ["EX01", "EX02"] {
            let default = dir.receive[server]
                .iter()
                .find(|c| c.name.starts_with("Default Frontend"))
                .unwrap();
            assert_eq!(default.tls_certificate_name.as_deref(), Some(value.as_str()));
            let client = dir.receive[server]
                .iter()
                .find(|c| c.name.starts_with("Client Frontend"))
                .unwrap();
            assert_eq!(client.tls_certificate_name, None);
        }
    }

    #[tokio::test]
    async fn test_clear_precedes_set_on_every_target() {
        let mut dir = farm();
        let plan = plan_for(&dir);
        apply_certificate(&mut dir, &plan).await;

        let value = identity().to_string();
        let expected: Vec<String> = [
            "EX01\\Default Frontend EX01",
            "EX02\\Default Frontend EX02",
            OUTBOUND,
            HYBRID,
        ]
        .iter()
        .flat_map(|id| [format!("{id} <- null"), format!("{id} <- {value}")])
        .collect();
        assert_eq!(dir.calls, expected);
    }

    #[tokio::test]
    async fn test_failure_does_not_halt_remaining_targets() {
        let mut dir = farm().failing_bind("EX01\\Default Frontend EX01", false);
        let plan = plan_for(&dir);

        let report = apply_certificate(&mut dir, &plan).await;

        assert_eq!(report.status(), ApplyStatus::Error);
        let states: Vec<_> = report.outcomes.iter().map(|o| o.state).collect();
        assert_eq!(
            states,
            vec![
                BindingState::Failed,
                BindingState::Bound,
                BindingState::Bound,
                BindingState::Bound
            ]
        );
        assert_eq!(report.failures().count(), 1);
        assert!(report.outcomes[0].errors[0].starts_with("set:"));
    }

    #[tokio::test]
    async fn test_failed_clear_still_sets() {
        let mut dir = farm().failing_bind(OUTBOUND, true);
        let plan = plan_for(&dir);

        let report = apply_certificate(&mut dir, &plan).await;

        let value = identity().to_string();
        assert!(dir.calls.contains(&format!("{OUTBOUND} <- {value}")));
        assert_eq!(dir.send[0].tls_certificate_name.as_deref(), Some(value.as_str()));

        let outbound = &report.outcomes[2];
        assert_eq!(outbound.state, BindingState::Failed);
        assert_eq!(outbound.errors.len(), 1);
        assert!(outbound.errors[0].starts_with("clear:"));
        assert_eq!(report.status(), ApplyStatus::Error);
    }

    #[tokio::test]
    async fn test_unresolved_inbound_connector_skipped() {
        let mut dir = farm().failing_resolve("EX02");
        let plan = plan_for(&dir);

        let report = apply_certificate(&mut dir, &plan).await;

        assert_eq!(
            report.outcomes[1].target,
            BindingTarget::ReceiveConnector {
                server: "EX02".to_string(),
                identity: None
            }
        );
        assert_eq!(report.outcomes[1].state, BindingState::Failed);
        assert!(dir.calls.iter().all(|c| !c.starts_with("EX02")));
        assert_eq!(report.outcomes[3].state, BindingState::Bound);
        assert_eq!(report.status(), ApplyStatus::Error);
    }

    #[tokio::test]
    async fn test_hybrid_failure_reported() {
        let mut dir = farm().failing_bind(HYBRID, false);
        let plan = plan_for(&dir);

        let report = apply_certificate(&mut dir, &plan).await;

        assert_eq!(report.status(), ApplyStatus::Error);
        let failed: Vec<_> = report.failures().map(|o| o.target.clone()).collect();
        assert_eq!(failed, vec![BindingTarget::HybridConfiguration]);
    }

    #[tokio::test]
    async fn test_plan_targets_does_not_mutate() {
        let mut dir = farm().failing_resolve("EX02");
        dir.hybrid.tls_certificate_name = Some("<I>CN=Old CA<S>CN=mail.example.com".to_string());
        let plan = plan_for(&dir);

        let planned = plan_targets(&mut dir, &plan).await;

        assert!(dir.calls.is_empty());
        assert_eq!(planned.len(), 4);
        assert!(planned[0].error.is_none());
        assert!(planned[1].error.is_some());
        assert_eq!(
            planned[3].current_binding.as_deref(),
            Some("<I>CN=Old CA<S>CN=mail.example.com")
        );
    }

    #[tokio::test]
    async fn test_resolve_inbound_is_case_insensitive() {
        let mut dir = farm();
        let server = dir.servers[0].clone();
        let connector = resolve_inbound_connector(&mut dir, &server, "default frontend")
            .await
            .unwrap();
        assert_eq!(connector.name, "Default Frontend EX01");

        let missing = resolve_inbound_connector(&mut dir, &server, "Hub Transport").await;
        assert!(matches!(missing, Err(Error::Discovery(_))));
    }
}
