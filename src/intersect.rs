//! Certificate intersection
//!
//! Finds the certificates a set of servers have in common, keyed by
//! [`CertificateFingerprint`]. Reads are all-or-nothing: if any server's
//! certificates cannot be read the whole intersection is abandoned.

use std::collections::HashMap;

use tracing::{error, info, warn};

use crate::config::{IntersectionPolicy, WorkflowConfig};
use crate::directory::{DirectoryService, list_eligible_certificates};
use crate::model::{CertificateFingerprint, ServerRef};

/// Candidate certificates common to `servers`
///
/// Returns `None` when any server's certificates could not be read. An empty
/// list is a normal outcome meaning no suitable certificate exists.
///
/// With [`IntersectionPolicy::AtLeastTwo`] a candidate is only guaranteed to
/// be present on two of the selected servers, not on all of them.
pub async fn common_certificates<D>(
    client: &mut D,
    servers: &[ServerRef],
    rules: &WorkflowConfig,
) -> Option<Vec<CertificateFingerprint>>
where
    D: DirectoryService + ?Sized,
{
    let mut per_server = Vec::with_capacity(servers.len());
    for server in servers {
        match list_eligible_certificates(client, server, rules).await {
            Ok(records) => per_server.push(
                records
                    .iter()
                    .map(|r| r.fingerprint())
                    .collect::<Vec<_>>(),
            ),
            Err(e) => {
                error!(
                    prefix = "Get-CommonCertificates",
                    error = %e,
                    "Aborting: certificates on {} could not be read",
                    server
                );
                return None;
            }
        }
    }

    let candidates = intersect(per_server, rules.intersection);
    if candidates.is_empty() {
        warn!(
            prefix = "Get-CommonCertificates",
            "No suitable certificate found on {} selected server(s)",
            servers.len()
        );
    } else {
        info!(
            prefix = "Get-CommonCertificates",
            "{} candidate certificate(s) across {} server(s)",
            candidates.len(),
            servers.len()
        );
    }
    Some(candidates)
}

/// Intersect per-server fingerprint lists
///
/// A single list is returned as-is. With several lists, fingerprints are
/// counted by value and kept according to `policy`. Output order follows
/// first appearance and holds each fingerprint once.
pub fn intersect(
    per_server: Vec<Vec<CertificateFingerprint>>,
    policy: IntersectionPolicy,
) -> Vec<CertificateFingerprint> {
    let server_count = per_server.len();
    if server_count <= 1 {
        return per_server.into_iter().next().unwrap_or_default();
    }

    let mut order = Vec::new();
    let mut counts: HashMap<CertificateFingerprint, usize> = HashMap::new();
    for fingerprint in per_server.into_iter().flatten() {
        let count = counts.entry(fingerprint.clone()).or_insert(0);
        if *count == 0 {
            order.push(fingerprint);
        }
        *count += 1;
    }

    order
        .into_iter()
        .filter(|fp| {
            let count = counts.get(fp).copied().unwrap_or(0);
            match policy {
                IntersectionPolicy::AtLeastTwo => count > 1,
                IntersectionPolicy::AllServers => count >= server_count,
            }
        })
        .collect()
}
