//! In-memory directory for tests

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use time::macros::datetime;

use super::DirectoryService;
use crate::model::{
    CertificateIdentity, CertificateRecord, ConnectorKind, ConnectorRef, HybridConfig, ServerRef,
    ServiceSet, Thumbprint,
};
use crate::{Error, Result};

/// Identity used for the hybrid configuration in the call log and failure set
pub const HYBRID: &str = "HybridConfiguration";

/// Build a certificate expiring 2027-03-15
pub fn cert(thumbprint: &str, subject: &str, services: &[&str]) -> CertificateRecord {
    CertificateRecord {
        thumbprint: Thumbprint::new(thumbprint).unwrap(),
        subject: subject.to_string(),
        issuer: "CN=Contoso Issuing CA, DC=contoso, DC=com".to_string(),
        not_after: datetime!(2027-03-15 12:00 UTC),
        services: services.iter().collect::<ServiceSet>(),
    }
}

#[derive(Debug, Default)]
pub struct MockDirectory {
    pub connected: bool,
    pub servers: Vec<ServerRef>,
    pub certs: HashMap<String, Vec<CertificateRecord>>,
    pub receive: HashMap<String, Vec<ConnectorRef>>,
    pub send: Vec<ConnectorRef>,
    pub hybrid: HybridConfig,
    /// Servers whose certificate listing fails
    pub fail_fetch: HashSet<String>,
    /// Servers whose connector listing fails
    pub fail_resolve: HashSet<String>,
    /// (target identity, clearing) pairs whose binding call fails
    pub fail_bind: HashSet<(String, bool)>,
    pub fail_discovery: bool,
    /// Every binding call, as "<identity> <- <value or null>"
    pub calls: Vec<String>,
}

impl MockDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a server with its default inbound connector
    pub fn with_server(mut self, name: &str, dc: &str) -> Self {
        self.servers
            .push(ServerRef::new(name).with_domain_controller(dc));
        self.receive.insert(
            name.to_string(),
            vec![
                receive_connector(name, "Client Frontend"),
                receive_connector(name, "Default Frontend"),
            ],
        );
        self
    }

    pub fn with_cert(mut self, server: &str, record: CertificateRecord) -> Self {
        self.certs.entry(server.to_string()).or_default().push(record);
        self
    }

    pub fn with_send_connector(mut self, name: &str) -> Self {
        self.send.push(ConnectorRef {
            name: name.to_string(),
            identity: name.to_string(),
            kind: ConnectorKind::Send,
            server: None,
            tls_certificate_name: None,
        });
        self
    }

    pub fn failing_fetch(mut self, server: &str) -> Self {
        self.fail_fetch.insert(server.to_string());
        self
    }

    pub fn failing_resolve(mut self, server: &str) -> Self {
        self.fail_resolve.insert(server.to_string());
        self
    }

    pub fn failing_bind(mut self, identity: &str, clearing: bool) -> Self {
        self.fail_bind.insert((identity.to_string(), clearing));
        self
    }

    fn record_bind(&mut self, identity: &str, value: Option<&CertificateIdentity>) -> Result<()> {
        let shown = value.map_or_else(|| "null".to_string(), |v| v.to_string());
        self.calls.push(format!("{identity} <- {shown}"));
        if self.fail_bind.contains(&(identity.to_string(), value.is_none())) {
            return Err(Error::Binding(format!("{identity}: access denied")));
        }
        Ok(())
    }
}

fn receive_connector(server: &str, prefix: &str) -> ConnectorRef {
    let name = format!("{prefix} {server}");
    ConnectorRef {
        identity: format!("{server}\\{name}"),
        name,
        kind: ConnectorKind::Receive,
        server: Some(server.to_string()),
        tls_certificate_name: None,
    }
}

#[async_trait]
impl DirectoryService for MockDirectory {
    async fn connect(&mut self) -> Result<()> {
        self.connected = true;
        Ok(())
    }

    async fn list_servers(&mut self) -> Result<Vec<ServerRef>> {
        if self.fail_discovery {
            return Err(Error::Discovery("directory unavailable".into()));
        }
        Ok(self.servers.clone())
    }

    async fn list_certificates(&mut self, server: &ServerRef) -> Result<Vec<CertificateRecord>> {
        if self.fail_fetch.contains(&server.name) {
            return Err(Error::CertificateFetch(format!("{}: RPC server unavailable", server)));
        }
        Ok(self.certs.get(&server.name).cloned().unwrap_or_default())
    }

    async fn get_certificate(
        &mut self,
        thumbprint: &Thumbprint,
        server: &ServerRef,
    ) -> Result<CertificateRecord> {
        self.list_certificates(server)
            .await?
            .into_iter()
            .find(|c| &c.thumbprint == thumbprint)
            .ok_or_else(|| Error::CertificateFetch(format!("{thumbprint} not found on {server}")))
    }

    async fn list_receive_connectors(&mut self, server: &ServerRef) -> Result<Vec<ConnectorRef>> {
        if self.fail_resolve.contains(&server.name) {
            return Err(Error::Discovery(format!("{}: connectors unavailable", server)));
        }
        Ok(self.receive.get(&server.name).cloned().unwrap_or_default())
    }

    async fn list_send_connectors(&mut self) -> Result<Vec<ConnectorRef>> {
        Ok(self.send.clone())
    }

    async fn get_hybrid_config(&mut self) -> Result<HybridConfig> {
        Ok(self.hybrid.clone())
    }

    async fn set_connector_certificate(
        &mut self,
        connector: &ConnectorRef,
        identity: Option<&CertificateIdentity>,
        _domain_controller: Option<&str>,
    ) -> Result<()> {
        self.record_bind(&connector.identity, identity)?;
        let value = identity.map(|v| v.to_string());
        let lists = self
            .receive
            .values_mut()
            .flat_map(|v| v.iter_mut())
            .chain(self.send.iter_mut());
        for c in lists.filter(|c| c.identity == connector.identity) {
            c.tls_certificate_name = value.clone();
        }
        Ok(())
    }

    async fn set_hybrid_config_certificate(
        &mut self,
        identity: Option<&CertificateIdentity>,
        _domain_controller: Option<&str>,
    ) -> Result<()> {
        self.record_bind(HYBRID, identity)?;
        self.hybrid.tls_certificate_name = identity.map(|v| v.to_string());
        Ok(())
    }
}
