//! PowerShell-hosted management session
//!
//! One long-lived shell process reads commands from stdin, one per line.
//! Every command is wrapped so that it prints its JSON payload followed by a
//! sentinel line:
//!
//! ```text
//! [{"name":"EX01","domain_controller":"dc01.contoso.com"}]
//! <<HC-END:OK>>
//! ```
//!
//! or, when the command throws, `<<HC-END:ERR>>` followed by the message.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, error, info, trace, warn};

use super::DirectoryService;
use crate::config::SessionConfig;
use crate::model::{
    CertificateIdentity, CertificateRecord, ConnectorKind, ConnectorRef, HybridConfig, ServerRef,
    Thumbprint,
};
use crate::{Error, Result};

const END_OK: &str = "<<HC-END:OK>>";
const END_ERR: &str = "<<HC-END:ERR>>";

/// Why a shell command did not produce a payload
#[derive(Debug)]
pub enum ShellFailure {
    /// The command threw; carries the exception message
    Remote(String),
    Timeout(u64),
    /// The shell exited or its pipes broke
    Closed(String),
}

impl ShellFailure {
    /// Map into the error variant of the operation that was running
    fn into_error(self, wrap: fn(String) -> Error) -> Error {
        match self {
            Self::Remote(msg) => wrap(msg),
            Self::Timeout(secs) => wrap(format!("timed out after {secs}s")),
            Self::Closed(msg) => wrap(format!("management shell closed: {msg}")),
        }
    }
}

/// A running shell process
pub struct ShellSession {
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
    buf: BytesMut,
    timeout: Duration,
}

impl ShellSession {
    /// Start the shell
    pub fn spawn(config: &SessionConfig) -> std::io::Result<Self> {
        let mut child = Command::new(&config.shell)
            .args(["-NoLogo", "-NoProfile", "-NonInteractive", "-Command", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| std::io::Error::other("shell stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("shell stdout unavailable"))?;

        debug!("Started {} (pid {:?})", config.shell, child.id());

        Ok(Self {
            child,
            stdin,
            stdout,
            buf: BytesMut::with_capacity(4096),
            timeout: config.call_timeout(),
        })
    }

    /// Run one command and return everything it printed before the sentinel
    pub async fn run(&mut self, script: &str) -> std::result::Result<String, ShellFailure> {
        let secs = self.timeout.as_secs();
        match tokio::time::timeout(self.timeout, self.exchange(script)).await {
            Ok(result) => result,
            Err(_) => Err(ShellFailure::Timeout(secs)),
        }
    }

    async fn exchange(&mut self, script: &str) -> std::result::Result<String, ShellFailure> {
        let line = wrap_command(script);
        trace!("> {}", script);

        let closed = |e: std::io::Error| ShellFailure::Closed(e.to_string());
        self.stdin.write_all(line.as_bytes()).await.map_err(closed)?;
        self.stdin.flush().await.map_err(closed)?;

        let mut payload = Vec::new();
        loop {
            let line = read_line(&mut self.stdout, &mut self.buf)
                .await
                .map_err(closed)?
                .ok_or_else(|| ShellFailure::Closed("end of output".into()))?;
            trace!("< {}", line);

            if line == END_OK {
                return Ok(payload.join("\n"));
            }
            if let Some(message) = line.strip_prefix(END_ERR) {
                return Err(ShellFailure::Remote(message.trim().to_string()));
            }
            payload.push(line);
        }
    }

    /// Ask the shell to exit, killing it if it does not
    pub async fn close(mut self) {
        let _ = self.stdin.write_all(b"exit\n").await;
        let _ = self.stdin.flush().await;
        match tokio::time::timeout(Duration::from_secs(5), self.child.wait()).await {
            Ok(Ok(status)) => debug!("Management shell exited: {}", status),
            _ => {
                let _ = self.child.kill().await;
                debug!("Management shell killed");
            }
        }
    }
}

/// Wrap a script so it always ends with a sentinel line
fn wrap_command(script: &str) -> String {
    let script = script.replace(['\r', '\n'], " ");
    format!(
        "try {{ $ErrorActionPreference = 'Stop'; {script}; '{END_OK}' }} \
         catch {{ '{END_ERR}' + ($_.Exception.Message -replace '[\\r\\n]+', ' ') }}\n"
    )
}

/// Read a line from stream
async fn read_line<S: AsyncReadExt + Unpin>(
    stream: &mut S,
    buf: &mut BytesMut,
) -> std::io::Result<Option<String>> {
    loop {
        if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
            let line = buf.split_to(pos);
            buf.advance(1); // Skip \n
            let line = String::from_utf8_lossy(&line);
            return Ok(Some(line.trim_end_matches('\r').to_string()));
        }

        let mut temp = vec![0u8; 4096];
        let n = stream.read(&mut temp).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&temp[..n]);
    }
}

/// Quote a value as a single-quoted PowerShell string
fn ps_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Parse a JSON array payload; empty output means no objects
fn parse_list<T: DeserializeOwned>(payload: &str) -> Result<Vec<T>> {
    let payload = payload.trim();
    if payload.is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(payload)?)
}

const CERT_PROJECTION: &str = "ForEach-Object { [pscustomobject]@{ \
     thumbprint = [string]$_.Thumbprint; subject = [string]$_.Subject; issuer = [string]$_.Issuer; \
     not_after = $_.NotAfter.ToUniversalTime().ToString('o', [Globalization.CultureInfo]::InvariantCulture); \
     services = [string]$_.Services } }";

const CONNECTOR_PROJECTION: &str = "ForEach-Object { [pscustomobject]@{ \
     name = [string]$_.Name; identity = [string]$_.Identity; server = [string]$_.Server; \
     tls_certificate_name = [string]$_.TlsCertificateName } }";

fn json_list(pipeline: &str) -> String {
    format!("ConvertTo-Json -Compress -Depth 3 -InputObject @({pipeline})")
}

#[derive(Debug, Deserialize)]
struct RawServer {
    name: String,
    #[serde(default)]
    domain_controller: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawConnector {
    name: String,
    identity: String,
    #[serde(default)]
    server: Option<String>,
    #[serde(default)]
    tls_certificate_name: Option<String>,
}

impl RawConnector {
    fn into_connector(self, kind: ConnectorKind) -> ConnectorRef {
        ConnectorRef {
            name: self.name,
            identity: self.identity,
            kind,
            server: non_empty(self.server),
            tls_certificate_name: non_empty(self.tls_certificate_name),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawHybrid {
    #[serde(default)]
    tls_certificate_name: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// [`DirectoryService`] backed by the platform's management shell
pub struct ShellDirectory {
    config: SessionConfig,
    session: Option<ShellSession>,
}

impl ShellDirectory {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            session: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Open the session unless one is already running
    pub async fn ensure_connected(&mut self) -> Result<&mut ShellSession> {
        if self.session.is_none() {
            let session = Self::open(&self.config).await?;
            self.session = Some(session);
        }
        self.session
            .as_mut()
            .ok_or_else(|| Error::Connection("management session unavailable".into()))
    }

    async fn open(config: &SessionConfig) -> Result<ShellSession> {
        let mut session = ShellSession::spawn(config).map_err(|e| {
            Error::ModuleNotFound(format!("cannot start {}: {e}", config.shell))
        })?;

        if let Err(e) = session.run(&config.probe_script).await {
            session.close().await;
            return Err(match e {
                ShellFailure::Remote(msg) => Error::ModuleNotFound(msg),
                other => other.into_error(Error::Connection),
            });
        }

        if let Err(e) = session.run(&config.connect_script).await {
            session.close().await;
            return Err(e.into_error(Error::Connection));
        }

        info!("Management session established");
        Ok(session)
    }

    /// Run a command on the session
    ///
    /// A timed-out or broken session is discarded so the next call starts a
    /// fresh one; its output stream can no longer be trusted.
    async fn call(&mut self, script: &str, wrap: fn(String) -> Error) -> Result<String> {
        let session = self.ensure_connected().await?;
        match session.run(script).await {
            Ok(payload) => Ok(payload),
            Err(failure) => {
                if !matches!(failure, ShellFailure::Remote(_)) {
                    warn!("Discarding management session after failure: {:?}", failure);
                    if let Some(session) = self.session.take() {
                        session.close().await;
                    }
                }
                Err(failure.into_error(wrap))
            }
        }
    }

    /// Tear down the session
    pub async fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            session.close().await;
            info!("Management session closed");
        }
    }

    fn set_certificate_script(
        cmdlet: &str,
        identity_arg: Option<&str>,
        value: Option<&CertificateIdentity>,
        domain_controller: Option<&str>,
    ) -> String {
        let mut script = cmdlet.to_string();
        if let Some(id) = identity_arg {
            script.push_str(&format!(" -Identity {}", ps_quote(id)));
        }
        match value {
            Some(v) => script.push_str(&format!(" -TlsCertificateName {}", ps_quote(&v.to_string()))),
            None => script.push_str(" -TlsCertificateName $null"),
        }
        if let Some(dc) = domain_controller {
            script.push_str(&format!(" -DomainController {}", ps_quote(dc)));
        }
        script.push_str(" -Confirm:$false");
        script
    }
}

#[async_trait]
impl DirectoryService for ShellDirectory {
    async fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            debug!("Management session already open");
            return Ok(());
        }
        match self.ensure_connected().await {
            Ok(_) => Ok(()),
            Err(e) => {
                error!(prefix = "Connect", error = %e, "Could not establish management session");
                Err(e)
            }
        }
    }

    async fn list_servers(&mut self) -> Result<Vec<ServerRef>> {
        let script = json_list(
            "Get-ExchangeServer | Sort-Object Name | ForEach-Object { [pscustomobject]@{ \
             name = [string]$_.Name; domain_controller = [string]$_.OriginatingServer } }",
        );
        let payload = self.call(&script, Error::Discovery).await?;
        let raw: Vec<RawServer> = parse_list(&payload).map_err(|e| Error::Discovery(e.to_string()))?;
        Ok(raw
            .into_iter()
            .map(|s| ServerRef {
                name: s.name,
                domain_controller: non_empty(s.domain_controller),
            })
            .collect())
    }

    async fn list_certificates(&mut self, server: &ServerRef) -> Result<Vec<CertificateRecord>> {
        let script = json_list(&format!(
            "Get-ExchangeCertificate -Server {} | {CERT_PROJECTION}",
            ps_quote(&server.name)
        ));
        let payload = self.call(&script, Error::CertificateFetch).await?;
        parse_list(&payload).map_err(|e| Error::CertificateFetch(format!("{server}: {e}")))
    }

    async fn get_certificate(
        &mut self,
        thumbprint: &Thumbprint,
        server: &ServerRef,
    ) -> Result<CertificateRecord> {
        let script = json_list(&format!(
            "Get-ExchangeCertificate -Thumbprint {} -Server {} | {CERT_PROJECTION}",
            ps_quote(thumbprint.as_str()),
            ps_quote(&server.name)
        ));
        let payload = self.call(&script, Error::CertificateFetch).await?;
        let records: Vec<CertificateRecord> = parse_list(&payload)
            .map_err(|e| Error::CertificateFetch(format!("{server}: {e}")))?;
        records
            .into_iter()
            .next()
            .ok_or_else(|| Error::CertificateFetch(format!("{thumbprint} not found on {server}")))
    }

    async fn list_receive_connectors(&mut self, server: &ServerRef) -> Result<Vec<ConnectorRef>> {
        let script = json_list(&format!(
            "Get-ReceiveConnector -Server {} | {CONNECTOR_PROJECTION}",
            ps_quote(&server.name)
        ));
        let payload = self.call(&script, Error::Discovery).await?;
        let raw: Vec<RawConnector> =
            parse_list(&payload).map_err(|e| Error::Discovery(e.to_string()))?;
        Ok(raw
            .into_iter()
            .map(|c| c.into_connector(ConnectorKind::Receive))
            .collect())
    }

    async fn list_send_connectors(&mut self) -> Result<Vec<ConnectorRef>> {
        let script = json_list(&format!("Get-SendConnector | {CONNECTOR_PROJECTION}"));
        let payload = self.call(&script, Error::Discovery).await?;
        let raw: Vec<RawConnector> =
            parse_list(&payload).map_err(|e| Error::Discovery(e.to_string()))?;
        Ok(raw
            .into_iter()
            .map(|c| c.into_connector(ConnectorKind::Send))
            .collect())
    }

    async fn get_hybrid_config(&mut self) -> Result<HybridConfig> {
        let script = json_list(
            "Get-HybridConfiguration | ForEach-Object { [pscustomobject]@{ \
             tls_certificate_name = [string]$_.TlsCertificateName } }",
        );
        let payload = self.call(&script, Error::Discovery).await?;
        let raw: Vec<RawHybrid> = parse_list(&payload).map_err(|e| Error::Discovery(e.to_string()))?;
        Ok(raw
            .into_iter()
            .next()
            .map(|h| HybridConfig {
                tls_certificate_name: non_empty(h.tls_certificate_name),
            })
            .unwrap_or_default())
    }

    async fn set_connector_certificate(
        &mut self,
        connector: &ConnectorRef,
        identity: Option<&CertificateIdentity>,
        domain_controller: Option<&str>,
    ) -> Result<()> {
        let cmdlet = match connector.kind {
            ConnectorKind::Receive => "Set-ReceiveConnector",
            ConnectorKind::Send => "Set-SendConnector",
        };
        let script = Self::set_certificate_script(
            cmdlet,
            Some(&connector.identity),
            identity,
            domain_controller,
        );
        self.call(&script, Error::Binding).await.map(|_| ())
    }

    async fn set_hybrid_config_certificate(
        &mut self,
        identity: Option<&CertificateIdentity>,
        domain_controller: Option<&str>,
    ) -> Result<()> {
        let script = Self::set_certificate_script(
            "Set-HybridConfiguration",
            None,
            identity,
            domain_controller,
        );
        self.call(&script, Error::Binding).await.map(|_| ())
    }
}
