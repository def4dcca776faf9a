//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Management session configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// PowerShell executable hosting the management session
    #[serde(default = "default_shell")]
    pub shell: String,
    /// Script that fails when the management module is not installed
    #[serde(default = "default_probe_script")]
    pub probe_script: String,
    /// Script that establishes the management session
    #[serde(default = "default_connect_script")]
    pub connect_script: String,
    /// Upper bound on a single remote call
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            probe_script: default_probe_script(),
            connect_script: default_connect_script(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

impl SessionConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

/// Log sink configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Write to `file`; when false, lines go to the console
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Log file, created on first write
    #[serde(default = "default_log_file")]
    pub file: PathBuf,
    /// Minimum level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            file: default_log_file(),
            level: default_log_level(),
        }
    }
}

/// How the candidate list is narrowed when several servers are selected
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntersectionPolicy {
    /// Keep certificates present on at least two selected servers
    #[default]
    AtLeastTwo,
    /// Keep certificates present on every selected server
    AllServers,
}

/// Certificate selection and binding rules
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkflowConfig {
    /// Subject of the platform's internal auth certificate, never offered
    #[serde(default = "default_auth_subject")]
    pub auth_certificate_subject: String,
    /// Service a certificate must be enabled for
    #[serde(default = "default_required_service")]
    pub required_service: String,
    /// Name prefix of each server's default inbound connector
    #[serde(default = "default_inbound_prefix")]
    pub inbound_connector_prefix: String,
    #[serde(default)]
    pub intersection: IntersectionPolicy,
    /// Domain controller for writes; defaults to the first selected server's
    #[serde(default)]
    pub domain_controller: Option<String>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            auth_certificate_subject: default_auth_subject(),
            required_service: default_required_service(),
            inbound_connector_prefix: default_inbound_prefix(),
            intersection: IntersectionPolicy::default(),
            domain_controller: None,
        }
    }
}

/// Full configuration file
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
}

// Default value functions
fn default_shell() -> String {
    if cfg!(windows) {
        "powershell.exe".to_string()
    } else {
        "pwsh".to_string()
    }
}
fn default_probe_script() -> String {
    "if (-not (Get-Command Connect-ExchangeServer -ErrorAction SilentlyContinue)) { \
     $rx = Join-Path $env:ExchangeInstallPath 'bin\\RemoteExchange.ps1'; \
     if (-not (Test-Path $rx)) { throw 'Exchange Management Shell not installed' }; \
     . $rx | Out-Null }"
        .to_string()
}
fn default_connect_script() -> String {
    "if (-not (Get-PSSession | Where-Object { $_.ConfigurationName -eq 'Microsoft.Exchange' -and $_.State -eq 'Opened' })) { \
     Connect-ExchangeServer -Auto -ClientApplication:ManagementShell | Out-Null }"
        .to_string()
}
fn default_call_timeout_secs() -> u64 {
    120
}
fn default_log_file() -> PathBuf {
    PathBuf::from("hybrid-cert.log")
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_auth_subject() -> String {
    "CN=Microsoft Exchange Server Auth Certificate".to_string()
}
fn default_required_service() -> String {
    "SMTP".to_string()
}
fn default_inbound_prefix() -> String {
    "Default Frontend".to_string()
}
fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from file if it exists, otherwise defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values the workflow cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.session.shell.trim().is_empty() {
            return Err(crate::Error::InvalidConfig("session.shell is empty".into()));
        }
        if self.session.call_timeout_secs == 0 {
            return Err(crate::Error::InvalidConfig(
                "session.call_timeout_secs must be greater than zero".into(),
            ));
        }
        if self.workflow.required_service.trim().is_empty() {
            return Err(crate::Error::InvalidConfig(
                "workflow.required_service is empty".into(),
            ));
        }
        if self.workflow.inbound_connector_prefix.trim().is_empty() {
            return Err(crate::Error::InvalidConfig(
                "workflow.inbound_connector_prefix is empty".into(),
            ));
        }
        Ok(())
    }
}

/// Generate example configuration
pub fn generate_example_config() -> String {
    r#"# Hybrid Certificate Replacement Configuration
# Copy this file and customize for your farm

# ============================================================================
# Management session
# ============================================================================
session:
  # PowerShell executable that hosts the Exchange management session
  shell: "powershell.exe"

  # Upper bound on any single remote call, in seconds
  call_timeout_secs: 120

  # probe_script and connect_script may be overridden when the management
  # shell is installed somewhere unusual. Leave them out to use the defaults.

# ============================================================================
# Logging
# ============================================================================
logging:
  # Write to the log file (false = console only)
  enabled: true
  file: "hybrid-cert.log"
  level: "info"

# ============================================================================
# Workflow
# ============================================================================
workflow:
  # Internal auth certificate, never offered as a candidate
  auth_certificate_subject: "CN=Microsoft Exchange Server Auth Certificate"

  # Candidates must be enabled for this service
  required_service: "SMTP"

  # Each server's default inbound connector starts with this name
  inbound_connector_prefix: "Default Frontend"

  # at_least_two: offer certificates found on two or more selected servers
  # all_servers:  offer only certificates found on every selected server
  intersection: at_least_two

  # Domain controller for writes (default: first selected server's)
  # domain_controller: "dc01.contoso.com"
"#
    .to_string()
}
