//! Hybrid Certificate Replacement
//!
//! Replaces the TLS certificate used for hybrid mail flow across an
//! on-premises mail server farm. Servers are discovered through the
//! platform's management shell, the certificates common to the selected
//! servers are offered as candidates, and the chosen one is bound to every
//! server's default inbound connector, one outbound connector and the
//! farm-wide hybrid configuration.
//!
//! ## Workflow
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌─────────────┐     ┌──────────────┐
//! │  Discovery   │────▶│ Intersection │────▶│  Selection  │────▶│   Binding    │
//! │ list servers │     │ common certs │     │ cert + send │     │ clear -> set │
//! │              │     │  per server  │     │  connector  │     │  per target  │
//! └──────────────┘     └──────────────┘     └─────────────┘     └──────────────┘
//! ```

pub mod apply;
pub mod cli;
pub mod config;
pub mod directory;
pub mod intersect;
pub mod logging;
pub mod model;
pub mod workflow;

// Re-export commonly used items
pub use apply::{ApplyPlan, ApplyReport, ApplyStatus, BindingState, BindingTarget, TargetOutcome};
pub use config::{Config, IntersectionPolicy, LoggingConfig, SessionConfig, WorkflowConfig};
pub use directory::{DirectoryService, ShellDirectory};
pub use model::{
    CertificateFingerprint, CertificateIdentity, CertificateRecord, ConnectorKind, ConnectorRef,
    HybridConfig, ServerRef, ServiceSet, Thumbprint,
};

use thiserror::Error;

/// Error types for hybrid certificate replacement
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Management module not installed: {0}")]
    ModuleNotFound(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Server discovery failed: {0}")]
    Discovery(String),

    #[error("Certificate fetch failed: {0}")]
    CertificateFetch(String),

    #[error("Certificate binding failed: {0}")]
    Binding(String),

    #[error("Invalid selection: {0}")]
    InvalidSelection(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Result type for hybrid certificate replacement
pub type Result<T> = std::result::Result<T, Error>;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
