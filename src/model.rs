//! Directory objects and certificate identities
//!
//! Everything here is transient: read fresh from the management session for
//! each operation and never persisted.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::macros::format_description;
use time::{Date, OffsetDateTime, UtcOffset};

use crate::{Error, Result};

/// Date layout used in candidate labels and log lines
pub const DATE_FORMAT: &[time::format_description::BorrowedFormatItem<'static>] =
    format_description!("[month]/[day]/[year]");

/// A mail server in the farm
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRef {
    /// Server name
    pub name: String,
    /// Domain controller currently used by the server, used for consistent writes
    #[serde(default)]
    pub domain_controller: Option<String>,
}

impl ServerRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            domain_controller: None,
        }
    }

    pub fn with_domain_controller(mut self, dc: impl Into<String>) -> Self {
        self.domain_controller = Some(dc.into());
        self
    }
}

impl fmt::Display for ServerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Certificate thumbprint, upper-case hex
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Thumbprint(String);

impl Thumbprint {
    pub fn new(value: impl AsRef<str>) -> Result<Self> {
        let value = value.as_ref().trim();
        if value.is_empty() || !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::Parse(format!("invalid thumbprint: '{value}'")));
        }
        Ok(Self(value.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Thumbprint {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Thumbprint> for String {
    fn from(value: Thumbprint) -> Self {
        value.0
    }
}

impl FromStr for Thumbprint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl fmt::Display for Thumbprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Services a certificate is enabled for
///
/// The platform reports these as a flag string such as `"IMAP, POP, IIS, SMTP"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ServiceSet(Vec<String>);

impl ServiceSet {
    pub fn parse(flags: &str) -> Self {
        let services = flags
            .split(',')
            .map(|s| s.trim().to_ascii_uppercase())
            .filter(|s| !s.is_empty() && s != "NONE")
            .collect();
        Self(services)
    }

    pub fn contains(&self, service: &str) -> bool {
        self.0.iter().any(|s| s.eq_ignore_ascii_case(service))
    }

    /// Whether secure mail transport is enabled
    pub fn contains_smtp(&self) -> bool {
        self.contains("SMTP")
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: AsRef<str>> FromIterator<S> for ServiceSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let joined: Vec<String> = iter.into_iter().map(|s| s.as_ref().to_string()).collect();
        Self::parse(&joined.join(","))
    }
}

impl From<String> for ServiceSet {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<ServiceSet> for String {
    fn from(value: ServiceSet) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ServiceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("None");
        }
        f.write_str(&self.0.join(", "))
    }
}

/// A certificate as installed on one server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRecord {
    pub thumbprint: Thumbprint,
    pub subject: String,
    pub issuer: String,
    #[serde(with = "time::serde::rfc3339")]
    pub not_after: OffsetDateTime,
    #[serde(default)]
    pub services: ServiceSet,
}

impl CertificateRecord {
    /// Common name from the subject, or the whole subject when it has none
    pub fn common_name(&self) -> &str {
        common_name(&self.subject)
    }

    /// Server-independent comparison key
    ///
    /// The expiry date is taken in UTC so every server yields the same key.
    pub fn fingerprint(&self) -> CertificateFingerprint {
        CertificateFingerprint {
            common_name: self.common_name().to_string(),
            expires: self.not_after.to_offset(UtcOffset::UTC).date(),
            thumbprint: self.thumbprint.clone(),
        }
    }

    /// Value accepted by the binding API
    pub fn identity(&self) -> CertificateIdentity {
        CertificateIdentity::new(&self.issuer, &self.subject)
    }
}

/// Extract the `CN=` component of a distinguished name
pub fn common_name(subject: &str) -> &str {
    subject
        .split(',')
        .map(str::trim)
        .find_map(|part| {
            let (key, value) = part.split_once('=')?;
            key.trim().eq_ignore_ascii_case("CN").then(|| value.trim())
        })
        .unwrap_or_else(|| subject.trim())
}

/// Comparison key for matching the same certificate across servers
///
/// Display form: `<subject>, Expires:<MM/DD/YYYY>, <thumbprint>`, expiry in UTC
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CertificateFingerprint {
    pub common_name: String,
    pub expires: Date,
    pub thumbprint: Thumbprint,
}

impl fmt::Display for CertificateFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let expires = self
            .expires
            .format(DATE_FORMAT)
            .map_err(|_| fmt::Error)?;
        write!(
            f,
            "{}, Expires:{}, {}",
            self.common_name, expires, self.thumbprint
        )
    }
}

impl FromStr for CertificateFingerprint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || Error::Parse(format!("invalid certificate label: '{s}'"));

        let (rest, thumbprint) = s.rsplit_once(", ").ok_or_else(bad)?;
        let (common_name, expires) = rest.rsplit_once(", Expires:").ok_or_else(bad)?;
        let expires = Date::parse(expires.trim(), DATE_FORMAT).map_err(|_| bad())?;

        Ok(Self {
            common_name: common_name.to_string(),
            expires,
            thumbprint: Thumbprint::new(thumbprint)?,
        })
    }
}

/// Certificate identity as accepted by the connector binding API
///
/// The platform does not take a thumbprint here; it wants issuer and
/// subject encoded as `<I>{issuer}<S>{subject}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CertificateIdentity {
    pub issuer: String,
    pub subject: String,
}

const ISSUER_TAG: &str = "<I>";
const SUBJECT_TAG: &str = "<S>";

impl CertificateIdentity {
    pub fn new(issuer: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            subject: subject.into(),
        }
    }
}

impl fmt::Display for CertificateIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{ISSUER_TAG}{}{SUBJECT_TAG}{}", self.issuer, self.subject)
    }
}

impl FromStr for CertificateIdentity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let rest = s
            .strip_prefix(ISSUER_TAG)
            .ok_or_else(|| Error::Parse(format!("certificate identity missing {ISSUER_TAG}: '{s}'")))?;
        let (issuer, subject) = rest
            .split_once(SUBJECT_TAG)
            .ok_or_else(|| Error::Parse(format!("certificate identity missing {SUBJECT_TAG}: '{s}'")))?;

        if issuer.is_empty() || subject.is_empty() {
            return Err(Error::Parse(format!("certificate identity incomplete: '{s}'")));
        }

        Ok(Self::new(issuer, subject))
    }
}

impl TryFrom<String> for CertificateIdentity {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<CertificateIdentity> for String {
    fn from(value: CertificateIdentity) -> Self {
        value.to_string()
    }
}

/// Connector direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorKind {
    /// Per-server inbound connector
    Receive,
    /// Farm-wide outbound connector
    Send,
}

/// A mail-flow connector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorRef {
    pub name: String,
    /// Identity the platform uses to address the connector
    pub identity: String,
    pub kind: ConnectorKind,
    /// Owning server (receive connectors only)
    #[serde(default)]
    pub server: Option<String>,
    /// Currently bound certificate, in `<I>..<S>..` form
    #[serde(default)]
    pub tls_certificate_name: Option<String>,
}

impl fmt::Display for ConnectorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identity)
    }
}

/// The farm-wide hybrid configuration object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HybridConfig {
    #[serde(default)]
    pub tls_certificate_name: Option<String>,
}
