//! Evaluation outcomes.

use serde::{Deserialize, Serialize};

use crate::dns::CandidateAddress;
use crate::target::NormalizeError;

/// Why a target was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ViolationCode {
    InvalidInput,
    #[serde(rename = "InvalidURL")]
    InvalidUrl,
    InvalidHost,
    SchemaError,
    PortPolicyError,
    HostnameNotAllowed,
    HostnameBlacklisted,
    DnsResolutionFailed,
    IpBlacklisted,
    #[serde(rename = "PrivateOrReservedIP")]
    PrivateOrReservedIp,
    NoIpMatchesAllowlist,
}

impl ViolationCode {
    /// Stable wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationCode::InvalidInput => "InvalidInput",
            ViolationCode::InvalidUrl => "InvalidURL",
            ViolationCode::InvalidHost => "InvalidHost",
            ViolationCode::SchemaError => "SchemaError",
            ViolationCode::PortPolicyError => "PortPolicyError",
            ViolationCode::HostnameNotAllowed => "HostnameNotAllowed",
            ViolationCode::HostnameBlacklisted => "HostnameBlacklisted",
            ViolationCode::DnsResolutionFailed => "DnsResolutionFailed",
            ViolationCode::IpBlacklisted => "IpBlacklisted",
            ViolationCode::PrivateOrReservedIp => "PrivateOrReservedIP",
            ViolationCode::NoIpMatchesAllowlist => "NoIpMatchesAllowlist",
        }
    }

    /// Human-readable message.
    pub fn message(&self) -> &'static str {
        match self {
            ViolationCode::InvalidInput => "Invalid input",
            ViolationCode::InvalidUrl => "Invalid URL",
            ViolationCode::InvalidHost => "Invalid host",
            ViolationCode::SchemaError => "Schema Error",
            ViolationCode::PortPolicyError => "Port not allowed",
            ViolationCode::HostnameNotAllowed => "Hostname not in allowlist",
            ViolationCode::HostnameBlacklisted => "Hostname blacklisted",
            ViolationCode::DnsResolutionFailed => "DNS resolution failed",
            ViolationCode::IpBlacklisted => "IP blacklisted",
            ViolationCode::PrivateOrReservedIp => "Private/Reserved IP",
            ViolationCode::NoIpMatchesAllowlist => "No IP matches allowlist",
        }
    }
}

impl std::fmt::Display for ViolationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single reason for denial, optionally naming the offending value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub code: ViolationCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Violation {
    pub fn new(code: ViolationCode) -> Self {
        Self { code, detail: None }
    }

    pub fn with_detail(code: ViolationCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: Some(detail.into()),
        }
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}: {}", self.code.message(), detail),
            None => write!(f, "{}", self.code.message()),
        }
    }
}

impl From<&NormalizeError> for Violation {
    fn from(err: &NormalizeError) -> Self {
        match err {
            NormalizeError::InvalidInput => Violation::new(ViolationCode::InvalidInput),
            NormalizeError::InvalidUrl(reason) => {
                Violation::with_detail(ViolationCode::InvalidUrl, reason.clone())
            }
            NormalizeError::InvalidHost => Violation::new(ViolationCode::InvalidHost),
        }
    }
}

/// Outcome of one evaluation. Serializes to the canonical URL string or to
/// the ordered list of violations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Verdict {
    /// Safe to fetch; holds the canonical URL.
    Allowed(String),

    /// Not safe; never empty.
    Denied(Vec<Violation>),
}

impl Verdict {
    pub(crate) fn deny(violation: Violation) -> Self {
        Verdict::Denied(vec![violation])
    }

    /// Check if the verdict allows the fetch.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allowed(_))
    }

    /// Check if the verdict blocks the fetch.
    pub fn is_denied(&self) -> bool {
        matches!(self, Verdict::Denied(_))
    }

    /// The canonical URL, if allowed.
    pub fn url(&self) -> Option<&str> {
        match self {
            Verdict::Allowed(url) => Some(url),
            Verdict::Denied(_) => None,
        }
    }

    /// The violations, empty if allowed.
    pub fn violations(&self) -> &[Violation] {
        match self {
            Verdict::Allowed(_) => &[],
            Verdict::Denied(violations) => violations,
        }
    }

    /// Code of the first violation, if denied.
    pub fn first_code(&self) -> Option<ViolationCode> {
        self.violations().first().map(|v| v.code)
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Allowed(url) => write!(f, "ALLOW {}", url),
            Verdict::Denied(violations) => {
                write!(f, "DENY")?;
                for violation in violations {
                    write!(f, " [{}]", violation)?;
                }
                Ok(())
            }
        }
    }
}

/// A verdict together with the addresses that were checked to reach it.
///
/// On `Allowed`, `candidates` is never empty; callers can pin their
/// connection to one of these addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub verdict: Verdict,
    pub candidates: Vec<CandidateAddress>,
}

impl Evaluation {
    pub(crate) fn denied(violation: Violation) -> Self {
        Self {
            verdict: Verdict::deny(violation),
            candidates: Vec::new(),
        }
    }
}
