//! SSRF defense policy engine.
//!
//! This crate decides whether an untrusted URL (or bare host) supplied by a
//! client is safe to fetch, and if so returns a canonical URL to fetch:
//! - Only `http` and `https` schemes
//! - Obfuscated IPv4 forms (integer, hex, octal, short dotted) are canonicalized
//! - Hostnames are resolved and every address is classified
//! - Private/loopback/link-local/reserved ranges are blocked unless allowlisted
//! - Caller-supplied host/IP/CIDR allow and deny lists, and an optional port policy
//!
//! The engine never performs the fetch itself.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    SharedPolicy                              │
//! │  ┌─────────────────────────────────────────────────────────┐│
//! │  │                    PolicyEngine                          ││
//! │  │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────┐ ││
//! │  │  │ ParsedTarget│  │ PolicyLists │  │ AddressResolver │ ││
//! │  │  └─────────────┘  └─────────────┘  └─────────────────┘ ││
//! │  │  ┌──────────────────────┐  ┌──────────────────────────┐ ││
//! │  │  │ obfuscation (IPv4)   │  │ ip_validation (ranges)   │ ││
//! │  │  └──────────────────────┘  └──────────────────────────┘ ││
//! │  └─────────────────────────────────────────────────────────┘│
//! │  - evaluations / allowed / denied counters                   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use ssrf_guard::{GuardConfig, PolicyEngine, Verdict};
//!
//! let config = GuardConfig::builder()
//!     .deny_host("evil.com")
//!     .allow_cidr("10.0.0.0/8")
//!     .return_with_path(false)
//!     .build();
//!
//! let engine = PolicyEngine::new(config)?;
//!
//! match engine.evaluate("http://intranet.local/status").await {
//!     Verdict::Allowed(url) => println!("fetch {url}"),
//!     Verdict::Denied(violations) => println!("blocked: {violations:?}"),
//! }
//! ```

pub mod config;
pub mod dns;
pub mod host;
pub mod ip_validation;
pub mod lists;
pub mod obfuscation;
pub mod policy;
pub mod state;
pub mod target;
pub mod verdict;

pub use config::{GuardConfig, GuardConfigBuilder, ListSource, PolicyConfig};
pub use dns::{
    AddressKind, AddressResolver, CandidateAddress, CandidateSource, ResolveError,
    StaticResolver, SystemResolver, resolve_candidates,
};
pub use host::Host;
pub use ip_validation::{
    RangeName, classify, classify_str, in_cidr, is_public_unicast, unmap_ipv4,
};
pub use lists::{ListEntry, PolicyLists, RuleSet, load_list_file, parse_list};
pub use obfuscation::{canonicalize_ipv4, try_canonicalize_ipv4};
pub use policy::PolicyEngine;
pub use state::{EvaluationMetrics, MetricsSnapshot, SharedPolicy};
pub use target::{NormalizeError, ParsedTarget};
pub use verdict::{Evaluation, Verdict, Violation, ViolationCode};

use std::path::PathBuf;

use thiserror::Error;

/// Configuration-time errors.
///
/// Evaluation never produces these; it reports failures as a
/// [`Verdict::Denied`].
#[derive(Debug, Error)]
pub enum SsrfGuardError {
    /// A list entry (inline or from a file) could not be parsed.
    #[error("Invalid list source: {0}")]
    InvalidListSource(String),

    /// A list entry in a file could not be parsed.
    #[error("Invalid list source {path}:{line}: {reason}")]
    InvalidListLine {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// Invalid host format.
    #[error("Invalid host: {0}")]
    InvalidHost(String),

    /// Unknown range name in `blocked_range_names`.
    #[error("Invalid range name: {0}")]
    InvalidRangeName(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A list file could not be read.
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SsrfGuardError {
    /// Whether this error came from a malformed list entry or list file.
    pub fn is_list_error(&self) -> bool {
        matches!(
            self,
            SsrfGuardError::InvalidListSource(_)
                | SsrfGuardError::InvalidListLine { .. }
                | SsrfGuardError::Io { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SsrfGuardError>;

/// Evaluate `raw` with the default policy and the system resolver.
///
/// Default policy: http/https only, every non-`unicast` range blocked, no
/// lists, full URL returned.
pub async fn evaluate(raw: &str) -> Verdict {
    PolicyEngine::default().evaluate(raw).await
}
