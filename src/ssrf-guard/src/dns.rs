//! Address acquisition: literal IPs, obfuscated IPv4, and DNS resolution.
//!
//! Every evaluation resolves afresh. Nothing is cached between calls, so the
//! window between this check and the caller's fetch stays as small as the
//! caller makes it. Pinning the fetch to one of the returned addresses (see
//! [`crate::Evaluation`]) closes the DNS rebinding gap entirely; otherwise
//! that gap is the caller's responsibility.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::obfuscation::canonicalize_ipv4;

/// Address family of a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressKind {
    V4,
    V6,
}

/// Where a candidate address came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandidateSource {
    /// The hostname was already a literal IP.
    Literal,
    /// The hostname was an obfuscated IPv4 form.
    Canonicalized,
    /// The hostname was resolved through DNS.
    Resolved,
}

/// One address the target may connect to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CandidateAddress {
    pub ip: IpAddr,
    pub source: CandidateSource,
}

impl CandidateAddress {
    pub fn new(ip: IpAddr, source: CandidateSource) -> Self {
        Self { ip, source }
    }

    pub fn kind(&self) -> AddressKind {
        match self.ip {
            IpAddr::V4(_) => AddressKind::V4,
            IpAddr::V6(_) => AddressKind::V6,
        }
    }
}

impl std::fmt::Display for CandidateAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.ip)
    }
}

/// DNS resolution failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// The name does not exist or every lookup failed.
    #[error("failed to resolve {host}: {reason}")]
    Failed { host: String, reason: String },

    /// The lookup succeeded but returned nothing.
    #[error("no addresses returned for {0}")]
    NoAddresses(String),

    /// The lookup did not finish in time.
    #[error("resolution of {host} timed out after {timeout:?}")]
    Timeout { host: String, timeout: Duration },
}

/// Resolves a hostname to its A and AAAA addresses.
///
/// Implementations report a total failure as `Err`. A failure of only one
/// record type must not fail the call when the other one succeeded.
#[async_trait]
pub trait AddressResolver: Send + Sync {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, ResolveError>;
}

/// Resolver backed by the operating system (`getaddrinfo` with an
/// unspecified family, so both A and AAAA are queried).
#[derive(Debug, Clone)]
pub struct SystemResolver {
    timeout: Duration,
}

impl SystemResolver {
    /// Default lookup timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new() -> Self {
        Self::with_timeout(Self::DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for SystemResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AddressResolver for SystemResolver {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, ResolveError> {
        lookup_with_timeout(host, self.timeout, tokio::net::lookup_host((host, 0))).await
    }
}

/// Run `lookup` under `timeout` and dedup the addresses it yields.
async fn lookup_with_timeout<F, I>(
    host: &str,
    timeout: Duration,
    lookup: F,
) -> Result<Vec<IpAddr>, ResolveError>
where
    F: Future<Output = std::io::Result<I>>,
    I: Iterator<Item = SocketAddr>,
{
    let addrs = tokio::time::timeout(timeout, lookup)
        .await
        .map_err(|_| ResolveError::Timeout {
            host: host.to_string(),
            timeout,
        })?
        .map_err(|e| ResolveError::Failed {
            host: host.to_string(),
            reason: e.to_string(),
        })?;

    let mut ips = Vec::new();
    for socket_addr in addrs {
        let ip = socket_addr.ip();
        if !ips.contains(&ip) {
            ips.push(ip);
        }
    }
    Ok(ips)
}

/// Fixed host-to-address table. Unknown names fail like NXDOMAIN.
///
/// Useful for tests and for deployments that pin names to addresses.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    entries: HashMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `host` to `ips` (in order).
    pub fn with_host(
        mut self,
        host: impl Into<String>,
        ips: impl IntoIterator<Item = IpAddr>,
    ) -> Self {
        self.entries
            .insert(host.into().to_lowercase(), ips.into_iter().collect());
        self
    }
}

#[async_trait]
impl AddressResolver for StaticResolver {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, ResolveError> {
        self.entries
            .get(&host.to_lowercase())
            .cloned()
            .ok_or_else(|| ResolveError::Failed {
                host: host.to_string(),
                reason: "no such host".to_string(),
            })
    }
}

/// Turn a hostname into candidate addresses.
///
/// Obfuscated IPv4 and literal IPs are returned directly without any DNS
/// query. Otherwise `resolver` is asked; an empty answer is an error.
pub async fn resolve_candidates(
    hostname: &str,
    resolver: &dyn AddressResolver,
) -> Result<Vec<CandidateAddress>, ResolveError> {
    if let Some(ip) = canonicalize_ipv4(hostname) {
        let source = if ip.to_string() == hostname {
            CandidateSource::Literal
        } else {
            CandidateSource::Canonicalized
        };
        return Ok(vec![CandidateAddress::new(IpAddr::V4(ip), source)]);
    }

    if let Ok(ip) = hostname.parse::<IpAddr>() {
        return Ok(vec![CandidateAddress::new(ip, CandidateSource::Literal)]);
    }

    let ips = resolver.resolve(hostname).await?;
    if ips.is_empty() {
        return Err(ResolveError::NoAddresses(hostname.to_string()));
    }

    debug!(host = %hostname, addresses = ?ips, "Resolved host");

    Ok(ips
        .into_iter()
        .map(|ip| CandidateAddress::new(ip, CandidateSource::Resolved))
        .collect())
}
