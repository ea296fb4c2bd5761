//! Policy engine: decides whether a client-supplied URL may be fetched.

use std::sync::Arc;

use tracing::{debug, warn};

use super::{
    GuardConfig, Result,
    config::PolicyConfig,
    dns::{AddressResolver, CandidateAddress, SystemResolver, resolve_candidates},
    ip_validation::{classify, is_public_unicast, unmap_ipv4},
    obfuscation::canonicalize_ipv4,
    target::ParsedTarget,
    verdict::{Evaluation, Verdict, Violation, ViolationCode},
};

/// Evaluates raw input against one immutable [`PolicyConfig`].
///
/// Cheap to clone; clones share the config and the resolver.
#[derive(Clone)]
pub struct PolicyEngine {
    /// Compiled policy.
    config: Arc<PolicyConfig>,

    /// Source of addresses for non-literal hostnames.
    resolver: Arc<dyn AddressResolver>,
}

impl std::fmt::Debug for PolicyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PolicyEngine {
    /// Create a new policy engine from config, resolving with the system
    /// resolver.
    pub fn new(config: GuardConfig) -> Result<Self> {
        let config = PolicyConfig::compile(&config)?;
        let resolver = Arc::new(SystemResolver::with_timeout(config.dns_timeout()));
        Ok(Self::from_config(config, resolver))
    }

    /// Create a new policy engine with a custom resolver.
    pub fn with_resolver(config: GuardConfig, resolver: Arc<dyn AddressResolver>) -> Result<Self> {
        let config = PolicyConfig::compile(&config)?;
        Ok(Self::from_config(config, resolver))
    }

    /// Create from an already compiled config.
    pub fn from_config(config: PolicyConfig, resolver: Arc<dyn AddressResolver>) -> Self {
        Self {
            config: Arc::new(config),
            resolver,
        }
    }

    /// Get the compiled config.
    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Evaluate raw input.
    pub async fn evaluate(&self, raw: &str) -> Verdict {
        self.inspect(raw).await.verdict
    }

    /// Evaluate raw input, also returning the addresses that were checked.
    ///
    /// Checks run in a fixed order and stop at the first violation.
    pub async fn inspect(&self, raw: &str) -> Evaluation {
        let evaluation = self.run(raw).await;

        if let Verdict::Denied(violations) = &evaluation.verdict {
            for violation in violations {
                warn!(
                    code = %violation.code,
                    input = %raw,
                    detail = violation.detail.as_deref().unwrap_or(""),
                    "SSRF guard denied target"
                );
            }
        }

        evaluation
    }

    async fn run(&self, raw: &str) -> Evaluation {
        // 1) Normalize
        let target = match ParsedTarget::parse(raw) {
            Ok(target) => target,
            Err(e) => {
                debug!(error = %e, "Input did not normalize");
                return Evaluation::denied(Violation::from(&e));
            }
        };
        let host = target.hostname();

        // 2) Scheme
        if !matches!(target.scheme(), "http" | "https") {
            return Evaluation::denied(Violation::new(ViolationCode::SchemaError));
        }

        // 3) Port policy
        if let Some(ports) = self.config.allowed_ports() {
            let allowed = target
                .effective_port()
                .is_some_and(|port| ports.contains(&port));
            if !allowed {
                let port = target
                    .effective_port()
                    .map(|p| p.to_string())
                    .unwrap_or_default();
                return Evaluation::denied(Violation::with_detail(
                    ViolationCode::PortPolicyError,
                    port,
                ));
            }
        }

        // 4) Hostname allowlist; a listed host skips the deny check
        let allow = self.config.allow();
        let deny = self.config.deny();
        if allow.has_host_rules() {
            if !allow.lookup_host(host) {
                return Evaluation::denied(Violation::with_detail(
                    ViolationCode::HostnameNotAllowed,
                    host,
                ));
            }
        } else if deny.lookup_host(host) {
            // 5) Hostname denylist, before any DNS
            return Evaluation::denied(Violation::new(ViolationCode::HostnameBlacklisted));
        }

        // 6) Addresses
        let candidates = match resolve_candidates(host, self.resolver.as_ref()).await {
            Ok(candidates) => candidates,
            Err(e) => {
                debug!(host = %host, error = %e, "Address resolution failed");
                return Evaluation::denied(Violation::with_detail(
                    ViolationCode::DnsResolutionFailed,
                    host,
                ));
            }
        };

        // 7) Per address; deny wins over allow
        let blocked = self.config.blocked_range_names();
        let mut any_allowed = false;
        for candidate in &candidates {
            // ::ffff:a.b.c.d reaches a.b.c.d, so rules see both forms
            let ip = candidate.ip;
            let v4 = unmap_ipv4(ip);

            if deny.matches_address(ip) || deny.matches_address(v4) {
                return deny_address(ViolationCode::IpBlacklisted, candidate, &candidates);
            }

            let explicit = allow.matches_address(ip) || allow.matches_address(v4);
            let public = is_public_unicast(ip, blocked) && is_public_unicast(v4, blocked);
            if !explicit && !public {
                debug!(ip = %ip, range = %classify(ip), "Address is not public");
                return deny_address(ViolationCode::PrivateOrReservedIp, candidate, &candidates);
            }
            any_allowed |= explicit;
        }

        // 8) Aggregate allow requirement
        if allow.has_address_rules() && !any_allowed {
            return Evaluation {
                verdict: Verdict::deny(Violation::new(ViolationCode::NoIpMatchesAllowlist)),
                candidates,
            };
        }

        // 9) Canonical URL
        let canonical = canonicalize_ipv4(host)
            .map(|ip| ip.to_string())
            .filter(|ip| ip != host);
        let target = match canonical {
            Some(ip) => target.with_host(ip),
            None => target,
        };
        let url = if self.config.return_with_path() {
            target.href()
        } else {
            target.origin()
        };

        debug!(url = %url, addresses = candidates.len(), "Target allowed");

        Evaluation {
            verdict: Verdict::Allowed(url),
            candidates,
        }
    }
}

fn deny_address(
    code: ViolationCode,
    candidate: &CandidateAddress,
    candidates: &[CandidateAddress],
) -> Evaluation {
    Evaluation {
        verdict: Verdict::deny(Violation::with_detail(code, candidate.ip.to_string())),
        candidates: candidates.to_vec(),
    }
}

impl Default for PolicyEngine {
    /// Default policy with the system resolver.
    fn default() -> Self {
        let config = PolicyConfig::default();
        let resolver = Arc::new(SystemResolver::with_timeout(config.dns_timeout()));
        Self::from_config(config, resolver)
    }
}
