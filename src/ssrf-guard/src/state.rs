//! Shared, reconfigurable policy state and metrics.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::info;

use super::{
    GuardConfig, Result,
    config::PolicyConfig,
    dns::AddressResolver,
    policy::PolicyEngine,
    verdict::{Evaluation, Verdict},
};

/// Counters for evaluations.
#[derive(Debug, Default)]
pub struct EvaluationMetrics {
    /// Total number of evaluations.
    pub total_evaluations: AtomicU64,

    /// Number of allowed targets.
    pub allowed_evaluations: AtomicU64,

    /// Number of denied targets.
    pub denied_evaluations: AtomicU64,

    /// Number of successful reconfigurations.
    pub reconfigurations: AtomicU64,
}

impl EvaluationMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one verdict.
    pub fn record(&self, verdict: &Verdict) {
        self.total_evaluations.fetch_add(1, Ordering::Relaxed);
        if verdict.is_allowed() {
            self.allowed_evaluations.fetch_add(1, Ordering::Relaxed);
        } else {
            self.denied_evaluations.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Get total evaluations.
    pub fn total(&self) -> u64 {
        self.total_evaluations.load(Ordering::Relaxed)
    }

    /// Get allowed count.
    pub fn allowed(&self) -> u64 {
        self.allowed_evaluations.load(Ordering::Relaxed)
    }

    /// Get denied count.
    pub fn denied(&self) -> u64 {
        self.denied_evaluations.load(Ordering::Relaxed)
    }

    /// Get a snapshot of the metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_evaluations: self.total(),
            allowed_evaluations: self.allowed(),
            denied_evaluations: self.denied(),
            reconfigurations: self.reconfigurations.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub total_evaluations: u64,
    pub allowed_evaluations: u64,
    pub denied_evaluations: u64,
    pub reconfigurations: u64,
}

/// The active policy, swappable at runtime.
///
/// Readers clone the current `Arc<PolicyEngine>` and evaluate without
/// holding the lock. Reconfiguration compiles a new engine first and swaps
/// it in only on success, so an evaluation in flight keeps the engine it
/// started with and a bad config never becomes active.
pub struct SharedPolicy {
    /// Active engine.
    engine: RwLock<Arc<PolicyEngine>>,

    /// Resolver reused across reconfigurations.
    resolver: Option<Arc<dyn AddressResolver>>,

    /// Evaluation metrics.
    metrics: Arc<EvaluationMetrics>,
}

impl SharedPolicy {
    /// Wrap an engine. Reconfigurations use the system resolver.
    pub fn new(engine: PolicyEngine) -> Self {
        Self {
            engine: RwLock::new(Arc::new(engine)),
            resolver: None,
            metrics: Arc::new(EvaluationMetrics::new()),
        }
    }

    /// Wrap an engine. Reconfigurations keep using `resolver`.
    pub fn with_resolver(engine: PolicyEngine, resolver: Arc<dyn AddressResolver>) -> Self {
        Self {
            resolver: Some(resolver),
            ..Self::new(engine)
        }
    }

    /// Get the active engine.
    pub fn current(&self) -> Arc<PolicyEngine> {
        Arc::clone(&self.engine.read())
    }

    /// Get the metrics.
    pub fn metrics(&self) -> &Arc<EvaluationMetrics> {
        &self.metrics
    }

    /// Compile `config` and make it active. On error the previous policy
    /// stays in place.
    pub fn configure(&self, config: &GuardConfig) -> Result<()> {
        let compiled = PolicyConfig::compile(config)?;
        let (deny_hosts, deny_ips, deny_cidrs) = compiled.deny().counts();
        let (allow_hosts, allow_ips, allow_cidrs) = compiled.allow().counts();

        let engine = match &self.resolver {
            Some(resolver) => PolicyEngine::from_config(compiled, Arc::clone(resolver)),
            None => {
                let resolver = Arc::new(crate::dns::SystemResolver::with_timeout(
                    compiled.dns_timeout(),
                ));
                PolicyEngine::from_config(compiled, resolver)
            }
        };
        self.replace(engine);

        info!(
            deny_hosts,
            deny_ips, deny_cidrs, allow_hosts, allow_ips, allow_cidrs, "SSRF policy reconfigured"
        );
        Ok(())
    }

    /// Make `engine` active.
    pub fn replace(&self, engine: PolicyEngine) {
        *self.engine.write() = Arc::new(engine);
        self.metrics.reconfigurations.fetch_add(1, Ordering::Relaxed);
    }

    /// Evaluate with the active engine and record the verdict.
    pub async fn evaluate(&self, raw: &str) -> Verdict {
        self.inspect(raw).await.verdict
    }

    /// Inspect with the active engine and record the verdict.
    pub async fn inspect(&self, raw: &str) -> Evaluation {
        let engine = self.current();
        let evaluation = engine.inspect(raw).await;
        self.metrics.record(&evaluation.verdict);
        evaluation
    }
}

impl Default for SharedPolicy {
    fn default() -> Self {
        Self::new(PolicyEngine::default())
    }
}

impl std::fmt::Debug for SharedPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedPolicy")
            .field("engine", &self.current())
            .field("metrics", &self.metrics.snapshot())
            .finish()
    }
}
