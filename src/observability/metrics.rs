use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::domain::{Decision, Outcome, Tier};

/// Metrics registry for the decision engine.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    /// Relaying sessions evaluated
    pub evaluations_total: AtomicU64,

    /// Sessions skipped because they were not relaying
    pub evaluations_skipped: AtomicU64,

    /// Decisions by tier
    pub tier_rule_match: AtomicU64,
    pub tier_domain_implicit: AtomicU64,
    pub tier_global_default: AtomicU64,

    /// Decisions by outcome
    pub outcome_permit: AtomicU64,
    pub outcome_deny: AtomicU64,
    pub outcome_continue: AtomicU64,

    /// Evaluation latency buckets (microseconds)
    pub latency_under_1ms: AtomicU64,
    pub latency_1_5ms: AtomicU64,
    pub latency_5_10ms: AtomicU64,
    pub latency_10_50ms: AtomicU64,
    pub latency_50_100ms: AtomicU64,
    pub latency_over_100ms: AtomicU64,
    pub latency_sum_micros: AtomicU64,

    /// Store failures absorbed during evaluation
    pub store_errors_total: AtomicU64,
    pub store_timeouts_total: AtomicU64,

    /// Policy reloads
    pub policy_reloads_total: AtomicU64,
    pub policy_reload_errors: AtomicU64,
}

impl MetricsRegistry {
    /// Create a new metrics registry.
    pub fn new() -> Self {
        MetricsRegistry::default()
    }

    /// Record a produced decision.
    pub fn record_decision(&self, decision: &Decision) {
        self.evaluations_total.fetch_add(1, Ordering::Relaxed);

        match decision.tier {
            Tier::RuleMatch => self.tier_rule_match.fetch_add(1, Ordering::Relaxed),
            Tier::DomainImplicit => self.tier_domain_implicit.fetch_add(1, Ordering::Relaxed),
            Tier::GlobalDefault => self.tier_global_default.fetch_add(1, Ordering::Relaxed),
        };

        match decision.outcome {
            Outcome::Permit => self.outcome_permit.fetch_add(1, Ordering::Relaxed),
            Outcome::Deny => self.outcome_deny.fetch_add(1, Ordering::Relaxed),
            Outcome::Continue => self.outcome_continue.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// Record a session that was not evaluated.
    pub fn record_skipped(&self) {
        self.evaluations_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record evaluation latency.
    pub fn record_latency(&self, start: Instant) {
        let micros = u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX);
        self.latency_sum_micros.fetch_add(micros, Ordering::Relaxed);

        if micros < 1000 {
            self.latency_under_1ms.fetch_add(1, Ordering::Relaxed);
        } else if micros < 5000 {
            self.latency_1_5ms.fetch_add(1, Ordering::Relaxed);
        } else if micros < 10000 {
            self.latency_5_10ms.fetch_add(1, Ordering::Relaxed);
        } else if micros < 50000 {
            self.latency_10_50ms.fetch_add(1, Ordering::Relaxed);
        } else if micros < 100000 {
            self.latency_50_100ms.fetch_add(1, Ordering::Relaxed);
        } else {
            self.latency_over_100ms.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Latency histogram buckets as Prometheus expects them: each count
    /// includes every faster bucket, the last one is `+Inf`.
    pub fn latency_buckets(&self) -> [u64; 6] {
        let ranges = [
            &self.latency_under_1ms,
            &self.latency_1_5ms,
            &self.latency_5_10ms,
            &self.latency_10_50ms,
            &self.latency_50_100ms,
            &self.latency_over_100ms,
        ];

        let mut buckets = [0u64; 6];
        let mut running = 0u64;
        for (bucket, range) in buckets.iter_mut().zip(ranges) {
            running += range.load(Ordering::Relaxed);
            *bucket = running;
        }
        buckets
    }

    /// Record a store failure absorbed by the engine.
    pub fn record_store_error(&self, timed_out: bool) {
        self.store_errors_total.fetch_add(1, Ordering::Relaxed);
        if timed_out {
            self.store_timeouts_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a policy reload.
    pub fn record_policy_reload(&self, success: bool) {
        self.policy_reloads_total.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.policy_reload_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let latency = self.latency_buckets();
        let latency_sum = self.latency_sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0;

        format!(
            r#"# HELP relay_acl_evaluations_total Relaying sessions evaluated
# TYPE relay_acl_evaluations_total counter
relay_acl_evaluations_total {}

# HELP relay_acl_evaluations_skipped_total Sessions skipped as not relaying
# TYPE relay_acl_evaluations_skipped_total counter
relay_acl_evaluations_skipped_total {}

# HELP relay_acl_decisions_by_tier Decisions by deciding tier
# TYPE relay_acl_decisions_by_tier counter
relay_acl_decisions_by_tier{{tier="rule_match"}} {}
relay_acl_decisions_by_tier{{tier="domain_implicit"}} {}
relay_acl_decisions_by_tier{{tier="global_default"}} {}

# HELP relay_acl_decisions Decisions by outcome
# TYPE relay_acl_decisions counter
relay_acl_decisions{{outcome="permit"}} {}
relay_acl_decisions{{outcome="deny"}} {}
relay_acl_decisions{{outcome="continue"}} {}

# HELP relay_acl_evaluation_latency_seconds Evaluation latency
# TYPE relay_acl_evaluation_latency_seconds histogram
relay_acl_evaluation_latency_seconds_bucket{{le="0.001"}} {}
relay_acl_evaluation_latency_seconds_bucket{{le="0.005"}} {}
relay_acl_evaluation_latency_seconds_bucket{{le="0.01"}} {}
relay_acl_evaluation_latency_seconds_bucket{{le="0.05"}} {}
relay_acl_evaluation_latency_seconds_bucket{{le="0.1"}} {}
relay_acl_evaluation_latency_seconds_bucket{{le="+Inf"}} {}
relay_acl_evaluation_latency_seconds_sum {}
relay_acl_evaluation_latency_seconds_count {}

# HELP relay_acl_store_errors_total Store failures absorbed during evaluation
# TYPE relay_acl_store_errors_total counter
relay_acl_store_errors_total {}

# HELP relay_acl_store_timeouts_total Store reads that exceeded the timeout
# TYPE relay_acl_store_timeouts_total counter
relay_acl_store_timeouts_total {}

# HELP relay_acl_policy_reloads_total Policy reload operations
# TYPE relay_acl_policy_reloads_total counter
relay_acl_policy_reloads_total {}

# HELP relay_acl_policy_reload_errors_total Policy reload errors
# TYPE relay_acl_policy_reload_errors_total counter
relay_acl_policy_reload_errors_total {}
"#,
            self.evaluations_total.load(Ordering::Relaxed),
            self.evaluations_skipped.load(Ordering::Relaxed),
            self.tier_rule_match.load(Ordering::Relaxed),
            self.tier_domain_implicit.load(Ordering::Relaxed),
            self.tier_global_default.load(Ordering::Relaxed),
            self.outcome_permit.load(Ordering::Relaxed),
            self.outcome_deny.load(Ordering::Relaxed),
            self.outcome_continue.load(Ordering::Relaxed),
            latency[0],
            latency[1],
            latency[2],
            latency[3],
            latency[4],
            latency[5],
            latency_sum,
            latency[5],
            self.store_errors_total.load(Ordering::Relaxed),
            self.store_timeouts_total.load(Ordering::Relaxed),
            self.policy_reloads_total.load(Ordering::Relaxed),
            self.policy_reload_errors.load(Ordering::Relaxed),
        )
    }
}

/// Guard for timing operations.
pub struct TimingGuard<'a> {
    registry: &'a MetricsRegistry,
    start: Instant,
}

impl<'a> TimingGuard<'a> {
    pub fn new(registry: &'a MetricsRegistry) -> Self {
        TimingGuard {
            registry,
            start: Instant::now(),
        }
    }
}

impl<'a> Drop for TimingGuard<'a> {
    fn drop(&mut self) {
        self.registry.record_latency(self.start);
    }
}
