use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::domain::{Decision, RelaySession, ResultRecord, ResultSink};
use crate::observability::metrics::{MetricsRegistry, TimingGuard};
use crate::policy::PolicyHandle;
use crate::storage::{RuleStore, StoreResult};

/// Default bound on the store reads of one evaluation.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(1);

/// Relay access-control decision engine.
///
/// Stateless across evaluations: each call reads the domain and its rules
/// from the store and the current policy snapshot, and resolves the
/// session through the rule, domain and global tiers in that order.
pub struct RelayAclEngine {
    store: Arc<dyn RuleStore>,
    policy: PolicyHandle,
    metrics: Arc<MetricsRegistry>,
    store_timeout: Duration,
}

impl RelayAclEngine {
    /// Create an engine over a rule store and a policy handle.
    pub fn new(store: Arc<dyn RuleStore>, policy: PolicyHandle) -> Self {
        RelayAclEngine {
            store,
            policy,
            metrics: Arc::new(MetricsRegistry::new()),
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    /// Evaluate a session and push the result records into `results`.
    ///
    /// Returns `None` for sessions that are not relaying; nothing is
    /// evaluated or recorded for them. Store failures never surface as
    /// errors: they are recorded as `err` results and the global default
    /// decides.
    pub async fn check<R>(&self, session: &RelaySession, results: &mut R) -> Option<Decision>
    where
        R: ResultSink + ?Sized,
    {
        if !session.relaying {
            debug!(domain = %session.target_host, "Session not relaying, skipping ACL check");
            self.metrics.record_skipped();
            return None;
        }

        let _timing = TimingGuard::new(&self.metrics);
        let policy = self.policy.snapshot();
        let host = session.target_host.as_str();

        let scanned = match timeout(self.store_timeout, self.evaluate_domain(session)).await {
            Ok(Ok(scanned)) => scanned,
            Ok(Err(e)) => {
                warn!(domain = host, error = %e, "Rule store failure, falling back to global default");
                self.metrics.record_store_error(false);
                results.add(ResultRecord::err(e.to_string()));
                None
            }
            Err(_) => {
                warn!(
                    domain = host,
                    timeout_ms = self.store_timeout.as_millis() as u64,
                    "Rule store timed out, falling back to global default"
                );
                self.metrics.record_store_error(true);
                results.add(ResultRecord::err(format!(
                    "rule store timed out after {}ms",
                    self.store_timeout.as_millis()
                )));
                None
            }
        };

        let decision = scanned.unwrap_or_else(|| {
            debug!(
                domain = host,
                default_handle = %policy.default_handle,
                "No match so far, applying global default"
            );
            Decision::global_default(policy.default_handle)
        });

        info!(
            domain = host,
            remote_ip = %session.remote_ip,
            user = session.user().unwrap_or("-"),
            outcome = %decision.outcome,
            tier = %decision.tier,
            sequence = ?decision.matched_sequence,
            "Relay ACL decision"
        );

        results.add(decision.to_record());
        self.metrics.record_decision(&decision);

        Some(decision)
    }

    /// Rule and domain tiers. `None` means the domain is missing or
    /// disabled and the global default applies.
    async fn evaluate_domain(&self, session: &RelaySession) -> StoreResult<Option<Decision>> {
        let host = session.target_host.as_str();

        let Some(domain) = self.store.get_domain(host).await? else {
            info!(domain = host, "Domain not in database");
            return Ok(None);
        };

        if !domain.enabled {
            info!(domain = host, "Domain disabled");
            return Ok(None);
        }

        let rules = self.store.list_rules(&domain.name).await?;
        let user = session.user();
        let remote = session.remote_addr();
        if remote.is_none() {
            warn!(
                remote_ip = %session.remote_ip,
                "Unparseable remote address, address rules cannot match"
            );
        }

        let matched = rules.iter().find(|rule| {
            debug!(
                sequence = rule.sequence,
                user = ?rule.user,
                address = ?rule.address,
                action = %rule.action,
                "Checking rule"
            );
            rule.matches(user, remote)
        });

        let decision = match matched {
            Some(rule) => {
                info!(domain = host, sequence = rule.sequence, action = %rule.action, "Rule matched");
                Decision::rule_match(rule)
            }
            None => {
                info!(
                    domain = host,
                    action = %domain.implicit_action,
                    "No rule matched, using domain implicit action"
                );
                Decision::domain_implicit(domain.implicit_action)
            }
        };

        Ok(Some(decision))
    }
}
