use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::domain::RelayPolicy;
use crate::observability::MetricsRegistry;

use super::loader::{PolicyError, PolicyLoader};

/// Shortest accepted polling period.
pub const MIN_CHECK_INTERVAL: Duration = Duration::from_millis(10);

/// Read access to the current relay policy.
///
/// Each call to [`PolicyHandle::snapshot`] returns the latest committed
/// policy; callers keep that `Arc` for the whole evaluation so a reload
/// never shows up half-way through.
#[derive(Debug, Clone)]
pub struct PolicyHandle {
    rx: watch::Receiver<Arc<RelayPolicy>>,
}

impl PolicyHandle {
    pub fn new(rx: watch::Receiver<Arc<RelayPolicy>>) -> Self {
        PolicyHandle { rx }
    }

    /// Handle over a policy that never changes.
    pub fn fixed(policy: RelayPolicy) -> Self {
        let (_tx, rx) = watch::channel(Arc::new(policy));
        PolicyHandle { rx }
    }

    pub fn snapshot(&self) -> Arc<RelayPolicy> {
        self.rx.borrow().clone()
    }
}

/// Watch the policy file and broadcast updates.
pub struct PolicyWatcher {
    loader: PolicyLoader,
    check_interval: Duration,
    current: Option<RelayPolicy>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl PolicyWatcher {
    /// Create a new policy watcher. Intervals below
    /// [`MIN_CHECK_INTERVAL`] are raised to it.
    pub fn new(loader: PolicyLoader, check_interval: Duration) -> Self {
        PolicyWatcher {
            loader,
            check_interval: check_interval.max(MIN_CHECK_INTERVAL),
            current: None,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Load the initial policy and create the broadcast channel.
    ///
    /// A policy that fails to load is replaced by the defaults.
    pub fn init(&mut self) -> (watch::Sender<Arc<RelayPolicy>>, PolicyHandle) {
        let initial = match self.loader.load() {
            Ok(policy) => {
                info!(
                    default_handle = %policy.default_handle,
                    db_file = %policy.db_file.display(),
                    "Loaded relay policy"
                );
                policy
            }
            Err(e) => {
                error!("Failed to load initial policy: {}", e);
                RelayPolicy::default()
            }
        };

        self.current = Some(initial.clone());
        let (tx, rx) = watch::channel(Arc::new(initial));
        (tx, PolicyHandle::new(rx))
    }

    /// Start watching for policy changes.
    ///
    /// Returns a handle observing the latest policy and the polling task.
    pub fn start(mut self) -> (PolicyHandle, tokio::task::JoinHandle<()>) {
        let (tx, handle) = self.init();

        let task = tokio::spawn(async move {
            let mut interval = interval(self.check_interval);

            loop {
                interval.tick().await;

                match self.refresh(&tx) {
                    Ok(true) => info!("Relay policy reloaded"),
                    Ok(false) => {} // No changes
                    Err(e) => warn!("Error checking for policy updates: {}", e),
                }
            }
        });

        (handle, task)
    }

    /// Reload the policy once and broadcast it if it changed.
    pub fn refresh(&mut self, tx: &watch::Sender<Arc<RelayPolicy>>) -> Result<bool, PolicyError> {
        let policy = match self.loader.load() {
            Ok(policy) => policy,
            Err(e) => {
                self.record_reload(false);
                return Err(e);
            }
        };

        if self.current.as_ref() == Some(&policy) {
            return Ok(false);
        }

        info!(
            default_handle = %policy.default_handle,
            db_file = %policy.db_file.display(),
            "Relay policy changed"
        );

        self.current = Some(policy.clone());
        let _ = tx.send(Arc::new(policy));
        self.record_reload(true);

        Ok(true)
    }

    fn record_reload(&self, success: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.record_policy_reload(success);
        }
    }
}
