//! Logging setup and evaluation counters.

pub mod metrics;
pub mod tracing;

pub use metrics::MetricsRegistry;
pub use tracing::init_tracing;
