//! Observability metrics for the runtime control plane.
//!
//! ## Metrics Exported
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `ftl_schema_events_total` | Counter | `kind` | Schema events applied to a view |
//! | `ftl_route_table_size` | Gauge | - | Modules with a live endpoint |
//! | `ftl_verb_calls_total` | Counter | `module`, `outcome` | Verb calls through the router |
//! | `ftl_verb_call_duration_seconds` | Histogram | `module` | Verb call latency |
//! | `ftl_cron_jobs_total` | Counter | `outcome` | Cron firings by outcome |
//! | `ftl_cron_queue_depth` | Gauge | - | Scheduled cron jobs |
//! | `ftl_leases_total` | Counter | `result` | Lease acquire/renew outcomes |
//! | `ftl_config_syncs_total` | Counter | `provider`, `result` | Async provider syncs |
//!
//! Recording goes through the `metrics` facade. Without an installed recorder
//! every call is a no-op, so tests need no setup.

use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: Schema events applied to a view.
    pub const SCHEMA_EVENTS_TOTAL: &str = "ftl_schema_events_total";
    /// Gauge: Modules with a live endpoint.
    pub const ROUTE_TABLE_SIZE: &str = "ftl_route_table_size";
    /// Counter: Verb calls through the router.
    pub const VERB_CALLS_TOTAL: &str = "ftl_verb_calls_total";
    /// Histogram: Verb call latency in seconds.
    pub const VERB_CALL_DURATION_SECONDS: &str = "ftl_verb_call_duration_seconds";
    /// Counter: Cron firings by outcome.
    pub const CRON_JOBS_TOTAL: &str = "ftl_cron_jobs_total";
    /// Gauge: Scheduled cron jobs.
    pub const CRON_QUEUE_DEPTH: &str = "ftl_cron_queue_depth";
    /// Counter: Lease acquire/renew outcomes.
    pub const LEASES_TOTAL: &str = "ftl_leases_total";
    /// Counter: Async config provider syncs.
    pub const CONFIG_SYNCS_TOTAL: &str = "ftl_config_syncs_total";
}

/// Label keys used across metrics.
pub mod labels {
    /// Schema event kind (upsert, remove).
    pub const KIND: &str = "kind";
    /// Module name.
    pub const MODULE: &str = "module";
    /// Call outcome (ok, verb_error, failed, no_route).
    pub const OUTCOME: &str = "outcome";
    /// Result (granted, denied, success, failure).
    pub const RESULT: &str = "result";
    /// Config provider key.
    pub const PROVIDER: &str = "provider";
}

/// High-level interface for recording runtime metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeMetrics;

impl RuntimeMetrics {
    /// Creates a new metrics recorder.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Records a schema event applied to a view.
    pub fn record_schema_event(&self, kind: &str) {
        counter!(names::SCHEMA_EVENTS_TOTAL, labels::KIND => kind.to_string()).increment(1);
    }

    /// Sets the number of routable modules.
    #[allow(clippy::cast_precision_loss)]
    pub fn set_route_table_size(&self, size: usize) {
        gauge!(names::ROUTE_TABLE_SIZE).set(size as f64);
    }

    /// Records a verb call and its latency.
    pub fn record_verb_call(&self, module: &str, outcome: &str, duration: Duration) {
        counter!(
            names::VERB_CALLS_TOTAL,
            labels::MODULE => module.to_string(),
            labels::OUTCOME => outcome.to_string(),
        )
        .increment(1);
        histogram!(
            names::VERB_CALL_DURATION_SECONDS,
            labels::MODULE => module.to_string(),
        )
        .record(duration.as_secs_f64());
    }

    /// Records a cron firing.
    pub fn record_cron_job(&self, outcome: &str) {
        counter!(names::CRON_JOBS_TOTAL, labels::OUTCOME => outcome.to_string()).increment(1);
    }

    /// Sets the number of scheduled cron jobs.
    #[allow(clippy::cast_precision_loss)]
    pub fn set_cron_queue_depth(&self, depth: usize) {
        gauge!(names::CRON_QUEUE_DEPTH).set(depth as f64);
    }

    /// Records a lease acquire or renew outcome.
    pub fn record_lease(&self, granted: bool) {
        let result = if granted { "granted" } else { "denied" };
        counter!(names::LEASES_TOTAL, labels::RESULT => result).increment(1);
    }

    /// Records an async provider sync outcome.
    pub fn record_config_sync(&self, provider: &str, success: bool) {
        let result = if success { "success" } else { "failure" };
        counter!(
            names::CONFIG_SYNCS_TOTAL,
            labels::PROVIDER => provider.to_string(),
            labels::RESULT => result,
        )
        .increment(1);
    }
}

/// RAII guard for timing operations.
///
/// Calls `on_drop` with the elapsed duration when dropped.
pub struct TimingGuard<F>
where
    F: FnOnce(Duration),
{
    start: Instant,
    on_drop: Option<F>,
}

impl<F> TimingGuard<F>
where
    F: FnOnce(Duration),
{
    /// Creates a new timing guard.
    pub fn new(on_drop: F) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Some(on_drop),
        }
    }

    /// Returns the elapsed time since the guard was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl<F> Drop for TimingGuard<F>
where
    F: FnOnce(Duration),
{
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f(self.start.elapsed());
        }
    }
}
