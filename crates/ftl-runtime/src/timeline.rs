//! Timeline events emitted by the control plane.
//!
//! The timeline pipeline itself lives outside the runtime; components only
//! hand events to a [`TimelineSink`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ftl_core::DeploymentKey;
use ftl_schema::Ref;
use serde::Serialize;

/// One ingress request, recorded whatever its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressEvent {
    /// HTTP method.
    pub method: String,
    /// Request path.
    pub path: String,
    /// Matched verb, if any route matched.
    pub verb: Option<Ref>,
    /// When the request arrived.
    pub start_time: DateTime<Utc>,
    /// Time spent serving the request.
    pub duration: Duration,
    /// HTTP status written.
    pub status: u16,
    /// Error text for failed requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The cron scheduler picked a new next job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CronScheduledEvent {
    /// Deployment owning the verb, when the module is deployed.
    pub deployment_key: Option<DeploymentKey>,
    /// The verb to fire.
    pub verb: Ref,
    /// Next firing time.
    pub scheduled_at: DateTime<Utc>,
    /// The cron pattern text.
    pub schedule: String,
}

/// Events accepted by a [`TimelineSink`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TimelineEvent {
    /// An ingress request.
    Ingress(IngressEvent),
    /// A cron job was scheduled.
    CronScheduled(CronScheduledEvent),
}

/// Receives timeline events.
///
/// Publishing must not block the caller.
pub trait TimelineSink: Send + Sync + fmt::Debug {
    /// Hands an event to the timeline.
    fn publish(&self, event: TimelineEvent);
}

/// Shared handle to a sink.
pub type SharedTimeline = Arc<dyn TimelineSink>;

/// A sink that writes events to the trace log at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTimeline;

impl LogTimeline {
    /// Returns a shared handle.
    #[must_use]
    pub fn shared() -> SharedTimeline {
        Arc::new(Self)
    }
}

impl TimelineSink for LogTimeline {
    fn publish(&self, event: TimelineEvent) {
        match &event {
            TimelineEvent::Ingress(e) => tracing::debug!(
                method = %e.method,
                path = %e.path,
                status = e.status,
                duration_ms = e.duration.as_millis(),
                error = e.error.as_deref().unwrap_or(""),
                "ingress"
            ),
            TimelineEvent::CronScheduled(e) => tracing::debug!(
                verb = %e.verb,
                scheduled_at = %e.scheduled_at,
                schedule = %e.schedule,
                "cron scheduled"
            ),
        }
    }
}
