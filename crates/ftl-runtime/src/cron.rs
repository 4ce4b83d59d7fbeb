//! Cron scheduler: fires verbs carrying `+cron` metadata.
//!
//! The scheduler is a single task. It keeps the jobs of every module and a
//! flat queue ordered by next firing time. Jobs with equal times keep the
//! order they were derived in. Each firing computes the job's next time from
//! the clock, re-sorts the queue and dispatches the call on its own task, so
//! a slow or failing verb never delays the schedule.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ftl_core::{DeploymentKey, Pattern, SharedClock, Shutdown};
use ftl_schema::{Module, Ref, Schema};
use tokio::sync::mpsc;

use crate::fabric::{Event, SchemaView};
use crate::metrics::RuntimeMetrics;
use crate::routing::{CallRequest, CallResponse, VerbClient};
use crate::timeline::{CronScheduledEvent, SharedTimeline, TimelineEvent};

/// Request body sent to cron verbs.
pub const CRON_REQUEST_BODY: &[u8] = b"{}";

/// One scheduled verb.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronJob {
    /// The verb to fire.
    pub verb: Ref,
    /// Deployment of the owning module.
    pub deployment_key: Option<DeploymentKey>,
    /// Parsed schedule.
    pub pattern: Pattern,
    /// Next firing time.
    pub next: DateTime<Utc>,
}

/// Derives the cron jobs of `module`, scheduled after `now`.
///
/// Verbs whose pattern does not parse, or never fires again, are logged and
/// skipped.
#[must_use]
pub fn jobs_for_module(module: &Module, now: DateTime<Utc>) -> Vec<CronJob> {
    let mut jobs = Vec::new();
    for verb in module.verbs() {
        let Some(text) = verb.cron() else {
            continue;
        };
        let pattern = match Pattern::parse(text) {
            Ok(pattern) => pattern,
            Err(err) => {
                tracing::warn!(module = %module.name, verb = %verb.name, error = %err, "skipping cron job");
                continue;
            }
        };
        match pattern.next(now, false) {
            Ok(next) => jobs.push(CronJob {
                verb: Ref::new(&module.name, &verb.name),
                deployment_key: module.deployment_key().cloned(),
                pattern,
                next,
            }),
            Err(err) => {
                tracing::warn!(module = %module.name, verb = %verb.name, error = %err, "cron job never fires");
            }
        }
    }
    jobs
}

/// The cron scheduler state machine.
#[derive(Debug)]
pub struct CronScheduler {
    clock: SharedClock,
    client: Arc<dyn VerbClient>,
    timeline: SharedTimeline,
    jobs: BTreeMap<String, Vec<CronJob>>,
    queue: Vec<CronJob>,
    head: Option<(Ref, DateTime<Utc>)>,
    metrics: RuntimeMetrics,
}

impl CronScheduler {
    /// Creates a scheduler with no jobs.
    #[must_use]
    pub fn new(clock: SharedClock, client: Arc<dyn VerbClient>, timeline: SharedTimeline) -> Self {
        Self {
            clock,
            client,
            timeline,
            jobs: BTreeMap::new(),
            queue: Vec::new(),
            head: None,
            metrics: RuntimeMetrics::new(),
        }
    }

    /// Jobs in firing order.
    #[must_use]
    pub fn queue(&self) -> &[CronJob] {
        &self.queue
    }

    /// Derives jobs for every module of `schema`.
    pub fn load(&mut self, schema: &Schema) {
        let now = self.clock.now();
        self.jobs = schema
            .modules
            .iter()
            .map(|m| (m.name.clone(), jobs_for_module(m, now)))
            .filter(|(_, jobs)| !jobs.is_empty())
            .collect();
        self.rebuild_queue();
    }

    /// Re-derives the jobs of the event's module from `schema`.
    pub fn apply(&mut self, schema: &Schema, event: &Event) {
        let name = event.module_name();
        match schema.module(name) {
            Some(module) => {
                let jobs = jobs_for_module(module, self.clock.now());
                if jobs.is_empty() {
                    self.jobs.remove(name);
                } else {
                    self.jobs.insert(name.to_string(), jobs);
                }
            }
            None => {
                self.jobs.remove(name);
            }
        }
        self.rebuild_queue();
    }

    fn rebuild_queue(&mut self) {
        self.queue = self.jobs.values().flatten().cloned().collect();
        self.queue.sort_by_key(|job| job.next);
        self.metrics.set_cron_queue_depth(self.queue.len());
        let head = self.queue.first().map(|j| (j.verb.clone(), j.next));
        if head != self.head {
            if let Some(job) = self.queue.first() {
                self.timeline
                    .publish(TimelineEvent::CronScheduled(CronScheduledEvent {
                        deployment_key: job.deployment_key.clone(),
                        verb: job.verb.clone(),
                        scheduled_at: job.next,
                        schedule: job.pattern.as_str().to_string(),
                    }));
                tracing::debug!(verb = %job.verb, next = %job.next, "next cron job");
            }
            self.head = head;
        }
    }

    /// Fires the head of the queue if it is due. Returns the fired job.
    pub fn fire_due(&mut self) -> Option<CronJob> {
        let now = self.clock.now();
        let fired = self.queue.first().filter(|j| j.next <= now)?.clone();
        if let Some(jobs) = self.jobs.get_mut(&fired.verb.module) {
            match fired.pattern.next(now, false) {
                Ok(next) => {
                    for job in jobs.iter_mut().filter(|j| j.verb == fired.verb) {
                        job.next = next;
                    }
                }
                Err(err) => {
                    tracing::error!(verb = %fired.verb, error = %err, "cron job has no further firings");
                    jobs.retain(|j| j.verb != fired.verb);
                }
            }
        }
        self.rebuild_queue();
        self.dispatch(fired.clone());
        Some(fired)
    }

    fn dispatch(&self, job: CronJob) {
        let client = Arc::clone(&self.client);
        let metrics = self.metrics;
        tokio::spawn(async move {
            let request = CallRequest::new(job.verb.clone(), CRON_REQUEST_BODY);
            match client.call(request).await {
                Ok(CallResponse::Body(_)) => {
                    tracing::debug!(verb = %job.verb, "cron job fired");
                    metrics.record_cron_job("fired");
                }
                Ok(CallResponse::Error { message }) => {
                    tracing::error!(verb = %job.verb, error = %message, "cron job returned an error");
                    metrics.record_cron_job("failed");
                }
                Err(err) => {
                    tracing::error!(verb = %job.verb, error = %err, "cron job call failed");
                    metrics.record_cron_job("failed");
                }
            }
        });
    }

    /// Runs until the event channel closes or `shutdown` fires.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<Event>,
        view: SchemaView,
        shutdown: Shutdown,
    ) {
        self.load(&view.schema());
        loop {
            let next = self.queue.first().map(|j| j.next);
            let clock = Arc::clone(&self.clock);
            tokio::select! {
                () = shutdown.cancelled() => return,
                event = events.recv() => match event {
                    Some(event) => self.apply(&view.schema(), &event),
                    None => return,
                },
                () = wait_until(&clock, next) => {
                    self.fire_due();
                }
            }
        }
    }
}

async fn wait_until(clock: &SharedClock, at: Option<DateTime<Utc>>) {
    match at {
        Some(at) => clock.sleep_until(at).await,
        None => std::future::pending().await,
    }
}
