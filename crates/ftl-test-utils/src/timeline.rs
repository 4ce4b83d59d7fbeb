//! Timeline sink that keeps events in memory.

use std::sync::{Arc, Mutex};

use ftl_runtime::timeline::{CronScheduledEvent, IngressEvent, TimelineEvent, TimelineSink};

/// Keeps every published event.
#[derive(Debug, Default)]
pub struct MemoryTimeline {
    events: Mutex<Vec<TimelineEvent>>,
}

impl MemoryTimeline {
    /// A shared, empty timeline.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every event so far.
    pub fn events(&self) -> Vec<TimelineEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Ingress events only.
    pub fn ingress(&self) -> Vec<IngressEvent> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                TimelineEvent::Ingress(e) => Some(e),
                TimelineEvent::CronScheduled(_) => None,
            })
            .collect()
    }

    /// Cron scheduling events only.
    pub fn cron_scheduled(&self) -> Vec<CronScheduledEvent> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                TimelineEvent::CronScheduled(e) => Some(e),
                TimelineEvent::Ingress(_) => None,
            })
            .collect()
    }
}

impl TimelineSink for MemoryTimeline {
    fn publish(&self, event: TimelineEvent) {
        self.events.lock().unwrap().push(event);
    }
}
