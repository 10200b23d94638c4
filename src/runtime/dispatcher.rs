//! Delayed delivery of timeline events

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::trace;

use super::event::TimelineEvent;

/// Handle to an event scheduled for later; canceling prevents delivery
#[derive(Debug, Clone, Default)]
pub struct ScheduledEvent {
    canceled: Arc<AtomicBool>,
}

impl ScheduledEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }
}

pub trait Dispatcher: Send + Sync {
    /// Deliver `event` to the timeline after `delay`
    fn schedule(&self, delay: Duration, event: TimelineEvent) -> ScheduledEvent;
}

/// Timer-backed dispatcher; one sleeping task per scheduled event.
///
/// Under a paused tokio clock the delays run in virtual time.
#[derive(Debug, Clone)]
pub struct TokioDispatcher {
    events: mpsc::UnboundedSender<TimelineEvent>,
}

impl TokioDispatcher {
    pub fn new(events: mpsc::UnboundedSender<TimelineEvent>) -> Self {
        Self { events }
    }
}

impl Dispatcher for TokioDispatcher {
    fn schedule(&self, delay: Duration, event: TimelineEvent) -> ScheduledEvent {
        let handle = ScheduledEvent::new();
        let guard = handle.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if guard.is_canceled() {
                trace!(kind = event.kind(), "Scheduled event canceled");
                return;
            }
            // A closed channel means the timeline already stopped
            let _ = events.send(event);
        });

        handle
    }
}
