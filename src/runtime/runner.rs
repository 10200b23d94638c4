//! Running work off the main timeline.
//!
//! A task is a closure that produces a [`TimelineEvent`]. Runners deliver that
//! event back through the timeline channel exactly once, so the result is
//! applied on the timeline like any other input.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::util::time::Timer;

use super::event::TimelineEvent;

/// Work posted to a [`TaskRunner`]
pub type Task = Box<dyn FnOnce() -> TimelineEvent + Send + 'static>;

/// Identifier handed back by [`TaskRunner::post`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

pub trait TaskRunner: Send + Sync {
    /// Run `task` and queue its event on the timeline
    fn post(&self, task: Task) -> TaskId;
}

/// Runs tasks on tokio's blocking pool.
///
/// Must be used from inside a tokio runtime.
#[derive(Debug)]
pub struct TokioTaskRunner {
    events: mpsc::UnboundedSender<TimelineEvent>,
    next_id: AtomicU64,
}

impl TokioTaskRunner {
    pub fn new(events: mpsc::UnboundedSender<TimelineEvent>) -> Self {
        Self {
            events,
            next_id: AtomicU64::new(1),
        }
    }
}

impl TaskRunner for TokioTaskRunner {
    fn post(&self, task: Task) -> TaskId {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let events = self.events.clone();

        // Searches are CPU bound; keep them off the async workers
        tokio::task::spawn_blocking(move || {
            let timer = Timer::new();
            let event = task();
            trace!(
                task = %id,
                kind = event.kind(),
                elapsed_us = timer.elapsed_micros(),
                "Background task finished"
            );
            if events.send(event).is_err() {
                debug!(task = %id, "Timeline gone, dropping task result");
            }
        });

        id
    }
}

/// Runs tasks immediately on the calling thread.
///
/// The event still goes through the channel, so it is applied after the
/// event currently being handled.
#[derive(Debug)]
pub struct InlineTaskRunner {
    events: mpsc::UnboundedSender<TimelineEvent>,
    next_id: AtomicU64,
}

impl InlineTaskRunner {
    pub fn new(events: mpsc::UnboundedSender<TimelineEvent>) -> Self {
        Self {
            events,
            next_id: AtomicU64::new(1),
        }
    }
}

impl TaskRunner for InlineTaskRunner {
    fn post(&self, task: Task) -> TaskId {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if self.events.send(task()).is_err() {
            debug!(task = %id, "Timeline gone, dropping task result");
        }
        id
    }
}
