//! Timing helpers for diagnostics

use std::time::{Duration, Instant};

/// Milliseconds of a duration as logged in structured fields
pub fn as_millis_u64(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// A simple timer for measuring durations
#[derive(Debug, Clone)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        as_millis_u64(self.start.elapsed())
    }

    pub fn elapsed_micros(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_micros()).unwrap_or(u64::MAX)
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
