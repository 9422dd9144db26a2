//! The engine clock and the tick event it produces.

use crate::common::TimeStamp;
use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// A single beat of the engine clock, broadcast after each evaluated tick.
#[derive(Debug, Clone)]
pub struct TickEvent {
    /// Ticks since the engine started, starting at 1.
    pub tick_count: u64,
    /// Engine time of the tick, in milliseconds since start.
    pub timestamp: TimeStamp,
    /// Wall-clock time of the tick.
    pub wall_time: DateTime<Utc>,
}

/// Measures engine time in milliseconds since the clock was created.
///
/// Built on `tokio::time::Instant`, so a paused test runtime controls it.
#[derive(Debug, Clone, Copy)]
pub struct EngineClock {
    origin: Instant,
}

impl EngineClock {
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn origin(&self) -> Instant {
        self.origin
    }

    /// Milliseconds elapsed since the clock started.
    pub fn now(&self) -> TimeStamp {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(TimeStamp::MAX)
    }
}
