//! Defines all public event types broadcast by the combo engine.
//!
//! Listeners subscribe to these strongly-typed streams through the
//! `EngineHandle`. Ticks themselves are broadcast as [`TickEvent`](crate::time::TickEvent).

use crate::common::{ComboId, Signal, TimeStamp};
use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Events related to the lifecycle and registrations of the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum SystemEvent {
    /// Fired once when the engine's `run` loop begins.
    EngineStarted { timestamp: Instant },
    /// Fired once when the engine's `run` loop is about to exit.
    EngineShutdown,
    /// Fired when a combo gains a registration. `refs` is the new count.
    ComboRegistered {
        id: ComboId,
        signal: Signal,
        refs: u32,
    },
    /// Fired when a combo loses a registration. `refs` is the new count.
    ComboUnregistered { signal: Signal, refs: u32 },
    /// Fired when the buffer starts listening to a signal.
    SignalSubscribed { signal: Signal, name: String },
    /// Fired when the buffer stops listening to a signal.
    SignalUnsubscribed { signal: Signal, name: String },
}

/// Fired when a combo's output signal fires at the end of a tick.
#[derive(Debug, Clone, PartialEq)]
pub struct ComboEvent {
    /// The output signal of the combo.
    pub signal: Signal,
    pub name: String,
    /// The tick that evaluated the combo.
    pub tick: u64,
    /// Engine time of that tick, in milliseconds.
    pub timestamp: TimeStamp,
    pub wall_time: DateTime<Utc>,
}
