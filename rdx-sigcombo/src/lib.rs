//! # Sigcombo
//!
//! A tick-driven recognizer for timed combinations of signals.
//!
//! Sigcombo watches a stream of named signals (button presses, game events,
//! mission objectives) and fires an output signal whenever a registered combo
//! is recognized in the recent history, under timing constraints.
//!
//! ## Core Concepts
//!
//! - **Signal**: an interned name, handed out by a `SignalRegistry`.
//! - **Action**: a predicate tree over the signal window: a single signal,
//!   `And`/`Or` of sub-actions, a delay check (`Meta`), or any entry.
//! - **ActionCombo**: an ordered list of actions that emits one signal when
//!   its steps match in order, each within the pacing budget of the previous.
//! - **InputBuffer**: batches incoming signals, keeps the time-bounded window,
//!   and evaluates every registered combo on each tick. Registrations are
//!   reference counted, and so is the interest in each input signal.
//! - **ComboEngine**: drives one `InputBuffer` from a tokio clock, taking
//!   commands through an `EngineHandle` and broadcasting what fired.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use sigcombo::prelude::*;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let (engine, handle) = ComboEngine::new(ComboEngineConfig::default());
//!
//!     let mut combos = handle.subscribe_combo_events();
//!     tokio::spawn(async move {
//!         while let Ok(event) = combos.recv().await {
//!             println!("Combo fired: {}", event.name);
//!         }
//!     });
//!
//!     let engine_task = tokio::spawn(engine.run());
//!     handle
//!         .register(json!({"sequence": ["down", "forward", "punch"], "signal": "hadouken"}))
//!         .await?;
//!     for input in ["down", "forward", "punch"] {
//!         handle.fire(input).await?;
//!     }
//!
//!     handle.shutdown().await?;
//!     engine_task.await??;
//!     Ok(())
//! }
//! ```

pub const ENGINE_NAME: &str = "Sigcombo Engine";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Declare all the modules in the crate.
pub mod common;
pub mod components;
pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod events;
pub mod signal;
pub mod time;

/// A prelude module for easy importing of the most common Sigcombo types.
pub mod prelude {
    pub use crate::common::{ComboId, DurationMs, Signal, TimeStamp};
    pub use crate::components::action::Action;
    pub use crate::components::buffer::{BufferState, InputBuffer};
    pub use crate::components::combo::{ActionCombo, EvaluationPolicy};
    pub use crate::config::{ClockResolution, ComboEngineConfig, InputConfig};
    pub use crate::document::{export_combo, parse_combo, parse_combo_str};
    pub use crate::engine::{ComboEngine, EngineHandle};
    pub use crate::error::{ComboError, ComboResult};
    pub use crate::events::{ComboEvent, SystemEvent};
    pub use crate::signal::{SignalManager, SignalRegistry};
    pub use crate::time::TickEvent;
}
