//! Defines all configuration structures for the combo engine.
//!
//! These structs are designed to be deserialized from a configuration file
//! (e.g., a TOML file) using `serde`, optionally overridden by `SIGCOMBO__*`
//! environment variables. This allows the tick speed and the matching
//! tolerances to be tuned externally from the application code.

use crate::common::DurationMs;
use crate::error::ComboResult;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Prefix of the environment variables read by [`ComboEngineConfig::load`].
pub const ENV_PREFIX: &str = "SIGCOMBO";

/// The top-level configuration for the `ComboEngine`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComboEngineConfig {
    /// The tick speed of the engine clock.
    pub resolution: ClockResolution,

    /// Matching tolerances for the input buffer.
    pub input: InputConfig,
}

/// Defines the operational speed of the engine clock.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockResolution {
    /// ~60 ticks per second. Suitable for controller input.
    #[default]
    High,
    /// ~30 ticks per second.
    Medium,
    /// ~1 tick per second. Suitable for slow, mission-like triggers.
    Low,
    /// A user-defined speed in ticks per second.
    Custom { ticks_per_second: u64 },
}

impl ClockResolution {
    /// The wall-clock period between two ticks.
    pub fn tick_period(&self) -> Duration {
        let ticks_per_second = match self {
            ClockResolution::High => 60,
            ClockResolution::Medium => 30,
            ClockResolution::Low => 1,
            ClockResolution::Custom { ticks_per_second } => (*ticks_per_second).max(1),
        };
        Duration::from_micros(1_000_000 / ticks_per_second)
    }
}

/// Time tolerances used when matching combos against the signal window.
///
/// All values are milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// How long a signal stays in the window. Non-positive: entries from a
    /// previous tick always expire on the next update.
    pub input_life_duration: DurationMs,

    /// Max elapsed time between two consecutive steps of a combo.
    /// Non-positive: no two steps are ever within budget.
    pub max_input_interval: DurationMs,

    /// Max spread (exclusive) of the entries matched by the children of an
    /// `And` action. Non-positive: an `And` with consuming children never matches.
    pub and_window: DurationMs,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            input_life_duration: 1000,
            max_input_interval: 100,
            and_window: 25,
        }
    }
}

impl InputConfig {
    /// Returns `true` if `gap` between two consecutive combo steps is within budget.
    pub fn within_pacing_budget(&self, gap: DurationMs) -> bool {
        self.max_input_interval > 0 && gap <= self.max_input_interval
    }

    /// Returns `true` if matched entries spread over `spread` satisfy an `And`.
    pub fn within_and_window(&self, spread: DurationMs) -> bool {
        spread < self.and_window
    }

    /// Logs the documented behavior of degenerate values.
    pub fn warn_degenerate(&self) {
        if self.input_life_duration <= 0 {
            warn!(
                input_life_duration = self.input_life_duration,
                "Non-positive input life duration: every buffered signal expires on the next update."
            );
        }
        if self.max_input_interval <= 0 {
            warn!(
                max_input_interval = self.max_input_interval,
                "Non-positive max input interval: combos with more than one consuming step never match."
            );
        }
        if self.and_window <= 0 {
            warn!(
                and_window = self.and_window,
                "Non-positive AND window: AND actions with consuming children never match."
            );
        }
    }
}

impl ComboEngineConfig {
    /// Loads the configuration from an optional TOML file, then applies
    /// environment overrides such as `SIGCOMBO__INPUT__AND_WINDOW=40`.
    ///
    /// Missing keys fall back to their defaults.
    pub fn load(path: Option<&Path>) -> ComboResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            debug!("Loading combo engine configuration from {}", path.display());
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let loaded: ComboEngineConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        loaded.input.warn_degenerate();
        Ok(loaded)
    }
}
