//! Contains common, primitive types shared by every part of the combo engine.
//!
//! This module defines the signal identifier, the millisecond time types, the
//! registration key for combos, and the reference counter used by the two
//! registries of the `InputBuffer`. Using distinct types improves type safety
//! and code clarity.

use serde::{Deserialize, Serialize};
use slotmap::new_key_type;
use std::fmt;

new_key_type! {
    /// Uniquely and safely identifies a registered combo within an `InputBuffer`.
    ///
    /// The key is handed out on first registration and stays valid until the
    /// combo's reference count drops to zero. It is never reused for another
    /// combo while the old one is alive, preventing stale ID bugs.
    pub struct ComboId;
}

/// Milliseconds since an arbitrary, per-engine epoch. Never decreases.
pub type TimeStamp = u64;

/// Signed milliseconds. See [`DURATION_MIN`] and [`DURATION_MAX`].
pub type DurationMs = i64;

/// Sentinel for an unbounded lower delay.
pub const DURATION_MIN: DurationMs = DurationMs::MIN;

/// Sentinel for an unbounded upper delay.
pub const DURATION_MAX: DurationMs = DurationMs::MAX;

/// Returns the signed delay from `earlier` to `later`, saturating at the sentinels.
pub fn elapsed(earlier: TimeStamp, later: TimeStamp) -> DurationMs {
    let delta = i128::from(later) - i128::from(earlier);
    delta.clamp(i128::from(DURATION_MIN), i128::from(DURATION_MAX)) as DurationMs
}

/// An interned, named event.
///
/// A `Signal` is a lightweight identifier handed out by a
/// [`SignalRegistry`](crate::signal::SignalRegistry). The registry owns the
/// mapping back to the human-readable name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signal(pub u32);

impl Signal {
    /// The reserved "no signal" value.
    pub const INVALID: Signal = Signal(u32::MAX);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "#{}", self.0)
        } else {
            f.write_str("#invalid")
        }
    }
}

/// The outcome of moving a [`RefCount`] by one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The count went from 0 to 1.
    Activated,
    /// The count went from 1 to 0.
    Deactivated,
    /// The count moved without crossing zero.
    Unchanged,
}

/// A reference counter whose zero crossings are reported to the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefCount(u32);

impl RefCount {
    pub fn get(self) -> u32 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn increment(&mut self) -> Transition {
        self.0 = self.0.saturating_add(1);
        if self.0 == 1 {
            Transition::Activated
        } else {
            Transition::Unchanged
        }
    }

    /// Decrements the count. Decrementing a zero count is a no-op.
    pub fn decrement(&mut self) -> Transition {
        match self.0 {
            0 => Transition::Unchanged,
            1 => {
                self.0 = 0;
                Transition::Deactivated
            }
            _ => {
                self.0 -= 1;
                Transition::Unchanged
            }
        }
    }
}
