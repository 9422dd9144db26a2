//! The signal registry seam.
//!
//! The combo engine never owns the naming of signals. It talks to whatever
//! registry the host provides through [`SignalRegistry`]: names are interned
//! to [`Signal`] ids, combo outputs are emitted (and fired later, at the end of
//! the tick), and interest in raw signals is expressed through
//! subscribe/unsubscribe calls.
//!
//! [`SignalManager`] is the in-process registry used by the engine driver, the
//! shell and the tests.

use crate::common::Signal;
use crate::error::{ComboError, ComboResult};
use std::collections::{BTreeSet, HashMap};
use tracing::{error, trace};

/// Prefix reserved for keywords of the combo document grammar (`$and`, `$*`...).
pub const RESERVED_PREFIX: char = '$';

/// The registry services consumed by the combo engine.
pub trait SignalRegistry {
    /// Interns `name`, returning the same id for the same name on every call.
    ///
    /// Malformed names are logged and yield [`Signal::INVALID`].
    fn to_signal(&mut self, name: &str) -> Signal;

    /// Reverse lookup of an interned signal.
    fn from_signal(&self, signal: Signal) -> Option<String>;

    /// Queues `signal` to fire at the end of the current tick.
    fn emit(&mut self, signal: Signal);

    /// Starts delivering `signal` to the input buffer.
    fn subscribe(&mut self, signal: Signal);

    /// Stops delivering `signal` to the input buffer.
    fn unsubscribe(&mut self, signal: Signal);
}

/// Checks that `name` can be interned.
pub fn validate_signal_name(name: &str) -> ComboResult<()> {
    let malformed = name.is_empty()
        || name.starts_with(RESERVED_PREFIX)
        || name.chars().any(char::is_whitespace);
    if malformed {
        Err(ComboError::MalformedSignalName(name.to_string()))
    } else {
        Ok(())
    }
}

/// An in-process signal registry with deferred firing.
#[derive(Debug, Default)]
pub struct SignalManager {
    names: Vec<String>,
    ids: HashMap<String, Signal>,
    pending: Vec<Signal>,
    subscribed: BTreeSet<Signal>,
}

impl SignalManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up an already interned name without interning it.
    pub fn lookup(&self, name: &str) -> Option<Signal> {
        self.ids.get(name).copied()
    }

    /// Returns `true` if the input buffer currently wants `signal` delivered.
    pub fn is_subscribed(&self, signal: Signal) -> bool {
        self.subscribed.contains(&signal)
    }

    /// All signals currently subscribed, in id order.
    pub fn subscriptions(&self) -> impl Iterator<Item = Signal> + '_ {
        self.subscribed.iter().copied()
    }

    /// Signals emitted during this tick that have not fired yet.
    pub fn pending(&self) -> &[Signal] {
        &self.pending
    }

    /// Fires every pending emission, returning them in emission order.
    ///
    /// Called once at the end of a tick.
    pub fn fire_pending(&mut self) -> Vec<Signal> {
        std::mem::take(&mut self.pending)
    }

    /// Returns the name of `signal`, or its numeric form if unknown.
    pub fn display_name(&self, signal: Signal) -> String {
        self.from_signal(signal)
            .unwrap_or_else(|| signal.to_string())
    }
}

impl SignalRegistry for SignalManager {
    fn to_signal(&mut self, name: &str) -> Signal {
        if let Some(signal) = self.ids.get(name) {
            return *signal;
        }
        if let Err(e) = validate_signal_name(name) {
            error!("{}. Signal not interned.", e);
            return Signal::INVALID;
        }
        let signal = Signal(self.names.len() as u32);
        self.names.push(name.to_string());
        self.ids.insert(name.to_string(), signal);
        trace!(%signal, name, "Interned signal.");
        signal
    }

    fn from_signal(&self, signal: Signal) -> Option<String> {
        self.names.get(signal.0 as usize).cloned()
    }

    fn emit(&mut self, signal: Signal) {
        if signal.is_valid() {
            self.pending.push(signal);
        } else {
            error!("Refusing to emit the invalid signal.");
        }
    }

    fn subscribe(&mut self, signal: Signal) {
        self.subscribed.insert(signal);
    }

    fn unsubscribe(&mut self, signal: Signal) {
        self.subscribed.remove(&signal);
    }
}
