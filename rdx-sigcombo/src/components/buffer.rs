//! The runtime driver: batches signals, keeps the window, evaluates combos.
//!
//! An `InputBuffer` is a generic predicate runner over signals. Nothing in it is
//! specific to controller input; any timed sequence of named events can be
//! recognized, e.g. mission objectives.

use crate::common::{ComboId, RefCount, Signal, TimeStamp, Transition};
use crate::components::combo::{ActionCombo, PolicyState};
use crate::components::window::{SignalBufferEntry, SignalWindow};
use crate::config::InputConfig;
use crate::error::{ComboError, ComboResult};
use crate::signal::SignalRegistry;
use slotmap::SlotMap;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// The lifecycle of an [`InputBuffer`]. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    Uninitialized,
    Active,
    Shutdown,
}

impl BufferState {
    fn name(self) -> &'static str {
        match self {
            BufferState::Uninitialized => "uninitialized",
            BufferState::Active => "active",
            BufferState::Shutdown => "shut down",
        }
    }
}

impl fmt::Display for BufferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What changed during a call to [`InputBuffer::register_action_combo`] or
/// [`InputBuffer::unregister_action_combo`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegistrationChange {
    /// The combo's reference count after the call.
    pub refs: u32,
    /// Signals whose interest went 0→1 (newly subscribed upstream).
    pub subscribed: Vec<Signal>,
    /// Signals whose interest went 1→0 (unsubscribed upstream).
    pub unsubscribed: Vec<Signal>,
}

/// The outcome of one [`InputBuffer::update`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TickReport {
    /// Entries dropped from the front of the window.
    pub expired: usize,
    /// Entries merged from the batch.
    pub merged: usize,
    /// Output signals emitted, in evaluation order.
    pub emitted: Vec<Signal>,
}

#[derive(Debug)]
struct ComboEntry {
    combo: Arc<ActionCombo>,
    refs: RefCount,
    /// Absolute window index before which entries are spent for this combo.
    consumed_until: usize,
    policy: PolicyState,
}

/// Buffers signals per tick and emits combo signals when combos match.
pub struct InputBuffer<R> {
    registry: R,
    config: InputConfig,
    state: BufferState,
    batch: Vec<SignalBufferEntry>,
    window: SignalWindow,
    combos: SlotMap<ComboId, ComboEntry>,
    combo_ids: HashMap<Arc<ActionCombo>, ComboId>,
    interest: HashMap<Signal, RefCount>,
}

impl<R: SignalRegistry> InputBuffer<R> {
    /// Creates an uninitialized buffer talking to `registry`.
    pub fn new(config: InputConfig, registry: R) -> Self {
        Self {
            registry,
            config,
            state: BufferState::Uninitialized,
            batch: Vec::new(),
            window: SignalWindow::new(),
            combos: SlotMap::with_key(),
            combo_ids: HashMap::new(),
            interest: HashMap::new(),
        }
    }

    /// Moves the buffer to the active state, starting from empty state.
    pub fn init(&mut self) {
        if self.state != BufferState::Uninitialized {
            warn!("InputBuffer::init() called while {}. Ignored.", self.state);
            return;
        }
        self.batch.clear();
        self.window = SignalWindow::new();
        self.combos.clear();
        self.combo_ids.clear();
        self.interest.clear();
        self.state = BufferState::Active;
        info!(
            input_life_duration = self.config.input_life_duration,
            max_input_interval = self.config.max_input_interval,
            and_window = self.config.and_window,
            "InputBuffer active."
        );
    }

    /// Drops every registration, unsubscribing upstream, and stops the buffer.
    pub fn shutdown(&mut self) {
        if self.state != BufferState::Active {
            warn!("InputBuffer::shutdown() called while {}. Ignored.", self.state);
            return;
        }
        let mut signals: Vec<Signal> = self
            .interest
            .iter()
            .filter(|(_, refs)| !refs.is_zero())
            .map(|(signal, _)| *signal)
            .collect();
        signals.sort();
        for signal in signals {
            self.registry.unsubscribe(signal);
        }
        self.interest.clear();
        self.combos.clear();
        self.combo_ids.clear();
        self.batch.clear();
        self.window = SignalWindow::new();
        self.state = BufferState::Shutdown;
        info!("InputBuffer shut down.");
    }

    /// Loading combo definitions from storage is not supported.
    pub fn load_combos_file(&mut self, path: &Path) -> ComboResult<usize> {
        error!(
            "InputBuffer::load_combos_file({}) is not implemented. No combo loaded.",
            path.display()
        );
        Err(ComboError::Unimplemented("loading combo definitions from storage"))
    }

    /// Receives a raw signal observed at `now`. It joins the window on the next update.
    pub fn on_signal(&mut self, signal: Signal, now: TimeStamp) {
        if self.state != BufferState::Active {
            warn!(%signal, "Signal received while {}. Dropped.", self.state);
            return;
        }
        if !signal.is_valid() {
            error!("Invalid signal received. Dropped.");
            return;
        }
        trace!(%signal, now, "Signal batched.");
        self.batch.push(SignalBufferEntry::new(signal, now));
    }

    /// Runs one tick: expire old entries, merge the batch, evaluate every combo.
    pub fn update(&mut self, now: TimeStamp) -> TickReport {
        let mut report = TickReport::default();
        if self.state != BufferState::Active {
            warn!("InputBuffer::update() called while {}. Skipped.", self.state);
            return report;
        }

        report.expired = if self.config.input_life_duration > 0 {
            let life = self.config.input_life_duration as u64;
            self.window.expire_before(now.saturating_sub(life))
        } else {
            self.window.expire_all()
        };

        report.merged = self.batch.len();
        for entry in self.batch.drain(..) {
            self.window.push(entry);
        }

        for (id, entry) in self.combos.iter_mut() {
            let found = entry
                .combo
                .find_match(&self.window, entry.consumed_until, now, &self.config);
            if let Some(found) = found {
                entry.consumed_until = found.end.max(found.start + 1);
            }
            if entry.policy.admit(entry.combo.policy(), found.is_some(), now) {
                let signal = entry.combo.signal();
                debug!(?id, %signal, combo = %entry.combo, ?found, "Combo matched.");
                self.registry.emit(signal);
                report.emitted.push(signal);
            }
        }

        if report.expired > 0 || report.merged > 0 {
            trace!(
                expired = report.expired,
                merged = report.merged,
                window = self.window.len(),
                "Window updated."
            );
        }
        report
    }

    /// Registers a combo, or adds a reference to a structurally equal one.
    pub fn register_action_combo(&mut self, combo: &ActionCombo) -> ComboResult<RegistrationChange> {
        self.ensure_active("register a combo")?;
        if let Err(e) = combo.validate() {
            error!(%combo, "Rejected combo: {}.", e);
            return Err(e);
        }

        if let Some(&id) = self.combo_ids.get(combo) {
            if let Some(entry) = self.combos.get_mut(id) {
                entry.refs.increment();
                debug!(?id, %combo, refs = entry.refs.get(), "Combo reference added.");
                return Ok(RegistrationChange {
                    refs: entry.refs.get(),
                    ..RegistrationChange::default()
                });
            }
        }

        let mut change = RegistrationChange {
            refs: 1,
            ..RegistrationChange::default()
        };
        for signal in combo.signals_involved() {
            if self.interest.entry(signal).or_default().increment() == Transition::Activated {
                debug!(%signal, "Interest 0 -> 1, subscribing.");
                self.registry.subscribe(signal);
                change.subscribed.push(signal);
            }
        }

        let combo = Arc::new(combo.clone());
        let mut refs = RefCount::default();
        refs.increment();
        let id = self.combos.insert(ComboEntry {
            combo: combo.clone(),
            refs,
            consumed_until: self.window.end(),
            policy: PolicyState::default(),
        });
        info!(?id, %combo, "Combo registered.");
        self.combo_ids.insert(combo, id);
        Ok(change)
    }

    /// Drops a reference to a combo, removing it when no reference is left.
    pub fn unregister_action_combo(&mut self, combo: &ActionCombo) -> ComboResult<RegistrationChange> {
        self.ensure_active("unregister a combo")?;
        let Some(&id) = self.combo_ids.get(combo) else {
            warn!(%combo, "Cannot unregister a combo that is not registered.");
            return Err(ComboError::NotRegistered(combo.signal()));
        };
        let Some(entry) = self.combos.get_mut(id) else {
            self.combo_ids.remove(combo);
            return Err(ComboError::NotRegistered(combo.signal()));
        };

        let mut change = RegistrationChange::default();
        if entry.refs.decrement() != Transition::Deactivated {
            change.refs = entry.refs.get();
            debug!(?id, %combo, refs = change.refs, "Combo reference dropped.");
            return Ok(change);
        }

        for signal in combo.signals_involved() {
            let Some(refs) = self.interest.get_mut(&signal) else {
                continue;
            };
            if refs.decrement() == Transition::Deactivated {
                self.interest.remove(&signal);
                debug!(%signal, "Interest 1 -> 0, unsubscribing.");
                self.registry.unsubscribe(signal);
                change.unsubscribed.push(signal);
            }
        }
        self.combos.remove(id);
        self.combo_ids.remove(combo);
        info!(?id, %combo, "Combo unregistered.");
        Ok(change)
    }

    fn ensure_active(&self, what: &str) -> ComboResult<()> {
        if self.state == BufferState::Active {
            Ok(())
        } else {
            warn!("Cannot {} while the input buffer is {}.", what, self.state);
            Err(ComboError::NotActive(self.state.name()))
        }
    }

    pub fn state(&self) -> BufferState {
        self.state
    }

    pub fn config(&self) -> &InputConfig {
        &self.config
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut R {
        &mut self.registry
    }

    pub fn window(&self) -> &SignalWindow {
        &self.window
    }

    /// Signals received since the last update.
    pub fn batch(&self) -> &[SignalBufferEntry] {
        &self.batch
    }

    /// How many registered combos depend on `signal`.
    pub fn interest(&self, signal: Signal) -> u32 {
        self.interest.get(&signal).map_or(0, |refs| refs.get())
    }

    /// The reference count of a structurally equal registered combo, or 0.
    pub fn combo_refs(&self, combo: &ActionCombo) -> u32 {
        self.combo_ids
            .get(combo)
            .and_then(|id| self.combos.get(*id))
            .map_or(0, |entry| entry.refs.get())
    }

    pub fn combo_id(&self, combo: &ActionCombo) -> Option<ComboId> {
        self.combo_ids.get(combo).copied()
    }

    /// Registered combos with their reference counts.
    pub fn combos(&self) -> impl Iterator<Item = (ComboId, &ActionCombo, u32)> + '_ {
        self.combos
            .iter()
            .map(|(id, entry)| (id, entry.combo.as_ref(), entry.refs.get()))
    }

    /// Signals of interest with their counts, sorted by signal.
    pub fn interests(&self) -> Vec<(Signal, u32)> {
        let mut interests: Vec<_> = self
            .interest
            .iter()
            .map(|(signal, refs)| (*signal, refs.get()))
            .collect();
        interests.sort();
        interests
    }
}

impl<R> fmt::Debug for InputBuffer<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputBuffer")
            .field("state", &self.state)
            .field("config", &self.config)
            .field("batch", &self.batch.len())
            .field("window", &self.window.len())
            .field("combos", &self.combos.len())
            .field("signals", &self.interest.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::action::Action;
    use crate::signal::SignalManager;
    use pretty_assertions::assert_eq;

    fn active_buffer(config: InputConfig) -> InputBuffer<SignalManager> {
        let mut buffer = InputBuffer::new(config, SignalManager::new());
        buffer.init();
        buffer
    }

    fn intern(buffer: &mut InputBuffer<SignalManager>, name: &str) -> Signal {
        buffer.registry_mut().to_signal(name)
    }

    #[test]
    fn lifecycle_moves_forward_only() {
        let mut buffer = InputBuffer::new(InputConfig::default(), SignalManager::new());
        assert_eq!(buffer.state(), BufferState::Uninitialized);
        buffer.on_signal(Signal(0), 0);
        assert!(buffer.batch().is_empty());
        assert_eq!(buffer.update(0), TickReport::default());

        buffer.init();
        assert_eq!(buffer.state(), BufferState::Active);
        buffer.shutdown();
        assert_eq!(buffer.state(), BufferState::Shutdown);
        buffer.init();
        assert_eq!(buffer.state(), BufferState::Shutdown);

        let combo = ActionCombo::new(Signal(1)).push(Signal(0));
        assert!(matches!(
            buffer.register_action_combo(&combo),
            Err(ComboError::NotActive(_))
        ));
    }

    #[test]
    fn ref_counted_registration() {
        let mut buffer = active_buffer(InputConfig::default());
        let a = intern(&mut buffer, "A");
        let b = intern(&mut buffer, "B");
        let out = intern(&mut buffer, "out");
        let combo = ActionCombo::new(out).push(a).push(b);

        let first = buffer.register_action_combo(&combo).unwrap();
        assert_eq!(first.subscribed, vec![a, b]);
        let second = buffer.register_action_combo(&combo.clone()).unwrap();
        assert_eq!(second.refs, 2);
        assert!(second.subscribed.is_empty());
        assert_eq!(buffer.combos().count(), 1);
        assert_eq!(buffer.interest(a), 1);

        let dropped = buffer.unregister_action_combo(&combo).unwrap();
        assert_eq!(dropped.refs, 1);
        assert!(dropped.unsubscribed.is_empty());
        assert!(buffer.registry().is_subscribed(a));
        assert_eq!(buffer.combo_refs(&combo), 1);

        let removed = buffer.unregister_action_combo(&combo).unwrap();
        assert_eq!(removed.unsubscribed, vec![a, b]);
        assert!(!buffer.registry().is_subscribed(a));
        assert!(!buffer.registry().is_subscribed(b));
        assert_eq!(buffer.combo_refs(&combo), 0);
        assert_eq!(buffer.interest(a), 0);
        assert!(matches!(
            buffer.unregister_action_combo(&combo),
            Err(ComboError::NotRegistered(_))
        ));
    }

    #[test]
    fn shared_signals_stay_subscribed_until_last_combo_leaves() {
        let mut buffer = active_buffer(InputConfig::default());
        let a = intern(&mut buffer, "A");
        let b = intern(&mut buffer, "B");
        let c = intern(&mut buffer, "C");
        let ab = ActionCombo::new(intern(&mut buffer, "ab")).push(a).push(b);
        let ac = ActionCombo::new(intern(&mut buffer, "ac")).push(a).push(c);

        buffer.register_action_combo(&ab).unwrap();
        let change = buffer.register_action_combo(&ac).unwrap();
        assert_eq!(change.subscribed, vec![c]);
        assert_eq!(buffer.interest(a), 2);

        let change = buffer.unregister_action_combo(&ab).unwrap();
        assert_eq!(change.unsubscribed, vec![b]);
        assert!(buffer.registry().is_subscribed(a));
        assert_eq!(buffer.interests(), vec![(a, 1), (c, 1)]);
    }

    #[test]
    fn invalid_combo_is_rejected_without_side_effects() {
        let mut buffer = active_buffer(InputConfig::default());
        let a = intern(&mut buffer, "A");
        let out = intern(&mut buffer, "out");
        let combo = ActionCombo::new(out).push(a).push(Action::or());
        assert!(buffer.register_action_combo(&combo).is_err());
        assert_eq!(buffer.interest(a), 0);
        assert!(!buffer.registry().is_subscribed(a));
        assert_eq!(buffer.combos().count(), 0);
    }

    #[test]
    fn matched_entries_fire_once() {
        let mut buffer = active_buffer(InputConfig::default());
        let a = intern(&mut buffer, "A");
        let b = intern(&mut buffer, "B");
        let out = intern(&mut buffer, "out");
        buffer
            .register_action_combo(&ActionCombo::new(out).push(a).push(b))
            .unwrap();

        buffer.on_signal(a, 100);
        buffer.on_signal(b, 150);
        assert_eq!(buffer.update(160).emitted, vec![out]);
        assert_eq!(buffer.registry_mut().fire_pending(), vec![out]);
        assert!(buffer.update(176).emitted.is_empty());

        buffer.on_signal(a, 200);
        buffer.on_signal(b, 210);
        assert_eq!(buffer.update(220).emitted, vec![out]);
    }

    #[test]
    fn expired_entries_cannot_complete_a_match() {
        let mut buffer = active_buffer(InputConfig {
            max_input_interval: 5_000,
            ..InputConfig::default()
        });
        let a = intern(&mut buffer, "A");
        let b = intern(&mut buffer, "B");
        let out = intern(&mut buffer, "out");
        buffer
            .register_action_combo(&ActionCombo::new(out).push(a).push(b))
            .unwrap();

        buffer.on_signal(a, 0);
        assert!(buffer.update(0).emitted.is_empty());
        assert_eq!(buffer.window().len(), 1);

        buffer.on_signal(b, 1500);
        let report = buffer.update(1500);
        assert_eq!(report.expired, 1);
        assert_eq!(report.merged, 1);
        assert!(report.emitted.is_empty());
        assert_eq!(buffer.window().len(), 1);
    }

    #[test]
    fn entries_at_the_life_boundary_survive() {
        let mut buffer = active_buffer(InputConfig::default());
        let a = intern(&mut buffer, "A");
        buffer.on_signal(a, 0);
        buffer.update(0);
        assert_eq!(buffer.update(1000).expired, 0);
        assert_eq!(buffer.update(1001).expired, 1);
    }

    #[test]
    fn non_positive_life_expires_every_previous_tick() {
        let mut buffer = active_buffer(InputConfig {
            input_life_duration: 0,
            ..InputConfig::default()
        });
        let a = intern(&mut buffer, "A");
        let b = intern(&mut buffer, "B");
        let out = intern(&mut buffer, "out");
        buffer
            .register_action_combo(&ActionCombo::new(out).push(a).push(b))
            .unwrap();

        buffer.on_signal(a, 10);
        buffer.update(10);
        buffer.on_signal(b, 12);
        let report = buffer.update(12);
        assert_eq!(report.expired, 1);
        assert!(report.emitted.is_empty());

        buffer.on_signal(a, 20);
        buffer.on_signal(b, 21);
        assert_eq!(buffer.update(21).emitted, vec![out]);
    }

    #[test]
    fn new_registration_ignores_earlier_input() {
        let mut buffer = active_buffer(InputConfig::default());
        let a = intern(&mut buffer, "A");
        let out = intern(&mut buffer, "out");
        buffer.on_signal(a, 0);
        buffer.update(0);

        buffer
            .register_action_combo(&ActionCombo::new(out).push(a))
            .unwrap();
        assert!(buffer.update(10).emitted.is_empty());
        buffer.on_signal(a, 20);
        assert_eq!(buffer.update(20).emitted, vec![out]);
    }

    #[test]
    fn hold_combo_fires_once_delay_has_passed() {
        let mut buffer = active_buffer(InputConfig::default());
        let a = intern(&mut buffer, "A");
        let out = intern(&mut buffer, "hold");
        buffer
            .register_action_combo(
                &ActionCombo::new(out)
                    .push(a)
                    .push(Action::meta().min_delay(250)),
            )
            .unwrap();

        buffer.on_signal(a, 0);
        assert!(buffer.update(0).emitted.is_empty());
        assert!(buffer.update(200).emitted.is_empty());
        assert_eq!(buffer.update(260).emitted, vec![out]);
        assert!(buffer.update(300).emitted.is_empty());
    }

    #[test]
    fn shutdown_unsubscribes_everything() {
        let mut buffer = active_buffer(InputConfig::default());
        let a = intern(&mut buffer, "A");
        let out = intern(&mut buffer, "out");
        let combo = ActionCombo::new(out).push(a);
        buffer.register_action_combo(&combo).unwrap();
        buffer.register_action_combo(&combo).unwrap();

        buffer.shutdown();
        assert!(!buffer.registry().is_subscribed(a));
        assert_eq!(buffer.combos().count(), 0);
        assert_eq!(buffer.interest(a), 0);
    }

    #[test]
    fn loading_combos_from_storage_fails_loudly() {
        let mut buffer = active_buffer(InputConfig::default());
        assert!(matches!(
            buffer.load_combos_file(Path::new("combos.json")),
            Err(ComboError::Unimplemented(_))
        ));
    }

    #[test]
    fn invalid_signal_is_dropped() {
        let mut buffer = active_buffer(InputConfig::default());
        buffer.on_signal(Signal::INVALID, 0);
        assert!(buffer.batch().is_empty());
    }
}
