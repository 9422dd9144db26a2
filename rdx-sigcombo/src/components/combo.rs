//! Ordered, multi-step combos.
//!
//! An [`ActionCombo`] walks its actions in declared order over the signal
//! window, each step picking up where the previous one stopped, and fails as
//! soon as two consecutive steps are further apart than the pacing budget.

use crate::common::{elapsed, DurationMs, Signal, TimeStamp};
use crate::components::action::{Action, ResolveContext};
use crate::components::window::SignalWindow;
use crate::config::InputConfig;
use crate::error::{ComboError, ComboResult};
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

/// How a combo's raw matches are turned into emissions, tick after tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum EvaluationPolicy {
    /// Emit on every fresh match.
    #[default]
    Always,
    /// Emit only if the previous tick did not match too.
    Flip,
    /// Emit only if the previous tick did not match, or if more than
    /// `duration` ms passed since the last tick that matched.
    Recover { duration: DurationMs },
}

/// Per-registration memory of a combo's policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PolicyState {
    matched_last_tick: bool,
    last_match: Option<TimeStamp>,
}

impl PolicyState {
    /// Records this tick's outcome and returns whether it should be emitted.
    pub fn admit(&mut self, policy: EvaluationPolicy, matched: bool, now: TimeStamp) -> bool {
        let emit = matched
            && match policy {
                EvaluationPolicy::Always => true,
                EvaluationPolicy::Flip => !self.matched_last_tick,
                EvaluationPolicy::Recover { duration } => {
                    !self.matched_last_tick
                        || self
                            .last_match
                            .map_or(true, |last| elapsed(last, now) > duration)
                }
            };
        if matched {
            self.last_match = Some(now);
        }
        self.matched_last_tick = matched;
        emit
    }

    pub fn matched_last_tick(&self) -> bool {
        self.matched_last_tick
    }
}

/// Where in the window a combo matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComboMatch {
    /// Absolute index the successful attempt started from.
    pub start: usize,
    /// Cursor after the last step: every entry before it is spent.
    pub end: usize,
    /// Timestamp of the first consumed entry, if any step consumed one.
    pub first_timestamp: Option<TimeStamp>,
    /// Timestamp of the last consumed entry, if any step consumed one.
    pub last_timestamp: Option<TimeStamp>,
}

/// An ordered list of actions recognized as one gesture, emitting one signal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActionCombo {
    signal: Signal,
    actions: Vec<Action>,
    policy: EvaluationPolicy,
}

impl ActionCombo {
    /// An empty combo emitting `signal`.
    pub fn new(signal: Signal) -> Self {
        Self {
            signal,
            actions: Vec::new(),
            policy: EvaluationPolicy::default(),
        }
    }

    /// Appends a step. Returns the combo for chained building.
    pub fn push(mut self, action: impl Into<Action>) -> Self {
        self.actions.push(action.into());
        self
    }

    pub fn with_policy(mut self, policy: EvaluationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The output signal.
    pub fn signal(&self) -> Signal {
        self.signal
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn policy(&self) -> EvaluationPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Structural hash. Equal combos always share it.
    pub fn identity(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }

    /// All signals the steps depend on.
    pub fn signals_involved(&self) -> BTreeSet<Signal> {
        let mut signals = BTreeSet::new();
        for action in &self.actions {
            action.collect_signals(&mut signals);
        }
        signals
    }

    pub fn validate(&self) -> ComboResult<()> {
        if !self.signal.is_valid() {
            return Err(ComboError::InvalidSignal);
        }
        if self.is_empty() {
            return Err(ComboError::EmptyCombo(self.signal));
        }
        self.actions.iter().try_for_each(Action::validate)
    }

    /// Returns `true` if the combo matches anywhere in `window`.
    pub fn evaluate(&self, window: &SignalWindow, now: TimeStamp, config: &InputConfig) -> bool {
        self.find_match(window, window.start(), now, config).is_some()
    }

    /// Finds the first match whose attempt starts at or after `from`.
    ///
    /// Attempts start at every entry, oldest first, so a stale prefix early in
    /// the window does not hide a complete match after it.
    pub fn find_match(
        &self,
        window: &SignalWindow,
        from: usize,
        now: TimeStamp,
        config: &InputConfig,
    ) -> Option<ComboMatch> {
        if self.is_empty() {
            return None;
        }
        let ctx = ResolveContext::new(window, now, config);
        (from.max(window.start())..window.end())
            .find_map(|start| self.attempt(&ctx.starting_at(start)))
    }

    fn attempt(&self, ctx: &ResolveContext<'_>) -> Option<ComboMatch> {
        let mut cursor = ctx.start;
        let mut first_timestamp = None;
        let mut last_timestamp: Option<TimeStamp> = None;

        for action in &self.actions {
            let next = action.resolve(ctx, cursor)?;
            if next > cursor {
                let consumed = ctx.window.get(next - 1)?.timestamp;
                if let Some(previous) = last_timestamp {
                    if !ctx.config.within_pacing_budget(elapsed(previous, consumed)) {
                        return None;
                    }
                }
                first_timestamp.get_or_insert(consumed);
                last_timestamp = Some(consumed);
            }
            cursor = next;
        }

        Some(ComboMatch {
            start: ctx.start,
            end: cursor,
            first_timestamp,
            last_timestamp,
        })
    }
}

impl fmt::Display for ActionCombo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, action) in self.actions.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", action)?;
        }
        write!(f, "] -> {}", self.signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::window::SignalBufferEntry;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    const A: Signal = Signal(0);
    const B: Signal = Signal(1);
    const C: Signal = Signal(2);
    const OUT: Signal = Signal(10);

    fn window(entries: &[(Signal, TimeStamp)]) -> SignalWindow {
        SignalWindow::from_entries(
            entries
                .iter()
                .map(|&(signal, timestamp)| SignalBufferEntry::new(signal, timestamp)),
        )
    }

    fn patient() -> InputConfig {
        InputConfig {
            max_input_interval: 10_000,
            ..InputConfig::default()
        }
    }

    #[test_case(0, 0, true ; "simultaneous")]
    #[test_case(0, 100, true ; "at the budget")]
    #[test_case(0, 101, false ; "over the budget")]
    fn two_steps_respect_pacing(t0: TimeStamp, t1: TimeStamp, expected: bool) {
        let combo = ActionCombo::new(OUT).push(A).push(B);
        let config = InputConfig::default();
        assert_eq!(combo.evaluate(&window(&[(A, t0), (B, t1)]), t1, &config), expected);
        assert!(!combo.evaluate(&window(&[(B, t0), (A, t1)]), t1, &config));
    }

    #[test]
    fn degenerate_budget_never_matches_multi_step() {
        let config = InputConfig {
            max_input_interval: 0,
            ..InputConfig::default()
        };
        let w = window(&[(A, 0), (B, 0)]);
        assert!(!ActionCombo::new(OUT).push(A).push(B).evaluate(&w, 0, &config));
        assert!(ActionCombo::new(OUT).push(A).evaluate(&w, 0, &config));
    }

    #[test]
    fn empty_combo_never_matches() {
        let w = window(&[(A, 0)]);
        let empty = ActionCombo::new(OUT);
        assert!(empty.is_empty());
        assert!(!empty.evaluate(&w, 0, &InputConfig::default()));
        assert_eq!(empty.push(A).len(), 1);
    }

    #[test]
    fn leading_min_delay_has_nothing_to_measure() {
        let w = window(&[(A, 0)]);
        let config = InputConfig::default();
        let min_first = ActionCombo::new(OUT).push(Action::meta().min_delay(500)).push(A);
        let max_first = ActionCombo::new(OUT).push(Action::meta().max_delay(500)).push(A);
        assert!(!min_first.evaluate(&w, 0, &config));
        assert!(!min_first.evaluate(&w, 1000, &config));
        assert!(max_first.evaluate(&w, 0, &config));
    }

    #[test]
    fn min_delay_rejects_early_follow_up() {
        let combo = ActionCombo::new(OUT)
            .push(A)
            .push(Action::meta().min_delay(250))
            .push(B);
        let config = patient();
        let mut w = window(&[(A, 0), (B, 125)]);
        assert!(!combo.evaluate(&w, 125, &config));

        // the early B is still in the way
        w.push(SignalBufferEntry::new(B, 500));
        assert!(!combo.evaluate(&w, 500, &config));
    }

    #[test]
    fn later_attempt_recovers_from_stale_prefix() {
        let combo = ActionCombo::new(OUT)
            .push(A)
            .push(Action::meta().min_delay(250))
            .push(B);
        let w = window(&[(A, 0), (B, 125), (A, 200), (B, 500)]);
        let found = combo.find_match(&w, w.start(), 500, &patient());
        assert_eq!(
            found,
            Some(ComboMatch {
                start: 1,
                end: 4,
                first_timestamp: Some(200),
                last_timestamp: Some(500),
            })
        );
    }

    #[test]
    fn trailing_max_delay_uses_now() {
        let combo = ActionCombo::new(OUT).push(A).push(Action::meta().max_delay(250));
        let w = window(&[(A, 0)]);
        let config = InputConfig::default();
        assert!(combo.evaluate(&w, 0, &config));
        assert!(combo.evaluate(&w, 250, &config));
        assert!(!combo.evaluate(&w, 251, &config));
    }

    #[test]
    fn max_delay_filters_late_input() {
        let combo = ActionCombo::new(OUT)
            .push(A)
            .push(Action::meta().max_delay(250))
            .push(Action::any());
        let config = patient();
        assert!(!combo.evaluate(&window(&[(A, 0), (B, 500)]), 500, &config));
        assert!(combo.evaluate(&window(&[(A, 0), (A, 125)]), 125, &config));
    }

    #[test]
    fn any_steps_count_entries() {
        let config = InputConfig::default();
        let one = ActionCombo::new(OUT).push(Action::any());
        let two = one.clone().push(Action::any());
        let mut w = window(&[(A, 0)]);
        assert!(one.evaluate(&w, 0, &config));
        assert!(!two.evaluate(&w, 0, &config));
        w.push(SignalBufferEntry::new(B, 0));
        assert!(two.evaluate(&w, 0, &config));
    }

    #[test]
    fn find_match_honors_from() {
        let combo = ActionCombo::new(OUT).push(A);
        let w = window(&[(A, 0), (B, 5)]);
        let config = InputConfig::default();
        assert_eq!(combo.find_match(&w, 0, 5, &config).map(|m| m.end), Some(1));
        assert_eq!(combo.find_match(&w, 1, 5, &config), None);
    }

    #[test]
    fn structural_identity() {
        let a = ActionCombo::new(OUT).push(A).push(B);
        let b = ActionCombo::new(OUT).push(A).push(B);
        assert_eq!(a, b);
        assert_eq!(a.identity(), b.identity());
        assert_ne!(a, ActionCombo::new(OUT).push(B).push(A));
        assert_ne!(a, ActionCombo::new(Signal(11)).push(A).push(B));
        assert_ne!(a, b.clone().with_policy(EvaluationPolicy::Flip));
    }

    #[test]
    fn signals_involved_unions_steps() {
        assert!(ActionCombo::new(OUT).signals_involved().is_empty());
        assert_eq!(ActionCombo::new(OUT).push(A).push(B).push(B).signals_involved().len(), 2);
        let combo = ActionCombo::new(OUT)
            .push(A)
            .push(B)
            .push(Action::and().push(C).push(Signal(3)))
            .push(Action::meta().min_delay(5));
        assert_eq!(combo.signals_involved().len(), 4);
        assert_eq!(combo.signals_involved(), combo.signals_involved());
    }

    #[test]
    fn validation() {
        assert!(ActionCombo::new(OUT).push(A).validate().is_ok());
        assert!(matches!(
            ActionCombo::new(OUT).validate(),
            Err(ComboError::EmptyCombo(OUT))
        ));
        assert!(matches!(
            ActionCombo::new(Signal::INVALID).push(A).validate(),
            Err(ComboError::InvalidSignal)
        ));
        assert!(ActionCombo::new(OUT).push(Action::and()).validate().is_err());
    }

    #[test]
    fn flip_policy_emits_on_rising_edge() {
        let mut state = PolicyState::default();
        let policy = EvaluationPolicy::Flip;
        assert!(state.admit(policy, true, 0));
        assert!(!state.admit(policy, true, 16));
        assert!(!state.admit(policy, false, 32));
        assert!(state.admit(policy, true, 48));
    }

    #[test]
    fn recover_policy_waits_out_continuous_matching() {
        let mut state = PolicyState::default();
        let policy = EvaluationPolicy::Recover { duration: 20 };
        assert!(state.admit(policy, true, 0));
        assert!(!state.admit(policy, true, 16));
        assert!(state.admit(policy, true, 40));
        assert!(!state.admit(policy, false, 50));
        assert!(state.admit(policy, true, 51));
    }

    #[test]
    fn always_policy_emits_every_match() {
        let mut state = PolicyState::default();
        assert!(state.admit(EvaluationPolicy::Always, true, 0));
        assert!(state.admit(EvaluationPolicy::Always, true, 1));
        assert!(!state.admit(EvaluationPolicy::Always, false, 2));
        assert!(!state.matched_last_tick());
    }

    #[test]
    fn display() {
        let combo = ActionCombo::new(OUT).push(A).push(Action::any());
        assert_eq!(combo.to_string(), "[#0, *] -> #10");
    }
}
