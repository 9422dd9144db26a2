//! The predicate tree a combo is made of.
//!
//! An [`Action`] tests a run of entries in the [`SignalWindow`]. Resolution is
//! pure: it reads the window from a cursor and reports where the cursor would
//! be after consuming what the action matched.

use crate::common::{elapsed, DurationMs, Signal, TimeStamp, DURATION_MAX, DURATION_MIN};
use crate::components::window::SignalWindow;
use crate::config::InputConfig;
use crate::error::{ComboError, ComboResult};
use std::collections::BTreeSet;
use std::fmt;
use tracing::error;

/// The part of the window an action resolves against.
///
/// `start` is where the current match attempt began; entries before it belong
/// to earlier attempts and are invisible to `Meta`. The end is always the end
/// of the window.
#[derive(Debug, Clone, Copy)]
pub struct ResolveContext<'a> {
    pub window: &'a SignalWindow,
    pub start: usize,
    pub now: TimeStamp,
    pub config: &'a InputConfig,
}

impl<'a> ResolveContext<'a> {
    /// A context spanning the whole window.
    pub fn new(window: &'a SignalWindow, now: TimeStamp, config: &'a InputConfig) -> Self {
        Self {
            window,
            start: window.start(),
            now,
            config,
        }
    }

    /// The same context with the attempt starting at `start`.
    pub fn starting_at(self, start: usize) -> Self {
        Self { start, ..self }
    }

    pub fn end(&self) -> usize {
        self.window.end()
    }

    fn timestamp(&self, index: usize) -> Option<TimeStamp> {
        self.window.get(index).map(|entry| entry.timestamp)
    }
}

/// One node of the predicate tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Action {
    /// Matches the first entry carrying this signal.
    Simple(Signal),
    /// Matches when every child matches from the same cursor, and the matched
    /// entries are close enough in time.
    And(Vec<Action>),
    /// Matches when any child matches, trying them in order.
    Or(Vec<Action>),
    /// Matches on the delay around the cursor without consuming anything.
    Meta {
        min_delay: DurationMs,
        max_delay: DurationMs,
    },
    /// Matches any single entry.
    Any,
}

impl From<Signal> for Action {
    fn from(signal: Signal) -> Self {
        Action::Simple(signal)
    }
}

impl Action {
    pub fn simple(signal: Signal) -> Self {
        Action::Simple(signal)
    }

    /// An empty `And`, to be filled with [`push`](Self::push).
    pub fn and() -> Self {
        Action::And(Vec::new())
    }

    /// An empty `Or`, to be filled with [`push`](Self::push).
    pub fn or() -> Self {
        Action::Or(Vec::new())
    }

    /// A `Meta` with both bounds open.
    pub fn meta() -> Self {
        Action::Meta {
            min_delay: DURATION_MIN,
            max_delay: DURATION_MAX,
        }
    }

    pub fn any() -> Self {
        Action::Any
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Action::Simple(_) => "simple",
            Action::And(_) => "and",
            Action::Or(_) => "or",
            Action::Meta { .. } => "meta",
            Action::Any => "any",
        }
    }

    /// Returns `true` for actions that hold children.
    pub fn is_composite(&self) -> bool {
        matches!(self, Action::And(_) | Action::Or(_))
    }

    /// Appends a child to an `And`/`Or`.
    pub fn try_push(&mut self, child: impl Into<Action>) -> ComboResult<&mut Self> {
        match self {
            Action::And(children) | Action::Or(children) => children.push(child.into()),
            _ => return Err(ComboError::NotComposite(self.to_string())),
        }
        Ok(self)
    }

    /// Builder form of [`try_push`](Self::try_push). On a non-composite action
    /// the error is logged and the action is returned unchanged.
    pub fn push(mut self, child: impl Into<Action>) -> Self {
        if let Err(e) = self.try_push(child) {
            error!("{}. Skipped.", e);
        }
        self
    }

    /// Sets the lower delay bound of a `Meta`. Logged and ignored on other actions.
    pub fn min_delay(mut self, delay: DurationMs) -> Self {
        match &mut self {
            Action::Meta { min_delay, .. } => *min_delay = delay,
            other => error!("{}. Skipped.", ComboError::NotMeta(other.to_string())),
        }
        self
    }

    /// Sets the upper delay bound of a `Meta`. Logged and ignored on other actions.
    pub fn max_delay(mut self, delay: DurationMs) -> Self {
        match &mut self {
            Action::Meta { max_delay, .. } => *max_delay = delay,
            other => error!("{}. Skipped.", ComboError::NotMeta(other.to_string())),
        }
        self
    }

    /// Checks the structural invariants, reporting the first violation found.
    pub fn validate(&self) -> ComboResult<()> {
        match self {
            Action::Simple(signal) if !signal.is_valid() => Err(ComboError::InvalidSignal),
            Action::And(children) | Action::Or(children) => {
                if children.is_empty() {
                    return Err(ComboError::EmptyComposite(self.kind_name()));
                }
                children.iter().try_for_each(Action::validate)
            }
            Action::Meta {
                min_delay,
                max_delay,
            } if min_delay > max_delay => Err(ComboError::InvalidDelayBounds {
                min: *min_delay,
                max: *max_delay,
            }),
            _ => Ok(()),
        }
    }

    /// The leaf signals this action depends on.
    ///
    /// Both `And` and `Or` contribute all their children: an `Or` can only
    /// match on alternatives the buffer is subscribed to. `Meta` and `Any`
    /// contribute nothing.
    pub fn signals(&self) -> BTreeSet<Signal> {
        let mut signals = BTreeSet::new();
        self.collect_signals(&mut signals);
        signals
    }

    pub(crate) fn collect_signals(&self, signals: &mut BTreeSet<Signal>) {
        match self {
            Action::Simple(signal) => {
                signals.insert(*signal);
            }
            Action::And(children) | Action::Or(children) => {
                for child in children {
                    child.collect_signals(signals);
                }
            }
            Action::Meta { .. } | Action::Any => {}
        }
    }

    /// Resolves this action from `cursor`.
    ///
    /// Returns the cursor just past everything consumed, or `None` if the
    /// action does not match.
    pub fn resolve(&self, ctx: &ResolveContext<'_>, cursor: usize) -> Option<usize> {
        match self {
            Action::Simple(target) => (cursor..ctx.end())
                .find(|&index| {
                    ctx.window
                        .get(index)
                        .is_some_and(|entry| entry.signal == *target)
                })
                .map(|index| index + 1),
            Action::And(children) => resolve_and(children, ctx, cursor),
            Action::Or(children) => children
                .iter()
                .find_map(|child| child.resolve(ctx, cursor)),
            Action::Meta {
                min_delay,
                max_delay,
            } => {
                // No previous entry: nothing to measure a lower bound against.
                if cursor <= ctx.start {
                    return (*min_delay == DURATION_MIN).then_some(cursor);
                }
                let previous = ctx.timestamp(cursor - 1)?;
                let reference = ctx.timestamp(cursor).unwrap_or(ctx.now);
                let delay = elapsed(previous, reference);
                (*min_delay <= delay && delay <= *max_delay).then_some(cursor)
            }
            Action::Any => (cursor < ctx.end()).then_some(cursor + 1),
        }
    }
}

/// Every child resolves from the same cursor. Children that consumed an entry
/// must have consumed it within the AND window of each other; the result is
/// the cursor of the latest of them.
fn resolve_and(children: &[Action], ctx: &ResolveContext<'_>, cursor: usize) -> Option<usize> {
    if children.is_empty() {
        return None;
    }

    let mut earliest: Option<TimeStamp> = None;
    // (timestamp, cursor) of the latest consumed entry
    let mut latest: Option<(TimeStamp, usize)> = None;

    for child in children {
        let next = child.resolve(ctx, cursor)?;
        if next <= cursor {
            continue;
        }
        let timestamp = ctx.timestamp(next - 1)?;
        earliest = Some(earliest.map_or(timestamp, |t| t.min(timestamp)));
        latest = match latest {
            Some(best) if best >= (timestamp, next) => Some(best),
            _ => Some((timestamp, next)),
        };
    }

    match (earliest, latest) {
        (Some(first), Some((last, next))) => ctx
            .config
            .within_and_window(elapsed(first, last))
            .then_some(next),
        _ => Some(cursor),
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Simple(signal) => write!(f, "{}", signal),
            Action::And(children) | Action::Or(children) => {
                write!(f, "{}(", self.kind_name())?;
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", child)?;
                }
                f.write_str(")")
            }
            Action::Meta {
                min_delay,
                max_delay,
            } => {
                f.write_str("meta(")?;
                if *min_delay != DURATION_MIN {
                    write!(f, "{}ms", min_delay)?;
                }
                f.write_str("..")?;
                if *max_delay != DURATION_MAX {
                    write!(f, "{}ms", max_delay)?;
                }
                f.write_str(")")
            }
            Action::Any => f.write_str("*"),
        }
    }
}
