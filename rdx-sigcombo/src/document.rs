//! The JSON authoring format for actions and combos.
//!
//! ```json
//! {
//!   "sequence": ["down", {"$and": ["forward", "punch"]}, {"$maxDelay": 100}],
//!   "signal": "hadouken",
//!   "policy": "flip"
//! }
//! ```
//!
//! A plain string is a leaf signal and `"$*"` matches any entry. `{"$and": [..]}`
//! and `{"$or": [..]}` hold nested actions. An object made only of `"$minDelay"`
//! and `"$maxDelay"` (milliseconds) is a delay check; a missing bound is open.
//!
//! Parsing happens in two passes. The whole document is checked first and only
//! then are the names interned, so a rejected document leaves the registry
//! untouched.

use crate::common::{DurationMs, Signal, DURATION_MAX, DURATION_MIN};
use crate::components::action::Action;
use crate::components::combo::{ActionCombo, EvaluationPolicy};
use crate::error::{ComboError, ComboResult};
use crate::signal::{validate_signal_name, SignalRegistry};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const ANY: &str = "$*";
const AND: &str = "$and";
const OR: &str = "$or";
const MIN_DELAY: &str = "$minDelay";
const MAX_DELAY: &str = "$maxDelay";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum PolicyName {
    Always,
    Flip,
}

/// The top-level shape of a combo document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct ComboDocument {
    sequence: Vec<Value>,
    signal: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    policy: Option<PolicyName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    recover_duration: Option<DurationMs>,
}

/// An action whose leaves are still names.
#[derive(Debug)]
enum Draft {
    Leaf(String),
    Any,
    And(Vec<Draft>),
    Or(Vec<Draft>),
    Meta {
        min_delay: DurationMs,
        max_delay: DurationMs,
    },
}

fn malformed(reason: impl Into<String>) -> ComboError {
    ComboError::MalformedDocument(reason.into())
}

impl Draft {
    fn parse(value: &Value) -> ComboResult<Self> {
        match value {
            Value::String(name) if name == ANY => Ok(Draft::Any),
            Value::String(name) => {
                validate_signal_name(name)?;
                Ok(Draft::Leaf(name.clone()))
            }
            Value::Object(fields) => Self::parse_object(fields),
            other => Err(malformed(format!(
                "expected a signal name or an object, found {}",
                other
            ))),
        }
    }

    fn parse_object(fields: &Map<String, Value>) -> ComboResult<Self> {
        if fields.len() == 1 {
            if let Some(children) = fields.get(AND) {
                return Ok(Draft::And(Self::parse_children(AND, children)?));
            }
            if let Some(children) = fields.get(OR) {
                return Ok(Draft::Or(Self::parse_children(OR, children)?));
            }
        }

        if let Some(key) = fields.keys().find(|k| *k != MIN_DELAY && *k != MAX_DELAY) {
            return Err(malformed(format!("unexpected key {:?}", key)));
        }
        let min_delay = Self::parse_delay(fields, MIN_DELAY)?.unwrap_or(DURATION_MIN);
        let max_delay = Self::parse_delay(fields, MAX_DELAY)?.unwrap_or(DURATION_MAX);
        if min_delay > max_delay {
            return Err(ComboError::InvalidDelayBounds {
                min: min_delay,
                max: max_delay,
            });
        }
        Ok(Draft::Meta {
            min_delay,
            max_delay,
        })
    }

    fn parse_children(key: &str, value: &Value) -> ComboResult<Vec<Draft>> {
        let Value::Array(items) = value else {
            return Err(malformed(format!("{} expects an array", key)));
        };
        if items.is_empty() {
            return Err(malformed(format!("{} expects at least one action", key)));
        }
        items.iter().map(Self::parse).collect()
    }

    fn parse_delay(fields: &Map<String, Value>, key: &str) -> ComboResult<Option<DurationMs>> {
        match fields.get(key) {
            None => Ok(None),
            Some(value) => value
                .as_i64()
                .map(Some)
                .ok_or_else(|| malformed(format!("{} expects an integer, found {}", key, value))),
        }
    }

    fn intern<R: SignalRegistry>(self, registry: &mut R) -> Action {
        match self {
            Draft::Leaf(name) => Action::Simple(registry.to_signal(&name)),
            Draft::Any => Action::Any,
            Draft::And(children) => {
                Action::And(children.into_iter().map(|c| c.intern(registry)).collect())
            }
            Draft::Or(children) => {
                Action::Or(children.into_iter().map(|c| c.intern(registry)).collect())
            }
            Draft::Meta {
                min_delay,
                max_delay,
            } => Action::Meta {
                min_delay,
                max_delay,
            },
        }
    }
}

/// Parses one action document, interning its leaf names.
pub fn parse_action<R: SignalRegistry>(value: &Value, registry: &mut R) -> ComboResult<Action> {
    let action = Draft::parse(value)?.intern(registry);
    action.validate()?;
    Ok(action)
}

/// Parses a combo document, interning every name it mentions.
pub fn parse_combo<R: SignalRegistry>(value: &Value, registry: &mut R) -> ComboResult<ActionCombo> {
    let document: ComboDocument =
        serde_json::from_value(value.clone()).map_err(|e| malformed(e.to_string()))?;

    validate_signal_name(&document.signal)?;
    let policy = match (document.policy, document.recover_duration) {
        (None | Some(PolicyName::Always), None) => EvaluationPolicy::Always,
        (Some(PolicyName::Flip), None) => EvaluationPolicy::Flip,
        (None, Some(duration)) => EvaluationPolicy::Recover { duration },
        (Some(_), Some(_)) => {
            return Err(malformed("recoverDuration cannot be combined with a policy"))
        }
    };
    if document.sequence.is_empty() {
        return Err(malformed("sequence expects at least one action"));
    }
    let drafts = document
        .sequence
        .iter()
        .map(Draft::parse)
        .collect::<ComboResult<Vec<_>>>()?;

    let signal = registry.to_signal(&document.signal);
    let combo = drafts
        .into_iter()
        .fold(ActionCombo::new(signal), |combo, draft| {
            combo.push(draft.intern(registry))
        })
        .with_policy(policy);
    combo.validate()?;
    Ok(combo)
}

/// Parses a combo document from JSON text.
pub fn parse_combo_str<R: SignalRegistry>(text: &str, registry: &mut R) -> ComboResult<ActionCombo> {
    let value: Value = serde_json::from_str(text)?;
    parse_combo(&value, registry)
}

fn signal_name<R: SignalRegistry>(signal: Signal, registry: &R) -> ComboResult<String> {
    registry
        .from_signal(signal)
        .ok_or_else(|| malformed(format!("signal {} has no name", signal)))
}

/// Exports an action back to its document form.
pub fn export_action<R: SignalRegistry>(action: &Action, registry: &R) -> ComboResult<Value> {
    let value = match action {
        Action::Simple(signal) => Value::String(signal_name(*signal, registry)?),
        Action::Any => Value::String(ANY.to_string()),
        Action::And(children) | Action::Or(children) => {
            let key = if matches!(action, Action::And(_)) { AND } else { OR };
            let children = children
                .iter()
                .map(|child| export_action(child, registry))
                .collect::<ComboResult<Vec<_>>>()?;
            let mut fields = Map::new();
            fields.insert(key.to_string(), Value::Array(children));
            Value::Object(fields)
        }
        Action::Meta {
            min_delay,
            max_delay,
        } => {
            let mut fields = Map::new();
            if *min_delay != DURATION_MIN {
                fields.insert(MIN_DELAY.to_string(), Value::from(*min_delay));
            }
            if *max_delay != DURATION_MAX {
                fields.insert(MAX_DELAY.to_string(), Value::from(*max_delay));
            }
            Value::Object(fields)
        }
    };
    Ok(value)
}

/// Exports a combo back to its document form, omitting default keys.
pub fn export_combo<R: SignalRegistry>(combo: &ActionCombo, registry: &R) -> ComboResult<Value> {
    let (policy, recover_duration) = match combo.policy() {
        EvaluationPolicy::Always => (None, None),
        EvaluationPolicy::Flip => (Some(PolicyName::Flip), None),
        EvaluationPolicy::Recover { duration } => (None, Some(duration)),
    };
    let document = ComboDocument {
        sequence: combo
            .actions()
            .iter()
            .map(|action| export_action(action, registry))
            .collect::<ComboResult<_>>()?,
        signal: signal_name(combo.signal(), registry)?,
        policy,
        recover_duration,
    };
    Ok(serde_json::to_value(document)?)
}
