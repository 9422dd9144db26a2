//! Error types for combo configuration and engine usage.
//!
//! A failed match is never an error: `resolve` and `evaluate` report it as
//! `None`/`false`. These variants cover configuration mistakes, lifecycle
//! misuse, and deliberately unimplemented paths.

use crate::common::{DurationMs, Signal};
use thiserror::Error;

/// Errors produced by the combo engine.
#[derive(Debug, Error)]
pub enum ComboError {
    /// A child was pushed onto an action that is not `And`/`Or`.
    #[error("cannot add a child to non-composite action {0}")]
    NotComposite(String),

    /// Delay bounds were set on an action that is not `Meta`.
    #[error("cannot set delay bounds on non-meta action {0}")]
    NotMeta(String),

    /// An `And`/`Or` action without children.
    #[error("composite action {0} has no children")]
    EmptyComposite(&'static str),

    /// A combo without any action.
    #[error("combo emitting {0} has no actions")]
    EmptyCombo(Signal),

    /// A leaf refers to the invalid signal.
    #[error("action refers to an invalid signal")]
    InvalidSignal,

    /// A signal name that cannot be interned.
    #[error("malformed signal name {0:?}")]
    MalformedSignalName(String),

    /// A `Meta` action whose bounds are reversed.
    #[error("meta delay bounds are reversed: min {min}ms > max {max}ms")]
    InvalidDelayBounds { min: DurationMs, max: DurationMs },

    /// A combo document or action document that does not follow the grammar.
    #[error("malformed combo document: {0}")]
    MalformedDocument(String),

    /// The engine was used outside of its active state.
    #[error("input buffer is {0}, expected active")]
    NotActive(&'static str),

    /// The combo is not registered.
    #[error("combo emitting {0} is not registered")]
    NotRegistered(Signal),

    /// The engine task has stopped and no longer accepts commands.
    #[error("combo engine is not running")]
    EngineStopped,

    /// A path that exists in the API but is not implemented.
    #[error("not implemented: {0}")]
    Unimplemented(&'static str),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration loading error
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

/// Result type for combo engine operations
pub type ComboResult<T> = Result<T, ComboError>;
