//! Error taxonomy shared across subsystems.
//!
//! One `thiserror` enum per subsystem boundary rather than one grand
//! error type for the whole crate.

use thiserror::Error;

/// Errors surfaced by the channel stack's `send`/`received` boundary.
///
/// Transport failures never propagate as Rust errors out of `send` —
/// they become a `SendResult` variant. This type is for the internal
/// plumbing (e.g. backlog file I/O) that *can* fail hard.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Errors raised while parsing or dispatching a [`crate::command::Command`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CommandError {
    #[error("missing required parameter '{0}'")]
    ParameterMissing(String),
    #[error("parameter '{name}' could not be parsed as {expected}")]
    ParameterType { name: String, expected: String },
    #[error("no command named '{name}' on target '{target}'")]
    UnknownCommand { target: String, name: String },
}

/// Parse errors for Message/JSON/cron text.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    Json(String),
    #[error("malformed message: {0}")]
    Message(String),
    #[error("malformed cron line: {0}")]
    Cron(String),
    #[error("malformed expression: {0}")]
    Expression(String),
}

/// A rule evaluation error — the rule is treated as `suspended` for the tick.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RuleError {
    #[error("unknown identifier '{0}' in expression")]
    UnknownIdentifier(String),
    #[error("type error evaluating expression: {0}")]
    TypeError(String),
    #[error("expression parse error: {0}")]
    Parse(String),
}

/// Lifecycle (start/stop/setup) errors recorded on a Task's status string.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LifecycleError {
    #[error("{component}: {reason}")]
    Failed { component: String, reason: String },
}

/// File I/O persistence errors — logged, in-memory state remains authoritative.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
