//! Prepared, reusable command invocations.

use serde::{Deserialize, Serialize};

use crate::value::{Record, Value};

/// `{target, command, parameters}` — a prepared invocation, immutable once
/// built, clonable by value. Rules and cron entries hold `Execution`s and
/// clone them (deep-copying parameters) when firing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub target: String,
    pub command: String,
    pub parameters: Record,
}

impl Execution {
    pub fn new(target: impl Into<String>, command: impl Into<String>, parameters: Record) -> Self {
        Execution {
            target: target.into(),
            command: command.into(),
            parameters,
        }
    }

    /// Clones this execution and merges `overlay` over its parameters,
    /// overlay entries winning on key collision — used when a firing rule
    /// merges the triggering alert/event's current parameters into each of
    /// its actions.
    pub fn with_merged_parameters(&self, overlay: &Record) -> Execution {
        let mut merged = self.parameters.clone();
        for (k, v) in overlay {
            merged.insert(k.clone(), v.clone());
        }
        Execution {
            target: self.target.clone(),
            command: self.command.clone(),
            parameters: merged,
        }
    }

    /// Integer `delay` parameter in milliseconds, if present and positive.
    pub fn delay_millis(&self) -> Option<u64> {
        match self.parameters.get("delay").and_then(Value::as_int) {
            Some(ms) if ms > 0 => Some(ms as u64),
            _ => None,
        }
    }

    /// Short label used in notifications and admin broadcasts:
    /// `"<target>.<command>"`.
    pub fn label(&self) -> String {
        format!("{}.{}", self.target, self.command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merged_parameters_prefer_overlay() {
        let base = Execution::new(
            "Mail",
            "send",
            Record::from([("body".to_string(), Value::String("base".into()))]),
        );
        let overlay = Record::from([("body".to_string(), Value::String("override".into()))]);
        let merged = base.with_merged_parameters(&overlay);
        assert_eq!(merged.parameters.get("body"), Some(&Value::String("override".into())));
    }

    #[test]
    fn delay_millis_requires_positive_int() {
        let mut exec = Execution::new("RIO", "noop", Record::new());
        assert_eq!(exec.delay_millis(), None);
        exec.parameters.insert("delay".into(), Value::Int(0));
        assert_eq!(exec.delay_millis(), None);
        exec.parameters.insert("delay".into(), Value::Int(500));
        assert_eq!(exec.delay_millis(), Some(500));
    }
}
