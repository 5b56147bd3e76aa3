//! Rules, the expression language, and the three rule engines.

pub mod engine;
pub mod expr;

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::command::Execution;
use crate::error::RuleError;
use crate::value::Record;
use expr::{compile, CompiledExpr, Environment};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleState {
    True,
    False,
    Suspended,
}

/// `{id, expression, actions, timeTrigger, lastFired}`.
/// `condition` returns `true|false|suspended`; `suspended` while
/// `now < lastFired + timeTrigger`. On `true`, `lastFired := now`.
pub struct Rule {
    pub id: String,
    pub expression_src: String,
    expression: CompiledExpr,
    pub actions: Vec<Execution>,
    pub time_trigger: Duration,
    last_fired: Mutex<Option<DateTime<Utc>>>,
}

impl Rule {
    pub fn new(
        id: impl Into<String>,
        expression_src: impl Into<String>,
        actions: Vec<Execution>,
        time_trigger: Duration,
    ) -> Result<Self, RuleError> {
        let expression_src = expression_src.into();
        let expression = compile(&expression_src)?;
        Ok(Rule {
            id: id.into(),
            expression_src,
            expression,
            actions,
            time_trigger,
            last_fired: Mutex::new(None),
        })
    }

    pub fn last_fired(&self) -> Option<DateTime<Utc>> {
        *self.last_fired.lock().unwrap()
    }

    /// `condition(knowledge) -> {true, false, suspended}`.
    pub fn evaluate(&self, env: &Environment) -> Result<RuleState, RuleError> {
        if let Some(last) = self.last_fired() {
            let trigger = chrono::Duration::from_std(self.time_trigger)
                .unwrap_or_else(|_| chrono::Duration::zero());
            if env.now < last + trigger {
                return Ok(RuleState::Suspended);
            }
        }
        let fired = self.expression.eval_bool(env)?;
        if fired {
            *self.last_fired.lock().unwrap() = Some(env.now);
            Ok(RuleState::True)
        } else {
            Ok(RuleState::False)
        }
    }
}
