//! Ruleset processing: three engines sharing the knowledge base.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::warn;

use super::expr::Environment;
use super::{Rule, RuleState};
use crate::command::Execution;
use crate::knowledge::KnowledgeStore;
use crate::value::Record;

/// For each true rule, clone each referenced Execution (deep-copy
/// parameters), merge `overlay`'s current parameters, and collect it for
/// dispatch.
fn fire_actions(rule: &Rule, overlay: &Record) -> Vec<Execution> {
    rule.actions
        .iter()
        .map(|exec| exec.with_merged_parameters(overlay))
        .collect()
}

/// *Periodic engine* (cron): rules are persistent; fires actions on
/// `true`. Rebuilt wholesale on schedule reload.
#[derive(Default)]
pub struct PeriodicEngine {
    rules: DashMap<String, Rule>,
    extra: Mutex<Record>,
}

impl PeriodicEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, rule: Rule) {
        self.rules.insert(rule.id.clone(), rule);
    }

    /// Cleared and rebuilt on schedule reload.
    pub fn replace_all(&self, rules: Vec<Rule>) {
        self.rules.clear();
        for rule in rules {
            self.rules.insert(rule.id.clone(), rule);
        }
    }

    /// `update(alert)` passes the alert's info entries through so
    /// alert-provided variables are visible to cron rules too.
    pub fn update(&self, vars: &Record) {
        let mut extra = self.extra.lock().unwrap();
        for (k, v) in vars {
            extra.insert(k.clone(), v.clone());
        }
    }

    pub fn tick(&self, knowledge: &KnowledgeStore, device_id: &str, now: DateTime<Utc>) -> Vec<Execution> {
        let extra = self.extra.lock().unwrap().clone();
        let mut fired = Vec::new();
        for entry in self.rules.iter() {
            let rule = entry.value();
            let secs = rule.time_trigger.as_secs() as i64;
            let mut snapshot = knowledge.snapshot(secs);
            for (k, v) in &extra {
                snapshot.insert(k.clone(), v.clone());
            }
            let env = Environment {
                knowledge: &snapshot,
                device_id,
                now,
            };
            match rule.evaluate(&env) {
                Ok(RuleState::True) => fired.extend(fire_actions(rule, &extra)),
                Ok(_) => {}
                Err(e) => warn!(rule = %rule.id, error = %e, "rule evaluation error, treating as suspended"),
            }
        }
        fired
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Ephemeral engine shared by the until-true and until-false variants:
/// populated by alert processing, each rule removed once it reaches its
/// terminal state.
#[derive(Default)]
struct DynamicEngine {
    rules: DashMap<String, Rule>,
}

impl DynamicEngine {
    fn add(&self, rule: Rule) {
        self.rules.insert(rule.id.clone(), rule);
    }

    fn tick(
        &self,
        knowledge: &KnowledgeStore,
        device_id: &str,
        now: DateTime<Utc>,
        overlay: &Record,
        remove_on: RuleState,
    ) -> Vec<Execution> {
        let mut fired = Vec::new();
        let mut to_remove = Vec::new();
        for entry in self.rules.iter() {
            let rule = entry.value();
            let secs = rule.time_trigger.as_secs() as i64;
            let mut snapshot = knowledge.snapshot(secs);
            for (k, v) in overlay {
                snapshot.insert(k.clone(), v.clone());
            }
            let env = Environment {
                knowledge: &snapshot,
                device_id,
                now,
            };
            match rule.evaluate(&env) {
                Ok(state) => {
                    if state == RuleState::True {
                        fired.extend(fire_actions(rule, overlay));
                    }
                    if state == remove_on {
                        to_remove.push(rule.id.clone());
                    }
                }
                Err(e) => warn!(rule = %rule.id, error = %e, "rule evaluation error, treating as suspended"),
            }
        }
        for id in to_remove {
            self.rules.remove(&id);
        }
        fired
    }

    fn len(&self) -> usize {
        self.rules.len()
    }
}

/// *Until-true engine*: rules populated by alert processing, removed on
/// `true` (one-shot success).
#[derive(Default)]
pub struct UntilTrueEngine(DynamicEngine);

impl UntilTrueEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, rule: Rule) {
        self.0.add(rule);
    }

    pub fn tick(
        &self,
        knowledge: &KnowledgeStore,
        device_id: &str,
        now: DateTime<Utc>,
        overlay: &Record,
    ) -> Vec<Execution> {
        self.0.tick(knowledge, device_id, now, overlay, RuleState::True)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// *Until-false engine*: likewise, removed on `false` (run while-true).
#[derive(Default)]
pub struct UntilFalseEngine(DynamicEngine);

impl UntilFalseEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, rule: Rule) {
        self.0.add(rule);
    }

    pub fn tick(
        &self,
        knowledge: &KnowledgeStore,
        device_id: &str,
        now: DateTime<Utc>,
        overlay: &Record,
    ) -> Vec<Execution> {
        self.0.tick(knowledge, device_id, now, overlay, RuleState::False)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}
