//! Process-wide knowledge store.

use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;

use crate::value::{Record, Value};

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// A concurrent `name -> value` map plus a `source -> lastUpdate` aging
/// map. Names are namespaced `<source>_<key>`. Built on `DashMap` rather
/// than a single mutex-guarded `HashMap` so readers never block writers
/// of unrelated keys.
pub struct KnowledgeStore {
    values: DashMap<String, Value>,
    aging: DashMap<String, i64>,
}

impl Default for KnowledgeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KnowledgeStore {
    pub fn new() -> Self {
        KnowledgeStore {
            values: DashMap::new(),
            aging: DashMap::new(),
        }
    }

    /// `set(source, kvs)`: writes `source_key = value` for each entry.
    /// Numeric-looking values are coerced to floating point; keys ending
    /// with `AlertLevel` (case-insensitive) additionally set the bare
    /// `source` key to that numeric value.
    pub fn set(&self, source: &str, kvs: &Record) {
        for (key, value) in kvs {
            let coerced = match value.looks_numeric() {
                Some(f) => Value::Float(f),
                None => value.clone(),
            };
            let namespaced = format!("{source}_{key}");
            if key.to_ascii_lowercase().ends_with("alertlevel") {
                if let Some(f) = coerced.as_float() {
                    self.values.insert(source.to_string(), Value::Float(f));
                }
            }
            self.values.insert(namespaced, coerced);
        }
        self.update_aging(source);
    }

    /// Stamps `source`'s last-update time to now.
    pub fn update_aging(&self, source: &str) {
        self.aging.insert(source.to_string(), now_secs());
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.values.get(name).map(|v| v.clone())
    }

    /// Returns a copy of all visible knowledge for a rule whose
    /// `timeTrigger` is `for_rule_time_trigger_secs`: keys belonging to
    /// sources with `now - lastUpdate > timeTrigger` are omitted.
    pub fn snapshot(&self, for_rule_time_trigger_secs: i64) -> Record {
        let now = now_secs();
        let stale: std::collections::HashSet<String> = self
            .aging
            .iter()
            .filter(|entry| now - *entry.value() > for_rule_time_trigger_secs)
            .map(|entry| entry.key().clone())
            .collect();

        self.values
            .iter()
            .filter(|entry| {
                let key = entry.key();
                !stale.iter().any(|source| {
                    key == source || key.starts_with(&format!("{source}_"))
                })
            })
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_namespaces_keys_and_coerces_numbers() {
        let store = KnowledgeStore::new();
        let kvs = Record::from([("temp".to_string(), Value::String("21.5".into()))]);
        store.set("sensor1", &kvs);
        assert_eq!(store.get("sensor1_temp"), Some(Value::Float(21.5)));
    }

    #[test]
    fn alert_level_suffix_sets_bare_source_key() {
        let store = KnowledgeStore::new();
        let kvs = Record::from([("AlertLevel".to_string(), Value::Int(3))]);
        store.set("tad", &kvs);
        assert_eq!(store.get("tad"), Some(Value::Float(3.0)));
        assert_eq!(store.get("tad_AlertLevel"), Some(Value::Float(3.0)));
    }

    #[test]
    fn snapshot_omits_aged_out_sources() {
        let store = KnowledgeStore::new();
        store.set("sensor1", &Record::from([("x".to_string(), Value::Int(1))]));
        store.aging.insert("sensor1".to_string(), now_secs() - 1000);
        let snap = store.snapshot(10);
        assert!(!snap.contains_key("sensor1_x"));
    }

    #[test]
    fn snapshot_includes_fresh_sources() {
        let store = KnowledgeStore::new();
        store.set("sensor1", &Record::from([("x".to_string(), Value::Int(1))]));
        let snap = store.snapshot(3600);
        assert_eq!(snap.get("sensor1_x"), Some(&Value::Float(1.0)));
    }
}
