//! Alert ingest & dedupe.

mod dedupe;

pub use dedupe::DedupeWindow;

use crate::config::defaults::ALERT_DEFAULT_LANGUAGE;
use crate::knowledge::KnowledgeStore;
use crate::value::{Record, Value};

/// One info block of an inbound alert.
#[derive(Debug, Clone)]
pub struct InfoBlock {
    pub source: String,
    pub status: String,
    pub msg_type: String,
    pub codes: Vec<String>,
    pub addresses: Vec<String>,
    pub event_type: String,
    pub language: Option<String>,
    /// `parameter.valueName -> value`.
    pub parameters: Record,
}

/// An inbound emergency-message record.
#[derive(Debug, Clone)]
pub struct Alert {
    pub identifier: String,
    pub sender: String,
    pub infos: Vec<InfoBlock>,
}

/// Ingests one alert payload: drop if sender equals local id; dedupe by
/// identifier within the window; otherwise write each info block's
/// variables to Knowledge (namespaced by sender and by `source`) and
/// return the merged overlay record to forward to the rule engine's
/// alert path (`None` if the alert was dropped).
pub fn ingest(alert: &Alert, local_id: &str, dedupe: &DedupeWindow, knowledge: &KnowledgeStore) -> Option<Record> {
    if alert.sender == local_id {
        return None;
    }
    if !dedupe.check_and_insert(&alert.identifier) {
        return None;
    }

    let mut overlay = Record::new();
    for info in &alert.infos {
        let vars = info_variables(info);
        knowledge.set(&alert.sender, &vars);
        knowledge.set(&info.source, &vars);
        for (k, v) in vars {
            overlay.insert(k, v);
        }
    }
    Some(overlay)
}

fn info_variables(info: &InfoBlock) -> Record {
    let mut vars = Record::new();
    vars.insert("source".to_string(), Value::String(info.source.clone()));
    vars.insert("status".to_string(), Value::String(info.status.clone()));
    vars.insert("msgType".to_string(), Value::String(info.msg_type.clone()));
    vars.insert("codes".to_string(), Value::String(info.codes.join(",")));
    vars.insert(
        "addresses".to_string(),
        Value::List(info.addresses.iter().cloned().map(Value::String).collect()),
    );
    vars.insert("eventType".to_string(), Value::String(info.event_type.clone()));
    vars.insert(
        "Language".to_string(),
        Value::String(info.language.clone().unwrap_or_else(|| ALERT_DEFAULT_LANGUAGE.to_string())),
    );
    for (name, value) in &info.parameters {
        let coerced = match value.looks_numeric() {
            Some(f) => Value::Float(f),
            None => value.clone(),
        };
        vars.insert(name.clone(), coerced);
    }
    vars
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_alert(identifier: &str, sender: &str) -> Alert {
        Alert {
            identifier: identifier.to_string(),
            sender: sender.to_string(),
            infos: vec![InfoBlock {
                source: "TAD".to_string(),
                status: "Actual".to_string(),
                msg_type: "Alert".to_string(),
                codes: vec!["A1".to_string(), "A2".to_string()],
                addresses: vec!["D01".to_string()],
                event_type: "Fire".to_string(),
                language: None,
                parameters: Record::from([("temp".to_string(), Value::String("21.5".into()))]),
            }],
        }
    }

    #[test]
    fn drops_alerts_from_self() {
        let knowledge = KnowledgeStore::new();
        let dedupe = DedupeWindow::new();
        let alert = sample_alert("X", "D01");
        assert!(ingest(&alert, "D01", &dedupe, &knowledge).is_none());
    }

    #[test]
    fn writes_namespaced_knowledge_and_returns_overlay() {
        let knowledge = KnowledgeStore::new();
        let dedupe = DedupeWindow::new();
        let alert = sample_alert("X", "hub1");
        let overlay = ingest(&alert, "D01", &dedupe, &knowledge).unwrap();
        assert_eq!(overlay.get("codes"), Some(&Value::String("A1,A2".into())));
        assert_eq!(knowledge.get("hub1_codes"), Some(Value::String("A1,A2".into())));
        assert_eq!(knowledge.get("TAD_temp"), Some(Value::Float(21.5)));
        assert_eq!(overlay.get("Language"), Some(&Value::String("en-US".into())));
    }

    #[test]
    fn duplicate_identifier_within_window_is_dropped() {
        let knowledge = KnowledgeStore::new();
        let dedupe = DedupeWindow::new();
        let alert = sample_alert("X", "hub1");
        assert!(ingest(&alert, "D01", &dedupe, &knowledge).is_some());
        assert!(ingest(&alert, "D01", &dedupe, &knowledge).is_none());
    }
}
