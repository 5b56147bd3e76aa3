//! Loaders for the remaining canonical persistent files: `crontab.json`
//! and `Ruleset.json`. Both are read once at startup; `crontab.json` is
//! re-read and rebuilt into the scheduler on a `schedule reload` request,
//! and `Ruleset.json` is re-read or replaced on a `ruleset` request (see
//! `router::Router::handle_schedule` and `handle_ruleset`).

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::command::Execution;
use crate::error::PersistError;

/// `crontab.json`: `{schedules: [string], commands: name -> Execution}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrontabFile {
    #[serde(default)]
    pub schedules: Vec<String>,
    #[serde(default)]
    pub commands: BTreeMap<String, Execution>,
}

pub fn load_crontab(path: &Path) -> Result<CrontabFile, PersistError> {
    if !path.exists() {
        return Ok(CrontabFile::default());
    }
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// One entry of `Ruleset.json`'s `Ruleset` array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesetEntry {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Expression")]
    pub expression: String,
    #[serde(rename = "TimeTrigger")]
    pub time_trigger: String,
    #[serde(rename = "Actions")]
    pub actions: String,
}

/// `Ruleset.json`: device gate list, a translation table, named action
/// presets, and the rule entries themselves.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesetFile {
    #[serde(rename = "Devices", default)]
    pub devices: Vec<String>,
    #[serde(rename = "Translations", default)]
    pub translations: BTreeMap<String, String>,
    #[serde(rename = "Actions", default)]
    pub actions: BTreeMap<String, Vec<Execution>>,
    #[serde(rename = "Ruleset", default)]
    pub ruleset: Vec<RulesetEntry>,
}

pub fn load_ruleset(path: &Path) -> Result<RulesetFile, PersistError> {
    if !path.exists() {
        return Ok(RulesetFile::default());
    }
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

pub fn save_ruleset(path: &Path, doc: &RulesetFile) -> Result<(), PersistError> {
    let text = serde_json::to_string_pretty(doc)?;
    std::fs::write(path, text)?;
    Ok(())
}

/// Parses `TimeTrigger` duration strings of the form `<n><s|m|h>`
/// (`30s`, `5m`, `2h`); bare integers are treated as seconds.
pub fn parse_duration(s: &str) -> Duration {
    let s = s.trim();
    let (digits, unit) = match s.chars().last() {
        Some(c) if c.is_ascii_alphabetic() => (&s[..s.len() - 1], c),
        _ => (s, 's'),
    };
    let n: u64 = digits.trim().parse().unwrap_or(0);
    match unit {
        'h' | 'H' => Duration::from_secs(n * 3600),
        'm' | 'M' => Duration::from_secs(n * 60),
        _ => Duration::from_secs(n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_crontab_yields_empty_document() {
        let dir = tempfile::tempdir().unwrap();
        let doc = load_crontab(&dir.path().join("crontab.json")).unwrap();
        assert!(doc.schedules.is_empty());
    }

    #[test]
    fn ruleset_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Ruleset.json");
        let mut doc = RulesetFile::default();
        doc.devices.push("D02".to_string());
        doc.actions.insert(
            "sirenOn".to_string(),
            vec![Execution::new("Display", "setPage", crate::value::Record::new())],
        );
        doc.ruleset.push(RulesetEntry {
            id: "rule1".to_string(),
            expression: "true".to_string(),
            time_trigger: "30s".to_string(),
            actions: "sirenOn".to_string(),
        });
        save_ruleset(&path, &doc).unwrap();

        let loaded = load_ruleset(&path).unwrap();
        assert_eq!(loaded.devices, vec!["D02".to_string()]);
        assert_eq!(loaded.ruleset.len(), 1);
        assert_eq!(loaded.ruleset[0].actions, "sirenOn");
    }

    #[test]
    fn duration_parses_unit_suffixes() {
        assert_eq!(parse_duration("30s"), Duration::from_secs(30));
        assert_eq!(parse_duration("5m"), Duration::from_secs(300));
        assert_eq!(parse_duration("2h"), Duration::from_secs(7200));
        assert_eq!(parse_duration("45"), Duration::from_secs(45));
    }
}
