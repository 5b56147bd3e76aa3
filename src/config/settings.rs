//! Settings and Feature config data model.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::value::{Record, Value};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BrokerConfig {
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// `{enabled, id, type, version, properties}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    pub enabled: bool,
    pub id: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub version: String,
    #[serde(default)]
    pub properties: Record,
}

impl FeatureConfig {
    pub fn new(type_: impl Into<String>, id: impl Into<String>) -> Self {
        FeatureConfig {
            enabled: false,
            id: id.into(),
            type_: type_.into(),
            version: "1.0".to_string(),
            properties: Record::new(),
        }
    }

    pub fn get_int(&self, name: &str, default: i64) -> i64 {
        self.properties.get(name).and_then(Value::as_int).unwrap_or(default)
    }

    pub fn get_float(&self, name: &str, default: f64) -> f64 {
        self.properties.get(name).and_then(Value::as_float).unwrap_or(default)
    }

    pub fn get_bool(&self, name: &str, default: bool) -> bool {
        self.properties.get(name).and_then(Value::as_bool).unwrap_or(default)
    }

    pub fn get_string(&self, name: &str, default: &str) -> String {
        self.properties
            .get(name)
            .map(|v| v.to_string())
            .unwrap_or_else(|| default.to_string())
    }

    /// Parses a `0x`-prefixed or bare hexadecimal string property.
    pub fn get_hex(&self, name: &str, default: u64) -> u64 {
        self.properties
            .get(name)
            .and_then(Value::as_str)
            .and_then(|s| u64::from_str_radix(s.trim_start_matches("0x"), 16).ok())
            .unwrap_or(default)
    }

    pub fn get_string_array(&self, name: &str) -> Vec<String> {
        match self.properties.get(name) {
            Some(Value::List(items)) => items.iter().map(ToString::to_string).collect(),
            Some(Value::String(s)) => s.split(',').map(|p| p.trim().to_string()).collect(),
            _ => Vec::new(),
        }
    }

    pub fn get_dict(&self, name: &str) -> BTreeMap<String, Value> {
        match self.properties.get(name) {
            Some(Value::Map(m)) => m.clone(),
            _ => BTreeMap::new(),
        }
    }

    pub fn merge_properties(&mut self, updates: &Record) {
        for (k, v) in updates {
            self.properties.insert(k.clone(), v.clone());
        }
    }
}

/// Device settings, the root persisted document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub id: String,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_ingest_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoLocation>,
    #[serde(default)]
    pub admin_enabled: bool,
    #[serde(default = "crate::config::defaults::admin_default_port")]
    pub admin_port: u16,
    #[serde(default)]
    pub features: Vec<FeatureConfig>,
}

impl Settings {
    /// Invariant: each Feature has a unique `id`; duplicates are removed
    /// keeping the first occurrence. Returns whether anything was
    /// removed, so the caller knows to rewrite the file.
    pub fn dedupe_features(&mut self) -> bool {
        let mut seen = std::collections::BTreeSet::new();
        let before = self.features.len();
        self.features.retain(|f| seen.insert(f.id.clone()));
        self.features.len() != before
    }

    pub fn find_feature(&self, id_or_type: &str) -> Option<&FeatureConfig> {
        self.features
            .iter()
            .find(|f| f.type_ == id_or_type)
            .or_else(|| self.features.iter().find(|f| f.id == id_or_type))
    }

    pub fn find_feature_mut(&mut self, id_or_type: &str) -> Option<&mut FeatureConfig> {
        if let Some(idx) = self.features.iter().position(|f| f.type_ == id_or_type) {
            return self.features.get_mut(idx);
        }
        let idx = self.features.iter().position(|f| f.id == id_or_type)?;
        self.features.get_mut(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedupe_keeps_first_occurrence() {
        let mut settings = Settings {
            id: "dev".into(),
            broker: BrokerConfig::default(),
            http_ingest_url: None,
            proxy: None,
            location: None,
            admin_enabled: false,
            admin_port: 4005,
            features: vec![
                FeatureConfig::new("Mail", "mail1"),
                FeatureConfig::new("Sms", "mail1"),
            ],
        };
        assert!(settings.dedupe_features());
        assert_eq!(settings.features.len(), 1);
        assert_eq!(settings.features[0].type_, "Mail");
    }

    #[test]
    fn typed_accessors_fall_back_to_defaults() {
        let feature = FeatureConfig::new("Mail", "mail1");
        assert_eq!(feature.get_int("retries", 3), 3);
        assert!(!feature.get_bool("verbose", false));
        assert_eq!(feature.get_hex("mask", 0xff), 0xff);
    }

    #[test]
    fn hex_property_parses_with_or_without_prefix() {
        let mut feature = FeatureConfig::new("Mail", "mail1");
        feature
            .properties
            .insert("mask".into(), Value::String("0x1A".into()));
        assert_eq!(feature.get_hex("mask", 0), 0x1A);
    }
}
