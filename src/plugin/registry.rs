//! The Module Manager: plugin discovery, config binding, task lifecycle,
//! command table.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{info, warn};

use super::{FeatureDescriptor, FeaturePlugin, Task, TaskStatus};
use crate::command::Command;
use crate::config::{defaults, FeatureConfig, SettingsHandle};
use crate::knowledge::KnowledgeStore;
use crate::value::Record;

const RIO: &str = "RIO";

/// Registered plugin types plus the live Task set and command table,
/// implementing the agent's startup sequence and lifecycle operations.
pub struct ModuleManager {
    plugins: Vec<Arc<dyn FeaturePlugin>>,
    settings: SettingsHandle,
    knowledge: Arc<KnowledgeStore>,
    commands: DashMap<String, Command>,
    tasks: DashMap<String, Arc<dyn Task>>,
    registration_order: Mutex<Vec<String>>,
    shutdown_armed_at: Mutex<Option<Instant>>,
}

impl ModuleManager {
    pub fn new(
        plugins: Vec<Arc<dyn FeaturePlugin>>,
        settings: SettingsHandle,
        knowledge: Arc<KnowledgeStore>,
    ) -> Self {
        ModuleManager {
            plugins,
            settings,
            knowledge,
            commands: DashMap::new(),
            tasks: DashMap::new(),
            registration_order: Mutex::new(Vec::new()),
            shutdown_armed_at: Mutex::new(None),
        }
    }

    fn descriptor_for(&self, type_name: &str) -> Option<&FeatureDescriptor> {
        self.plugins
            .iter()
            .find(|p| p.descriptor().name == type_name)
            .map(|p| p.descriptor())
    }

    /// Startup sequence: ensure every registered plugin has at least a
    /// disabled default Feature bound to it; index every
    /// declared command; instantiate Tasks for enabled Features; publish
    /// each into the registry. Returns the task keys in registration order,
    /// to be `start()`ed by the caller after the Scheduler is initialized.
    pub fn bootstrap(&self) -> Vec<String> {
        self.ensure_default_features();
        self.index_commands();
        self.instantiate_enabled_tasks();
        self.registration_order.lock().unwrap().clone()
    }

    fn ensure_default_features(&self) {
        let needs_default: Vec<(String, FeatureConfig)> = {
            let settings = self.settings.get();
            self.plugins
                .iter()
                .filter(|p| {
                    !settings
                        .features
                        .iter()
                        .any(|f| f.type_ == p.descriptor().name)
                })
                .map(|p| {
                    let descriptor = p.descriptor();
                    (
                        descriptor.name.clone(),
                        descriptor.default_feature_config(&descriptor.name),
                    )
                })
                .collect()
        };
        if needs_default.is_empty() {
            return;
        }
        self.settings.mutate(|s| {
            for (type_name, config) in needs_default {
                info!(plugin = %type_name, "binding default disabled feature config");
                s.features.push(config);
            }
        });
    }

    fn index_commands(&self) {
        for plugin in &self.plugins {
            for command in &plugin.descriptor().commands {
                self.commands.insert(command.table_key(), command.clone());
            }
        }
    }

    fn instantiate_enabled_tasks(&self) {
        let settings = self.settings.get();
        for feature in settings.features.iter().filter(|f| f.enabled) {
            self.spawn_tasks_for(&feature.type_, feature);
        }
    }

    fn spawn_tasks_for(&self, plugin_type: &str, feature: &FeatureConfig) {
        let Some(plugin) = self.plugins.iter().find(|p| p.descriptor().name == plugin_type) else {
            warn!(plugin = %plugin_type, "no registered plugin for feature type");
            return;
        };
        let settings = self.settings.get();
        for task in plugin.create_tasks(&settings, feature) {
            let key = format!("{}+{}", feature.id, task.name());
            self.registration_order.lock().unwrap().push(key.clone());
            self.tasks.insert(key, task);
        }
    }

    // -- Command table contract ---------------------------------------------

    pub fn find_command(&self, target: &str, name: &str) -> Option<Command> {
        self.commands.get(&format!("{target}+{name}")).map(|c| c.clone())
    }

    pub fn find_feature(&self, id: &str) -> Option<FeatureConfig> {
        self.settings.get().find_feature(id).cloned()
    }

    /// The distinct plugin types registered at startup, regardless of
    /// whether any Feature instance of that type is currently enabled.
    pub fn driver_types(&self) -> Vec<String> {
        self.plugins.iter().map(|p| p.descriptor().name.clone()).collect()
    }

    /// Resolves a request's `target` (a string or array of strings) into
    /// matching Features; the reserved identifiers (this device's id, or
    /// `"RIO"`) additionally inject a synthetic Feature describing the
    /// agent itself.
    pub fn select_features(&self, targets: &[String]) -> Vec<FeatureConfig> {
        let settings = self.settings.get();
        let mut out = Vec::new();
        for target in targets {
            if target == &settings.id || target == RIO {
                out.push(synthetic_agent_feature(&settings.id));
                continue;
            }
            if let Some(f) = settings.find_feature(target) {
                out.push(f.clone());
            }
        }
        out
    }

    // -- Lifecycle operations -------------------------------------------------

    pub fn enable(&self, target: &str) {
        let config = {
            self.settings.mutate(|s| {
                if let Some(f) = s.find_feature_mut(target) {
                    f.enabled = true;
                }
            });
            self.settings.get().find_feature(target).cloned()
        };
        if let Some(feature) = config {
            self.spawn_tasks_for(&feature.type_, &feature);
        }
    }

    pub fn disable(&self, target: &str) {
        self.settings.mutate(|s| {
            if let Some(f) = s.find_feature_mut(target) {
                f.enabled = false;
            }
        });
    }

    pub async fn start(&self, target: &str) {
        let settings = self.settings.get();
        for task in self.matching_enabled_tasks(target, &settings) {
            if let Err(e) = task.start().await {
                warn!(task = %task.name(), error = %e, "task start failed");
            }
        }
    }

    pub async fn stop(&self, target: &str) {
        let settings = self.settings.get();
        let matching = self.matching_tasks(target, &settings);
        for task in &matching {
            if let Err(e) = task.stop().await {
                warn!(task = %task.name(), error = %e, "task stop failed");
            }
        }
        if settings.find_feature(target).map(|f| !f.enabled).unwrap_or(false) {
            self.tasks.retain(|_, t| !matching.iter().any(|m| Arc::ptr_eq(m, t)));
        }
    }

    /// `configure(target, properties)`: merges properties into the Feature;
    /// on change, also updates `<featureId>_<key>` knowledge keys.
    pub fn configure(&self, target: &str, properties: &Record) {
        let feature_id = self
            .settings
            .get()
            .find_feature(target)
            .map(|f| f.id.clone());
        self.settings.mutate(|s| {
            if let Some(f) = s.find_feature_mut(target) {
                f.merge_properties(properties);
            }
        });
        if let Some(id) = feature_id {
            self.knowledge.set(&id, properties);
        }
    }

    /// Two-step shutdown: an initial request arms a 10s window; a second
    /// request within that window forces immediate stop.
    /// Returns `true` once the caller should actually stop the process.
    pub async fn shutdown(&self, force: bool) -> bool {
        if force {
            self.stop_all().await;
            return true;
        }
        let mut armed = self.shutdown_armed_at.lock().unwrap();
        match *armed {
            Some(at) if at.elapsed() < Duration::from_secs(defaults::SHUTDOWN_ARM_WINDOW_SECS) => {
                drop(armed);
                self.stop_all().await;
                true
            }
            _ => {
                *armed = Some(Instant::now());
                false
            }
        }
    }

    async fn stop_all(&self) {
        let order = self.registration_order.lock().unwrap().clone();
        for key in order {
            if let Some(task) = self.tasks.get(&key).map(|t| t.clone()) {
                if let Err(e) = task.stop().await {
                    warn!(task = %key, error = %e, "task stop failed during shutdown");
                }
            }
        }
    }

    fn matching_tasks(&self, target: &str, settings: &crate::config::Settings) -> Vec<Arc<dyn Task>> {
        let Some(feature) = settings.find_feature(target) else {
            return Vec::new();
        };
        self.tasks
            .iter()
            .filter(|e| e.feature_id() == feature.id)
            .map(|e| e.value().clone())
            .collect()
    }

    fn matching_enabled_tasks(&self, target: &str, settings: &crate::config::Settings) -> Vec<Arc<dyn Task>> {
        match settings.find_feature(target) {
            Some(feature) if feature.enabled => self.matching_tasks(target, settings),
            _ => Vec::new(),
        }
    }

    pub fn all_tasks(&self) -> Vec<Arc<dyn Task>> {
        self.tasks.iter().map(|e| e.value().clone()).collect()
    }

    pub fn status_report(&self) -> Record {
        let mut report = Record::new();
        for entry in self.tasks.iter() {
            let task = entry.value();
            let mut metrics = task.metrics();
            metrics.insert("status".to_string(), crate::value::Value::String(task.status().to_string()));
            report.insert(task.name().to_string(), crate::value::Value::Map(metrics));
        }
        report
    }
}

fn synthetic_agent_feature(device_id: &str) -> FeatureConfig {
    let mut config = FeatureConfig::new(RIO, device_id);
    config.enabled = true;
    config
}
