//! Plugin descriptor and Task lifecycle traits.
//!
//! Out-of-process/dynamic plugin loading is replaced by a compile-time
//! registry keyed by type name: each plugin registers a [`FeaturePlugin`]
//! impl, and "discovery" becomes config-driven selection from that
//! registry rather than scanning a directory of shared objects.

mod registry;

pub use registry::ModuleManager;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::command::{Command, CommandHandler};
use crate::config::{FeatureConfig, Settings};
use crate::error::LifecycleError;
use crate::value::Value;

/// One configuration property a plugin declares, with its type name (per
/// the parameter-type grammar) and default value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyDecl {
    pub name: String,
    pub type_name: String,
    pub default: Value,
}

/// Static metadata for a plugin type.
#[derive(Debug, Clone)]
pub struct FeatureDescriptor {
    pub name: String,
    pub version: String,
    pub properties: Vec<PropertyDecl>,
    pub commands: Vec<Command>,
}

impl FeatureDescriptor {
    /// Builds a disabled Feature config carrying this plugin's declared
    /// property defaults — used when Settings has no Feature bound to a
    /// discovered plugin yet.
    pub fn default_feature_config(&self, id: &str) -> FeatureConfig {
        let mut config = FeatureConfig::new(self.name.clone(), id);
        config.enabled = false;
        config.version = self.version.clone();
        for prop in &self.properties {
            config.properties.insert(prop.name.clone(), prop.default.clone());
        }
        config
    }
}

/// A plugin type. Given Settings plus one bound Feature config, produces
/// zero or more running [`Task`]s.
pub trait FeaturePlugin: Send + Sync {
    fn descriptor(&self) -> &FeatureDescriptor;

    fn create_tasks(&self, settings: &Settings, config: &FeatureConfig) -> Vec<Arc<dyn Task>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Stopped,
    Running,
    Failed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Stopped => "stopped",
            TaskStatus::Running => "running",
            TaskStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// A running instance of a [`FeaturePlugin`]. Owned by the
/// [`ModuleManager`]; created on enable, destroyed on disable.
#[async_trait]
pub trait Task: CommandHandler {
    fn name(&self) -> &str;
    fn version(&self) -> &str;
    /// The Feature.id this Task was instantiated from.
    fn feature_id(&self) -> &str;
    fn status(&self) -> TaskStatus;
    fn metrics(&self) -> crate::value::Record;

    async fn start(&self) -> Result<(), LifecycleError>;
    async fn stop(&self) -> Result<(), LifecycleError>;
}
