//! Full-stack integration test: boots a real [`Agent`] against a
//! temp-directory settings/crontab/Ruleset layout with one in-test plugin,
//! then drives it the way a remote hub would — through the request router
//! and the scheduler — instead of poking at individual subsystems.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use rio_agent::command::{CommandHandler, Execution};
use rio_agent::config::{save, BrokerConfig, FeatureConfig, Settings};
use rio_agent::error::LifecycleError;
use rio_agent::plugin::{FeatureDescriptor, FeaturePlugin, Task, TaskStatus};
use rio_agent::router::{Message, MessageType};
use rio_agent::storage::files::CrontabFile;
use rio_agent::value::{Record, Value};

struct SirenTask {
    id: String,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl CommandHandler for SirenTask {
    async fn run(&self, _execution: &Execution, response: &mut Record) -> Result<(), LifecycleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        response.insert("sounded".to_string(), Value::Bool(true));
        Ok(())
    }
}

#[async_trait]
impl Task for SirenTask {
    fn name(&self) -> &str {
        "Siren"
    }
    fn version(&self) -> &str {
        "1.0"
    }
    fn feature_id(&self) -> &str {
        &self.id
    }
    fn status(&self) -> TaskStatus {
        TaskStatus::Running
    }
    fn metrics(&self) -> Record {
        Record::new()
    }
    async fn start(&self) -> Result<(), LifecycleError> {
        Ok(())
    }
    async fn stop(&self) -> Result<(), LifecycleError> {
        Ok(())
    }
}

struct SirenPlugin {
    descriptor: FeatureDescriptor,
    calls: Arc<AtomicUsize>,
}

impl FeaturePlugin for SirenPlugin {
    fn descriptor(&self) -> &FeatureDescriptor {
        &self.descriptor
    }
    fn create_tasks(&self, _settings: &Settings, config: &FeatureConfig) -> Vec<Arc<dyn Task>> {
        vec![Arc::new(SirenTask {
            id: config.id.clone(),
            calls: self.calls.clone(),
        })]
    }
}

fn siren_plugin(calls: Arc<AtomicUsize>) -> Arc<dyn FeaturePlugin> {
    Arc::new(SirenPlugin {
        descriptor: FeatureDescriptor {
            name: "Siren".to_string(),
            version: "1.0".to_string(),
            properties: vec![],
            commands: vec![rio_agent::command::Command::new(
                "Siren",
                "sound",
                vec![],
            )],
        },
        calls,
    })
}

fn write_settings(path: &std::path::Path) {
    let settings = Settings {
        id: "D01".to_string(),
        broker: BrokerConfig::default(),
        http_ingest_url: None,
        proxy: None,
        location: None,
        admin_enabled: false,
        admin_port: 4005,
        features: vec![FeatureConfig {
            enabled: true,
            id: "siren1".to_string(),
            type_: "Siren".to_string(),
            version: "1.0".to_string(),
            properties: Record::new(),
        }],
    };
    save(path, &settings).unwrap();
}

#[tokio::test]
async fn bootstrap_instantiates_enabled_task_and_exposes_it_to_the_router() {
    let dir = tempfile::tempdir().unwrap();
    let settings_path = dir.path().join("settings.json");
    write_settings(&settings_path);

    let calls = Arc::new(AtomicUsize::new(0));
    let plugins = vec![siren_plugin(calls.clone())];
    let cancel = CancellationToken::new();

    let agent = rio_agent::manager::Agent::bootstrap(settings_path, dir.path().to_path_buf(), plugins, cancel)
        .await
        .unwrap();

    let tasks = agent.manager.all_tasks();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].feature_id(), "siren1");

    let status = agent
        .router
        .dispatch(&Message::request(MessageType::Status, "hub", Record::new()))
        .await;
    assert!(status.parameters.contains_key("Siren"));

    let exec_params = Record::from([
        ("target".to_string(), Value::String("Siren".to_string())),
        ("action".to_string(), Value::String("sound".to_string())),
    ]);
    let exec_reply = agent
        .router
        .dispatch(&Message::request(MessageType::Exec, "hub", exec_params))
        .await;
    assert_eq!(exec_reply.parameters.get("sounded"), Some(&Value::Bool(true)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let disable_params = Record::from([("target".to_string(), Value::String("Siren".to_string()))]);
    agent
        .router
        .dispatch(&Message::request(MessageType::Disable, "hub", disable_params))
        .await;
    assert!(!agent.manager.find_feature("Siren").unwrap().enabled);
}

#[tokio::test]
async fn crontab_rule_fires_through_the_live_scheduler() {
    let dir = tempfile::tempdir().unwrap();
    let settings_path = dir.path().join("settings.json");
    write_settings(&settings_path);

    let mut commands = BTreeMap::new();
    commands.insert(
        "soundSiren".to_string(),
        Execution::new("Siren", "sound", Record::new()),
    );
    let crontab = CrontabFile {
        schedules: vec!["* * * * * * * soundSiren".to_string()],
        commands,
    };
    std::fs::write(
        dir.path().join("crontab.json"),
        serde_json::to_string(&crontab).unwrap(),
    )
    .unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let plugins = vec![siren_plugin(calls.clone())];
    let cancel = CancellationToken::new();

    let agent = rio_agent::manager::Agent::bootstrap(
        settings_path,
        dir.path().to_path_buf(),
        plugins,
        cancel.clone(),
    )
    .await
    .unwrap();

    let scheduler_cancel = cancel.clone();
    let handle = tokio::spawn({
        let agent = agent.clone();
        async move { agent.run_scheduler(scheduler_cancel).await }
    });

    tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
    cancel.cancel();
    handle.await.unwrap();

    assert!(calls.load(Ordering::SeqCst) >= 1, "expected the cron rule to fire at least once");
}
