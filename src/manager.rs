//! Agent orchestrator.
//!
//! Wires every subsystem into one running process: loads Settings, builds
//! the channel stack and the retry backlog, brings up the Module Manager,
//! Scheduler and rule engines, the alert ingest path, the request router,
//! the local admin endpoint and the self-healer, and carries out the
//! startup sequence. `main.rs` owns the process-wide `CancellationToken`
//! and supervises the handful of long-running tasks this module exposes.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::admin;
use crate::alert::{self, Alert, DedupeWindow, InfoBlock};
use crate::background::{
    BacklogHealthCheck, DiskHealthCheck, HealthCheck, SchedulerClock, SchedulerLivenessHealthCheck, SelfHealer,
};
use crate::channel::{
    Broker, Channel, HttpChannel, InProcessBroker, PubSubChannel, RetryChannel, TeamChannel, TeamPolicy,
};
use crate::command::{CommandHandler, Execution};
use crate::config::{defaults, SettingsHandle};
use crate::knowledge::KnowledgeStore;
use crate::notify::{self, NotifyEvent, NotifySender};
use crate::plugin::{FeaturePlugin, ModuleManager, Task};
use crate::router::Router;
use crate::rules::Rule;
use crate::scheduler::Scheduler;
use crate::storage::{backlog, files, ProcessLock};
use crate::value::Record;

pub const HEARTBEAT_TOPIC: &str = "Heartbeat-Channel";
pub const TELEMETRY_TOPIC: &str = "Telemetry-Channel";
pub const ALERT_TOPIC: &str = "RIO-TAD-Alert";

/// The reserved rule id for the optional system rule (remote `setPage`
/// commands addressed to this device).
const SYSTEM_RULE_ID: &str = "system:set-page";

fn mgmt_topic(device_id: &str) -> String {
    format!("RIO-{device_id}-Mgmt")
}

#[derive(Debug, Deserialize)]
struct WireInfoBlock {
    source: String,
    status: String,
    #[serde(rename = "msgType")]
    msg_type: String,
    #[serde(default)]
    codes: Vec<String>,
    #[serde(default)]
    addresses: Vec<String>,
    #[serde(rename = "eventType")]
    event_type: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    parameters: Record,
}

#[derive(Debug, Deserialize)]
struct WireAlert {
    identifier: String,
    sender: String,
    infos: Vec<WireInfoBlock>,
}

fn decode_alert(payload: &[u8]) -> Option<Alert> {
    let wire: WireAlert = serde_json::from_slice(payload).ok()?;
    Some(Alert {
        identifier: wire.identifier,
        sender: wire.sender,
        infos: wire
            .infos
            .into_iter()
            .map(|i| InfoBlock {
                source: i.source,
                status: i.status,
                msg_type: i.msg_type,
                codes: i.codes,
                addresses: i.addresses,
                event_type: i.event_type,
                language: i.language,
                parameters: i.parameters,
            })
            .collect(),
    })
}

/// Everything the running agent needs, built once by [`Agent::bootstrap`]
/// and shared (via `Arc`) by every background task `main.rs` spawns.
pub struct Agent {
    pub settings: SettingsHandle,
    pub knowledge: Arc<KnowledgeStore>,
    pub manager: Arc<ModuleManager>,
    pub scheduler: Arc<Scheduler>,
    pub router: Arc<Router>,
    pub notify_tx: NotifySender,
    data_dir: PathBuf,
    broker: Arc<dyn Broker>,
    heartbeat_channel: Arc<dyn Channel>,
    #[allow(dead_code)]
    telemetry_channel: Arc<dyn Channel>,
    alert_channel: Arc<dyn Channel>,
    mgmt_channel: Arc<RetryChannel>,
    dedupe: DedupeWindow,
    ruleset: Arc<ArcSwap<files::RulesetFile>>,
    scheduler_clock: SchedulerClock,
    self_healer: Arc<SelfHealer>,
    _process_lock: ProcessLock,
}

impl Agent {
    /// Startup sequence: acquire the process lock; load Settings; bring up
    /// Knowledge and the Module Manager; load `crontab.json` into the
    /// Scheduler and `Ruleset.json` for alert-triggered rules; build the
    /// channel stack and recover any backlog left from a previous run;
    /// assemble the request router and self-healer.
    pub async fn bootstrap(
        settings_path: PathBuf,
        data_dir: PathBuf,
        plugins: Vec<Arc<dyn FeaturePlugin>>,
        shutdown: CancellationToken,
    ) -> Result<Arc<Agent>> {
        let process_lock = ProcessLock::acquire(&data_dir).context("failed to acquire process lock")?;

        let settings = SettingsHandle::open(settings_path).context("failed to load settings")?;
        let device_id = settings.get().id.clone();
        let knowledge = Arc::new(KnowledgeStore::new());

        let manager = Arc::new(ModuleManager::new(plugins, settings.clone(), knowledge.clone()));
        manager.bootstrap();

        let scheduler = Arc::new(Scheduler::new());
        let crontab = files::load_crontab(&data_dir.join("crontab.json")).context("failed to load crontab.json")?;
        scheduler.reload_crontab(&crontab.schedules, crontab.commands);

        let ruleset = Arc::new(ArcSwap::from_pointee(
            files::load_ruleset(&data_dir.join("Ruleset.json")).context("failed to load Ruleset.json")?,
        ));
        if manager.all_tasks().iter().any(|t| t.feature_id() == "Display") {
            install_system_rule(&scheduler, &device_id);
        }

        let broker: Arc<dyn Broker> = Arc::new(InProcessBroker::new());

        let heartbeat_channel: Arc<dyn Channel> = PubSubChannel::new(HEARTBEAT_TOPIC, broker.clone(), false);

        let telemetry_pubsub: Arc<dyn Channel> = PubSubChannel::new(TELEMETRY_TOPIC, broker.clone(), false);
        let telemetry_channel: Arc<dyn Channel> = match settings.get().http_ingest_url.clone() {
            Some(url) => {
                let http: Arc<dyn Channel> = Arc::new(HttpChannel::new(url));
                Arc::new(TeamChannel::new(vec![telemetry_pubsub, http], TeamPolicy::Any))
            }
            None => telemetry_pubsub,
        };

        let mgmt_pubsub: Arc<dyn Channel> = PubSubChannel::new(mgmt_topic(&device_id), broker.clone(), true);
        let (cumulation_tx, mut cumulation_rx) = mpsc::unbounded_channel();
        let mgmt_channel = Arc::new(RetryChannel::new(mgmt_pubsub).with_cumulation_sink(cumulation_tx));

        let alert_channel: Arc<dyn Channel> = PubSubChannel::new(ALERT_TOPIC, broker.clone(), true);

        let backlog_dir = data_dir.join("backlog");
        let recovered = backlog::recover_on_boot(&backlog_dir).context("failed to recover retry backlog")?;
        if !recovered.is_empty() {
            info!(count = recovered.len(), "recovered retry backlog from previous run");
            mgmt_channel.recover(recovered).await;
        }
        tokio::spawn({
            let backlog_dir = backlog_dir.clone();
            async move {
                while let Some(snapshot) = cumulation_rx.recv().await {
                    if let Err(e) = backlog::persist_cumulated(&backlog_dir, &snapshot) {
                        warn!(error = %e, "failed to persist retry backlog snapshot");
                    }
                }
            }
        });

        let (notify_tx, _notify_rx) = notify::channel();

        let router = Arc::new(Router {
            manager: manager.clone(),
            scheduler: scheduler.clone(),
            knowledge: knowledge.clone(),
            settings: settings.clone(),
            shutdown,
            ruleset: ruleset.clone(),
            data_dir: data_dir.clone(),
            http_client: reqwest::Client::new(),
        });

        let scheduler_clock = SchedulerClock::new();
        let checks: Vec<Box<dyn HealthCheck>> = vec![
            Box::new(BacklogHealthCheck::new(mgmt_topic(&device_id), defaults::RETRY_BACKLOG_UNHEALTHY_THRESHOLD, {
                let mgmt = mgmt_channel.clone();
                Arc::new(move || mgmt.holding())
            })),
            Box::new(SchedulerLivenessHealthCheck::new(
                scheduler_clock.clone(),
                defaults::SCHEDULER_STALL_THRESHOLD_SECS,
            )),
            Box::new(DiskHealthCheck::new(data_dir.to_string_lossy().to_string())),
        ];
        let self_healer = Arc::new(SelfHealer::new(checks));

        Ok(Arc::new(Agent {
            settings,
            knowledge,
            manager,
            scheduler,
            router,
            notify_tx,
            data_dir,
            broker,
            heartbeat_channel,
            telemetry_channel,
            alert_channel,
            mgmt_channel,
            dedupe: DedupeWindow::new(),
            ruleset,
            scheduler_clock,
            self_healer,
            _process_lock: process_lock,
        }))
    }

    /// Runs the scheduler's one-tick-per-second loop and dispatches each
    /// Execution it produces until `cancel` fires.
    pub async fn run_scheduler(self: Arc<Self>, cancel: CancellationToken) {
        let (tx, mut rx) = mpsc::channel::<Execution>(256);
        let scheduler = self.scheduler.clone();
        let knowledge = self.knowledge.clone();
        let device_id = self.settings.get().id.clone();
        let clock = self.scheduler_clock.clone();
        let tick_cancel = cancel.clone();
        tokio::spawn(async move {
            scheduler.run(knowledge, device_id, tx, clock, tick_cancel).await;
        });

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                received = rx.recv() => {
                    match received {
                        Some(execution) => self.dispatch_execution(execution).await,
                        None => return,
                    }
                }
            }
        }
    }

    /// Publishes `{Timestamp, Id}` on `Heartbeat-Channel` every
    /// [`defaults::HEARTBEAT_INTERVAL_SECS`].
    pub async fn run_heartbeat(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(Duration::from_secs(defaults::HEARTBEAT_INTERVAL_SECS));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = interval.tick() => {
                    let payload = serde_json::json!({
                        "Timestamp": chrono::Utc::now().to_rfc3339(),
                        "Id": self.settings.get().id,
                    });
                    let result = self.heartbeat_channel.send(payload.to_string().as_bytes()).await;
                    if !result.is_ok() {
                        warn!(?result, "heartbeat publish did not succeed");
                    }
                }
            }
        }
    }

    /// Consumes `RIO-TAD-Alert` payloads: decode, dedupe/ingest into
    /// Knowledge, and (when the sender is gated in) instantiate ruleset
    /// entries against the until-true/until-false engines.
    pub async fn run_alert_ingest(self: Arc<Self>, cancel: CancellationToken) {
        let mut inbound = self.alert_channel.received();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                received = inbound.recv() => {
                    match received {
                        Ok(payload) => self.handle_alert_payload(&payload).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "alert channel receiver lagged behind publisher");
                        }
                        Err(broadcast::error::RecvError::Closed) => return,
                    }
                }
            }
        }
    }

    /// Binds and runs the local admin endpoint if Settings enables it;
    /// otherwise idles until shutdown (so the supervisor's task set still
    /// has a uniform cancellable handle for this slot).
    pub async fn run_admin(self: Arc<Self>, cancel: CancellationToken) -> Result<()> {
        let settings = self.settings.get();
        if !settings.admin_enabled {
            info!("local admin endpoint disabled in settings");
            cancel.cancelled().await;
            return Ok(());
        }
        let addr = format!("0.0.0.0:{}", settings.admin_port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind local admin endpoint on {addr}"))?;
        info!(%addr, "local admin endpoint listening");
        admin::run(listener, self.router.clone(), self.notify_tx.clone(), cancel).await;
        Ok(())
    }

    pub async fn run_self_healer(self: Arc<Self>, cancel: CancellationToken) {
        self.self_healer.clone().run(cancel).await;
    }

    async fn dispatch_execution(&self, execution: Execution) {
        let target = execution.target.clone();
        let task = self
            .manager
            .all_tasks()
            .into_iter()
            .find(|t| t.feature_id() == target || target == "RIO");
        let Some(task) = task else {
            warn!(target = %execution.target, command = %execution.command, "no matching task for fired execution");
            return;
        };

        let label = execution.label();
        let id = uuid::Uuid::new_v4().to_string();
        let mut response = Record::new();
        let error = match task.run(&execution, &mut response).await {
            Ok(()) => "none".to_string(),
            Err(e) => {
                warn!(execution = %label, error = %e, "fired execution failed");
                e.to_string()
            }
        };
        let _ = self.notify_tx.send(NotifyEvent::ExecutionResult { id, execution: label, error });
    }

    async fn handle_alert_payload(&self, payload: &[u8]) {
        let Some(alert) = decode_alert(payload) else {
            warn!("discarding malformed alert payload");
            return;
        };
        let local_id = self.settings.get().id.clone();
        let Some(overlay) = alert::ingest(&alert, &local_id, &self.dedupe, &self.knowledge) else {
            return;
        };
        self.scheduler.update(&overlay);

        let ruleset = self.ruleset.load_full();

        // Source logic applies rules only when the sender is in the
        // device list or is the agent itself; do not broaden this.
        if alert.sender != local_id && !ruleset.devices.iter().any(|d| d == &alert.sender) {
            return;
        }

        for entry in &ruleset.ruleset {
            let Some(actions) = ruleset.actions.get(&entry.actions) else {
                warn!(preset = %entry.actions, "ruleset entry references unknown action preset");
                continue;
            };
            let time_trigger = files::parse_duration(&entry.time_trigger);
            let base_id = format!("{}:{}", entry.id, alert.identifier);
            match Rule::new(format!("{base_id}:until-true"), entry.expression.clone(), actions.clone(), time_trigger) {
                Ok(rule) => self.scheduler.add_until_true(rule),
                Err(e) => warn!(rule = %entry.id, error = %e, "ruleset expression rejected"),
            }
            match Rule::new(format!("{base_id}:until-false"), entry.expression.clone(), actions.clone(), time_trigger) {
                Ok(rule) => self.scheduler.add_until_false(rule),
                Err(e) => warn!(rule = %entry.id, error = %e, "ruleset expression rejected"),
            }
        }
    }

    pub fn data_dir(&self) -> &std::path::Path {
        &self.data_dir
    }

    #[cfg(test)]
    pub fn broker(&self) -> Arc<dyn Broker> {
        self.broker.clone()
    }
}

/// The optional system rule: fires when a remote command sets
/// `command = "setPage"` for an address list containing this device,
/// targeting the local display task. Appended to the periodic pass only
/// when a task with feature id `"Display"` is actually registered.
fn install_system_rule(scheduler: &Scheduler, device_id: &str) {
    let expression = format!(r#"command = "setPage" AND addresses.Contains("{device_id}")"#);
    let actions = vec![Execution::new("Display", "setPage", Record::new())];
    match Rule::new(SYSTEM_RULE_ID, expression, actions, Duration::from_secs(0)) {
        Ok(rule) => scheduler.periodic.insert(rule),
        Err(e) => warn!(error = %e, "system rule expression rejected, setPage routing disabled"),
    }
}
