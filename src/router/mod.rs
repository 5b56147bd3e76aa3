//! Request router: parses and dispatches management messages arriving
//! over the mgmt channel or the local admin endpoint.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::command::{CommandHandler, Execution};
use crate::config::SettingsHandle;
use crate::knowledge::KnowledgeStore;
use crate::plugin::{ModuleManager, Task};
use crate::scheduler::Scheduler;
use crate::storage::files::{self, RulesetFile};
use crate::value::{Record, Value};

/// The closed vocabulary of request verbs the router understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Status,
    Update,
    Schedule,
    Config,
    Enable,
    Disable,
    Start,
    Stop,
    List,
    Help,
    Exec,
    Shutdown,
    Ruleset,
    Name,
    Error,
}

/// `{type, source, id?, parameters, isValid}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "Type")]
    pub type_: MessageType,
    #[serde(rename = "Source")]
    pub source: String,
    #[serde(rename = "Id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "Parameters", default)]
    pub parameters: Record,
    #[serde(rename = "IsValid", default = "default_true")]
    pub is_valid: bool,
}

fn default_true() -> bool {
    true
}

impl Message {
    pub fn request(type_: MessageType, source: impl Into<String>, parameters: Record) -> Self {
        Message {
            type_,
            source: source.into(),
            id: None,
            parameters,
            is_valid: true,
        }
    }

    fn response(&self, local_id: &str, parameters: Record) -> Message {
        Message {
            type_: self.type_,
            source: local_id.to_string(),
            id: self.id.clone(),
            parameters,
            is_valid: true,
        }
    }

    fn error(local_id: &str, id: Option<String>, text: &str) -> Message {
        Message {
            type_: MessageType::Error,
            source: local_id.to_string(),
            id,
            parameters: Record::from([("error".to_string(), Value::String(text.to_string()))]),
            is_valid: false,
        }
    }

    fn targets(&self) -> Vec<String> {
        match self.parameters.get("target") {
            Some(Value::String(s)) => vec![s.clone()],
            Some(Value::List(items)) => items.iter().map(ToString::to_string).collect(),
            _ => Vec::new(),
        }
    }
}

/// Bundles everything the router needs to dispatch a request against the
/// live agent state.
pub struct Router {
    pub manager: Arc<ModuleManager>,
    pub scheduler: Arc<Scheduler>,
    pub knowledge: Arc<KnowledgeStore>,
    pub settings: SettingsHandle,
    /// Cancelled once a two-step `shutdown` request is confirmed, so the
    /// process supervisor can unwind every background task.
    pub shutdown: CancellationToken,
    /// The live `Ruleset.json` document, shared with `Agent`'s alert-ingest
    /// path so a `ruleset` replace takes effect for the next inbound alert.
    pub ruleset: Arc<ArcSwap<RulesetFile>>,
    /// Directory holding `Ruleset.json` and the `media/` folder `update`
    /// downloads into.
    pub data_dir: PathBuf,
    pub http_client: Client,
}

impl Router {
    /// `source == localId` is a no-op (echo); every response carries
    /// `source = localId` and `isValid = true`.
    pub async fn dispatch(&self, message: &Message) -> Message {
        let local_id = self.settings.get().id.clone();
        if message.source == local_id {
            return message.clone();
        }

        match message.type_ {
            MessageType::Status => self.handle_status(message, &local_id),
            MessageType::Config => self.handle_config(message, &local_id),
            MessageType::Enable => self.handle_lifecycle(message, &local_id, |m, t| m.enable(t)),
            MessageType::Disable => self.handle_lifecycle(message, &local_id, |m, t| m.disable(t)),
            MessageType::Start => self.handle_async_lifecycle(message, &local_id, true).await,
            MessageType::Stop => self.handle_async_lifecycle(message, &local_id, false).await,
            MessageType::List => self.handle_list(message, &local_id),
            MessageType::Help => self.handle_help(message, &local_id),
            MessageType::Shutdown => self.handle_shutdown(message, &local_id).await,
            MessageType::Name => self.handle_name(message, &local_id),
            MessageType::Schedule => self.handle_schedule(message, &local_id).await,
            MessageType::Exec => self.handle_exec(message, &local_id).await,
            MessageType::Update => self.handle_update(message, &local_id).await,
            MessageType::Ruleset => self.handle_ruleset(message, &local_id),
            MessageType::Error => message.clone(),
        }
    }

    fn handle_status(&self, message: &Message, local_id: &str) -> Message {
        let mut params = self.manager.status_report();
        params.insert("device".to_string(), Value::String(local_id.to_string()));
        message.response(local_id, params)
    }

    fn handle_config(&self, message: &Message, local_id: &str) -> Message {
        let targets = message.targets();
        let Some(target) = targets.first() else {
            return Message::error(local_id, message.id.clone(), "config requires a target");
        };
        if let Some(properties) = message.parameters.get("properties").and_then(Value::as_map) {
            self.manager.configure(target, &properties.clone());
            message.response(local_id, Record::new())
        } else {
            match self.manager.find_feature(target) {
                Some(feature) => message.response(local_id, feature.properties),
                None => Message::error(local_id, message.id.clone(), "unknown target"),
            }
        }
    }

    fn handle_lifecycle(&self, message: &Message, local_id: &str, op: impl Fn(&ModuleManager, &str)) -> Message {
        for target in message.targets() {
            op(&self.manager, &target);
        }
        message.response(local_id, Record::new())
    }

    async fn handle_async_lifecycle(&self, message: &Message, local_id: &str, start: bool) -> Message {
        for target in message.targets() {
            if start {
                self.manager.start(&target).await;
            } else {
                self.manager.stop(&target).await;
            }
        }
        message.response(local_id, Record::new())
    }

    fn handle_list(&self, message: &Message, local_id: &str) -> Message {
        let settings = self.settings.get();
        let features: Vec<Value> = settings.features.iter().map(|f| Value::String(f.id.clone())).collect();
        let tasks: Vec<Value> = self
            .manager
            .all_tasks()
            .iter()
            .map(|t| Value::String(t.name().to_string()))
            .collect();
        let drivers: Vec<Value> = self.manager.driver_types().into_iter().map(Value::String).collect();
        let mut out = Record::new();
        out.insert("features".to_string(), Value::List(features));
        out.insert("tasks".to_string(), Value::List(tasks));
        out.insert("drivers".to_string(), Value::List(drivers));
        message.response(local_id, out)
    }

    fn handle_help(&self, message: &Message, local_id: &str) -> Message {
        let targets = message.targets();
        let mut commands = Vec::new();
        if let Some(target) = targets.first() {
            for t in self.manager.all_tasks() {
                if t.feature_id() == target {
                    commands.push(Value::String(t.name().to_string()));
                }
            }
        }
        message.response(local_id, Record::from([("commands".to_string(), Value::List(commands))]))
    }

    async fn handle_shutdown(&self, message: &Message, local_id: &str) -> Message {
        let force = message.parameters.get("force").and_then(Value::as_bool).unwrap_or(false);
        let confirmed = self.manager.shutdown(force).await;
        if confirmed {
            self.shutdown.cancel();
        }
        let status = if confirmed { "Confirmed" } else { "Requested" };
        message.response(local_id, Record::from([("Status".to_string(), Value::String(status.to_string()))]))
    }

    fn handle_name(&self, message: &Message, local_id: &str) -> Message {
        let Some(new_name) = message.parameters.get("name").and_then(Value::as_str) else {
            return Message::error(local_id, message.id.clone(), "name requires a 'name' parameter");
        };
        let new_name = new_name.to_string();
        self.settings.mutate(|s| s.id = new_name.clone());
        message.response(&new_name, Record::new())
    }

    async fn handle_schedule(&self, message: &Message, local_id: &str) -> Message {
        let Some(action) = message.parameters.get("action").and_then(Value::as_str) else {
            return Message::error(local_id, message.id.clone(), "schedule requires an 'action'");
        };
        match action {
            "reload" => {
                let crontab = match files::load_crontab(&self.data_dir.join("crontab.json")) {
                    Ok(c) => c,
                    Err(e) => return Message::error(local_id, message.id.clone(), &format!("failed to reload crontab.json: {e}")),
                };
                self.scheduler.reload_crontab(&crontab.schedules, crontab.commands);
                let count = self.scheduler.periodic.len();
                message.response(local_id, Record::from([("ruleCount".to_string(), Value::Int(count as i64))]))
            }
            "debug" => {
                let count = self.scheduler.periodic.len();
                message.response(local_id, Record::from([("ruleCount".to_string(), Value::Int(count as i64))]))
            }
            "get" => {
                let name = message.parameters.get("name").and_then(Value::as_str).unwrap_or_default();
                match self.knowledge.get(name) {
                    Some(v) => message.response(local_id, Record::from([(name.to_string(), v)])),
                    None => Message::error(local_id, message.id.clone(), "unknown variable"),
                }
            }
            "set" => {
                let name = message.parameters.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
                if let Some(value) = message.parameters.get("value").cloned() {
                    self.knowledge.set("schedule", &Record::from([(name, value)]));
                }
                message.response(local_id, Record::new())
            }
            name => self.handle_schedule_command(name, message, local_id).await,
        }
    }

    /// `schedule <command>`: runs a `crontab.json`-declared Execution by
    /// name immediately, the same way a matching cron line firing would.
    async fn handle_schedule_command(&self, name: &str, message: &Message, local_id: &str) -> Message {
        let Some(execution) = self.scheduler.command(name) else {
            return Message::error(local_id, message.id.clone(), "unknown schedule sub-command");
        };
        let Some(task) = self.resolve_task(&execution.target) else {
            return Message::error(local_id, message.id.clone(), "no matching command/task");
        };
        let mut response = Record::new();
        if let Err(e) = task.run(&execution, &mut response).await {
            warn!(error = %e, "scheduled command failed");
            return Message::error(local_id, message.id.clone(), &e.to_string());
        }
        message.response(local_id, response)
    }

    /// Resolves `target` (a plugin type or a Feature.id) to its Feature's
    /// actual id via Settings, then finds the running Task registered under
    /// that id. `"RIO"` matches any task since system commands have no
    /// Feature of their own.
    fn resolve_task(&self, target: &str) -> Option<Arc<dyn Task>> {
        let feature_id = self.manager.find_feature(target).map(|f| f.id).unwrap_or_else(|| target.to_string());
        self.manager.all_tasks().into_iter().find(|t| t.feature_id() == feature_id || target == "RIO")
    }

    async fn handle_exec(&self, message: &Message, local_id: &str) -> Message {
        let Some(action) = message.parameters.get("action").and_then(Value::as_str) else {
            return Message::error(local_id, message.id.clone(), "exec requires an 'action'");
        };
        let target = message.targets().into_iter().next().unwrap_or_else(|| "RIO".to_string());

        let Some(command) = self.manager.find_command(&target, action) else {
            return Message::error(local_id, message.id.clone(), "no matching command/task");
        };
        let Some(task) = self.resolve_task(&target) else {
            return Message::error(local_id, message.id.clone(), "no matching command/task");
        };

        let parsed = match crate::command::parse(&command.parameters, &message.parameters) {
            Ok(p) => p,
            Err(e) => return Message::error(local_id, message.id.clone(), &e.to_string()),
        };
        let execution = Execution::new(command.target.clone(), command.name.clone(), parsed);
        let mut response = Record::new();
        if let Err(e) = task.run(&execution, &mut response).await {
            warn!(error = %e, "exec command failed");
            return Message::error(local_id, message.id.clone(), &e.to_string());
        }
        message.response(local_id, response)
    }

    /// `ruleset` with a `document` parameter replaces the persisted rule
    /// set (translations, action presets, rule entries); without one it
    /// returns the current document. Takes effect for the next inbound
    /// alert (see `Agent::handle_alert_payload`).
    fn handle_ruleset(&self, message: &Message, local_id: &str) -> Message {
        let Some(document) = message.parameters.get("document").and_then(Value::as_map) else {
            let current = self.ruleset.load_full();
            let json = serde_json::to_value(&*current).unwrap_or(serde_json::Value::Null);
            let record = Value::from(json).as_map().cloned().unwrap_or_default();
            return message.response(local_id, record);
        };
        let json = serde_json::Value::from(Value::Map(document.clone()));
        let doc: RulesetFile = match serde_json::from_value(json) {
            Ok(d) => d,
            Err(e) => return Message::error(local_id, message.id.clone(), &format!("invalid ruleset document: {e}")),
        };
        if let Err(e) = files::save_ruleset(&self.data_dir.join("Ruleset.json"), &doc) {
            return Message::error(local_id, message.id.clone(), &format!("failed to persist Ruleset.json: {e}"));
        }
        self.ruleset.store(Arc::new(doc));
        message.response(local_id, Record::from([("Status".to_string(), Value::String("Replaced".to_string()))]))
    }

    /// `update`: per-entry media actions. `ADD` downloads `url` to
    /// `filename` under `<data_dir>/media`; `DELETE` removes that file.
    /// Reports one `CONFIRM`/`ERROR` result per entry.
    async fn handle_update(&self, message: &Message, local_id: &str) -> Message {
        let entries = message.parameters.get("entries").and_then(Value::as_list).map(<[Value]>::to_vec).unwrap_or_default();
        let mut results = Vec::with_capacity(entries.len());
        for entry in &entries {
            results.push(Value::Map(self.apply_update_entry(entry).await));
        }
        message.response(local_id, Record::from([("results".to_string(), Value::List(results))]))
    }

    async fn apply_update_entry(&self, entry: &Value) -> Record {
        let Some(fields) = entry.as_map() else {
            return media_result("", Err("entry is not an object".to_string()));
        };
        let filename = fields.get("filename").and_then(Value::as_str).unwrap_or_default();
        let outcome = match fields.get("action").and_then(Value::as_str) {
            Some("ADD") => match fields.get("url").and_then(Value::as_str) {
                Some(url) => self.download_media(url, filename).await,
                None => Err("ADD requires a 'url'".to_string()),
            },
            Some("DELETE") => self.delete_media(filename),
            Some(other) => Err(format!("unknown media action '{other}'")),
            None => Err("entry requires an 'action'".to_string()),
        };
        media_result(filename, outcome)
    }

    fn media_path(&self, filename: &str) -> PathBuf {
        let name = Path::new(filename).file_name().map(|s| s.to_os_string()).unwrap_or_else(|| filename.into());
        self.data_dir.join("media").join(name)
    }

    async fn download_media(&self, url: &str, filename: &str) -> Result<(), String> {
        let response = self.http_client.get(url).send().await.map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status()));
        }
        let bytes = response.bytes().await.map_err(|e| e.to_string())?;
        let path = self.media_path(filename);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        std::fs::write(&path, &bytes).map_err(|e| e.to_string())
    }

    fn delete_media(&self, filename: &str) -> Result<(), String> {
        std::fs::remove_file(self.media_path(filename)).map_err(|e| e.to_string())
    }
}

fn media_result(filename: &str, outcome: Result<(), String>) -> Record {
    match outcome {
        Ok(()) => Record::from([
            ("filename".to_string(), Value::String(filename.to_string())),
            ("status".to_string(), Value::String("CONFIRM".to_string())),
        ]),
        Err(e) => Record::from([
            ("filename".to_string(), Value::String(filename.to_string())),
            ("status".to_string(), Value::String("ERROR".to_string())),
            ("error".to_string(), Value::String(e)),
        ]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_with_matching_source_is_an_echo() {
        let msg = Message::request(MessageType::Status, "D01", Record::new());
        assert_eq!(msg.source, "D01");
    }

    #[test]
    fn targets_accepts_string_or_list() {
        let mut params = Record::new();
        params.insert("target".to_string(), Value::String("Mail".to_string()));
        let msg = Message::request(MessageType::Enable, "hub", params);
        assert_eq!(msg.targets(), vec!["Mail".to_string()]);
    }
}
