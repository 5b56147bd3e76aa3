//! The parse → reflect → delay-dispatch → run pipeline.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use super::{parse, Command, Execution};
use crate::error::{CommandError, LifecycleError};
use crate::notify::{NotifyEvent, NotifySender};
use crate::value::{Record, Value};

/// A plugin's `run` entry point for one declared [`Command`]. Implemented
/// by each Task — one small trait, many small impls.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn run(&self, execution: &Execution, response: &mut Record) -> Result<(), LifecycleError>;
}

/// Runs the full pipeline:
/// 1. parse `input` against `command`'s declared parameters;
/// 2. reflect the invocation into `response["command"]`;
/// 3. if parameters contain an integer `delay > 0`, schedule `run` on a
///    worker and acknowledge immediately with a correlation id, publishing
///    a post-completion notification tagged with that id later;
/// 4. otherwise run synchronously.
pub async fn execute(
    command: &Command,
    handler: Arc<dyn CommandHandler>,
    input: &Record,
    response: &mut Record,
    notify: NotifySender,
) -> Result<(), CommandError> {
    let parsed = parse(&command.parameters, input)?;

    let mut reflected = Record::new();
    reflected.insert("target".to_string(), Value::String(command.target.clone()));
    reflected.insert("action".to_string(), Value::String(command.name.clone()));
    for (k, v) in &parsed {
        reflected.insert(k.clone(), v.clone());
    }
    response.insert("command".to_string(), Value::Map(reflected));

    let execution = Execution::new(command.target.clone(), command.name.clone(), parsed);

    if let Some(delay_ms) = execution.delay_millis() {
        let label = execution.label();
        let id = uuid::Uuid::new_v4().to_string();
        response.insert(
            "execution".to_string(),
            Value::String(format!("{label} scheduled")),
        );
        response.insert("executionId".to_string(), Value::String(id.clone()));
        tokio::spawn(async move {
            sleep(Duration::from_millis(delay_ms)).await;
            let mut discard = Record::new();
            let error = match handler.run(&execution, &mut discard).await {
                Ok(()) => "none".to_string(),
                Err(e) => e.to_string(),
            };
            let _ = notify.send(NotifyEvent::ExecutionResult {
                id,
                execution: label,
                error,
            });
        });
        return Ok(());
    }

    if let Err(e) = handler.run(&execution, response).await {
        response.insert("error".to_string(), Value::String(e.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{ParamType, Parameter};
    use crate::notify;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CommandHandler for CountingHandler {
        async fn run(&self, _execution: &Execution, response: &mut Record) -> Result<(), LifecycleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            response.insert("ran".to_string(), Value::Bool(true));
            Ok(())
        }
    }

    #[tokio::test]
    async fn synchronous_execution_runs_immediately() {
        let command = Command::new(
            "RIO",
            "ping",
            vec![Parameter::new("label", ParamType::String, false)],
        );
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(CountingHandler { calls: calls.clone() });
        let (tx, _rx) = notify::channel();
        let input = Record::from([("label".to_string(), Value::String("hi".into()))]);
        let mut response = Record::new();

        execute(&command, handler, &input, &mut response, tx).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(response.get("ran"), Some(&Value::Bool(true)));
        assert!(response.contains_key("command"));
    }

    #[tokio::test]
    async fn delayed_execution_acknowledges_then_notifies() {
        let command = Command::new(
            "RIO",
            "ping",
            vec![Parameter::new("delay", ParamType::Int, false)],
        );
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(CountingHandler { calls: calls.clone() });
        let (tx, mut rx) = notify::channel();
        let input = Record::from([("delay".to_string(), Value::Int(10))]);
        let mut response = Record::new();

        execute(&command, handler, &input, &mut response, tx).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let ack = response.get("execution").unwrap().as_str().unwrap().to_string();
        assert!(ack.ends_with("scheduled"));

        let event = rx.recv().await.unwrap();
        match event {
            NotifyEvent::ExecutionResult { error, .. } => assert_eq!(error, "none"),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_required_parameter_short_circuits_before_run() {
        let command = Command::new(
            "RIO",
            "ping",
            vec![Parameter::new("label", ParamType::String, true)],
        );
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(CountingHandler { calls: calls.clone() });
        let (tx, _rx) = notify::channel();
        let mut response = Record::new();

        let err = execute(&command, handler, &Record::new(), &mut response, tx)
            .await
            .unwrap_err();

        assert_eq!(err, CommandError::ParameterMissing("label".into()));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
