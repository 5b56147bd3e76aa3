//! Process-wide notification bus.
//!
//! Three kinds of fire-and-forget events fan out to whoever cares —
//! completed delayed executions, lifecycle changes, and telemetry — and
//! the admin endpoint pushes a rendering of each to every connected
//! client. Modelled as message passing through a bounded broadcast
//! channel rather than a thread-unsafe observer list.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::value::Record;

/// Default capacity for the notify broadcast channel. Slow admin clients
/// that fall behind see [`broadcast::error::RecvError::Lagged`] and simply
/// miss old notifications rather than stall the publisher.
pub const NOTIFY_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind")]
pub enum NotifyEvent {
    /// A delayed execution finished running.
    ExecutionResult {
        id: String,
        execution: String,
        error: String,
    },
    /// A Manager-level lifecycle change (enable/disable/start/stop/...).
    Manager { message: String },
    /// Plugin-originated telemetry, forwarded for admin-client visibility.
    Telemetry { feature: String, data: Record },
}

impl NotifyEvent {
    /// Plain-text rendering pushed to interactive admin clients.
    pub fn render(&self) -> String {
        match self {
            NotifyEvent::ExecutionResult { id, execution, error } => {
                format!("[Execution Result {id}] {execution}: {error}")
            }
            NotifyEvent::Manager { message } => format!("[Manager] {message}"),
            NotifyEvent::Telemetry { feature, data } => {
                format!("[telemetry] {feature} {data:?}")
            }
        }
    }
}

pub type NotifySender = broadcast::Sender<NotifyEvent>;
pub type NotifyReceiver = broadcast::Receiver<NotifyEvent>;

pub fn channel() -> (NotifySender, NotifyReceiver) {
    broadcast::channel(NOTIFY_CHANNEL_CAPACITY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_delivers_to_all_subscribers() {
        let (tx, mut rx1) = channel();
        let mut rx2 = tx.subscribe();
        tx.send(NotifyEvent::Manager {
            message: "enabled foo".into(),
        })
        .unwrap();
        let a = rx1.recv().await.unwrap();
        let b = rx2.recv().await.unwrap();
        assert!(a.render().contains("enabled foo"));
        assert!(b.render().contains("enabled foo"));
    }

    #[tokio::test]
    async fn execution_result_render_includes_correlation_id() {
        let (tx, mut rx) = channel();
        tx.send(NotifyEvent::ExecutionResult {
            id: "abc-123".into(),
            execution: "Mail.send".into(),
            error: "none".into(),
        })
        .unwrap();
        let event = rx.recv().await.unwrap();
        assert!(event.render().contains("abc-123"));
        assert!(event.render().contains("Mail.send"));
    }
}
