//! Pub/sub broker abstraction.
//!
//! The concrete broker product lives outside this crate; only the
//! contract [`PubSubChannel`] needs is defined here, plus an in-process
//! implementation used by tests and as the default when no external broker
//! is configured.

use std::sync::Mutex;

use dashmap::DashMap;
use tokio::sync::broadcast;

/// What a pub/sub channel needs from a broker: obtain a publish handle for
/// a topic (`None` if the broker connection cannot be obtained, in which
/// case the caller reports `NoConnection`) and subscribe to a topic's
/// inbound messages.
pub trait Broker: Send + Sync {
    fn publish(&self, topic: &str, payload: &[u8]) -> Option<()>;
    fn subscribe(&self, topic: &str) -> broadcast::Receiver<Vec<u8>>;
}

/// An in-memory broker: publishing on a topic fans out to every local
/// subscriber of that topic. Used as the default broker (no external
/// network dependency) and exercised directly by channel tests.
#[derive(Default)]
pub struct InProcessBroker {
    topics: DashMap<String, broadcast::Sender<Vec<u8>>>,
    connected: Mutex<bool>,
}

impl InProcessBroker {
    pub fn new() -> Self {
        InProcessBroker {
            topics: DashMap::new(),
            connected: Mutex::new(true),
        }
    }

    /// Test/ops hook simulating a dropped broker connection, so
    /// `publish` returns `None` and channels built on top surface
    /// `NoConnection`.
    pub fn set_connected(&self, connected: bool) {
        *self.connected.lock().unwrap() = connected;
    }

    fn sender_for(&self, topic: &str) -> broadcast::Sender<Vec<u8>> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(256).0)
            .clone()
    }
}

impl Broker for InProcessBroker {
    fn publish(&self, topic: &str, payload: &[u8]) -> Option<()> {
        if !*self.connected.lock().unwrap() {
            return None;
        }
        let sender = self.sender_for(topic);
        // No subscribers is not a failure — matches real broker semantics.
        let _ = sender.send(payload.to_vec());
        Some(())
    }

    fn subscribe(&self, topic: &str) -> broadcast::Receiver<Vec<u8>> {
        self.sender_for(topic).subscribe()
    }
}
