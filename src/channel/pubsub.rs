//! Pub/sub topic channel.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::{Broker, Channel, ChannelMetrics, SendResult};
use crate::channel::metrics::MetricsCounters;

/// Publishes text on `topic`; if `subscribe` is set, also subscribes to
/// the same topic on construction and forwards inbound payloads to
/// [`Channel::received`]. `NoConnection` if the broker handle cannot be
/// obtained; `Failed` on publish error.
pub struct PubSubChannel {
    topic: String,
    broker: Arc<dyn Broker>,
    metrics: MetricsCounters,
    inbound_tx: broadcast::Sender<Vec<u8>>,
}

impl PubSubChannel {
    pub fn new(topic: impl Into<String>, broker: Arc<dyn Broker>, subscribe: bool) -> Arc<Self> {
        let topic = topic.into();
        let (inbound_tx, _rx) = broadcast::channel(256);
        let channel = Arc::new(PubSubChannel {
            topic,
            broker,
            metrics: MetricsCounters::default(),
            inbound_tx,
        });
        if subscribe {
            channel.clone().spawn_forwarder();
        }
        channel
    }

    fn spawn_forwarder(self: Arc<Self>) {
        let mut upstream = self.broker.subscribe(&self.topic);
        let tx = self.inbound_tx.clone();
        tokio::spawn(async move {
            while let Ok(payload) = upstream.recv().await {
                let _ = tx.send(payload);
            }
        });
    }
}

#[async_trait]
impl Channel for PubSubChannel {
    async fn send(&self, payload: &[u8]) -> SendResult {
        match self.broker.publish(&self.topic, payload) {
            Some(()) => {
                self.metrics.record_sent(payload.len());
                SendResult::Ok
            }
            None => {
                self.metrics.record_failed("broker handle unavailable");
                SendResult::NoConnection
            }
        }
    }

    fn received(&self) -> broadcast::Receiver<Vec<u8>> {
        self.inbound_tx.subscribe()
    }

    fn metrics(&self) -> ChannelMetrics {
        self.metrics.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::broker::InProcessBroker;

    #[tokio::test]
    async fn publish_delivers_to_subscriber() {
        let broker = Arc::new(InProcessBroker::new());
        let publisher = PubSubChannel::new("Telemetry-Channel", broker.clone(), false);
        let subscriber = PubSubChannel::new("Telemetry-Channel", broker, true);
        let mut rx = subscriber.received();

        let result = publisher.send(b"hello").await;
        assert_eq!(result, SendResult::Ok);
        assert_eq!(rx.recv().await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn no_connection_when_broker_unreachable() {
        let broker = Arc::new(InProcessBroker::new());
        broker.set_connected(false);
        let channel = PubSubChannel::new("Heartbeat-Channel", broker, false);
        assert_eq!(channel.send(b"x").await, SendResult::NoConnection);
    }
}
