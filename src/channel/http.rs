//! Send-only HTTP POST ingest channel.

use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::broadcast;

use super::{Channel, ChannelMetrics, SendResult};
use crate::channel::metrics::MetricsCounters;

/// Send-only; encodes UTF-8 JSON text. `OK` on 2xx or 409 (idempotent
/// conflict). `NoConnection` on transport errors, `Failed` otherwise.
pub struct HttpChannel {
    url: String,
    client: Client,
    metrics: MetricsCounters,
    // Never produces inbound payloads; kept only so `received()` can hand
    // back a receiver with the right type.
    inbound_tx: broadcast::Sender<Vec<u8>>,
}

impl HttpChannel {
    pub fn new(url: impl Into<String>) -> Self {
        HttpChannel {
            url: url.into(),
            client: Client::new(),
            metrics: MetricsCounters::default(),
            inbound_tx: broadcast::channel(1).0,
        }
    }
}

#[async_trait]
impl Channel for HttpChannel {
    async fn send(&self, payload: &[u8]) -> SendResult {
        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .body(payload.to_vec())
            .send()
            .await;

        match response {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() || status.as_u16() == 409 {
                    self.metrics.record_sent(payload.len());
                    SendResult::Ok
                } else {
                    self.metrics.record_failed(format!("HTTP {status}"));
                    SendResult::Failed
                }
            }
            Err(e) => {
                self.metrics.record_failed(e.to_string());
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

    #[tokio::test]
    async fn unreachable_host_yields_no_connection() {
        let channel = HttpChannel::new("http://127.0.0.1:1/ingest");
        let result = channel.send(b"{}").await;
        assert_eq!(result, SendResult::NoConnection);
    }
}
