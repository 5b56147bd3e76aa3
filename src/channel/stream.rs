//! Auto-reconnecting TCP stream channel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Mutex};
use tracing::warn;

use super::{Channel, ChannelMetrics, SendResult};
use crate::config::defaults::STREAM_READ_BUFFER_BYTES;
use crate::channel::metrics::MetricsCounters;

const RECONNECT_BACKOFF: Duration = Duration::from_secs(2);

/// Auto-reconnecting TCP channel. Reads into a 12 KiB buffer; every read
/// emits `received(bytes)`.
pub struct StreamChannel {
    addr: String,
    conn: Mutex<Option<TcpStream>>,
    metrics: MetricsCounters,
    inbound_tx: broadcast::Sender<Vec<u8>>,
}

impl StreamChannel {
    pub fn new(addr: impl Into<String>) -> Arc<Self> {
        let (inbound_tx, _rx) = broadcast::channel(256);
        let channel = Arc::new(StreamChannel {
            addr: addr.into(),
            conn: Mutex::new(None),
            metrics: MetricsCounters::default(),
            inbound_tx,
        });
        channel.clone().spawn_reconnect_loop();
        channel
    }

    fn spawn_reconnect_loop(self: Arc<Self>) {
        tokio::spawn(async move {
            loop {
                match TcpStream::connect(&self.addr).await {
                    Ok(stream) => {
                        *self.conn.lock().await = Some(stream);
                        self.read_until_disconnect().await;
                        *self.conn.lock().await = None;
                    }
                    Err(e) => {
                        self.metrics.record_failed(e.to_string());
                        warn!(addr = %self.addr, error = %e, "stream channel connect failed, retrying");
                    }
                }
                tokio::time::sleep(RECONNECT_BACKOFF).await;
            }
        });
    }

    async fn read_until_disconnect(&self) {
        let mut buf = vec![0u8; STREAM_READ_BUFFER_BYTES];
        loop {
            let n = {
                let mut guard = self.conn.lock().await;
                let Some(stream) = guard.as_mut() else { return };
                match stream.read(&mut buf).await {
                    Ok(0) => return,
                    Ok(n) => n,
                    Err(e) => {
                        self.metrics.record_failed(e.to_string());
                        return;
                    }
                }
            };
            self.metrics.record_received(n);
            let _ = self.inbound_tx.send(buf[..n].to_vec());
        }
    }
}

#[async_trait]
impl Channel for StreamChannel {
    async fn send(&self, payload: &[u8]) -> SendResult {
        let mut guard = self.conn.lock().await;
        let Some(stream) = guard.as_mut() else {
            return SendResult::NoConnection;
        };
        match stream.write_all(payload).await {
            Ok(()) => {
                self.metrics.record_sent(payload.len());
                SendResult::Ok
            }
            Err(e) => {
                self.metrics.record_failed(e.to_string());
                SendResult::Failed
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
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn sends_and_receives_over_a_real_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 16];
            let n = socket.read(&mut buf).await.unwrap();
            socket.write_all(&buf[..n]).await.unwrap();
        });

        let channel = StreamChannel::new(addr.to_string());
        // Give the reconnect loop a moment to establish the connection.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let mut rx = channel.received();

        let result = channel.send(b"echo").await;
        assert_eq!(result, SendResult::Ok);
        assert_eq!(rx.recv().await.unwrap(), b"echo");
    }
}
