//! UDP channel: receive-only, send-only, or both.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tracing::warn;

use super::{Channel, ChannelMetrics, SendResult};
use crate::channel::metrics::MetricsCounters;

const RECV_BUFFER_BYTES: usize = 64 * 1024;

pub struct UdpChannel {
    socket: Option<Arc<UdpSocket>>,
    remote: Option<SocketAddr>,
    metrics: MetricsCounters,
    inbound_tx: broadcast::Sender<Vec<u8>>,
}

impl UdpChannel {
    /// Receive-only: binds `local` and starts an async receive loop.
    pub async fn receive_only(local: SocketAddr) -> std::io::Result<Arc<Self>> {
        Self::build(Some(local), None).await
    }

    /// Send-only: binds an ephemeral local port and sends to `remote`.
    pub async fn send_only(remote: SocketAddr) -> std::io::Result<Arc<Self>> {
        Self::build(None, Some(remote)).await
    }

    /// Both directions on the same socket.
    pub async fn bidirectional(local: SocketAddr, remote: SocketAddr) -> std::io::Result<Arc<Self>> {
        Self::build(Some(local), Some(remote)).await
    }

    async fn build(local: Option<SocketAddr>, remote: Option<SocketAddr>) -> std::io::Result<Arc<Self>> {
        let bind_addr = local.unwrap_or_else(|| "0.0.0.0:0".parse().unwrap());
        let socket = Arc::new(UdpSocket::bind(bind_addr).await?);
        let (inbound_tx, _rx) = broadcast::channel(256);
        let channel = Arc::new(UdpChannel {
            socket: Some(socket),
            remote,
            metrics: MetricsCounters::default(),
            inbound_tx,
        });
        if local.is_some() {
            channel.clone().spawn_receive_loop();
        }
        Ok(channel)
    }

    fn spawn_receive_loop(self: Arc<Self>) {
        let Some(socket) = self.socket.clone() else { return };
        let tx = self.inbound_tx.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; RECV_BUFFER_BYTES];
            loop {
                match socket.recv_from(&mut buf).await {
                    Ok((len, _from)) => {
                        let _ = tx.send(buf[..len].to_vec());
                    }
                    Err(e) => {
                        warn!(error = %e, "udp receive loop error");
                        break;
                    }
                }
            }
        });
    }
}

#[async_trait]
impl Channel for UdpChannel {
    async fn send(&self, payload: &[u8]) -> SendResult {
        // A nil/empty payload is a no-op that always succeeds.
        if payload.is_empty() {
            return SendResult::Ok;
        }
        let (Some(socket), Some(remote)) = (&self.socket, self.remote) else {
            return SendResult::NoConnection;
        };
        match socket.send_to(payload, remote).await {
            Ok(_) => {
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

    #[tokio::test]
    async fn empty_payload_is_a_no_op_success() {
        let channel = UdpChannel::send_only("127.0.0.1:9".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(channel.send(&[]).await, SendResult::Ok);
    }

    #[tokio::test]
    async fn round_trip_between_two_endpoints() {
        let receiver = UdpChannel::receive_only("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let local_addr = receiver.socket.as_ref().unwrap().local_addr().unwrap();
        let sender = UdpChannel::send_only(local_addr).await.unwrap();

        let mut rx = receiver.received();
        let result = sender.send(b"ping").await;
        assert_eq!(result, SendResult::Ok);
        assert_eq!(rx.recv().await.unwrap(), b"ping");
    }

    #[tokio::test]
    async fn receive_only_channel_cannot_send() {
        let channel = UdpChannel::receive_only("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(channel.send(b"x").await, SendResult::NoConnection);
    }
}
