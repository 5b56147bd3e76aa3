//! Composable transport abstraction.

mod broker;
mod http;
mod metrics;
mod pubsub;
mod retry;
mod stream;
mod team;
mod udp;

pub use broker::{Broker, InProcessBroker};
pub use http::HttpChannel;
pub use metrics::ChannelMetrics;
pub use pubsub::PubSubChannel;
pub use retry::{CumulatedUnsent, RetryChannel};
pub use stream::StreamChannel;
pub use team::{TeamChannel, TeamPolicy};
pub use udp::UdpChannel;

use async_trait::async_trait;
use tokio::sync::broadcast;

/// Outcome of [`Channel::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    Ok,
    Failed,
    NoConnection,
}

impl SendResult {
    pub fn is_ok(self) -> bool {
        matches!(self, SendResult::Ok)
    }
}

/// `send(payload) -> {OK, Failed, NoConnection}` plus a `received` event
/// stream. Implementations never propagate transport errors as `Err` —
/// only as a [`SendResult`] variant.
#[async_trait]
pub trait Channel: Send + Sync {
    async fn send(&self, payload: &[u8]) -> SendResult;

    /// Subscribes to this channel's inbound payloads. Channels with no
    /// inbound side (e.g. a send-only HTTP channel) return a receiver that
    /// never yields.
    fn received(&self) -> broadcast::Receiver<Vec<u8>>;

    fn metrics(&self) -> ChannelMetrics;
}
