//! Team (fan-out) channel decorator.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::{Channel, ChannelMetrics, SendResult};
use crate::channel::metrics::MetricsCounters;

#[derive(Debug, Clone, Copy)]
pub enum TeamPolicy {
    /// Sequential; returns OK on first success and short-circuits.
    Any,
    /// Attempts every channel; succeeds iff `successes/N >= quorum`.
    All { quorum: f64 },
}

/// Fans a send to N underlying channels under one of two policies.
/// Result downgrading rule: `Failed` dominates `NoConnection`; a channel
/// producing `Failed` sets the team's `lastError`.
pub struct TeamChannel {
    channels: Vec<Arc<dyn Channel>>,
    policy: TeamPolicy,
    metrics: MetricsCounters,
}

impl TeamChannel {
    pub fn new(channels: Vec<Arc<dyn Channel>>, policy: TeamPolicy) -> Self {
        TeamChannel {
            channels,
            policy,
            metrics: MetricsCounters::default(),
        }
    }
}

/// `Failed` dominates `NoConnection` when combining the outcomes of
/// multiple channels that did not succeed.
fn worse(a: SendResult, b: SendResult) -> SendResult {
    match (a, b) {
        (SendResult::Failed, _) | (_, SendResult::Failed) => SendResult::Failed,
        _ => SendResult::NoConnection,
    }
}

#[async_trait]
impl Channel for TeamChannel {
    async fn send(&self, payload: &[u8]) -> SendResult {
        match self.policy {
            TeamPolicy::Any => {
                let mut worst: Option<SendResult> = None;
                for channel in &self.channels {
                    let result = channel.send(payload).await;
                    if result.is_ok() {
                        self.metrics.record_sent(payload.len());
                        return SendResult::Ok;
                    }
                    if result == SendResult::Failed {
                        self.metrics.record_failed("member channel failed");
                    }
                    worst = Some(match worst {
                        Some(w) => worse(w, result),
                        None => result,
                    });
                }
                worst.unwrap_or(SendResult::NoConnection)
            }
            TeamPolicy::All { quorum } => {
                let mut successes = 0usize;
                let mut worst: Option<SendResult> = None;
                for channel in &self.channels {
                    let result = channel.send(payload).await;
                    if result.is_ok() {
                        successes += 1;
                    } else {
                        if result == SendResult::Failed {
                            self.metrics.record_failed("member channel failed");
                        }
                        worst = Some(match worst {
                            Some(w) => worse(w, result),
                            None => result,
                        });
                    }
                }
                let n = self.channels.len().max(1);
                if (successes as f64) / (n as f64) >= quorum {
                    self.metrics.record_sent(payload.len());
                    SendResult::Ok
                } else {
                    worst.unwrap_or(SendResult::NoConnection)
                }
            }
        }
    }

    fn received(&self) -> broadcast::Receiver<Vec<u8>> {
        // A team has no single coherent inbound stream; callers subscribe
        // to individual member channels instead.
        broadcast::channel(1).1
    }

    fn metrics(&self) -> ChannelMetrics {
        self.metrics.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedChannel(SendResult);

    #[async_trait]
    impl Channel for FixedChannel {
        async fn send(&self, _payload: &[u8]) -> SendResult {
            self.0
        }
        fn received(&self) -> broadcast::Receiver<Vec<u8>> {
            broadcast::channel(1).1
        }
        fn metrics(&self) -> ChannelMetrics {
            MetricsCounters::default().snapshot()
        }
    }

    #[tokio::test]
    async fn any_policy_short_circuits_on_first_success() {
        let channels: Vec<Arc<dyn Channel>> = vec![
            Arc::new(FixedChannel(SendResult::Failed)),
            Arc::new(FixedChannel(SendResult::Ok)),
        ];
        let team = TeamChannel::new(channels, TeamPolicy::Any);
        assert_eq!(team.send(b"x").await, SendResult::Ok);
    }

    #[tokio::test]
    async fn all_policy_succeeds_when_quorum_met() {
        let channels: Vec<Arc<dyn Channel>> = vec![
            Arc::new(FixedChannel(SendResult::Ok)),
            Arc::new(FixedChannel(SendResult::Ok)),
            Arc::new(FixedChannel(SendResult::Failed)),
        ];
        let team = TeamChannel::new(channels, TeamPolicy::All { quorum: 0.6 });
        assert_eq!(team.send(b"x").await, SendResult::Ok);
    }

    #[tokio::test]
    async fn all_policy_fails_below_quorum_and_failed_dominates() {
        let channels: Vec<Arc<dyn Channel>> = vec![
            Arc::new(FixedChannel(SendResult::Failed)),
            Arc::new(FixedChannel(SendResult::NoConnection)),
            Arc::new(FixedChannel(SendResult::Ok)),
        ];
        let team = TeamChannel::new(channels, TeamPolicy::All { quorum: 0.9 });
        assert_eq!(team.send(b"x").await, SendResult::Failed);
    }
}
