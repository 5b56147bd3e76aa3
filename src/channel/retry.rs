//! Retry-with-backlog channel decorator.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use super::{Channel, ChannelMetrics, SendResult};
use crate::channel::metrics::MetricsCounters;
use crate::config::defaults::RETRY_CUMULATION_THRESHOLD;

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Emitted every 500 pushes onto the backlog: a chronological (oldest
/// first) snapshot plus the timestamp of the run's first failure, so an
/// upper layer can persist it to a retry file.
#[derive(Debug, Clone)]
pub struct CumulatedUnsent {
    pub lines: Vec<Vec<u8>>,
    pub first_failure_at: i64,
}

/// Wraps another channel. On underlying `OK`, drains the backlog in LIFO
/// order (most recent failure first), stopping at the first item that
/// still fails. On non-OK, pushes the payload onto the backlog and, every
/// [`RETRY_CUMULATION_THRESHOLD`] pushes, emits a [`CumulatedUnsent`] event.
pub struct RetryChannel {
    inner: Arc<dyn Channel>,
    backlog: Mutex<Vec<Vec<u8>>>,
    push_count: AtomicU64,
    max_backlog: AtomicUsize,
    failed_since: Mutex<Option<i64>>,
    metrics: MetricsCounters,
    cumulation_tx: Option<mpsc::UnboundedSender<CumulatedUnsent>>,
}

impl RetryChannel {
    pub fn new(inner: Arc<dyn Channel>) -> Self {
        RetryChannel {
            inner,
            backlog: Mutex::new(Vec::new()),
            push_count: AtomicU64::new(0),
            max_backlog: AtomicUsize::new(0),
            failed_since: Mutex::new(None),
            metrics: MetricsCounters::default(),
            cumulation_tx: None,
        }
    }

    pub fn with_cumulation_sink(mut self, tx: mpsc::UnboundedSender<CumulatedUnsent>) -> Self {
        self.cumulation_tx = Some(tx);
        self
    }

    pub fn holding(&self) -> usize {
        self.backlog.lock().unwrap().len()
    }

    pub fn max_backlog(&self) -> usize {
        self.max_backlog.load(Ordering::Relaxed)
    }

    /// Push recovered lines back onto the stack (preserving their original
    /// order) and trigger a drain.
    pub async fn recover(&self, lines: Vec<Vec<u8>>) {
        {
            let mut backlog = self.backlog.lock().unwrap();
            backlog.extend(lines);
            let len = backlog.len();
            self.max_backlog.fetch_max(len, Ordering::Relaxed);
        }
        self.drain().await;
    }

    async fn drain(&self) {
        loop {
            let item = { self.backlog.lock().unwrap().pop() };
            let Some(payload) = item else { break };
            match self.inner.send(&payload).await {
                SendResult::Ok => self.metrics.record_sent(payload.len()),
                _ => {
                    self.backlog.lock().unwrap().push(payload);
                    break;
                }
            }
        }
    }

    fn push_failed(&self, payload: Vec<u8>, error: &str) {
        let snapshot = {
            let mut backlog = self.backlog.lock().unwrap();
            backlog.push(payload);
            let len = backlog.len();
            self.max_backlog.fetch_max(len, Ordering::Relaxed);
            backlog.clone()
        };
        self.metrics.record_failed(error);
        self.failed_since.lock().unwrap().get_or_insert(now_secs());

        let count = self.push_count.fetch_add(1, Ordering::Relaxed) + 1;
        if count % RETRY_CUMULATION_THRESHOLD == 0 {
            if let Some(tx) = &self.cumulation_tx {
                let first_failure_at = self.failed_since.lock().unwrap().unwrap_or_else(now_secs);
                let _ = tx.send(CumulatedUnsent {
                    lines: snapshot,
                    first_failure_at,
                });
            }
        }
    }
}

#[async_trait]
impl Channel for RetryChannel {
    async fn send(&self, payload: &[u8]) -> SendResult {
        let result = self.inner.send(payload).await;
        match result {
            SendResult::Ok => {
                self.metrics.record_sent(payload.len());
                self.drain().await;
            }
            SendResult::Failed => self.push_failed(payload.to_vec(), "send failed"),
            SendResult::NoConnection => self.push_failed(payload.to_vec(), "no connection"),
        }
        result
    }

    fn received(&self) -> broadcast::Receiver<Vec<u8>> {
        self.inner.received()
    }

    fn metrics(&self) -> ChannelMetrics {
        self.metrics.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use tokio::sync::broadcast as tbroadcast;

    struct FlakyChannel {
        up: Arc<AtomicBool>,
        observed: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl Channel for FlakyChannel {
        async fn send(&self, payload: &[u8]) -> SendResult {
            self.observed.lock().unwrap().push(payload.to_vec());
            if self.up.load(Ordering::SeqCst) {
                SendResult::Ok
            } else {
                SendResult::Failed
            }
        }
        fn received(&self) -> tbroadcast::Receiver<Vec<u8>> {
            tbroadcast::channel(1).1
        }
        fn metrics(&self) -> ChannelMetrics {
            MetricsCounters::default().snapshot()
        }
    }

    #[tokio::test]
    async fn drains_backlog_in_lifo_order_on_recovery() {
        let up = Arc::new(AtomicBool::new(false));
        let inner = Arc::new(FlakyChannel {
            up: up.clone(),
            observed: Mutex::new(Vec::new()),
        });
        let retry = RetryChannel::new(inner.clone());

        retry.send(b"a").await;
        retry.send(b"b").await;
        retry.send(b"c").await;
        assert_eq!(retry.holding(), 3);

        up.store(true, Ordering::SeqCst);
        retry.send(b"d").await;

        let observed = inner.observed.lock().unwrap().clone();
        assert_eq!(
            observed,
            vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec(), b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]
        );
        assert_eq!(retry.holding(), 0);
    }

    #[tokio::test]
    async fn cumulation_event_fires_every_threshold_pushes() {
        let up = Arc::new(AtomicBool::new(false));
        let inner = Arc::new(FlakyChannel {
            up,
            observed: Mutex::new(Vec::new()),
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let retry = RetryChannel::new(inner).with_cumulation_sink(tx);

        for _ in 0..RETRY_CUMULATION_THRESHOLD {
            retry.send(b"x").await;
        }

        let event = rx.try_recv().unwrap();
        assert_eq!(event.lines.len() as u64, RETRY_CUMULATION_THRESHOLD);
    }
}
