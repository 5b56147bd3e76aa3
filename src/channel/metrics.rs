//! Channel metrics snapshot.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// `{start, sent, failed, received, bytesSent, bytesReceived, lastError}`.
/// Retry channels extend this with `{maxBacklog, holding}` (tracked
/// separately in [`super::retry::RetryChannel`]).
#[derive(Debug, Serialize, Clone)]
pub struct ChannelMetrics {
    pub start: i64,
    pub sent: u64,
    pub failed: u64,
    pub received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub last_error: Option<String>,
}

/// Interior-mutable counters a `Channel` impl owns and snapshots from
/// `metrics()`. `Arc`-shared so a channel can be cloned cheaply into a
/// background receive loop.
pub struct MetricsCounters {
    start: i64,
    sent: AtomicU64,
    failed: AtomicU64,
    received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    last_error: std::sync::Mutex<Option<String>>,
    last_error_at: AtomicI64,
}

impl Default for MetricsCounters {
    fn default() -> Self {
        MetricsCounters {
            start: now_secs(),
            sent: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            last_error: std::sync::Mutex::new(None),
            last_error_at: AtomicI64::new(0),
        }
    }
}

impl MetricsCounters {
    pub fn record_sent(&self, bytes: usize) {
        self.sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_failed(&self, error: impl Into<String>) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        *self.last_error.lock().unwrap() = Some(error.into());
        self.last_error_at.store(now_secs(), Ordering::Relaxed);
    }

    pub fn record_received(&self, bytes: usize) {
        self.received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ChannelMetrics {
        ChannelMetrics {
            start: self.start,
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            last_error: self.last_error.lock().unwrap().clone(),
        }
    }
}
