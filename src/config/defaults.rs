//! System-wide default constants, grouped by subsystem.
//!
//! One `pub const` per tunable, grouped under a `// === Subsystem ===`
//! banner.

// ============================================================================
// Alert ingest & dedupe
// ============================================================================

/// Dedupe window: alerts with the same identifier within this many
/// seconds of each other are treated as a single event.
pub const ALERT_DEDUPE_WINDOW_SECS: i64 = 120;

/// Default language tag applied to an alert's `info` block when the
/// upstream message omits one.
pub const ALERT_DEFAULT_LANGUAGE: &str = "en-US";

// ============================================================================
// Channel stack
// ============================================================================

/// How many pushes onto the retry backlog before a `cumulatedUnsent`
/// event is emitted so an upper layer can persist the snapshot.
pub const RETRY_CUMULATION_THRESHOLD: u64 = 500;

/// Buffer size for the stream-socket channel's read loop.
pub const STREAM_READ_BUFFER_BYTES: usize = 12 * 1024;

// ============================================================================
// Scheduler
// ============================================================================

/// The scheduler ticks once per second, aligned to the next whole second.
pub const SCHEDULER_TICK_INTERVAL_SECS: u64 = 1;

// ============================================================================
// Module manager / shutdown
// ============================================================================

/// Two-step shutdown arming window: a second `shutdown` request within
/// this many seconds of the first forces an immediate stop.
pub const SHUTDOWN_ARM_WINDOW_SECS: u64 = 10;

// ============================================================================
// Heartbeat
// ============================================================================

/// Heartbeat publish interval on `Heartbeat-Channel`.
pub const HEARTBEAT_INTERVAL_SECS: u64 = 60;

// ============================================================================
// Local admin endpoint
// ============================================================================

/// Default TCP port for the local admin endpoint.
pub const ADMIN_DEFAULT_PORT: u16 = 4005;

/// `serde(default = ...)` needs a function path, not a const.
pub fn admin_default_port() -> u16 {
    ADMIN_DEFAULT_PORT
}

/// How long to wait after accept() for an initial line before deciding
/// a client is non-interactive (a batch client that sends and expects
/// a single JSON reply rather than a banner/prompt).
pub const ADMIN_INTERACTIVE_PROBE_MS: u64 = 150;

/// Maximum recalled commands kept per admin client for `!!`/`!N`/`!prefix`.
pub const ADMIN_HISTORY_CAPACITY: usize = 200;

// ============================================================================
// Self-healer
// ============================================================================

/// Health check cycle interval.
pub const HEALTH_CHECK_INTERVAL_SECS: u64 = 30;

/// Minimum free disk space (bytes) before the disk health check degrades.
pub const DISK_MIN_FREE_BYTES: u64 = 64 * 1024 * 1024;

/// Backlog depth at which the management-channel backlog check escalates
/// from degraded to unhealthy.
pub const RETRY_BACKLOG_UNHEALTHY_THRESHOLD: usize = 50;

/// Seconds without a scheduler tick before the liveness check fires.
pub const SCHEDULER_STALL_THRESHOLD_SECS: i64 = 10;
