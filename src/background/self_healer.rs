//! Self-healer — a health check cycle every [`HEALTH_CHECK_INTERVAL_SECS`]
//! with automatic recovery attempts, covering this agent's own
//! components: retry-channel backlog growth, scheduler tick liveness, and
//! disk space for the backlog/settings files.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::defaults::{DISK_MIN_FREE_BYTES, HEALTH_CHECK_INTERVAL_SECS};

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq)]
pub enum HealthStatus {
    Healthy,
    Degraded { reason: String },
    Unhealthy { reason: String },
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "HEALTHY"),
            HealthStatus::Degraded { reason } => write!(f, "DEGRADED: {reason}"),
            HealthStatus::Unhealthy { reason } => write!(f, "UNHEALTHY: {reason}"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum HealAction {
    Reconnected,
    FallbackActivated,
    NoActionNeeded,
    ManualInterventionRequired { reason: String },
}

impl std::fmt::Display for HealAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealAction::Reconnected => write!(f, "reconnected"),
            HealAction::FallbackActivated => write!(f, "fallback activated"),
            HealAction::NoActionNeeded => write!(f, "no action needed"),
            HealAction::ManualInterventionRequired { reason } => {
                write!(f, "manual intervention required: {reason}")
            }
        }
    }
}

pub trait HealthCheck: Send + Sync {
    fn component_name(&self) -> &str;
    fn check(&self) -> HealthStatus;
    fn heal(&self) -> HealAction;
}

#[derive(Debug, Clone)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub last_action: Option<HealAction>,
}

#[derive(Debug, Clone)]
pub struct SystemHealth {
    pub components: Vec<ComponentHealth>,
    pub overall: HealthStatus,
    pub check_cycles: u64,
}

impl SystemHealth {
    fn new() -> Self {
        SystemHealth {
            components: Vec::new(),
            overall: HealthStatus::Healthy,
            check_cycles: 0,
        }
    }
}

/// Tracks a retry channel's backlog depth; degraded once it holds
/// anything, unhealthy once it exceeds `threshold`.
pub struct BacklogHealthCheck {
    name: String,
    holding: Arc<dyn Fn() -> usize + Send + Sync>,
    threshold: usize,
}

impl BacklogHealthCheck {
    pub fn new(name: impl Into<String>, threshold: usize, holding: Arc<dyn Fn() -> usize + Send + Sync>) -> Self {
        BacklogHealthCheck {
            name: name.into(),
            holding,
            threshold,
        }
    }
}

impl HealthCheck for BacklogHealthCheck {
    fn component_name(&self) -> &str {
        &self.name
    }

    fn check(&self) -> HealthStatus {
        let depth = (self.holding)();
        if depth >= self.threshold {
            HealthStatus::Unhealthy {
                reason: format!("backlog holding {depth} items (threshold {})", self.threshold),
            }
        } else if depth > 0 {
            HealthStatus::Degraded {
                reason: format!("backlog holding {depth} items"),
            }
        } else {
            HealthStatus::Healthy
        }
    }

    fn heal(&self) -> HealAction {
        warn!(channel = %self.name, "backlog non-empty, underlying transport should auto-drain on recovery");
        HealAction::ManualInterventionRequired {
            reason: "backlog drain is automatic on next successful send".to_string(),
        }
    }
}

/// Tracks the scheduler's last completed tick; shared via [`SchedulerClock`].
#[derive(Clone, Default)]
pub struct SchedulerClock(Arc<AtomicI64>);

impl SchedulerClock {
    pub fn new() -> Self {
        SchedulerClock(Arc::new(AtomicI64::new(now_secs())))
    }

    pub fn mark(&self) {
        self.0.store(now_secs(), Ordering::Relaxed);
    }

    fn elapsed_secs(&self) -> i64 {
        now_secs() - self.0.load(Ordering::Relaxed)
    }
}

pub struct SchedulerLivenessHealthCheck {
    clock: SchedulerClock,
    stall_threshold_secs: i64,
}

impl SchedulerLivenessHealthCheck {
    pub fn new(clock: SchedulerClock, stall_threshold_secs: i64) -> Self {
        SchedulerLivenessHealthCheck {
            clock,
            stall_threshold_secs,
        }
    }
}

impl HealthCheck for SchedulerLivenessHealthCheck {
    fn component_name(&self) -> &str {
        "Scheduler"
    }

    fn check(&self) -> HealthStatus {
        let lag = self.clock.elapsed_secs();
        if lag > self.stall_threshold_secs {
            HealthStatus::Unhealthy {
                reason: format!("no tick in {lag}s (threshold {}s)", self.stall_threshold_secs),
            }
        } else {
            HealthStatus::Healthy
        }
    }

    fn heal(&self) -> HealAction {
        error!("scheduler tick loop appears stalled");
        HealAction::ManualInterventionRequired {
            reason: "scheduler task may have panicked; process restart required".to_string(),
        }
    }
}

/// Disk space for the directory holding Settings and the retry backlog.
pub struct DiskHealthCheck {
    data_path: String,
    min_free_bytes: u64,
}

impl DiskHealthCheck {
    pub fn new(data_path: impl Into<String>) -> Self {
        DiskHealthCheck {
            data_path: data_path.into(),
            min_free_bytes: DISK_MIN_FREE_BYTES,
        }
    }
}

impl HealthCheck for DiskHealthCheck {
    fn component_name(&self) -> &str {
        "Disk Space"
    }

    fn check(&self) -> HealthStatus {
        match check_disk_free(&self.data_path) {
            Ok(free) if free < self.min_free_bytes => HealthStatus::Unhealthy {
                reason: format!(
                    "only {:.0} MB free (minimum {:.0} MB)",
                    free as f64 / 1_048_576.0,
                    self.min_free_bytes as f64 / 1_048_576.0
                ),
            },
            Ok(free) if free < self.min_free_bytes * 2 => HealthStatus::Degraded {
                reason: format!("{:.0} MB free, approaching minimum", free as f64 / 1_048_576.0),
            },
            Ok(_) => HealthStatus::Healthy,
            Err(e) => HealthStatus::Degraded {
                reason: format!("could not check disk space: {e}"),
            },
        }
    }

    fn heal(&self) -> HealAction {
        warn!(path = %self.data_path, "disk space low, backlog persistence may start failing");
        HealAction::FallbackActivated
    }
}

#[cfg(unix)]
fn check_disk_free(path: &str) -> Result<u64, String> {
    use std::mem::MaybeUninit;

    let c_path = std::ffi::CString::new(path).map_err(|e| e.to_string())?;
    let mut stat = MaybeUninit::<libc::statvfs>::uninit();
    let result = unsafe { libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) };
    if result == 0 {
        let stat = unsafe { stat.assume_init() };
        Ok(stat.f_bfree * stat.f_bsize)
    } else {
        Err(format!("statvfs failed for {path}"))
    }
}

#[cfg(not(unix))]
fn check_disk_free(_path: &str) -> Result<u64, String> {
    Ok(u64::MAX)
}

pub struct SelfHealer {
    checks: Vec<Box<dyn HealthCheck>>,
    health: Arc<RwLock<SystemHealth>>,
}

impl SelfHealer {
    pub fn new(checks: Vec<Box<dyn HealthCheck>>) -> Self {
        SelfHealer {
            checks,
            health: Arc::new(RwLock::new(SystemHealth::new())),
        }
    }

    pub fn health_handle(&self) -> Arc<RwLock<SystemHealth>> {
        self.health.clone()
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            checks = self.checks.len(),
            interval_secs = HEALTH_CHECK_INTERVAL_SECS,
            "self-healer started"
        );
        let mut interval = tokio::time::interval(Duration::from_secs(HEALTH_CHECK_INTERVAL_SECS));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("self-healer shutting down");
                    return;
                }
                _ = interval.tick() => {
                    self.run_cycle().await;
                }
            }
        }
    }

    async fn run_cycle(&self) {
        let mut components = Vec::with_capacity(self.checks.len());
        let mut worst = HealthStatus::Healthy;

        for check in &self.checks {
            let status = check.check();
            let action = match &status {
                HealthStatus::Unhealthy { .. } => {
                    error!(component = check.component_name(), status = %status, "component unhealthy, attempting heal");
                    Some(check.heal())
                }
                HealthStatus::Degraded { .. } => {
                    warn!(component = check.component_name(), status = %status, "component degraded");
                    None
                }
                HealthStatus::Healthy => {
                    debug!(component = check.component_name(), "component healthy");
                    None
                }
            };

            match (&worst, &status) {
                (HealthStatus::Healthy, HealthStatus::Degraded { .. } | HealthStatus::Unhealthy { .. }) => {
                    worst = status.clone();
                }
                (HealthStatus::Degraded { .. }, HealthStatus::Unhealthy { .. }) => worst = status.clone(),
                _ => {}
            }

            components.push(ComponentHealth {
                name: check.component_name().to_string(),
                status,
                last_action: action,
            });
        }

        let mut health = self.health.write().await;
        health.components = components;
        health.overall = worst;
        health.check_cycles += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn backlog_check_escalates_with_depth() {
        let depth = Arc::new(Mutex::new(0usize));
        let d = depth.clone();
        let check = BacklogHealthCheck::new("Heartbeat-Channel", 5, Arc::new(move || *d.lock().unwrap()));
        assert_eq!(check.check(), HealthStatus::Healthy);

        *depth.lock().unwrap() = 2;
        assert!(matches!(check.check(), HealthStatus::Degraded { .. }));

        *depth.lock().unwrap() = 5;
        assert!(matches!(check.check(), HealthStatus::Unhealthy { .. }));
    }

    #[test]
    fn scheduler_liveness_detects_stall() {
        let clock = SchedulerClock::new();
        let check = SchedulerLivenessHealthCheck::new(clock.clone(), 0);
        std::thread::sleep(Duration::from_millis(1100));
        assert!(matches!(check.check(), HealthStatus::Unhealthy { .. }));
        clock.mark();
        assert_eq!(check.check(), HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn run_cycle_tracks_worst_status() {
        let depth = Arc::new(Mutex::new(10usize));
        let d = depth.clone();
        let checks: Vec<Box<dyn HealthCheck>> = vec![Box::new(BacklogHealthCheck::new(
            "Alert-Channel",
            5,
            Arc::new(move || *d.lock().unwrap()),
        ))];
        let healer = SelfHealer::new(checks);
        healer.run_cycle().await;
        let health = healer.health_handle().read().await.clone();
        assert_eq!(health.check_cycles, 1);
        assert!(matches!(health.overall, HealthStatus::Unhealthy { .. }));
    }
}
