//! Background services: the self-healer health-check loop.

pub mod self_healer;

pub use self_healer::{
    BacklogHealthCheck, ComponentHealth, DiskHealthCheck, HealAction, HealthCheck, HealthStatus,
    SchedulerClock, SchedulerLivenessHealthCheck, SelfHealer, SystemHealth,
};
