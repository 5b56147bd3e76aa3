//! Filesystem persistence: the process lock, retry-backlog files, and
//! the crontab/ruleset documents.

pub mod backlog;
pub mod files;
pub mod lockfile;

pub use lockfile::ProcessLock;
