//! Alert dedupe window.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::defaults::ALERT_DEDUPE_WINDOW_SECS;

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// `{identifier, receivedAt}` entries, purged of anything older than the
/// window on each check.
#[derive(Default)]
pub struct DedupeWindow {
    entries: Mutex<Vec<(String, i64)>>,
}

impl DedupeWindow {
    pub fn new() -> Self {
        DedupeWindow::default()
    }

    /// Returns `true` (and records the identifier) if `identifier` has not
    /// been seen within the window; `false` if it is a duplicate.
    pub fn check_and_insert(&self, identifier: &str) -> bool {
        let now = now_secs();
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|(_, at)| now - at <= ALERT_DEDUPE_WINDOW_SECS);
        if entries.iter().any(|(id, _)| id == identifier) {
            return false;
        }
        entries.push((identifier.to_string(), now));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sighting_is_not_a_duplicate() {
        let window = DedupeWindow::new();
        assert!(window.check_and_insert("X"));
    }

    #[test]
    fn repeat_within_window_is_a_duplicate() {
        let window = DedupeWindow::new();
        assert!(window.check_and_insert("X"));
        assert!(!window.check_and_insert("X"));
    }

    #[test]
    fn distinct_identifiers_are_independent() {
        let window = DedupeWindow::new();
        assert!(window.check_and_insert("X"));
        assert!(window.check_and_insert("Y"));
    }
}
