//! Per-client command history and recall (`!!`, `!N`, `!prefix`, literal
//! `history`).

use std::collections::VecDeque;

use crate::config::defaults::ADMIN_HISTORY_CAPACITY;

pub struct ClientHistory {
    entries: VecDeque<String>,
}

impl ClientHistory {
    pub fn new() -> Self {
        ClientHistory {
            entries: VecDeque::with_capacity(ADMIN_HISTORY_CAPACITY),
        }
    }

    pub fn push(&mut self, line: String) {
        if self.entries.len() == ADMIN_HISTORY_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(line);
    }

    /// Resolves a recall token against history without recording it;
    /// returns `None` if `line` is not a recall expression (the caller
    /// should use the raw line as-is).
    pub fn resolve_recall(&self, line: &str) -> Option<String> {
        if line == "!!" {
            return self.entries.back().cloned();
        }
        let rest = line.strip_prefix('!')?;
        if let Ok(n) = rest.parse::<usize>() {
            return self.entries.get(n.checked_sub(1)?).cloned();
        }
        self.entries.iter().rev().find(|e| e.starts_with(rest)).cloned()
    }

    pub fn rendered(&self, filter: Option<&str>) -> String {
        let lines: Vec<&String> = match filter {
            Some(f) => self.entries.iter().filter(|e| e.contains(f)).collect(),
            None => self.entries.iter().collect(),
        };
        if lines.is_empty() {
            return "(no history)".to_string();
        }
        lines
            .iter()
            .enumerate()
            .map(|(i, line)| format!("{}: {}", i + 1, line))
            .collect::<Vec<_>>()
            .join("\r\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bang_bang_recalls_last_command() {
        let mut history = ClientHistory::new();
        history.push("status".to_string());
        history.push("list".to_string());
        assert_eq!(history.resolve_recall("!!"), Some("list".to_string()));
    }

    #[test]
    fn bang_index_recalls_by_one_based_position() {
        let mut history = ClientHistory::new();
        history.push("status".to_string());
        history.push("list".to_string());
        assert_eq!(history.resolve_recall("!1"), Some("status".to_string()));
    }

    #[test]
    fn bang_prefix_recalls_most_recent_match() {
        let mut history = ClientHistory::new();
        history.push("enable Mail".to_string());
        history.push("status".to_string());
        history.push("enable Sms".to_string());
        assert_eq!(history.resolve_recall("!enable"), Some("enable Sms".to_string()));
    }

    #[test]
    fn non_recall_line_returns_none() {
        let history = ClientHistory::new();
        assert_eq!(history.resolve_recall("status"), None);
    }

    #[test]
    fn oldest_entry_evicted_past_capacity() {
        let mut history = ClientHistory::new();
        for i in 0..(ADMIN_HISTORY_CAPACITY + 5) {
            history.push(format!("cmd{i}"));
        }
        assert_eq!(history.entries.len(), ADMIN_HISTORY_CAPACITY);
        assert_eq!(history.entries.front(), Some(&"cmd5".to_string()));
    }
}
