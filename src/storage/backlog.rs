//! Retry backlog persistence: `retryBuffer[-<ts>].txt`, one serialized
//! payload per line, consumed on boot.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::channel::CumulatedUnsent;
use crate::error::PersistError;

const BASE_NAME: &str = "retryBuffer";

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn is_backlog_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(BASE_NAME) && n.ends_with(".txt"))
}

/// On boot: archives every leftover `retryBuffer[-<ts>].txt` to a
/// timestamped name (so a crash loop never double-reads the same file)
/// and returns the concatenated, in-order lines for [`crate::channel::RetryChannel::recover`].
pub fn recover_on_boot(dir: &Path) -> Result<Vec<Vec<u8>>, PersistError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut lines = Vec::new();
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| is_backlog_file(p))
        .collect();
    entries.sort();

    for path in entries {
        let text = fs::read_to_string(&path)?;
        for line in text.lines().filter(|l| !l.is_empty()) {
            lines.push(line.as_bytes().to_vec());
        }
        let archived = dir.join(format!("{BASE_NAME}-{}.txt.recovered", now_secs()));
        fs::rename(&path, &archived)?;
    }
    Ok(lines)
}

/// Persists a [`CumulatedUnsent`] snapshot to
/// `retryBuffer-<firstFailureAt>.txt`, one payload per line.
pub fn persist_cumulated(dir: &Path, snapshot: &CumulatedUnsent) -> Result<(), PersistError> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("{BASE_NAME}-{}.txt", snapshot.first_failure_at));
    let mut text = String::new();
    for line in &snapshot.lines {
        text.push_str(&String::from_utf8_lossy(line));
        text.push('\n');
    }
    fs::write(path, text)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persist_then_recover_round_trips_lines() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = CumulatedUnsent {
            lines: vec![b"a".to_vec(), b"b".to_vec()],
            first_failure_at: 1000,
        };
        persist_cumulated(dir.path(), &snapshot).unwrap();

        let recovered = recover_on_boot(dir.path()).unwrap();
        assert_eq!(recovered, vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn recovering_archives_the_source_file() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = CumulatedUnsent {
            lines: vec![b"x".to_vec()],
            first_failure_at: 42,
        };
        persist_cumulated(dir.path(), &snapshot).unwrap();
        recover_on_boot(dir.path()).unwrap();

        let remaining: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert!(remaining.iter().any(|n| n.ends_with(".recovered")));
        assert!(!remaining.iter().any(|n| n == "retryBuffer-42.txt"));
    }

    #[test]
    fn missing_directory_yields_empty_backlog() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert_eq!(recover_on_boot(&missing).unwrap(), Vec::<Vec<u8>>::new());
    }
}
