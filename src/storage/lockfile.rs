//! Process lock file — prevents two agent instances from sharing one
//! Settings/backlog directory.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

#[derive(Debug)]
pub struct ProcessLock {
    lock_path: PathBuf,
    owned: bool,
}

impl ProcessLock {
    const LOCK_FILE_NAME: &'static str = ".rio-agent.lock";

    /// Acquires the lock in `data_dir`, removing a stale lock left by a
    /// process that is no longer running.
    pub fn acquire<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create data directory: {data_dir:?}"))?;

        let lock_path = data_dir.join(Self::LOCK_FILE_NAME);
        if lock_path.exists() {
            match Self::check_existing_lock(&lock_path) {
                Ok(Some(pid)) => {
                    bail!(
                        "another rio-agent instance is already running (PID: {pid})\n\
                         stop it, or remove the stale lock file: rm {lock_path:?}"
                    );
                }
                Ok(None) => {
                    tracing::info!("removing stale lock file from previous instance");
                    fs::remove_file(&lock_path).context("failed to remove stale lock file")?;
                }
                Err(e) => {
                    tracing::warn!("error checking existing lock: {e}");
                    let _ = fs::remove_file(&lock_path);
                }
            }
        }

        let pid = std::process::id();
        let mut file = File::create(&lock_path)
            .with_context(|| format!("failed to create lock file: {lock_path:?}"))?;
        writeln!(file, "{pid}").context("failed to write PID to lock file")?;
        tracing::debug!(pid, path = ?lock_path, "acquired process lock");

        Ok(ProcessLock { lock_path, owned: true })
    }

    fn check_existing_lock(lock_path: &Path) -> Result<Option<u32>> {
        let mut file = File::open(lock_path).context("failed to open existing lock file")?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .context("failed to read lock file contents")?;
        let pid: u32 = contents.trim().parse().context("failed to parse PID from lock file")?;
        if Self::is_process_running(pid) {
            Ok(Some(pid))
        } else {
            Ok(None)
        }
    }

    #[cfg(unix)]
    fn is_process_running(pid: u32) -> bool {
        let proc_path = format!("/proc/{pid}/cmdline");
        fs::read_to_string(&proc_path)
            .map(|cmdline| cmdline.contains("rio-agent"))
            .unwrap_or(false)
    }

    #[cfg(not(unix))]
    fn is_process_running(_pid: u32) -> bool {
        true
    }

    pub fn release(&mut self) {
        if self.owned {
            if let Err(e) = fs::remove_file(&self.lock_path) {
                tracing::warn!("failed to remove lock file: {e}");
            } else {
                tracing::debug!(path = ?self.lock_path, "released process lock");
            }
            self.owned = false;
        }
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_writes_own_pid() {
        let dir = tempfile::tempdir().unwrap();
        let lock = ProcessLock::acquire(dir.path()).unwrap();
        let contents = fs::read_to_string(lock.path()).unwrap();
        assert_eq!(contents.trim().parse::<u32>().unwrap(), std::process::id());
    }

    #[test]
    fn lock_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path;
        {
            let lock = ProcessLock::acquire(dir.path()).unwrap();
            lock_path = lock.path().to_path_buf();
            assert!(lock_path.exists());
        }
        assert!(!lock_path.exists());
    }

    #[test]
    fn stale_lock_with_dead_pid_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join(ProcessLock::LOCK_FILE_NAME);
        fs::write(&lock_path, "999999999\n").unwrap();
        let lock = ProcessLock::acquire(dir.path()).unwrap();
        assert!(lock.path().exists());
    }
}
