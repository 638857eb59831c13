use chrono::Utc;
use std::fs::{File, OpenOptions, TryLockError};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{EvalError, Result};

/// Exclusive advisory lock on a dataset's `.lock` file.
///
/// Blocks until every other holder is gone. The OS drops the lock when the holder exits,
/// so a crashed shard cannot wedge the others. Released on drop.
#[derive(Debug)]
pub struct ShardLock {
    file: File,
    path: PathBuf,
}

impl ShardLock {
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                log::info!("Waiting for lock {}", path.display());
                file.lock()?;
            }
            Err(TryLockError::Error(e)) => return Err(EvalError::Io(e)),
        }

        let mut lock = Self {
            file,
            path: path.to_path_buf(),
        };
        lock.record_holder()?;
        log::debug!("Acquired lock {}", path.display());
        Ok(lock)
    }

    /// Note who holds the lock, for operators inspecting a stuck run.
    fn record_holder(&mut self) -> Result<()> {
        let holder = serde_json::json!({
            "pid": std::process::id(),
            "acquired_at": Utc::now().to_rfc3339(),
        });
        self.file.set_len(0)?;
        writeln!(self.file, "{}", holder)?;
        Ok(())
    }
}

impl Drop for ShardLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        log::debug!("Released lock {}", self.path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_lock_is_exclusive_until_dropped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nq.jsonl.lock");

        let lock = ShardLock::acquire(&path).unwrap();
        let other = File::open(&path).unwrap();
        assert!(matches!(other.try_lock(), Err(TryLockError::WouldBlock)));

        drop(lock);
        assert!(other.try_lock().is_ok());
        other.unlock().unwrap();

        let again = ShardLock::acquire(&path).unwrap();
        assert_eq!(again.path, path);
    }

    #[test]
    fn test_waiter_proceeds_after_release() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("x.lock");
        let lock = ShardLock::acquire(&path).unwrap();

        let (tx, rx) = mpsc::channel();
        let waiter_path = path.clone();
        let handle = std::thread::spawn(move || {
            let _lock = ShardLock::acquire(&waiter_path).unwrap();
            tx.send(()).unwrap();
        });

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        drop(lock);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_lock_file_records_holder() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.lock");
        let _lock = ShardLock::acquire(&path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let holder: serde_json::Value = serde_json::from_str(content.trim()).unwrap();
        assert_eq!(holder["pid"], serde_json::json!(std::process::id()));
    }
}
