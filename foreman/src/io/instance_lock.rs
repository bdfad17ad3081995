//! Single-daemon-per-project lock (`.foreman/daemon.lock`).

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;
use tracing::{debug, warn};

use crate::error::LockError;

/// Exclusive advisory lock held while the daemon runs or a one-off tick
/// executes. Dropping it releases the lock.
#[derive(Debug)]
pub struct InstanceLock {
    _file: File,
    path: PathBuf,
}

impl InstanceLock {
    /// Take the lock without waiting; a held lock fails fast with
    /// [`LockError::AlreadyRunning`].
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("open lock file {}", path.display()))?;

        if let Err(err) = file.try_lock_exclusive() {
            warn!(path = %path.display(), err = %err, "instance lock is held");
            return Err(LockError::AlreadyRunning {
                path: path.display().to_string(),
            }
            .into());
        }

        file.set_len(0)
            .and_then(|()| file.seek(SeekFrom::Start(0)).map(|_| ()))
            .and_then(|()| writeln!(file, "{}", std::process::id()))
            .with_context(|| format!("write pid to {}", path.display()))?;
        debug!(path = %path.display(), "instance lock acquired");

        Ok(Self {
            _file: file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_first_is_dropped() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("daemon.lock");

        let first = InstanceLock::acquire(&path).expect("first lock");
        let err = InstanceLock::acquire(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LockError>(),
            Some(LockError::AlreadyRunning { .. })
        ));

        drop(first);
        InstanceLock::acquire(&path).expect("lock after release");
    }

    #[test]
    fn lock_file_records_pid() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("daemon.lock");
        let lock = InstanceLock::acquire(&path).expect("lock");
        let contents = std::fs::read_to_string(lock.path()).expect("read");
        assert_eq!(contents.trim(), std::process::id().to_string());
    }
}
