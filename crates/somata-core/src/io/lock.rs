use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::{Result, SomataError};

/// Exclusive write access to one plane's artifacts.
///
/// Backed by a lock file created with `create_new`; a second holder fails
/// immediately with [`SomataError::RunInProgress`]. Released on drop.
#[derive(Debug)]
pub struct PlaneLock {
    path: PathBuf,
    plane: usize,
}

impl PlaneLock {
    pub fn acquire(path: &Path, plane: usize) -> Result<Self> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(SomataError::RunInProgress {
                    plane,
                    lock: path.display().to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        // Built before writing so a failed write still removes the file.
        let lock = Self {
            path: path.to_path_buf(),
            plane,
        };
        lock.write_owner(file)?;
        debug!(plane, lock = %path.display(), "Plane locked");
        Ok(lock)
    }

    fn write_owner(&self, mut out: impl Write) -> Result<()> {
        writeln!(out, "pid={} since={}", std::process::id(), Utc::now().to_rfc3339())?;
        out.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove a lock left behind by a crashed run. Returns whether one existed.
    pub fn force_release(path: &Path) -> Result<bool> {
        match fs::remove_file(path) {
            Ok(()) => {
                warn!(lock = %path.display(), "Stale lock removed");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for PlaneLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(plane = self.plane, error = %e, "Failed to release plane lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_released() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("plane0").join(".somata.lock");
        let lock = PlaneLock::acquire(&path, 0).unwrap();
        assert!(matches!(
            PlaneLock::acquire(&path, 0),
            Err(SomataError::RunInProgress { plane: 0, .. })
        ));
        drop(lock);
        assert!(!path.exists());
        assert!(PlaneLock::acquire(&path, 0).is_ok());
    }

    struct FailingWriter;

    impl Write for FailingWriter {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("disk full"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failed_owner_write_leaves_no_lock_behind() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(".somata.lock");
        fs::write(&path, b"").unwrap();
        let lock = PlaneLock {
            path: path.clone(),
            plane: 0,
        };
        assert!(matches!(lock.write_owner(FailingWriter), Err(SomataError::Io(_))));
        drop(lock);
        assert!(!path.exists());
        assert!(PlaneLock::acquire(&path, 0).is_ok());
    }

    #[test]
    fn force_release_clears_stale_lock() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(".somata.lock");
        fs::write(&path, b"pid=1").unwrap();
        assert!(PlaneLock::force_release(&path).unwrap());
        assert!(!PlaneLock::force_release(&path).unwrap());
    }
}
