//! Cross-process run lock.
//!
//! An advisory exclusive lock on a sidecar file next to the state database.
//! Acquisition never blocks: if another process holds the lock the caller gets
//! [`LockError::Held`] immediately. The lock is released when the guard drops.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use thiserror::Error;
use tracing::debug;

use voice_inbox_core::InboxError;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("another run holds the lock at {0}")]
    Held(PathBuf),
    #[error("cannot open lock file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl From<LockError> for InboxError {
    fn from(err: LockError) -> Self {
        InboxError::Lock(err.to_string())
    }
}

/// Scoped guard for the run lock.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Single non-blocking attempt to take the lock.
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        let io_err = |source| LockError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .map_err(io_err)?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                debug!(path = %path.display(), "run lock acquired");
                Ok(Self {
                    file,
                    path: path.to_path_buf(),
                })
            }
            Err(err) if is_contended(&err) => Err(LockError::Held(path.to_path_buf())),
            Err(err) => Err(io_err(err)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        debug!(path = %self.path.display(), "run lock released");
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db.lock");

        let guard = RunLock::acquire(&path).unwrap();
        let err = RunLock::acquire(&path).unwrap_err();
        assert!(matches!(err, LockError::Held(_)));
        assert!(matches!(InboxError::from(err), InboxError::Lock(_)));

        drop(guard);
        let again = RunLock::acquire(&path).unwrap();
        assert_eq!(again.path(), path.as_path());
    }

    #[test]
    fn missing_parent_directories_are_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("run.lock");
        let _guard = RunLock::acquire(&path).unwrap();
        assert!(path.exists());
    }
}
