//! Per-path exclusive locks.
//!
//! Mutating git operations on one directory must not overlap, whether they
//! come from threads of this process or from another process sharing the
//! cache root, so the lock is an `flock` on a file next to the cache.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;

/// Default lock timeout (5 minutes) - prevents indefinite hangs
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

const INITIAL_BACKOFF: Duration = Duration::from_millis(10);
const MAX_BACKOFF: Duration = Duration::from_millis(500);

/// Exclusive lock on one cache entry. Released when dropped.
#[derive(Debug)]
pub struct RepoLock {
    file: File,
    path: PathBuf,
}

fn open_lock_file(lock_path: &Path) -> io::Result<File> {
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)
}

impl RepoLock {
    /// Block until the lock is held or [`DEFAULT_LOCK_TIMEOUT`] elapses.
    pub fn acquire(lock_path: &Path) -> io::Result<Self> {
        Self::acquire_with_timeout(lock_path, DEFAULT_LOCK_TIMEOUT)
    }

    /// Poll with exponential backoff. Fails with `ErrorKind::TimedOut` once
    /// `timeout` has passed.
    pub fn acquire_with_timeout(lock_path: &Path, timeout: Duration) -> io::Result<Self> {
        let file = open_lock_file(lock_path)?;
        let start = Instant::now();
        let mut backoff = INITIAL_BACKOFF;
        let mut logged = false;

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    return Ok(Self {
                        file,
                        path: lock_path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if start.elapsed() >= timeout {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!(
                                "timed out after {:?} waiting for {}",
                                timeout,
                                lock_path.display()
                            ),
                        ));
                    }
                    if !logged {
                        log::debug!("Waiting for lock {}", lock_path.display());
                        logged = true;
                    }
                    std::thread::sleep(backoff);
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// `None` if someone else holds the lock.
    pub fn try_acquire(lock_path: &Path) -> io::Result<Option<Self>> {
        let file = open_lock_file(lock_path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self {
                file,
                path: lock_path.to_path_buf(),
            })),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RepoLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
