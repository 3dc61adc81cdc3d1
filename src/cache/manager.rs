//! Repository cache manager
//!
//! Keeps one mirror clone per [`Specifier`] under the cache root and decides,
//! per lookup, whether to reuse, update or refetch it. There is no index file:
//! a cache directory is valid for a specifier exactly when its `origin` remote
//! names that specifier.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use super::lock::{DEFAULT_LOCK_TIMEOUT, RepoLock};
use super::paths::CachePaths;
use super::provider::GitRepositoryProvider;
use super::traits::{RepositoryProvider, WorkingCopy};
use crate::config::Config;
use crate::git::GitError;
use crate::types::Specifier;

/// Errors returned by cache operations.
#[derive(Error, Debug)]
pub enum CacheError {
    /// A git operation failed.
    #[error("git error: {0}")]
    Git(#[from] GitError),
    /// An underlying IO operation failed.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// Failed to acquire the per-repository lock within the timeout.
    #[error("lock acquisition failed: {0}")]
    LockFailed(PathBuf),
    /// The directory is a repository but has no `origin` remote.
    #[error("{0} has no origin remote")]
    NoOrigin(PathBuf),
}

/// What is on disk for a specifier, a cache or working copy directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheState {
    /// Nothing there yet.
    Absent,
    /// Something is there but it is not a clone of the expected repository.
    Invalid,
    Valid,
    /// A working copy whose borrowed object store is gone.
    Stale,
}

impl CacheState {
    /// Anything but `Valid` has to be (re)fetched.
    pub fn needs_fetch(self) -> bool {
        self != CacheState::Valid
    }
}

/// A fetched cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryHandle {
    pub specifier: Specifier,
    pub path: PathBuf,
}

/// Cache manager for git repositories.
#[derive(Debug)]
pub struct RepositoryManager<P = GitRepositoryProvider> {
    paths: CachePaths,
    provider: P,
    jobs: usize,
    lock_timeout: Duration,
}

impl RepositoryManager<GitRepositoryProvider> {
    /// A manager over the git binary using `config`'s cache root, git
    /// settings and parallelism.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.cache_root.clone(),
            GitRepositoryProvider::new(config.git.clone()),
        )
        .with_jobs(config.jobs)
    }
}

impl<P: RepositoryProvider> RepositoryManager<P> {
    pub fn new(cache_root: impl Into<PathBuf>, provider: P) -> Self {
        Self {
            paths: CachePaths::new(cache_root),
            provider,
            jobs: 4,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Number of repositories [`RepositoryManager::lookup_all`] fetches at once.
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn paths(&self) -> &CachePaths {
        &self.paths
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Where the cache for `specifier` lives, whether or not it exists yet.
    pub fn cache_path(&self, specifier: &Specifier) -> PathBuf {
        self.paths.repository_dir(specifier)
    }

    fn lock(&self, specifier: &Specifier) -> Result<RepoLock, CacheError> {
        self.lock_at(self.paths.lock_path(specifier))
    }

    fn lock_at(&self, lock_path: PathBuf) -> Result<RepoLock, CacheError> {
        match RepoLock::acquire_with_timeout(&lock_path, self.lock_timeout) {
            Ok(lock) => Ok(lock),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Err(CacheError::LockFailed(lock_path)),
            Err(e) => Err(CacheError::Io(e)),
        }
    }

    /// State of the cache directory for `specifier`.
    pub fn cache_state(&self, specifier: &Specifier) -> Result<CacheState, CacheError> {
        let path = self.cache_path(specifier);
        if !path.exists() {
            return Ok(CacheState::Absent);
        }
        match self.provider.is_valid_directory_for(&path, specifier) {
            Ok(true) => Ok(CacheState::Valid),
            Ok(false) | Err(GitError::NotARepository(_)) => Ok(CacheState::Invalid),
            Err(err) => Err(err.into()),
        }
    }

    /// Make sure a valid cache for `specifier` exists and return it.
    ///
    /// A valid cache is reused as is, or updated in place when `update` is
    /// set. An invalid one is deleted and cloned again.
    pub fn lookup(&self, specifier: &Specifier, update: bool) -> Result<RepositoryHandle, CacheError> {
        let _lock = self.lock(specifier)?;
        let path = self.cache_path(specifier);

        match self.cache_state(specifier)? {
            CacheState::Valid => {
                if update {
                    self.provider.fetch(specifier, &path)?;
                } else {
                    log::debug!("Reusing cache {} for {}", path.display(), specifier);
                }
            }
            CacheState::Absent => {
                self.provider.fetch(specifier, &path)?;
            }
            CacheState::Invalid | CacheState::Stale => {
                log::warn!(
                    "Discarding invalid cache {} for {}",
                    path.display(),
                    specifier
                );
                self.provider.remove(&path)?;
                self.provider.fetch(specifier, &path)?;
            }
        }

        Ok(RepositoryHandle {
            specifier: specifier.clone(),
            path,
        })
    }

    /// [`RepositoryManager::lookup`] for many specifiers, running up to
    /// `jobs` lookups in parallel. Results are in input order.
    pub fn lookup_all(
        &self,
        specifiers: &[Specifier],
        update: bool,
    ) -> Vec<Result<RepositoryHandle, CacheError>> {
        if specifiers.is_empty() {
            return Vec::new();
        }

        let (job_tx, job_rx) = crossbeam_channel::unbounded::<(usize, &Specifier)>();
        let (result_tx, result_rx) = crossbeam_channel::unbounded();
        for job in specifiers.iter().enumerate() {
            // The receiver is alive until the workers below finish.
            let _ = job_tx.send(job);
        }
        drop(job_tx);

        let workers = self.jobs.min(specifiers.len());
        thread::scope(|scope| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(move || {
                    for (index, specifier) in job_rx.iter() {
                        let result = self.lookup(specifier, update);
                        if result_tx.send((index, result)).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        drop(result_tx);

        let mut results: Vec<Option<Result<RepositoryHandle, CacheError>>> =
            specifiers.iter().map(|_| None).collect();
        for (index, result) in result_rx.iter() {
            results[index] = Some(result);
        }
        results
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    Err(CacheError::Io(io::Error::other("lookup worker exited early")))
                })
            })
            .collect()
    }

    /// Open the cache behind `handle` for reading.
    pub fn open(&self, handle: &RepositoryHandle) -> Result<P::Repo, CacheError> {
        Ok(self.provider.open(&handle.specifier, &handle.path)?)
    }

    /// Derive a working copy at `at` from the cache behind `handle`.
    pub fn create_working_copy(
        &self,
        handle: &RepositoryHandle,
        at: &Path,
        editable: bool,
    ) -> Result<P::Checkout, CacheError> {
        Ok(self
            .provider
            .create_working_copy(&handle.specifier, &handle.path, at, editable)?)
    }

    /// State of a working copy at `at` derived from `specifier`'s cache.
    ///
    /// An editable copy is valid while its `origin` names `specifier`. A
    /// non-editable copy also needs its borrowed object store; without it the
    /// copy is `Stale`.
    pub fn working_copy_state(
        &self,
        specifier: &Specifier,
        at: &Path,
        editable: bool,
    ) -> Result<CacheState, CacheError> {
        if !self.provider.working_copy_exists(at) {
            return Ok(CacheState::Absent);
        }

        let expected_origin = if editable {
            specifier.clone()
        } else {
            let cache = self.cache_path(specifier);
            let copy = self.provider.open_working_copy(at)?;
            if !copy.is_alternate_object_store_valid(&cache) {
                return Ok(CacheState::Stale);
            }
            Specifier::path(cache)
        };

        match self.provider.is_valid_directory_for(at, &expected_origin) {
            Ok(true) => Ok(CacheState::Valid),
            Ok(false) | Err(GitError::NotARepository(_)) => Ok(CacheState::Invalid),
            Err(err) => Err(err.into()),
        }
    }

    /// Delete the cache for `specifier`.
    pub fn remove(&self, specifier: &Specifier) -> Result<(), CacheError> {
        let _lock = self.lock(specifier)?;
        let path = self.cache_path(specifier);
        log::info!("Removing cache {} for {}", path.display(), specifier);
        self.provider.remove(&path)?;
        Ok(())
    }

    /// Serialize mutations of the working copy at `at`. Hold the returned
    /// lock across create, checkout and remove of that directory.
    pub fn lock_working_copy(&self, at: &Path) -> Result<RepoLock, CacheError> {
        self.lock_at(self.paths.working_copy_lock_path(at))
    }

    /// Delete every cached repository, each under its own lock.
    pub fn purge(&self) -> Result<(), CacheError> {
        let dir = self.paths.repositories_dir();
        log::info!("Purging {}", dir.display());
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let key = entry.file_name();
            let _lock = self.lock_at(self.paths.key_lock_path(&key.to_string_lossy()))?;
            self.provider.remove(&entry.path())?;
        }
        Ok(())
    }

    /// Whether `path` is the root of a repository with an `origin` remote.
    ///
    /// Errors when `path` is not a repository at all, or has no `origin`.
    pub fn is_valid_directory(&self, path: &Path) -> Result<bool, CacheError> {
        if !self.provider.is_valid_directory(path)? {
            return Ok(false);
        }
        match self.provider.origin(path)? {
            Some(_) => Ok(true),
            None => Err(CacheError::NoOrigin(path.to_path_buf())),
        }
    }

    /// Whether `path`'s `origin` identifies `specifier`. Errors when `path`
    /// is not a repository.
    pub fn is_valid_directory_for(
        &self,
        path: &Path,
        specifier: &Specifier,
    ) -> Result<bool, CacheError> {
        Ok(self.provider.is_valid_directory_for(path, specifier)?)
    }
}
