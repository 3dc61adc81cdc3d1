//! Git-backed repository cache and working-copy manager.
//!
//! A package manager names each dependency with a [`Specifier`]; the
//! [`RepositoryManager`] keeps one mirror clone per specifier under a cache
//! root and hands out read-only [`Repository`] access or mutable
//! [`WorkingCopy`] checkouts derived from it. All git access goes through the
//! git binary behind a narrow [`ProcessRunner`](git::ProcessRunner).

pub mod cache;
pub mod config;
pub mod git;
pub mod types;

pub use cache::{
    CacheError, CacheState, GitRepositoryProvider, Repository, RepositoryHandle,
    RepositoryManager, RepositoryProvider, WorkingCopy,
};
pub use config::{Config, GitConfig};
pub use git::{FileSystemError, GitError, GitFileSystemView, GitRepository};
pub use types::{Hash, ParseError, Revision, Specifier};
