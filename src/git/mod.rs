//! Git access through the git binary.
//!
//! Every operation is a validated wrapper around one or more `git -C <path>`
//! invocations whose output is parsed defensively:
//!
//! - [`process`] - the narrow process-execution seam ([`ProcessRunner`]) and
//!   the [`Git`] invoker that applies [`GitConfig`](crate::config::GitConfig)
//! - [`repository`] - [`GitRepository`], inspection and mutation of one
//!   on-disk repository
//! - [`tree`] - commit and tree objects read without a checkout
//! - [`view`] - [`GitFileSystemView`], a read-only filesystem over one revision

pub mod process;
pub mod repository;
pub mod tree;
pub mod view;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub use process::{Git, Invocation, ProcessOutput, ProcessRunner, SystemRunner};
pub use repository::{Commit, GitRepository, Remote};
pub use tree::{EntryType, Location, Tree, TreeEntry};
pub use view::{FileSystemError, GitFileSystemView};

/// Where a diagnostic should be attributed: the repository directory the
/// failing command ran against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticLocation {
    pub path: PathBuf,
}

impl fmt::Display for DiagnosticLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// A git invocation that exited with a nonzero status.
#[derive(Error, Debug, Clone)]
#[error("`git {}` failed in {}: {}", .arguments.join(" "), .path.display(), .stderr.trim())]
pub struct CommandError {
    /// Directory the command ran against.
    pub path: PathBuf,
    /// Arguments after `git -C <path>`.
    pub arguments: Vec<String>,
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    /// Diagnostic text as printed by git.
    pub stderr: String,
    pub stdout: String,
}

impl CommandError {
    pub fn diagnostic_location(&self) -> Option<DiagnosticLocation> {
        Some(DiagnosticLocation {
            path: self.path.clone(),
        })
    }
}

/// Errors returned by git operations.
#[derive(Error, Debug)]
pub enum GitError {
    /// git ran and exited with a nonzero status.
    #[error(transparent)]
    Command(#[from] CommandError),
    /// A tag, revision or treeish does not resolve.
    #[error("{treeish} not found in {path}")]
    NotFound { path: PathBuf, treeish: String },
    /// The directory is not a git repository.
    #[error("not a git repository: {0}")]
    NotARepository(PathBuf),
    /// git could not be started at all (missing or not executable).
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    /// Output parsing or unexpected git data.
    #[error("failed to parse git data: {0}")]
    ParseError(String),
    /// Invalid inputs were provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The object exists but cannot be read the way it was asked for,
    /// e.g. descending into a submodule.
    #[error("unsupported {what} at {path}")]
    Unsupported { path: String, what: String },
    /// A checkout succeeded but bringing submodules in line failed.
    #[error("updating submodules in {path} failed: {source}")]
    Submodules {
        path: PathBuf,
        #[source]
        source: Box<GitError>,
    },
    /// Underlying IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl GitError {
    /// The repository directory this error is about, when known.
    pub fn path(&self) -> Option<&Path> {
        match self {
            GitError::Command(err) => Some(&err.path),
            GitError::NotFound { path, .. }
            | GitError::NotARepository(path)
            | GitError::Submodules { path, .. } => Some(path),
            _ => None,
        }
    }

    pub fn diagnostic_location(&self) -> Option<DiagnosticLocation> {
        self.path().map(|path| DiagnosticLocation {
            path: path.to_path_buf(),
        })
    }

    /// Whether this is a "does not resolve" failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, GitError::NotFound { .. })
    }
}

/// Validate that a git ref, revision or remote name does not contain
/// dangerous patterns.
///
/// Rejects:
/// - Empty strings
/// - Strings starting with `-` (could be interpreted as flags)
/// - Strings containing null bytes or control characters
pub(crate) fn validate_git_ref(value: &str, name: &str) -> Result<(), GitError> {
    if value.is_empty() {
        return Err(GitError::InvalidInput(format!("{} cannot be empty", name)));
    }
    if value.starts_with('-') {
        return Err(GitError::InvalidInput(format!(
            "{} cannot start with '-'",
            name
        )));
    }
    if value.bytes().any(|b| b < 0x20 || b == 0x7f) {
        return Err(GitError::InvalidInput(format!(
            "{} cannot contain null or control characters",
            name
        )));
    }
    Ok(())
}

/// Paths are passed to git as strings.
pub(crate) fn path_str<'a>(path: &'a Path, what: &str) -> Result<&'a str, GitError> {
    path.to_str()
        .ok_or_else(|| GitError::ParseError(format!("{} path is not valid UTF-8", what)))
}
