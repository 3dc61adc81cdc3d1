//! Seams between the cache manager and a concrete version-control backend.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::git::{GitError, GitFileSystemView};
use crate::types::{Revision, Specifier};

/// Read-only access to a fetched repository.
pub trait Repository: Send + Sync {
    fn path(&self) -> &Path;

    fn get_tags(&self) -> Result<BTreeSet<String>, GitError>;

    fn resolve_revision_tag(&self, tag: &str) -> Result<Revision, GitError>;

    fn resolve_revision_identifier(&self, identifier: &str) -> Result<Revision, GitError>;

    /// `false` for anything that does not resolve; never an error.
    fn exists(&self, revision: &Revision) -> bool;

    /// Update from the repository's remotes.
    fn fetch(&self) -> Result<(), GitError>;

    fn open_file_view(&self, revision: &Revision) -> Result<GitFileSystemView, GitError>;
}

/// A checkout that can be modified.
pub trait WorkingCopy: Repository {
    fn current_revision(&self) -> Result<Revision, GitError>;

    fn current_branch(&self) -> Result<String, GitError>;

    fn checkout_tag(&self, tag: &str) -> Result<(), GitError>;

    fn checkout_revision(&self, revision: &Revision) -> Result<(), GitError>;

    fn checkout_new_branch(&self, name: &str) -> Result<(), GitError>;

    fn has_uncommitted_changes(&self) -> Result<bool, GitError>;

    fn has_unpushed_commits(&self) -> Result<bool, GitError>;

    /// Whether this copy still borrows its objects from the cache at
    /// `expected`.
    fn is_alternate_object_store_valid(&self, expected: &Path) -> bool;

    fn are_ignored(&self, paths: &[PathBuf]) -> Result<Vec<bool>, GitError>;
}

/// Creates and opens repositories on disk.
pub trait RepositoryProvider: Send + Sync {
    type Repo: Repository;
    type Checkout: WorkingCopy;

    /// Clone `specifier` into `to` as a cache, or update `to` in place when it
    /// already holds one.
    fn fetch(&self, specifier: &Specifier, to: &Path) -> Result<(), GitError>;

    /// Open a cache previously populated by [`RepositoryProvider::fetch`].
    fn open(&self, specifier: &Specifier, at: &Path) -> Result<Self::Repo, GitError>;

    /// Clone the cache at `source` into `at`.
    ///
    /// A non-editable copy borrows objects from `source` and keeps it as
    /// `origin`; an editable copy points `origin` at the specifier's real
    /// location.
    fn create_working_copy(
        &self,
        specifier: &Specifier,
        source: &Path,
        at: &Path,
        editable: bool,
    ) -> Result<Self::Checkout, GitError>;

    fn open_working_copy(&self, at: &Path) -> Result<Self::Checkout, GitError>;

    fn working_copy_exists(&self, at: &Path) -> bool;

    /// Whether `path` is the root of a repository. Errors when it is not a
    /// repository at all.
    fn is_valid_directory(&self, path: &Path) -> Result<bool, GitError>;

    /// Whether `path` is a repository whose `origin` identifies `specifier`.
    fn is_valid_directory_for(&self, path: &Path, specifier: &Specifier) -> Result<bool, GitError>;

    /// The specifier `origin` points at, if one is configured.
    fn origin(&self, path: &Path) -> Result<Option<Specifier>, GitError>;

    /// Delete a cache or working copy.
    fn remove(&self, path: &Path) -> Result<(), GitError>;
}
