//! [`RepositoryProvider`] backed by the git binary.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::traits::{Repository, RepositoryProvider, WorkingCopy};
use crate::config::GitConfig;
use crate::git::{Git, GitError, GitFileSystemView, GitRepository, path_str};
use crate::types::{Revision, Specifier, absolute_path};

const ORIGIN: &str = "origin";

/// Clones caches with `git clone --mirror` and derives working copies from
/// them with `git clone`.
#[derive(Debug, Clone, Default)]
pub struct GitRepositoryProvider {
    git: Git,
}

impl GitRepositoryProvider {
    pub fn new(config: GitConfig) -> Self {
        Self {
            git: Git::new(config),
        }
    }

    pub fn with_git(git: Git) -> Self {
        Self { git }
    }

    pub fn git(&self) -> &Git {
        &self.git
    }

    /// Run `git clone <args> -- <source> <dest>` from `dest`'s parent. A
    /// destination created by a failed clone is removed again.
    ///
    /// `dest` must be absolute; it is passed to git verbatim.
    fn clone_into(&self, args: &[&str], source: &str, dest: &Path) -> Result<(), GitError> {
        let parent = dest
            .parent()
            .ok_or_else(|| GitError::InvalidInput(format!("cannot clone into {}", dest.display())))?;
        fs::create_dir_all(parent)?;

        let dest_existed = dest.exists();
        let dest_str = path_str(dest, "destination")?;
        let mut full = vec!["clone"];
        full.extend_from_slice(args);
        full.extend_from_slice(&["--", source, dest_str]);

        if let Err(err) = self.git.run(parent, &full) {
            if !dest_existed {
                if let Err(cleanup) = fs::remove_dir_all(dest) {
                    if cleanup.kind() != io::ErrorKind::NotFound {
                        log::warn!(
                            "Failed to clean up {} after clone error: {}",
                            dest.display(),
                            cleanup
                        );
                    }
                }
            }
            return Err(err);
        }
        Ok(())
    }
}

impl RepositoryProvider for GitRepositoryProvider {
    type Repo = GitRepository;
    type Checkout = GitRepository;

    fn fetch(&self, specifier: &Specifier, to: &Path) -> Result<(), GitError> {
        let to = absolute_path(to)?;
        if to.exists() {
            return GitRepository::bare(to, self.git.clone()).fetch();
        }
        log::info!("Cloning {} into {}", specifier, to.display());
        self.clone_into(&["--mirror"], &specifier.location_string(), &to)
    }

    fn open(&self, _specifier: &Specifier, at: &Path) -> Result<GitRepository, GitError> {
        if !at.is_dir() {
            return Err(GitError::NotARepository(at.to_path_buf()));
        }
        Ok(GitRepository::bare(at, self.git.clone()))
    }

    fn create_working_copy(
        &self,
        specifier: &Specifier,
        source: &Path,
        at: &Path,
        editable: bool,
    ) -> Result<GitRepository, GitError> {
        let source = absolute_path(source)?;
        let source_str = path_str(&source, "source")?;
        let at = absolute_path(at)?;
        if editable {
            log::info!("Creating editable working copy of {} at {}", specifier, at.display());
            self.clone_into(&["--no-checkout"], source_str, &at)?;
            let copy = GitRepository::new(at, self.git.clone());
            copy.set_url(ORIGIN, &specifier.location_string())?;
            copy.fetch()?;
            Ok(copy)
        } else {
            log::info!("Creating working copy of {} at {}", specifier, at.display());
            self.clone_into(&["--shared", "--no-checkout"], source_str, &at)?;
            Ok(GitRepository::new(at, self.git.clone()))
        }
    }

    fn open_working_copy(&self, at: &Path) -> Result<GitRepository, GitError> {
        if !self.working_copy_exists(at) {
            return Err(GitError::NotARepository(at.to_path_buf()));
        }
        Ok(GitRepository::new(at, self.git.clone()))
    }

    fn working_copy_exists(&self, at: &Path) -> bool {
        at.join(".git").exists()
    }

    fn is_valid_directory(&self, path: &Path) -> Result<bool, GitError> {
        GitRepository::new(path, self.git.clone()).is_valid_directory()
    }

    fn is_valid_directory_for(&self, path: &Path, specifier: &Specifier) -> Result<bool, GitError> {
        if !self.is_valid_directory(path)? {
            return Ok(false);
        }
        Ok(self.origin(path)?.is_some_and(|origin| origin == *specifier))
    }

    fn origin(&self, path: &Path) -> Result<Option<Specifier>, GitError> {
        let repository = GitRepository::new(path, self.git.clone());
        Ok(repository.remote_url(ORIGIN)?.map(Specifier::url))
    }

    fn remove(&self, path: &Path) -> Result<(), GitError> {
        match fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Repository for GitRepository {
    fn path(&self) -> &Path {
        GitRepository::path(self)
    }

    fn get_tags(&self) -> Result<BTreeSet<String>, GitError> {
        GitRepository::get_tags(self)
    }

    fn resolve_revision_tag(&self, tag: &str) -> Result<Revision, GitError> {
        GitRepository::resolve_revision_tag(self, tag)
    }

    fn resolve_revision_identifier(&self, identifier: &str) -> Result<Revision, GitError> {
        GitRepository::resolve_revision_identifier(self, identifier)
    }

    fn exists(&self, revision: &Revision) -> bool {
        GitRepository::exists(self, revision)
    }

    fn fetch(&self) -> Result<(), GitError> {
        GitRepository::fetch(self)
    }

    fn open_file_view(&self, revision: &Revision) -> Result<GitFileSystemView, GitError> {
        GitRepository::open_file_view(self, revision)
    }
}

impl WorkingCopy for GitRepository {
    fn current_revision(&self) -> Result<Revision, GitError> {
        GitRepository::current_revision(self)
    }

    fn current_branch(&self) -> Result<String, GitError> {
        GitRepository::current_branch(self)
    }

    fn checkout_tag(&self, tag: &str) -> Result<(), GitError> {
        GitRepository::checkout_tag(self, tag)
    }

    fn checkout_revision(&self, revision: &Revision) -> Result<(), GitError> {
        GitRepository::checkout_revision(self, revision)
    }

    fn checkout_new_branch(&self, name: &str) -> Result<(), GitError> {
        GitRepository::checkout_new_branch(self, name)
    }

    fn has_uncommitted_changes(&self) -> Result<bool, GitError> {
        GitRepository::has_uncommitted_changes(self)
    }

    fn has_unpushed_commits(&self) -> Result<bool, GitError> {
        GitRepository::has_unpushed_commits(self)
    }

    fn is_alternate_object_store_valid(&self, expected: &Path) -> bool {
        GitRepository::is_alternate_object_store_valid(self, expected)
    }

    fn are_ignored(&self, paths: &[PathBuf]) -> Result<Vec<bool>, GitError> {
        GitRepository::are_ignored(self, paths)
    }
}
