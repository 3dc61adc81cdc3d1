//! One on-disk git repository: a bare/mirror cache or a working checkout.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::process::Git;
use super::{GitError, path_str, validate_git_ref};
use crate::types::{Hash, Revision, lexically_normalize};

/// Object types accepted by [`GitRepository::resolve_hash`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    Commit,
    Tree,
    Blob,
}

impl ObjectType {
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectType::Commit => "commit",
            ObjectType::Tree => "tree",
            ObjectType::Blob => "blob",
        }
    }
}

/// A configured remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Remote {
    pub name: String,
    pub url: String,
}

/// A parsed commit object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub hash: Hash,
    pub tree: Hash,
    pub parents: Vec<Hash>,
}

/// Wraps a git directory on disk.
///
/// Every operation shells out through [`Git`] with `-C <path>`, so values for
/// different directories can be used from different threads at once. Two
/// mutating calls on the same directory must be serialized by the caller.
#[derive(Debug, Clone)]
pub struct GitRepository {
    path: PathBuf,
    is_working_repo: bool,
    git: Git,
}

impl GitRepository {
    /// A working checkout at `path`.
    pub fn new(path: impl Into<PathBuf>, git: Git) -> Self {
        Self::with_kind(path, git, true)
    }

    /// A bare or mirror clone at `path`.
    pub fn bare(path: impl Into<PathBuf>, git: Git) -> Self {
        Self::with_kind(path, git, false)
    }

    pub fn with_kind(path: impl Into<PathBuf>, git: Git, is_working_repo: bool) -> Self {
        Self {
            path: path.into(),
            is_working_repo,
            git,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_working_repo(&self) -> bool {
        self.is_working_repo
    }

    pub fn git(&self) -> &Git {
        &self.git
    }

    pub(crate) fn run(&self, args: &[&str]) -> Result<String, GitError> {
        self.git.run(&self.path, args)
    }

    /// All tag names. Empty for a repository without tags.
    pub fn get_tags(&self) -> Result<BTreeSet<String>, GitError> {
        let output = self.run(&["tag", "-l"])?;
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Resolve `tag` to the commit it points at.
    pub fn resolve_revision_tag(&self, tag: &str) -> Result<Revision, GitError> {
        validate_git_ref(tag, "tag")?;
        let refname = format!("refs/tags/{}", tag);
        match self.resolve_hash(&refname, Some(ObjectType::Commit)) {
            Ok(hash) => Ok(Revision::from(hash)),
            Err(GitError::NotFound { path, .. }) => Err(GitError::NotFound {
                path,
                treeish: tag.to_string(),
            }),
            Err(err) => Err(err),
        }
    }

    /// Resolve a raw hash, branch name or `HEAD` to its canonical commit.
    /// A canonical hash resolves to itself.
    pub fn resolve_revision_identifier(&self, identifier: &str) -> Result<Revision, GitError> {
        self.resolve_hash(identifier, Some(ObjectType::Commit))
            .map(Revision::from)
    }

    /// Plumbing lookup of `treeish`, peeled to `expected_type` when given.
    pub fn resolve_hash(
        &self,
        treeish: &str,
        expected_type: Option<ObjectType>,
    ) -> Result<Hash, GitError> {
        validate_git_ref(treeish, "revision")?;
        let spec = match expected_type {
            Some(kind) => format!("{}^{{{}}}", treeish, kind.as_str()),
            None => treeish.to_string(),
        };
        let output = self
            .git
            .run_unchecked(&self.path, &["rev-parse", "--verify", "--quiet", &spec])?;
        if !output.success() {
            return Err(GitError::NotFound {
                path: self.path.clone(),
                treeish: treeish.to_string(),
            });
        }
        let stdout = output.stdout_lossy();
        let line = stdout.trim();
        Hash::new(line).ok_or_else(|| {
            GitError::ParseError(format!("rev-parse returned an invalid hash: {:?}", line))
        })
    }

    /// Whether `revision` names a commit in this repository. Never fails.
    pub fn exists(&self, revision: &Revision) -> bool {
        self.resolve_hash(revision.identifier(), Some(ObjectType::Commit))
            .is_ok()
    }

    pub fn read_commit(&self, hash: &Hash) -> Result<Commit, GitError> {
        let bytes = self
            .git
            .run_bytes(&self.path, &["cat-file", "commit", hash.as_str()])?;
        let text = String::from_utf8_lossy(&bytes);
        parse_commit(hash, &text)
    }

    /// Fetch from every remote, pruning deleted refs.
    pub fn fetch(&self) -> Result<(), GitError> {
        log::info!("Fetching {}", self.path.display());
        self.run(&["remote", "update", "-p"])?;
        Ok(())
    }

    /// Move HEAD and the working tree to `tag`, then bring submodules in line.
    pub fn checkout_tag(&self, tag: &str) -> Result<(), GitError> {
        validate_git_ref(tag, "tag")?;
        let refname = format!("refs/tags/{}", tag);
        self.run(&["reset", "--hard", &refname])?;
        self.update_submodules_and_clean()
    }

    /// Check out `revision`, detaching HEAD for anything but a branch name.
    /// Uncommitted changes are discarded.
    pub fn checkout_revision(&self, revision: &Revision) -> Result<(), GitError> {
        validate_git_ref(revision.identifier(), "revision")?;
        self.run(&["checkout", "-f", revision.identifier()])?;
        self.update_submodules_and_clean()
    }

    /// Create branch `name` at HEAD and switch to it.
    pub fn checkout_new_branch(&self, name: &str) -> Result<(), GitError> {
        validate_git_ref(name, "branch")?;
        self.run(&["checkout", "-b", name])?;
        Ok(())
    }

    fn update_submodules_and_clean(&self) -> Result<(), GitError> {
        self.run(&["submodule", "update", "--init", "--recursive"])
            .map_err(|source| GitError::Submodules {
                path: self.path.clone(),
                source: Box::new(source),
            })?;
        self.run(&["clean", "-ffdx"])?;
        Ok(())
    }

    /// The checked-out branch, or `HEAD` when detached.
    pub fn current_branch(&self) -> Result<String, GitError> {
        self.run(&["rev-parse", "--abbrev-ref", "HEAD"])
    }

    pub fn current_revision(&self) -> Result<Revision, GitError> {
        self.resolve_revision_identifier("HEAD")
    }

    pub fn has_uncommitted_changes(&self) -> Result<bool, GitError> {
        let status = self.run(&["status", "-s"])?;
        Ok(!status.trim().is_empty())
    }

    /// Whether any local branch has commits no remote-tracking ref contains.
    pub fn has_unpushed_commits(&self) -> Result<bool, GitError> {
        let output = self.run(&["rev-list", "--branches", "--not", "--remotes", "-n", "1"])?;
        Ok(!output.trim().is_empty())
    }

    pub fn stage(&self, files: &[&str]) -> Result<(), GitError> {
        if files.is_empty() {
            return Ok(());
        }
        let mut args = vec!["add", "--"];
        args.extend_from_slice(files);
        self.run(&args)?;
        Ok(())
    }

    pub fn stage_everything(&self) -> Result<(), GitError> {
        self.run(&["add", "-A", "."])?;
        Ok(())
    }

    /// Commit the index. Empty commits are allowed.
    pub fn commit(&self, message: &str) -> Result<(), GitError> {
        self.run(&["commit", "--allow-empty", "-m", message])?;
        Ok(())
    }

    pub fn tag(&self, name: &str) -> Result<(), GitError> {
        validate_git_ref(name, "tag")?;
        self.run(&["tag", name])?;
        Ok(())
    }

    pub fn push(&self, remote: &str, branch: &str) -> Result<(), GitError> {
        validate_git_ref(remote, "remote")?;
        validate_git_ref(branch, "branch")?;
        self.run(&["push", remote, branch])?;
        Ok(())
    }

    /// Configured remotes, one entry per name, in the order git lists them.
    pub fn remotes(&self) -> Result<Vec<Remote>, GitError> {
        let output = self.run(&["remote", "-v"])?;
        Ok(parse_remotes(&output))
    }

    /// URL of remote `name`, or `None` when no such remote is configured.
    pub fn remote_url(&self, name: &str) -> Result<Option<String>, GitError> {
        validate_git_ref(name, "remote")?;
        let key = format!("remote.{}.url", name);
        let output = self
            .git
            .run_unchecked(&self.path, &["config", "--get", &key])?;
        match output.exit_code {
            Some(0) => {
                let url = output.stdout_lossy().trim().to_string();
                Ok(Some(url).filter(|u| !u.is_empty()))
            }
            Some(1) => Ok(None),
            _ => Err(super::process::command_error(
                &self.path,
                &["config", "--get", &key],
                output,
            )
            .into()),
        }
    }

    /// Point `remote` at `url`. Fails with a [`GitError::Command`] carrying
    /// this repository's path when the remote does not exist.
    pub fn set_url(&self, remote: &str, url: &str) -> Result<(), GitError> {
        validate_git_ref(remote, "remote")?;
        self.run(&["remote", "set-url", remote, url])?;
        Ok(())
    }

    /// Whether each of `paths` is ignored, in input order, using a single
    /// `check-ignore` process.
    pub fn are_ignored(&self, paths: &[PathBuf]) -> Result<Vec<bool>, GitError> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }
        let mut input = Vec::new();
        for path in paths {
            input.extend_from_slice(path_str(path, "ignored")?.as_bytes());
            input.push(0);
        }

        let args = ["check-ignore", "-z", "--stdin"];
        let output = self.git.run_with_input(&self.path, &args, input)?;
        let ignored: BTreeSet<String> = match output.exit_code {
            Some(0) => output
                .stdout_lossy()
                .split('\0')
                .filter(|entry| !entry.is_empty())
                .map(str::to_string)
                .collect(),
            // Exit 1: none of the paths is ignored.
            Some(1) => BTreeSet::new(),
            _ => return Err(super::process::command_error(&self.path, &args, output).into()),
        };

        paths
            .iter()
            .map(|path| Ok(ignored.contains(path_str(path, "ignored")?)))
            .collect()
    }

    /// Whether this directory is itself the root of a git repository (its
    /// `.git` directory, or the repository directory for bare clones) rather
    /// than a subdirectory of one. Fails with [`GitError::NotARepository`]
    /// when it is not inside a repository at all.
    pub fn is_valid_directory(&self) -> Result<bool, GitError> {
        if !self.path.is_dir() {
            return Err(GitError::NotARepository(self.path.clone()));
        }
        let output = self
            .git
            .run_unchecked(&self.path, &["rev-parse", "--absolute-git-dir"])?;
        if !output.success() {
            return Err(GitError::NotARepository(self.path.clone()));
        }
        let git_dir = PathBuf::from(output.stdout_lossy().trim());
        let git_dir = fs::canonicalize(&git_dir).unwrap_or(git_dir);
        let root = fs::canonicalize(&self.path)?;
        Ok(git_dir == root || git_dir == root.join(".git"))
    }

    /// Whether this clone borrows objects from `expected` and `expected`
    /// still exists. False when the pointer file is missing or mismatched.
    pub fn is_alternate_object_store_valid(&self, expected: &Path) -> bool {
        let candidates = [
            self.path.join(".git").join("objects/info/alternates"),
            self.path.join("objects/info/alternates"),
        ];
        let Some(contents) = candidates
            .iter()
            .find_map(|file| fs::read_to_string(file).ok())
        else {
            return false;
        };
        let Some(first) = contents.lines().map(str::trim).find(|l| !l.is_empty()) else {
            return false;
        };
        if !expected.exists() {
            return false;
        }
        same_path(Path::new(first), &expected.join("objects"))
    }
}

/// Compare two paths, resolving symlinks when both exist.
fn same_path(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => lexically_normalize(a) == lexically_normalize(b),
    }
}

fn parse_commit(hash: &Hash, text: &str) -> Result<Commit, GitError> {
    let mut tree = None;
    let mut parents = Vec::new();
    for line in text.lines() {
        if line.is_empty() {
            break;
        }
        if let Some(value) = line.strip_prefix("tree ") {
            tree = Some(Hash::new(value.trim()).ok_or_else(|| {
                GitError::ParseError(format!("invalid tree id in commit {}: {:?}", hash, value))
            })?);
        } else if let Some(value) = line.strip_prefix("parent ") {
            parents.push(Hash::new(value.trim()).ok_or_else(|| {
                GitError::ParseError(format!("invalid parent id in commit {}: {:?}", hash, value))
            })?);
        }
    }
    let tree = tree
        .ok_or_else(|| GitError::ParseError(format!("commit {} has no tree line", hash)))?;
    Ok(Commit {
        hash: hash.clone(),
        tree,
        parents,
    })
}

/// Parse `git remote -v`, keeping the first URL seen for each name.
fn parse_remotes(output: &str) -> Vec<Remote> {
    let mut remotes: Vec<Remote> = Vec::new();
    for line in output.lines() {
        let mut fields = line.split_whitespace();
        let (Some(name), Some(url)) = (fields.next(), fields.next()) else {
            continue;
        };
        if remotes.iter().any(|r| r.name == name) {
            continue;
        }
        remotes.push(Remote {
            name: name.to_string(),
            url: url.to_string(),
        });
    }
    remotes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GitConfig;
    use crate::git::process::testing::ScriptedRunner;
    use std::sync::Arc;

    const C1: &str = "1111111111111111111111111111111111111111";
    const C2: &str = "2222222222222222222222222222222222222222";
    const T1: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    fn scripted() -> (Arc<ScriptedRunner>, GitRepository) {
        let runner = ScriptedRunner::new();
        let git = Git::with_runner(GitConfig::default(), runner.clone());
        (runner, GitRepository::new("/work/repo", git))
    }

    #[test]
    fn get_tags_parses_lines() {
        let (runner, repo) = scripted();
        runner.ok(&["tag", "-l"], "1.2.3\n2.0.0\n");
        let tags = repo.get_tags().unwrap();
        assert_eq!(
            tags,
            BTreeSet::from(["1.2.3".to_string(), "2.0.0".to_string()])
        );
    }

    #[test]
    fn get_tags_empty() {
        let (runner, repo) = scripted();
        runner.ok(&["tag", "-l"], "");
        assert!(repo.get_tags().unwrap().is_empty());
    }

    #[test]
    fn resolve_tag_peels_to_commit() {
        let (runner, repo) = scripted();
        runner.ok(
            &["rev-parse", "--verify", "--quiet", "refs/tags/1.0^{commit}"],
            &format!("{}\n", C1),
        );
        let revision = repo.resolve_revision_tag("1.0").unwrap();
        assert_eq!(revision.identifier(), C1);
    }

    #[test]
    fn resolve_unknown_tag_is_not_found() {
        let (_runner, repo) = scripted();
        let err = repo.resolve_revision_tag("9.9.9").unwrap_err();
        match err {
            GitError::NotFound { path, treeish } => {
                assert_eq!(path, PathBuf::from("/work/repo"));
                assert_eq!(treeish, "9.9.9");
            }
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[test]
    fn resolve_rejects_flag_like_identifiers_without_spawning() {
        let (runner, repo) = scripted();
        let err = repo.resolve_revision_identifier("--all").unwrap_err();
        assert!(matches!(err, GitError::InvalidInput(_)));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn resolve_garbage_output_is_parse_error() {
        let (runner, repo) = scripted();
        runner.ok(
            &["rev-parse", "--verify", "--quiet", "HEAD^{commit}"],
            "not-a-hash\n",
        );
        assert!(matches!(
            repo.resolve_revision_identifier("HEAD"),
            Err(GitError::ParseError(_))
        ));
    }

    #[test]
    fn exists_is_false_for_unknown_and_invalid() {
        let (runner, repo) = scripted();
        runner.ok(
            &["rev-parse", "--verify", "--quiet", &format!("{}^{{commit}}", C1)],
            C1,
        );
        assert!(repo.exists(&Revision::new(C1)));
        assert!(!repo.exists(&Revision::new(C2)));
        assert!(!repo.exists(&Revision::new("")));
    }

    #[test]
    fn read_commit_parses_tree_and_parents() {
        let (runner, repo) = scripted();
        let body = format!(
            "tree {}\nparent {}\nauthor A <a@b> 0 +0000\ncommitter A <a@b> 0 +0000\n\nparent {}\n",
            T1, C2, C1
        );
        runner.ok(&["cat-file", "commit", C1], &body);
        let commit = repo.read_commit(&Hash::new(C1).unwrap()).unwrap();
        assert_eq!(commit.tree.as_str(), T1);
        assert_eq!(commit.parents, vec![Hash::new(C2).unwrap()]);
    }

    #[test]
    fn read_commit_without_tree_fails() {
        let (runner, repo) = scripted();
        runner.ok(&["cat-file", "commit", C1], "author A <a@b> 0 +0000\n");
        assert!(matches!(
            repo.read_commit(&Hash::new(C1).unwrap()),
            Err(GitError::ParseError(_))
        ));
    }

    #[test]
    fn checkout_tag_updates_submodules_then_cleans() {
        let (runner, repo) = scripted();
        runner.ok(&["reset", "--hard", "refs/tags/1.0.1"], "");
        runner.ok(&["submodule", "update", "--init", "--recursive"], "");
        runner.ok(&["clean", "-ffdx"], "");
        repo.checkout_tag("1.0.1").unwrap();
        assert_eq!(
            runner.commands(),
            vec![
                vec!["reset", "--hard", "refs/tags/1.0.1"],
                vec!["submodule", "update", "--init", "--recursive"],
                vec!["clean", "-ffdx"],
            ]
        );
    }

    #[test]
    fn failed_submodule_update_is_aggregated() {
        let (runner, repo) = scripted();
        runner.ok(&["checkout", "-f", C1], "");
        runner.fail(
            &["submodule", "update", "--init", "--recursive"],
            128,
            "fatal: repository 'x' does not exist\n",
        );
        let err = repo.checkout_revision(&Revision::new(C1)).unwrap_err();
        match err {
            GitError::Submodules { path, source } => {
                assert_eq!(path, PathBuf::from("/work/repo"));
                assert!(matches!(*source, GitError::Command(_)));
            }
            other => panic!("expected Submodules, got {:?}", other),
        }
    }

    #[test]
    fn failed_clean_is_a_plain_command_error() {
        let (runner, repo) = scripted();
        runner.ok(&["checkout", "-f", C1], "");
        runner.ok(&["submodule", "update", "--init", "--recursive"], "");
        runner.fail(&["clean", "-ffdx"], 1, "warning: failed to remove build/\n");
        let err = repo.checkout_revision(&Revision::new(C1)).unwrap_err();
        match err {
            GitError::Command(cmd) => assert_eq!(cmd.arguments, vec!["clean", "-ffdx"]),
            other => panic!("expected Command, got {:?}", other),
        }
    }

    #[test]
    fn uncommitted_and_unpushed_follow_output() {
        let (runner, repo) = scripted();
        runner.ok(&["status", "-s"], " M file.swift\n");
        runner.ok(&["rev-list", "--branches", "--not", "--remotes", "-n", "1"], "");
        assert!(repo.has_uncommitted_changes().unwrap());
        assert!(!repo.has_unpushed_commits().unwrap());
    }

    #[test]
    fn stage_passes_files_after_separator() {
        let (runner, repo) = scripted();
        runner.ok(&["add", "--", "a.txt", "-b.txt"], "");
        repo.stage(&["a.txt", "-b.txt"]).unwrap();
        repo.stage(&[]).unwrap();
        assert_eq!(runner.commands(), vec![vec!["add", "--", "a.txt", "-b.txt"]]);
    }

    #[test]
    fn remotes_deduplicate_fetch_and_push() {
        let output = "origin\thttps://example.com/repo.git (fetch)\n\
                      origin\thttps://example.com/repo.git (push)\n\
                      upstream\t/tmp/cache (fetch)\n\
                      upstream\t/tmp/cache (push)\n";
        assert_eq!(
            parse_remotes(output),
            vec![
                Remote {
                    name: "origin".into(),
                    url: "https://example.com/repo.git".into()
                },
                Remote {
                    name: "upstream".into(),
                    url: "/tmp/cache".into()
                },
            ]
        );
    }

    #[test]
    fn remote_url_missing_is_none() {
        let (runner, repo) = scripted();
        runner.fail(&["config", "--get", "remote.origin.url"], 1, "");
        assert_eq!(repo.remote_url("origin").unwrap(), None);
    }

    #[test]
    fn set_url_for_unknown_remote_carries_path() {
        let (runner, repo) = scripted();
        runner.fail(
            &["remote", "set-url", "fake", "https://example.com"],
            2,
            "error: No such remote 'fake'\n",
        );
        let err = repo.set_url("fake", "https://example.com").unwrap_err();
        assert_eq!(err.path(), Some(Path::new("/work/repo")));
        assert!(err.diagnostic_location().is_some());
    }

    #[test]
    fn are_ignored_uses_one_batched_call() {
        let (runner, repo) = scripted();
        runner.ok(
            &["check-ignore", "-z", "--stdin"],
            "/work/repo/ignored_file1\0",
        );
        let result = repo
            .are_ignored(&[
                PathBuf::from("/work/repo/ignored_file1"),
                PathBuf::from("/work/repo/not_ignored"),
            ])
            .unwrap();
        assert_eq!(result, vec![true, false]);
        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].stdin.as_deref(),
            Some(&b"/work/repo/ignored_file1\0/work/repo/not_ignored\0"[..])
        );
    }

    #[test]
    fn are_ignored_exit_one_means_none() {
        let (runner, repo) = scripted();
        runner.fail(&["check-ignore", "-z", "--stdin"], 1, "");
        let result = repo.are_ignored(&[PathBuf::from("/work/repo/a")]).unwrap();
        assert_eq!(result, vec![false]);
    }

    #[test]
    fn are_ignored_reports_real_failures() {
        let (runner, repo) = scripted();
        runner.fail(&["check-ignore", "-z", "--stdin"], 128, "fatal: not a git repository\n");
        assert!(matches!(
            repo.are_ignored(&[PathBuf::from("/work/repo/a")]),
            Err(GitError::Command(_))
        ));
    }

    #[test]
    fn alternate_object_store_pointer() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("cache");
        fs::create_dir_all(cache.join("objects")).unwrap();
        let copy = dir.path().join("copy");
        let info = copy.join(".git/objects/info");
        fs::create_dir_all(&info).unwrap();
        fs::write(
            info.join("alternates"),
            format!("{}\n", cache.join("objects").display()),
        )
        .unwrap();

        let repo = GitRepository::new(&copy, Git::default());
        assert!(repo.is_alternate_object_store_valid(&cache));
        assert!(!repo.is_alternate_object_store_valid(&dir.path().join("elsewhere")));

        fs::remove_dir_all(&cache).unwrap();
        assert!(!repo.is_alternate_object_store_valid(&cache));
    }

    #[test]
    fn missing_alternates_file_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let repo = GitRepository::new(dir.path(), Git::default());
        assert!(!repo.is_alternate_object_store_valid(dir.path()));
    }
}
