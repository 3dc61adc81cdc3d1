#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::process::Command;

use repocache::config::GitConfig;
use repocache::git::Git;

/// Real-git tests skip when no git binary can run.
pub fn require_git() -> bool {
    let ok = Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false);
    if !ok {
        eprintln!("skipping git test (git --version failed)");
    }
    ok
}

/// Isolated from the user's git configuration, with a fixed identity and
/// local transports allowed for submodules.
pub fn git_config() -> GitConfig {
    GitConfig::default()
        .allow_protocols("file")
        .with_env("GIT_CONFIG_NOSYSTEM", "1")
        .with_env("GIT_CONFIG_GLOBAL", "/dev/null")
        .with_env("GIT_AUTHOR_NAME", "repocache tests")
        .with_env("GIT_AUTHOR_EMAIL", "tests@example.com")
        .with_env("GIT_COMMITTER_NAME", "repocache tests")
        .with_env("GIT_COMMITTER_EMAIL", "tests@example.com")
        .with_config("init.defaultBranch", "main")
        .with_config("commit.gpgsign", "false")
        .with_config("tag.gpgsign", "false")
}

pub fn git() -> Git {
    Git::new(git_config())
}

/// Run git in `dir`, panicking on failure.
pub fn run(dir: &Path, args: &[&str]) -> String {
    git()
        .run(dir, args)
        .unwrap_or_else(|e| panic!("git {:?} in {} failed: {}", args, dir.display(), e))
}

/// Create a repository on `main` with one committed `file.swift`, optionally
/// tagged.
pub fn init_repo(dir: &Path, tag: Option<&str>) {
    fs::create_dir_all(dir).unwrap();
    run(dir, &["init", "--quiet"]);
    run(dir, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    fs::write(dir.join("file.swift"), "stub").unwrap();
    run(dir, &["add", "."]);
    run(dir, &["commit", "--quiet", "-m", "Add some files."]);
    if let Some(tag) = tag {
        run(dir, &["tag", tag]);
    }
}

/// Write `name`, stage and commit it.
pub fn commit_file(dir: &Path, name: &str, contents: &str, message: &str) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, contents).unwrap();
    run(dir, &["add", "--", name]);
    run(dir, &["commit", "--quiet", "-m", message]);
}

/// Commit id of `refname` as reported by libgit2.
pub fn oracle_commit(dir: &Path, refname: &str) -> String {
    let repo = git2::Repository::open(dir).unwrap();
    let object = repo.revparse_single(refname).unwrap();
    object.peel_to_commit().unwrap().id().to_string()
}
