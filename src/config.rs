//! Runtime configuration.
//!
//! Everything that would otherwise be ambient process state (which git binary
//! to run, environment overrides such as `GIT_ALLOW_PROTOCOL`, `-c` settings)
//! lives in an explicit [`GitConfig`] value that is threaded into the git
//! layer at construction time.

use std::collections::BTreeMap;
use std::path::PathBuf;

/// Overrides the git binary.
pub const ENV_GIT: &str = "REPOCACHE_GIT";
/// Comma separated list of transport protocols git may use, e.g. `file,https`.
pub const ENV_ALLOW_PROTOCOL: &str = "REPOCACHE_ALLOW_PROTOCOL";
/// Overrides the cache root directory.
pub const ENV_CACHE_DIR: &str = "REPOCACHE_CACHE_DIR";
/// Number of repositories fetched in parallel.
pub const ENV_JOBS: &str = "REPOCACHE_JOBS";

/// How the git binary is invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitConfig {
    git_path: PathBuf,
    environment: BTreeMap<String, String>,
    config_overrides: Vec<(String, String)>,
}

impl Default for GitConfig {
    /// Uses `git` from `PATH` with prompts, LFS smudging and hooks disabled.
    fn default() -> Self {
        let environment = BTreeMap::from([
            ("GIT_LFS_SKIP_SMUDGE".to_string(), "1".to_string()),
            ("GIT_TERMINAL_PROMPT".to_string(), "0".to_string()),
        ]);
        Self {
            git_path: PathBuf::from("git"),
            environment,
            config_overrides: vec![("core.hooksPath".to_string(), String::new())],
        }
    }
}

impl GitConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a configuration from `REPOCACHE_GIT` and `REPOCACHE_ALLOW_PROTOCOL`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(git) = std::env::var(ENV_GIT) {
            if !git.trim().is_empty() {
                config = config.with_git_path(git.trim());
            }
        }
        if let Ok(protocols) = std::env::var(ENV_ALLOW_PROTOCOL) {
            if !protocols.trim().is_empty() {
                config = config.allow_protocols(protocols.trim());
            }
        }
        config
    }

    pub fn with_git_path(mut self, git_path: impl Into<PathBuf>) -> Self {
        self.git_path = git_path.into();
        self
    }

    /// Set an environment variable for every git invocation.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Pass `-c key=value` to every git invocation. A later value for the same
    /// key replaces the earlier one.
    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        self.config_overrides.retain(|(existing, _)| *existing != key);
        self.config_overrides.push((key, value.into()));
        self
    }

    /// Restrict git (and nested submodule clones) to the given transports.
    ///
    /// Local submodules need `protocol.file.allow=always` on top of
    /// `GIT_ALLOW_PROTOCOL`, so listing `file` sets both.
    pub fn allow_protocols(self, protocols: &str) -> Self {
        let allows_file = protocols.split(',').any(|p| p.trim() == "file");
        let config = self.with_env("GIT_ALLOW_PROTOCOL", protocols.replace(',', ":"));
        if allows_file {
            config.with_config("protocol.file.allow", "always")
        } else {
            config
        }
    }

    pub fn git_path(&self) -> &PathBuf {
        &self.git_path
    }

    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    pub fn config_overrides(&self) -> &[(String, String)] {
        &self.config_overrides
    }
}

/// Top-level settings for the binary.
#[derive(Debug, Clone)]
pub struct Config {
    pub cache_root: PathBuf,
    pub git: GitConfig,
    pub jobs: usize,
}

impl Config {
    /// Read settings from the environment, falling back to
    /// `dirs::cache_dir()/repocache` and one job per available CPU.
    pub fn from_env() -> Self {
        let cache_root = std::env::var_os(ENV_CACHE_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(default_cache_root);
        let jobs = std::env::var(ENV_JOBS)
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or_else(default_jobs);

        Self {
            cache_root,
            git: GitConfig::from_env(),
            jobs,
        }
    }
}

/// `~/.cache/repocache` on Linux, `~/Library/Caches/repocache` on macOS.
pub fn default_cache_root() -> PathBuf {
    let cache_dir = dirs::cache_dir().unwrap_or_else(|| PathBuf::from(".cache"));
    cache_dir.join("repocache")
}

fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
