//! Process execution for git.
//!
//! All git access funnels through [`ProcessRunner`]: an invocation (program,
//! arguments, environment, optional stdin) goes in, exit status and captured
//! output come out. [`SystemRunner`] spawns real processes; tests substitute
//! a scripted runner.

use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;

use super::{CommandError, GitError, path_str};
use crate::config::GitConfig;

/// One process to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub stdin: Option<Vec<u8>>,
}

/// What a finished process produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Runs a process to completion and captures its output.
pub trait ProcessRunner: Send + Sync + fmt::Debug {
    /// Returns `Err` only when the process could not be started or waited on.
    /// A nonzero exit is a successful run.
    fn run(&self, invocation: &Invocation) -> io::Result<ProcessOutput>;
}

/// Spawns real processes with `std::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> io::Result<ProcessOutput> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .envs(&invocation.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = match &invocation.stdin {
            None => {
                cmd.stdin(Stdio::null());
                cmd.output()?
            }
            Some(input) => {
                cmd.stdin(Stdio::piped());
                let mut child = cmd.spawn()?;
                let pipe = child.stdin.take();
                // Feed stdin from a separate thread so a full stdout pipe
                // cannot deadlock against an unread stdin.
                thread::scope(|scope| {
                    scope.spawn(move || {
                        if let Some(mut pipe) = pipe {
                            let _ = pipe.write_all(input);
                        }
                    });
                    child.wait_with_output()
                })?
            }
        };

        Ok(ProcessOutput {
            exit_code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

/// Git invoker with security hardening.
///
/// Applies the environment and `-c` overrides of its [`GitConfig`]
/// (`GIT_LFS_SKIP_SMUDGE=1`, `GIT_TERMINAL_PROMPT=0`, `core.hooksPath=` by
/// default) and always passes the target directory with `-C`, so nothing
/// depends on the current working directory.
#[derive(Debug, Clone)]
pub struct Git {
    runner: Arc<dyn ProcessRunner>,
    config: Arc<GitConfig>,
}

impl Default for Git {
    fn default() -> Self {
        Self::new(GitConfig::default())
    }
}

impl Git {
    /// Run the git binary described by `config` as a real process.
    pub fn new(config: GitConfig) -> Self {
        Self::with_runner(config, Arc::new(SystemRunner))
    }

    pub fn with_runner(config: GitConfig, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            runner,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &GitConfig {
        &self.config
    }

    fn invocation(
        &self,
        dir: &Path,
        args: &[&str],
        stdin: Option<Vec<u8>>,
    ) -> Result<Invocation, GitError> {
        let mut full = Vec::with_capacity(args.len() + 2 * self.config.config_overrides().len() + 2);
        for (key, value) in self.config.config_overrides() {
            full.push("-c".to_string());
            full.push(format!("{}={}", key, value));
        }
        full.push("-C".to_string());
        full.push(path_str(dir, "repository")?.to_string());
        full.extend(args.iter().map(|a| a.to_string()));

        Ok(Invocation {
            program: self.config.git_path().clone(),
            args: full,
            env: self.config.environment().clone(),
            stdin,
        })
    }

    fn execute(
        &self,
        dir: &Path,
        args: &[&str],
        stdin: Option<Vec<u8>>,
    ) -> Result<ProcessOutput, GitError> {
        let invocation = self.invocation(dir, args, stdin)?;
        log::debug!("git -C {} {}", dir.display(), args.join(" "));
        self.runner.run(&invocation).map_err(|source| GitError::Spawn {
            program: self.config.git_path().display().to_string(),
            source,
        })
    }

    /// Run git in `dir` and return its output whatever the exit status.
    pub fn run_unchecked(&self, dir: &Path, args: &[&str]) -> Result<ProcessOutput, GitError> {
        self.execute(dir, args, None)
    }

    /// Like [`Git::run_unchecked`] with `input` written to stdin.
    pub fn run_with_input(
        &self,
        dir: &Path,
        args: &[&str],
        input: Vec<u8>,
    ) -> Result<ProcessOutput, GitError> {
        self.execute(dir, args, Some(input))
    }

    /// Run git in `dir`, failing with [`GitError::Command`] on a nonzero exit.
    pub fn run_bytes(&self, dir: &Path, args: &[&str]) -> Result<Vec<u8>, GitError> {
        let output = self.execute(dir, args, None)?;
        if output.success() {
            Ok(output.stdout)
        } else {
            Err(command_error(dir, args, output).into())
        }
    }

    /// Run git in `dir` and return stdout with trailing newlines removed.
    pub fn run(&self, dir: &Path, args: &[&str]) -> Result<String, GitError> {
        let stdout = self.run_bytes(dir, args)?;
        let mut text = String::from_utf8_lossy(&stdout).into_owned();
        while text.ends_with('\n') || text.ends_with('\r') {
            text.pop();
        }
        Ok(text)
    }
}

pub(crate) fn command_error(dir: &Path, args: &[&str], output: ProcessOutput) -> CommandError {
    let stderr = output.stderr_lossy();
    log::debug!(
        "git -C {} {} exited with {:?}: {}",
        dir.display(),
        args.join(" "),
        output.exit_code,
        stderr.trim()
    );
    CommandError {
        path: dir.to_path_buf(),
        arguments: args.iter().map(|a| a.to_string()).collect(),
        exit_code: output.exit_code,
        stdout: output.stdout_lossy(),
        stderr,
    }
}
