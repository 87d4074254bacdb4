//! Git adapter for the campaign runner and eval sidecar.
//!
//! A small, explicit wrapper around `git` subprocess calls: reading HEAD,
//! enumerating commit ranges, and pulling diffs for a single commit.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::error::ReliabilityError;
use crate::io::process::{CommandOutput, DEFAULT_OUTPUT_LIMIT_BYTES, run_command_with_timeout};

/// Wall-clock limit for a single git invocation.
pub const GIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
    program: PathBuf,
    timeout: Duration,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            program: PathBuf::from("git"),
            timeout: GIT_TIMEOUT,
        }
    }

    /// Use another git executable.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Full SHA of HEAD.
    pub fn head(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "HEAD"])?;
        Ok(out.trim().to_string())
    }

    /// Return the current branch name (errors on detached HEAD).
    #[instrument(skip_all)]
    pub fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            warn!("detached HEAD detected");
            return Err(anyhow!("detached HEAD"));
        }
        debug!(branch = %name, "current branch");
        Ok(name)
    }

    /// Whether `rev` names an object in the repository.
    pub fn object_exists(&self, rev: &str) -> Result<bool> {
        Ok(self.run(&["cat-file", "-t", rev])?.status.success())
    }

    /// Non-merge commits in `since..until`, oldest first.
    #[instrument(skip_all, fields(%since, %until))]
    pub fn new_commits(&self, since: &str, until: &str) -> Result<Vec<String>> {
        let range = format!("{since}..{until}");
        let out = self.run_capture(&["log", "--reverse", "--no-merges", "--format=%H", &range])?;
        let commits: Vec<String> = out
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        debug!(count = commits.len(), "listed new commits");
        Ok(commits)
    }

    /// Number of parents of `rev` (0 for a root commit).
    pub fn parent_count(&self, rev: &str) -> Result<usize> {
        let out = self.run_capture(&["rev-list", "--parents", "-n", "1", rev])?;
        Ok(out.split_whitespace().count().saturating_sub(1))
    }

    /// First line of the commit message.
    pub fn commit_subject(&self, rev: &str) -> Result<String> {
        let out = self.run_capture(&["log", "-1", "--format=%s", rev])?;
        Ok(out.trim().to_string())
    }

    /// Hash of the empty tree, used as the diff base of a root commit.
    pub fn empty_tree(&self) -> Result<String> {
        let out = self.run_capture(&["hash-object", "-t", "tree", "/dev/null"])?;
        Ok(out.trim().to_string())
    }

    /// Base to diff `rev` against: its first parent, or the empty tree.
    pub fn diff_base(&self, rev: &str) -> Result<String> {
        if self.parent_count(rev)? == 0 {
            self.empty_tree()
        } else {
            Ok(format!("{rev}^"))
        }
    }

    /// `git diff --numstat base rev`. A failing diff yields empty output.
    pub fn numstat(&self, base: &str, rev: &str) -> Result<String> {
        self.run_lenient(&["diff", "--numstat", base, rev])
    }

    /// `git diff base rev`. A failing diff yields empty output.
    pub fn diff(&self, base: &str, rev: &str) -> Result<String> {
        self.run_lenient(&["diff", base, rev])
    }

    /// Files at `rev` matching a basic regex, restricted to `pathspecs`.
    pub fn grep_files(&self, pattern: &str, rev: &str, pathspecs: &[&str]) -> Result<Vec<String>> {
        let mut args = vec!["grep", "-l", pattern, rev, "--"];
        args.extend_from_slice(pathspecs);
        let out = self.run_lenient(&args)?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    /// Commit staged changes with a message.
    ///
    /// If there are no staged changes, this returns Ok(false) and does nothing.
    #[instrument(skip_all)]
    pub fn commit_staged(&self, message: &str) -> Result<bool> {
        let staged = self.run(&["diff", "--cached", "--name-only"])?;
        if String::from_utf8_lossy(&staged.stdout).trim().is_empty() {
            debug!("no staged changes, skipping commit");
            return Ok(false);
        }
        debug!("committing staged changes");
        self.run_checked(&["commit", "-m", message])?;
        Ok(true)
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_lenient(&self, args: &[&str]) -> Result<String> {
        let output = self.run(args)?;
        if !output.status.success() {
            debug!(
                args = %args.join(" "),
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "git command failed, using its stdout as-is"
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<CommandOutput> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<CommandOutput> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args).current_dir(&self.workdir);
        let output = run_command_with_timeout(cmd, self.timeout, DEFAULT_OUTPUT_LIMIT_BYTES)
            .map_err(|err| err.context(format!("git {}", args.join(" "))))?;
        if output.timed_out {
            warn!(args = %args.join(" "), timeout_secs = self.timeout.as_secs(), "git timed out");
            return Err(ReliabilityError::ExecutionTimeout {
                program: format!("git {}", args.join(" ")),
                timeout: self.timeout,
            }
            .into());
        }
        Ok(output)
    }
}
