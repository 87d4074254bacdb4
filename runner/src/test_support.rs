//! Test-only helpers: throwaway git repositories, roadmap fixtures and a
//! scripted feature builder.

use std::cell::RefCell;
use std::fs;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::core::types::{Feature, FeatureStatus};
use crate::error::ReliabilityError;
use crate::io::builder::FeatureBuilder;
use crate::io::config::CampaignConfig;
use crate::io::git::Git;

/// A git repository in a temp directory with a deterministic identity.
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create temp dir")?;
        let repo = Self { dir };
        repo.git(&["init", "-q", "-b", "main"])?;
        repo.git(&["config", "user.email", "runner@example.com"])?;
        repo.git(&["config", "user.name", "Campaign Runner"])?;
        repo.git(&["config", "commit.gpgsign", "false"])?;
        Ok(repo)
    }

    /// [`TestRepo::new`], panicking on failure.
    pub fn init() -> Self {
        Self::new().expect("init test repo")
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write_file(&self, rel: &str, contents: &str) -> Result<()> {
        let path = self.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))
    }

    /// Stage everything and commit; returns the new HEAD.
    pub fn commit_all(&self, message: &str) -> Result<String> {
        let git = Git::new(self.path());
        git.add_all()?;
        if !git.commit_staged(message)? {
            self.git(&["commit", "-q", "--allow-empty", "-m", message])?;
        }
        git.head()
    }

    /// Write one file and commit it; returns the new HEAD.
    pub fn commit_file(&self, rel: &str, contents: &str, message: &str) -> String {
        self.write_file(rel, contents).expect("write file");
        self.commit_all(message).expect("commit")
    }

    /// Run git in the repository and return stdout.
    pub fn git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(self.path())
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))?;
        if !output.status.success() {
            return Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Render roadmap rows `(id, name, deps, status)` as a markdown table.
pub fn roadmap_markdown(rows: &[(u32, &str, &str, FeatureStatus)]) -> String {
    let mut text = String::from(
        "# Roadmap\n\n| # | Feature | Source | Jira | Complexity | Deps | Status |\n\
         |---|---------|--------|------|------------|------|--------|\n",
    );
    for (id, name, deps, status) in rows {
        let glyph = match status {
            FeatureStatus::Complete => "\u{2705}",
            FeatureStatus::Pending => "\u{2b1c}",
            FeatureStatus::InProgress => "\u{1f504}",
            FeatureStatus::Paused => "\u{23f8}\u{fe0f}",
            FeatureStatus::Failed => "\u{274c}",
            FeatureStatus::Unknown => "?",
        };
        text.push_str(&format!("| {id} | {name} | clone | - | M | {deps} | {glyph} |\n"));
    }
    text
}

/// Write a roadmap at the default configured location under `root`.
pub fn write_roadmap(root: &Path, rows: &[(u32, &str, &str, FeatureStatus)]) {
    let path = root.join(CampaignConfig::default().roadmap_path);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create roadmap dir");
    }
    fs::write(path, roadmap_markdown(rows)).expect("write roadmap");
}

/// One scripted builder response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedBuild {
    Exit(i32),
    RateLimited,
    TimedOut,
}

/// Builder that replays scripted responses in order and records each call.
pub struct ScriptedBuilder {
    script: RefCell<Vec<ScriptedBuild>>,
    calls: RefCell<Vec<(String, String)>>,
}

impl ScriptedBuilder {
    pub fn new(script: Vec<ScriptedBuild>) -> Self {
        let mut script = script;
        script.reverse();
        Self {
            script: RefCell::new(script),
            calls: RefCell::new(Vec::new()),
        }
    }

    /// Names of features passed to `build`, in call order.
    pub fn built_names(&self) -> Vec<String> {
        self.calls.borrow().iter().map(|(name, _)| name.clone()).collect()
    }

    /// Prompts passed to `build`, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.calls.borrow().iter().map(|(_, prompt)| prompt.clone()).collect()
    }
}

impl FeatureBuilder for ScriptedBuilder {
    fn build(&self, feature: &Feature, prompt: &str) -> Result<i32> {
        self.calls
            .borrow_mut()
            .push((feature.name.clone(), prompt.to_string()));
        let next = self
            .script
            .borrow_mut()
            .pop()
            .ok_or_else(|| anyhow!("scripted builder exhausted at {}", feature.name))?;
        match next {
            ScriptedBuild::Exit(code) => Ok(code),
            ScriptedBuild::RateLimited => {
                Err(ReliabilityError::RateLimitExhausted { retries: 5 }.into())
            }
            ScriptedBuild::TimedOut => Err(ReliabilityError::ExecutionTimeout {
                program: "agent".to_string(),
                timeout: Duration::from_secs(600),
            }
            .into()),
        }
    }
}
