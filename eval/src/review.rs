//! Agent-based review of a commit.
//!
//! The review agent gets the commit diff plus the project's standards and
//! learnings, and answers with `EVAL_*` signal lines that are parsed into an
//! [`AgentReview`].

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use campaign_runner::io::backoff::{BackoffPolicy, execute_with_backoff};
use campaign_runner::io::builder::NESTED_SESSION_ENV;
use campaign_runner::io::git::Git;
use campaign_runner::io::process::CommandSpec;
use minijinja::{Environment, context};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::mechanical::short;

const REVIEW_TEMPLATE: &str = include_str!("prompts/review.md");

/// Lowercase markers of an exhausted account, as opposed to a transient limit.
const CREDIT_KEYWORDS: [&str; 7] = [
    "credit",
    "billing",
    "insufficient_quota",
    "quota exceeded",
    "402 payment",
    "429 too many",
    "payment required",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compliance {
    Pass,
    Warn,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Focused,
    Moderate,
    Sprawling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Integration {
    Clean,
    MinorIssues,
    MajorIssues,
}

impl Compliance {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pass" => Some(Self::Pass),
            "warn" => Some(Self::Warn),
            "fail" => Some(Self::Fail),
            _ => None,
        }
    }
}

impl Scope {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "focused" => Some(Self::Focused),
            "moderate" => Some(Self::Moderate),
            "sprawling" => Some(Self::Sprawling),
            _ => None,
        }
    }
}

impl Integration {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "clean" => Some(Self::Clean),
            "minor_issues" => Some(Self::MinorIssues),
            "major_issues" => Some(Self::MajorIssues),
            _ => None,
        }
    }
}

/// Signals reported by a completed review. Verdicts outside the expected
/// vocabulary are recorded as `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentReview {
    pub framework_compliance: Option<Compliance>,
    pub scope_assessment: Option<Scope>,
    pub integration_quality: Option<Integration>,
    #[serde(default)]
    pub repeated_mistakes: String,
    #[serde(default)]
    pub eval_notes: String,
}

impl AgentReview {
    /// Parse review signals; `None` unless the agent reported `EVAL_COMPLETE: true`.
    pub fn from_output(output: &str) -> Option<Self> {
        if parse_eval_signal("EVAL_COMPLETE", output) != "true" {
            return None;
        }
        Some(Self {
            framework_compliance: Compliance::parse(&parse_eval_signal(
                "EVAL_FRAMEWORK_COMPLIANCE",
                output,
            )),
            scope_assessment: Scope::parse(&parse_eval_signal("EVAL_SCOPE_ASSESSMENT", output)),
            integration_quality: Integration::parse(&parse_eval_signal(
                "EVAL_INTEGRATION_QUALITY",
                output,
            )),
            repeated_mistakes: parse_eval_signal("EVAL_REPEATED_MISTAKES", output),
            eval_notes: parse_eval_signal("EVAL_NOTES", output),
        })
    }
}

/// Trimmed value of the last `NAME:` line in `output`, or empty.
pub fn parse_eval_signal(name: &str, output: &str) -> String {
    let prefix = format!("{name}:");
    output
        .lines()
        .filter_map(|line| line.strip_prefix(&prefix))
        .last()
        .map(|value| value.trim().to_string())
        .unwrap_or_default()
}

/// Whether agent output reports exhausted credits or billing.
pub fn is_credit_exhaustion(output: &str) -> bool {
    let lower = output.to_lowercase();
    CREDIT_KEYWORDS.iter().any(|keyword| lower.contains(keyword))
}

/// Render the review prompt for `commit`.
pub fn render_review_prompt(project_dir: &Path, git: &Git, commit: &str) -> Result<String> {
    let base = git.diff_base(commit)?;
    let diff = git.diff(&base, commit)?;
    let standards = read_optional(&project_dir.join("CLAUDE.md"))?;
    let learnings = read_optional(&project_dir.join(".specs").join("learnings").join("index.md"))?;

    let mut env = Environment::new();
    env.add_template("review", REVIEW_TEMPLATE)
        .expect("review template should be valid");
    let rendered = env.get_template("review")?.render(context! {
        commit => commit,
        standards => standards,
        learnings => learnings,
        diff => diff,
    })?;
    Ok(rendered)
}

fn read_optional(path: &Path) -> Result<String> {
    if !path.is_file() {
        return Ok(String::new());
    }
    fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}

/// Raw result of one review invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewRun {
    pub exit_code: i32,
    /// Combined stdout and stderr of the final attempt.
    pub output: String,
}

/// Abstraction over review backends.
pub trait Reviewer {
    /// Review `commit`. Rate-limit exhaustion and timeouts are errors.
    fn review(&self, commit: &str) -> Result<ReviewRun>;
}

/// Reviewer that runs the agent CLI through the backoff executor.
#[derive(Debug, Clone)]
pub struct AgentReviewer {
    pub project_dir: PathBuf,
    pub command: Vec<String>,
    pub model: Option<String>,
    pub policy: BackoffPolicy,
}

impl AgentReviewer {
    pub fn new(project_dir: impl Into<PathBuf>, model: Option<String>) -> Self {
        Self {
            project_dir: project_dir.into(),
            command: vec![
                "claude".to_string(),
                "-p".to_string(),
                "--dangerously-skip-permissions".to_string(),
            ],
            model,
            policy: BackoffPolicy::default(),
        }
    }

    fn spec(&self, prompt: &str) -> Result<CommandSpec> {
        let mut spec = CommandSpec::from_argv(&self.command)
            .context("review command")?
            .current_dir(&self.project_dir)
            .env_remove(NESTED_SESSION_ENV);
        if let Some(model) = &self.model {
            spec = spec.arg("--model").arg(model.as_str());
        }
        Ok(spec.arg(prompt))
    }
}

impl Reviewer for AgentReviewer {
    #[instrument(skip_all, fields(commit = %short(commit)))]
    fn review(&self, commit: &str) -> Result<ReviewRun> {
        let git = Git::new(&self.project_dir);
        let prompt = render_review_prompt(&self.project_dir, &git, commit)
            .context("generate review prompt")?;
        let spec = self.spec(&prompt)?;

        let output_file = tempfile::Builder::new()
            .prefix("eval-agent-")
            .suffix(".txt")
            .tempfile()
            .context("create review output file")?;
        let run = execute_with_backoff(output_file.path(), &spec, &self.policy)?;
        let output = fs::read_to_string(output_file.path())
            .with_context(|| format!("read {}", output_file.path().display()))?;
        debug!(exit_code = run.exit_code, attempts = run.attempts, "review finished");
        Ok(ReviewRun {
            exit_code: run.exit_code,
            output,
        })
    }
}
