//! Sidecar configuration from flags and environment.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{ArgAction, Args};

use crate::error::EvalError;

/// Options shared by every sidecar command. Each one can also come from the
/// environment, so the sidecar can be launched next to a build with no flags.
#[derive(Debug, Clone, Args)]
pub struct SidecarArgs {
    /// Git repository to watch.
    #[arg(long, env = "PROJECT_DIR")]
    pub project_dir: PathBuf,

    /// Seconds between polls of HEAD.
    #[arg(long, env = "EVAL_INTERVAL", default_value_t = 30)]
    pub interval: u64,

    /// Run the agent review for each commit (`true`, `1` or `yes`).
    #[arg(
        long,
        env = "EVAL_AGENT",
        default_value = "true",
        action = ArgAction::Set,
        value_parser = parse_flag
    )]
    pub agent: bool,

    /// Model passed to the review agent.
    #[arg(long, env = "EVAL_MODEL")]
    pub model: Option<String>,

    /// Model used by the build agent; the review falls back to it.
    #[arg(long, env = "AGENT_MODEL", hide = true)]
    pub agent_model: Option<String>,

    /// Directory for result files; defaults to `<project>/logs/evals`.
    #[arg(long, env = "EVAL_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,
}

/// Resolved sidecar settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidecarConfig {
    pub project_dir: PathBuf,
    pub interval: Duration,
    pub agent_enabled: bool,
    pub model: Option<String>,
    pub output_dir: PathBuf,
}

impl SidecarArgs {
    pub fn into_config(self) -> Result<SidecarConfig> {
        if !self.project_dir.is_dir() {
            return Err(EvalError::ProjectDirMissing {
                path: self.project_dir,
            }
            .into());
        }
        let model = self
            .model
            .filter(|model| !model.trim().is_empty())
            .or(self.agent_model.filter(|model| !model.trim().is_empty()));
        let mut config = SidecarConfig::for_project(self.project_dir);
        if let Some(output_dir) = self.output_dir {
            config.output_dir = output_dir;
        }
        config.interval = Duration::from_secs(self.interval);
        config.agent_enabled = self.agent;
        config.model = model;
        Ok(config)
    }
}

impl SidecarConfig {
    /// Settings for `project_dir` with every other option at its default.
    pub fn for_project(project_dir: impl Into<PathBuf>) -> Self {
        let project_dir = project_dir.into();
        Self {
            output_dir: project_dir.join("logs").join("evals"),
            project_dir,
            interval: Duration::from_secs(30),
            agent_enabled: true,
            model: None,
        }
    }
}

fn parse_flag(raw: &str) -> Result<bool, String> {
    Ok(matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: SidecarArgs,
    }

    fn parse(args: &[&str]) -> SidecarArgs {
        let mut argv = vec!["campaign-eval"];
        argv.extend_from_slice(args);
        Harness::parse_from(argv).args
    }

    #[test]
    fn defaults_resolve_under_project() {
        let temp = tempfile::tempdir().expect("tempdir");
        let project = temp.path().to_str().expect("utf8 path");
        let config = parse(&["--project-dir", project])
            .into_config()
            .expect("config");

        assert_eq!(config.interval, Duration::from_secs(30));
        assert!(config.agent_enabled);
        assert_eq!(config.output_dir, temp.path().join("logs").join("evals"));
        assert_eq!(config, SidecarConfig::for_project(temp.path()));
    }

    #[test]
    fn agent_flag_accepts_truthy_words_only() {
        assert_eq!(parse_flag("YES"), Ok(true));
        assert_eq!(parse_flag("1"), Ok(true));
        assert_eq!(parse_flag("false"), Ok(false));
        assert_eq!(parse_flag("on"), Ok(false));
    }

    #[test]
    fn review_model_falls_back_to_build_model() {
        let temp = tempfile::tempdir().expect("tempdir");
        let project = temp.path().to_str().expect("utf8 path");

        let fallback = parse(&["--project-dir", project, "--agent-model", "sonnet"])
            .into_config()
            .expect("config");
        assert_eq!(fallback.model.as_deref(), Some("sonnet"));

        let explicit = parse(&[
            "--project-dir",
            project,
            "--model",
            "haiku",
            "--agent-model",
            "sonnet",
        ])
        .into_config()
        .expect("config");
        assert_eq!(explicit.model.as_deref(), Some("haiku"));
    }

    #[test]
    fn missing_project_dir_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let missing = temp.path().join("nope");
        let err = parse(&["--project-dir", missing.to_str().expect("utf8 path")])
            .into_config()
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EvalError>(),
            Some(EvalError::ProjectDirMissing { .. })
        ));
    }
}
