//! Eval sidecar for build campaigns.
//!
//! Watches a project's git history while a campaign runs and writes one
//! `eval-<feature>.json` per new commit, plus a campaign summary on exit.
//! Touch `<project>/.sdd-eval-drain` to make it finish the remaining commits
//! and stop.

mod config;
mod error;
mod logging;
mod mechanical;
mod results;
mod review;
mod sidecar;
mod summary;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use campaign_runner::io::git::Git;
use clap::{Parser, Subcommand};
use tracing::info;

use crate::config::{SidecarArgs, SidecarConfig};
use crate::mechanical::GitMechanicalEvaluator;
use crate::review::AgentReviewer;
use crate::sidecar::Sidecar;
use crate::summary::generate_campaign_summary;

#[derive(Parser)]
#[command(
    name = "campaign-eval",
    version,
    about = "Evaluate campaign commits as they land"
)]
struct Cli {
    #[command(flatten)]
    args: SidecarArgs,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Poll for new commits until interrupted or drained (default).
    Watch,
    /// Evaluate a single commit once.
    Commit { rev: String },
    /// Regenerate the campaign summary from existing result files.
    Summary,
}

fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();
    let config = cli.args.into_config()?;
    match cli.command.unwrap_or(Command::Watch) {
        Command::Watch => watch(config),
        Command::Commit { rev } => evaluate_one(config, &rev),
        Command::Summary => {
            match generate_campaign_summary(&config.output_dir)? {
                Some(path) => println!("{}", path.display()),
                None => println!("no eval results to summarize"),
            }
            Ok(())
        }
    }
}

fn watch(config: SidecarConfig) -> Result<()> {
    info!(
        project = %config.project_dir.display(),
        interval_secs = config.interval.as_secs(),
        agent = config.agent_enabled,
        model = config.model.as_deref().unwrap_or("<default>"),
        output = %config.output_dir.display(),
        "eval sidecar starting"
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .context("install shutdown handler")?;

    let (mechanical, reviewer) = evaluators(&config);
    let state = Sidecar::initialize(config, mechanical, reviewer, shutdown)?.run()?;
    info!(
        evaluated = state.eval_count,
        errors = state.eval_errors,
        "eval sidecar exited cleanly"
    );
    Ok(())
}

fn evaluate_one(config: SidecarConfig, rev: &str) -> Result<()> {
    let (mechanical, reviewer) = evaluators(&config);
    let mut sidecar = Sidecar::new(config, mechanical, reviewer, Arc::new(AtomicBool::new(false)));
    match sidecar.evaluate_commit(rev) {
        Some(path) => println!("{}", path.display()),
        None => println!("no result written for {rev}"),
    }
    let errors = sidecar.state().eval_errors;
    if errors > 0 {
        anyhow::bail!("{errors} evaluation error(s) for {rev}; see log");
    }
    Ok(())
}

fn evaluators(config: &SidecarConfig) -> (GitMechanicalEvaluator, AgentReviewer) {
    (
        GitMechanicalEvaluator::new(Git::new(&config.project_dir)),
        AgentReviewer::new(&config.project_dir, config.model.clone()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subcommand_defaults_to_watch() {
        let cli = Cli::parse_from(["campaign-eval", "--project-dir", "/tmp/project"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn parse_commit() {
        let cli = Cli::parse_from([
            "campaign-eval",
            "--project-dir",
            "/tmp/project",
            "--agent",
            "no",
            "commit",
            "HEAD~1",
        ]);
        assert!(!cli.args.agent);
        assert!(matches!(cli.command, Some(Command::Commit { rev }) if rev == "HEAD~1"));
    }
}
