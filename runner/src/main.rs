//! Build-campaign runner.
//!
//! Walks `.specs/roadmap.md` in dependency order, invoking the configured
//! agent once per pending feature while holding `.campaign/build.lock`.
//! Progress is checkpointed to `.campaign/state/resume.json` so an interrupted
//! campaign picks up where it stopped.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use campaign_runner::campaign::{CampaignStop, run_campaign};
use campaign_runner::core::types::DriftPair;
use campaign_runner::error::ReliabilityError;
use campaign_runner::exit_codes;
use campaign_runner::io::builder::AgentBuilder;
use campaign_runner::io::config::{CampaignConfig, load_config};
use campaign_runner::io::context::truncate_for_context;
use campaign_runner::io::parallel::{CommandDriftCheck, run_parallel_report};
use campaign_runner::io::paths::CampaignPaths;
use campaign_runner::io::process::CommandSpec;
use campaign_runner::io::resume_state::{clear_state, read_state};
use campaign_runner::io::roadmap::{check_circular_deps, emit_topo_order};
use campaign_runner::logging;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "campaign-runner",
    version,
    about = "Resumable, rate-limit tolerant build campaigns over a feature roadmap"
)]
struct Cli {
    /// Project root containing `.campaign/` and the roadmap.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build every pending feature in dependency order.
    Run,
    /// Validate the roadmap and print the build order of pending features.
    Order,
    /// Fail if the roadmap dependency graph contains a cycle.
    CheckDeps,
    /// Inspect or reset the resume checkpoint.
    State {
        #[command(subcommand)]
        action: StateAction,
    },
    /// Print a spec file reduced to fit a token budget.
    Truncate {
        file: PathBuf,
        /// Token budget; defaults to `context_max_tokens` from config.
        #[arg(long)]
        max_tokens: Option<usize>,
    },
    /// Run the drift check command for each `SPEC=SOURCES` pair in parallel.
    Drift {
        #[arg(required = true, value_parser = parse_drift_pair)]
        pairs: Vec<DriftPair>,
    },
}

#[derive(Subcommand)]
enum StateAction {
    /// Print the resume checkpoint, if any.
    Show,
    /// Delete the resume checkpoint.
    Clear,
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let paths = CampaignPaths::new(&cli.root);
    let config = load_config(&paths.config_path)?;
    match cli.command {
        Command::Run => cmd_run(&paths, &config),
        Command::Order => cmd_order(&paths, &config),
        Command::CheckDeps => cmd_check_deps(&paths, &config),
        Command::State { action } => cmd_state(&paths, action),
        Command::Truncate { file, max_tokens } => {
            let text = truncate_for_context(&file, max_tokens.unwrap_or(config.context_max_tokens))?;
            println!("{text}");
            Ok(exit_codes::OK)
        }
        Command::Drift { pairs } => cmd_drift(&paths, &config, &pairs),
    }
}

fn cmd_run(paths: &CampaignPaths, config: &CampaignConfig) -> Result<i32> {
    let builder = AgentBuilder {
        workdir: paths.root.clone(),
        agent: config.agent.clone(),
        output_dir: paths.agent_output_dir.clone(),
        cost_log_path: paths.cost_log_path.clone(),
    };
    let outcome = run_campaign(&paths.root, config, &builder, |built| {
        println!("built {} (#{})", built.feature.name, built.feature_index);
    })?;

    let code = match &outcome.stop {
        CampaignStop::Complete => {
            println!(
                "campaign complete: {} built, {} skipped",
                outcome.built.len(),
                outcome.skipped.len()
            );
            exit_codes::OK
        }
        CampaignStop::FeatureFailed { name, exit_code } => {
            eprintln!("feature {name} failed with exit code {exit_code}");
            exit_codes::FEATURE_FAILED
        }
        CampaignStop::RateLimited { name } => {
            eprintln!("rate limit retries exhausted while building {name}");
            exit_codes::RATE_LIMITED
        }
        CampaignStop::TimedOut { name } => {
            eprintln!("agent timed out while building {name}");
            exit_codes::FEATURE_FAILED
        }
    };
    Ok(code)
}

fn cmd_order(paths: &CampaignPaths, config: &CampaignConfig) -> Result<i32> {
    for feature in emit_topo_order(&paths.resolve(&config.roadmap_path))? {
        println!("{}\t{}", feature.id, feature.name);
    }
    Ok(exit_codes::OK)
}

fn cmd_check_deps(paths: &CampaignPaths, config: &CampaignConfig) -> Result<i32> {
    check_circular_deps(&paths.resolve(&config.roadmap_path))?;
    println!("no circular dependencies");
    Ok(exit_codes::OK)
}

fn cmd_state(paths: &CampaignPaths, action: StateAction) -> Result<i32> {
    match action {
        StateAction::Show => match read_state(&paths.resume_state_path)? {
            Some(state) => {
                let json = serde_json::to_string_pretty(&state).context("serialize resume state")?;
                println!("{json}");
            }
            None => println!("no resume state"),
        },
        StateAction::Clear => clear_state(&paths.resume_state_path)?,
    }
    Ok(exit_codes::OK)
}

fn cmd_drift(paths: &CampaignPaths, config: &CampaignConfig, pairs: &[DriftPair]) -> Result<i32> {
    let command = CommandSpec::from_argv(&config.drift.command)
        .context("drift.command")?
        .current_dir(&paths.root);
    let check = CommandDriftCheck::new(command, Duration::from_secs(config.drift.timeout_secs));
    let report = run_parallel_report(pairs, |spec, sources| check.check(spec, sources));
    for failure in &report.failures {
        eprintln!("drift: {}", failure.display());
    }
    println!(
        "{} of {} drift checks passed",
        report.total - report.failures.len(),
        report.total
    );
    Ok(if report.passed() {
        exit_codes::OK
    } else {
        exit_codes::INVALID
    })
}

fn parse_drift_pair(raw: &str) -> Result<DriftPair, String> {
    let (spec, sources) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected SPEC=SOURCES, got `{raw}`"))?;
    if spec.trim().is_empty() {
        return Err(format!("empty spec path in `{raw}`"));
    }
    Ok(DriftPair::new(Path::new(spec.trim()), sources.trim()))
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    match ReliabilityError::find(err) {
        Some(ReliabilityError::LockContention { .. }) => exit_codes::LOCK_CONTENTION,
        Some(ReliabilityError::CircularDependency { .. }) => exit_codes::CIRCULAR_DEPENDENCY,
        Some(ReliabilityError::RateLimitExhausted { .. }) => exit_codes::RATE_LIMITED,
        Some(ReliabilityError::ExecutionTimeout { .. }) => exit_codes::FEATURE_FAILED,
        _ => exit_codes::INVALID,
    }
}
