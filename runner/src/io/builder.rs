//! Feature builder abstraction for agent invocation.
//!
//! The [`FeatureBuilder`] trait decouples the campaign driver from the agent
//! CLI. Tests use scripted builders that return predetermined exit codes
//! without spawning processes.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::core::agent_output::parse_agent_output;
use crate::core::types::{Feature, sanitize_feature_name};
use crate::io::backoff::execute_with_backoff;
use crate::io::config::AgentConfig;
use crate::io::cost_log::append_cost_record;
use crate::io::process::CommandSpec;

/// Marker the agent CLI sets for nested sessions; stripped from the child.
pub const NESTED_SESSION_ENV: &str = "CLAUDECODE";

/// Abstraction over agent build backends.
pub trait FeatureBuilder {
    /// Build one feature from `prompt` and return the agent's exit code.
    ///
    /// Rate-limit exhaustion and per-attempt timeouts surface as
    /// [`crate::error::ReliabilityError`] inside the returned error.
    fn build(&self, feature: &Feature, prompt: &str) -> Result<i32>;
}

/// Builder that runs the configured agent command through the backoff executor.
#[derive(Debug, Clone)]
pub struct AgentBuilder {
    pub workdir: PathBuf,
    pub agent: AgentConfig,
    /// Directory for per-feature transcripts (`build-<name>.log`).
    pub output_dir: PathBuf,
    pub cost_log_path: PathBuf,
}

impl AgentBuilder {
    fn command(&self, prompt: &str) -> Result<CommandSpec> {
        let mut command = CommandSpec::from_argv(&self.agent.command)
            .context("agent.command")?
            .arg(prompt)
            .current_dir(&self.workdir)
            .env_remove(NESTED_SESSION_ENV);
        if self.agent.output_format_json {
            command = command.arg("--output-format").arg("json");
        }
        Ok(command)
    }
}

impl FeatureBuilder for AgentBuilder {
    #[instrument(skip_all, fields(feature = %feature.name))]
    fn build(&self, feature: &Feature, prompt: &str) -> Result<i32> {
        let output_path = self
            .output_dir
            .join(format!("build-{}.log", sanitize_feature_name(&feature.name)));
        let command = self.command(prompt)?;
        info!(program = %command.program, "starting agent build");

        let run = execute_with_backoff(&output_path, &command, &self.agent.backoff_policy())?;
        if run.exit_code == 0 && self.agent.output_format_json {
            match parse_agent_output(&run.stdout) {
                Ok(result) => {
                    info!(
                        model = %result.model,
                        cost_usd = ?result.cost_usd,
                        input_tokens = ?result.input_tokens,
                        output_tokens = ?result.output_tokens,
                        "agent build finished"
                    );
                    if let Err(err) = append_cost_record(&self.cost_log_path, &result.cost) {
                        warn!(err = %format!("{err:#}"), "failed to write cost log");
                    }
                }
                Err(err) => warn!(err = %format!("{err:#}"), "agent output was not structured"),
            }
        }
        Ok(run.exit_code)
    }
}
