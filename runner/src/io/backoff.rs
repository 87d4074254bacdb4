//! External command execution with exponential backoff on rate limiting.

use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, instrument, warn};

use crate::core::backoff::{backoff_delay, is_rate_limited};
use crate::error::ReliabilityError;
use crate::io::process::{CommandSpec, DEFAULT_OUTPUT_LIMIT_BYTES, run_command_with_timeout};

/// Retry budget and per-attempt limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub backoff_cap: Duration,
    pub attempt_timeout: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_cap: Duration::from_secs(60),
            attempt_timeout: Duration::from_secs(600),
        }
    }
}

/// Result of the final, non-rate-limited attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffRun {
    pub exit_code: i32,
    /// Total attempts made, including the first.
    pub attempts: u32,
    pub stdout: String,
}

/// Run `command`, retrying while it fails with rate-limit shaped output.
///
/// Each attempt overwrites `output_path` with its combined stdout and stderr.
/// Returns the exit code of the first attempt that is not rate limited.
pub fn run_with_backoff(
    output_path: &Path,
    command: &CommandSpec,
    policy: &BackoffPolicy,
) -> Result<i32> {
    execute_with_backoff(output_path, command, policy).map(|run| run.exit_code)
}

/// [`run_with_backoff`], also returning the attempt count and final stdout.
///
/// Fails with [`ReliabilityError::RateLimitExhausted`] once every retry was
/// rate limited, and with [`ReliabilityError::ExecutionTimeout`] as soon as a
/// single attempt overruns `policy.attempt_timeout`.
#[instrument(skip_all, fields(program = %command.program, max_retries = policy.max_retries))]
pub fn execute_with_backoff(
    output_path: &Path,
    command: &CommandSpec,
    policy: &BackoffPolicy,
) -> Result<BackoffRun> {
    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create output directory {}", parent.display()))?;
    }

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let delay = backoff_delay(attempt, policy.backoff_cap);
            warn!(
                attempt,
                max_retries = policy.max_retries,
                delay_secs = delay.as_secs(),
                "rate limit detected, backing off"
            );
            thread::sleep(delay);
        }

        let output = run_command_with_timeout(
            command.to_command(),
            policy.attempt_timeout,
            DEFAULT_OUTPUT_LIMIT_BYTES,
        )?;
        let combined = output.combined();
        fs::write(output_path, &combined)
            .with_context(|| format!("write command output {}", output_path.display()))?;

        if output.timed_out {
            return Err(ReliabilityError::ExecutionTimeout {
                program: command.program.clone(),
                timeout: policy.attempt_timeout,
            }
            .into());
        }

        let exit_code = output.exit_code();
        if is_rate_limited(exit_code, &combined) {
            debug!(attempt, exit_code, "attempt rate limited");
            continue;
        }

        debug!(attempt, exit_code, "attempt finished");
        return Ok(BackoffRun {
            exit_code,
            attempts: attempt + 1,
            stdout: output.stdout_text(),
        });
    }

    Err(ReliabilityError::RateLimitExhausted {
        retries: policy.max_retries,
    }
    .into())
}
