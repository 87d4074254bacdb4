//! Bounded fan-out of drift checks over spec/source pairs.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::core::types::DriftPair;
use crate::error::ReliabilityError;
use crate::io::process::{CommandSpec, DEFAULT_OUTPUT_LIMIT_BYTES, run_command_with_timeout};

const FALLBACK_PARALLELISM: usize = 4;

/// Aggregate of one fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParallelReport {
    pub total: usize,
    /// Spec files whose check returned false, failed or panicked.
    pub failures: Vec<PathBuf>,
}

impl ParallelReport {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// True iff `check_fn` returned `Ok(true)` for every pair.
pub fn run_parallel<F>(pairs: &[DriftPair], check_fn: F) -> bool
where
    F: Fn(&Path, &str) -> Result<bool> + Sync,
{
    run_parallel_report(pairs, check_fn).passed()
}

/// Run `check_fn` for every pair on `min(available_parallelism, pairs)`
/// workers.
///
/// Every pair is checked even after a failure. Errors and panics inside
/// `check_fn` are logged and counted as failures for that pair only.
#[instrument(skip_all, fields(pairs = pairs.len()))]
pub fn run_parallel_report<F>(pairs: &[DriftPair], check_fn: F) -> ParallelReport
where
    F: Fn(&Path, &str) -> Result<bool> + Sync,
{
    if pairs.is_empty() {
        return ParallelReport::default();
    }

    let workers = worker_count(pairs.len());
    info!(pairs = pairs.len(), workers, "running parallel drift checks");

    let next = AtomicUsize::new(0);
    let failures = Mutex::new(Vec::new());
    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| {
                while let Some(pair) = pairs.get(next.fetch_add(1, Ordering::Relaxed)) {
                    if !run_one(&check_fn, pair) {
                        record_failure(&failures, &pair.spec_file);
                    }
                }
            });
        }
    });

    let failures = failures.into_inner().unwrap_or_else(PoisonError::into_inner);
    ParallelReport {
        total: pairs.len(),
        failures,
    }
}

/// Failures survive a poisoned lock; a lost entry would turn into a pass.
fn record_failure(failures: &Mutex<Vec<PathBuf>>, spec_file: &Path) {
    failures
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(spec_file.to_path_buf());
}

fn run_one<F>(check_fn: &F, pair: &DriftPair) -> bool
where
    F: Fn(&Path, &str) -> Result<bool> + Sync,
{
    let spec = pair.spec_file.display();
    match catch_unwind(AssertUnwindSafe(|| {
        check_fn(&pair.spec_file, &pair.source_files)
    })) {
        Ok(Ok(true)) => {
            debug!(spec = %spec, "drift check passed");
            true
        }
        Ok(Ok(false)) => {
            warn!(spec = %spec, "drift check failed");
            false
        }
        Ok(Err(err)) => {
            warn!(spec = %spec, err = %format!("{err:#}"), "drift check errored");
            false
        }
        Err(_) => {
            warn!(spec = %spec, "drift check panicked");
            false
        }
    }
}

fn worker_count(pairs: usize) -> usize {
    thread::available_parallelism()
        .map(usize::from)
        .unwrap_or(FALLBACK_PARALLELISM)
        .min(pairs)
        .max(1)
}

/// Drift check that runs a command with `SPEC_FILE` and `SOURCE_FILES` set.
/// Exit status 0 is a pass.
#[derive(Debug, Clone)]
pub struct CommandDriftCheck {
    pub command: CommandSpec,
    pub timeout: Duration,
}

impl CommandDriftCheck {
    pub fn new(command: CommandSpec, timeout: Duration) -> Self {
        Self { command, timeout }
    }

    pub fn check(&self, spec_file: &Path, source_files: &str) -> Result<bool> {
        let command = self
            .command
            .clone()
            .env("SPEC_FILE", spec_file.display().to_string())
            .env("SOURCE_FILES", source_files);
        let output = run_command_with_timeout(
            command.to_command(),
            self.timeout,
            DEFAULT_OUTPUT_LIMIT_BYTES,
        )?;
        if output.timed_out {
            return Err(ReliabilityError::ExecutionTimeout {
                program: command.program,
                timeout: self.timeout,
            }
            .into());
        }
        Ok(output.status.success())
    }
}
