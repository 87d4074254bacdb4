//! Typed failures raised by the reliability layer.
//!
//! These travel inside `anyhow::Error`; callers that need to react to a
//! specific condition recover it with `downcast_ref::<ReliabilityError>()`.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReliabilityError {
    /// Another live process owns the lock.
    #[error("lock {path} is held by another instance (pid {pid:?}); remove it manually if stale")]
    LockContention { path: PathBuf, pid: Option<u32> },

    /// Every attempt failed with a rate-limit shaped error.
    #[error("agent still rate limited after {retries} retries")]
    RateLimitExhausted { retries: u32 },

    /// A single command invocation exceeded its wall-clock budget.
    #[error("{program} exceeded its {timeout:?} timeout")]
    ExecutionTimeout { program: String, timeout: Duration },

    #[error("circular dependency in roadmap: {}", cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },

    #[error("malformed roadmap row at line {line}: {reason}")]
    MalformedRoadmapRow { line: usize, reason: String },

    #[error("invalid resume state {path}: {reason}")]
    InvalidResumeState { path: PathBuf, reason: String },
}

impl ReliabilityError {
    /// Recover a typed reliability error from an `anyhow` chain.
    pub fn find(err: &anyhow::Error) -> Option<&ReliabilityError> {
        err.chain().find_map(|cause| cause.downcast_ref::<ReliabilityError>())
    }
}
