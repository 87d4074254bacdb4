//! Sidecar-specific failures.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("project directory does not exist: {path}")]
    ProjectDirMissing { path: PathBuf },

    /// HEAD could not be resolved when the sidecar started.
    #[error("could not determine HEAD commit in {path}")]
    HeadUnreadable { path: PathBuf },

    #[error("commit not found: {commit}")]
    CommitNotFound { commit: String },

    #[error("cannot write an eval result without a feature name")]
    EmptyFeatureName,
}
