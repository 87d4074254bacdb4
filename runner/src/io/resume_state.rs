//! Crash-safe persistence of build-loop progress.

use std::fs;
use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::debug;

use crate::core::types::ResumeState;
use crate::error::ReliabilityError;

/// Timestamp layout written into resume state.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Atomically write resume state (temp file + rename), stamping the current
/// UTC time. Returns the state as written.
pub fn write_state(
    path: &Path,
    feature_index: u64,
    branch_strategy: &str,
    completed_features: &[String],
    current_branch: &str,
) -> Result<ResumeState> {
    let state = ResumeState {
        feature_index,
        branch_strategy: branch_strategy.to_string(),
        completed_features: completed_features.to_vec(),
        current_branch: current_branch.to_string(),
        timestamp: Utc::now().format(TIMESTAMP_FORMAT).to_string(),
    };
    debug!(
        path = %path.display(),
        feature_index,
        completed = completed_features.len(),
        "writing resume state"
    );
    let mut buf = serde_json::to_string_pretty(&state).context("serialize resume state")?;
    buf.push('\n');
    write_atomic(path, &buf)?;
    Ok(state)
}

/// Read resume state. `Ok(None)` when the file does not exist.
pub fn read_state(path: &Path) -> Result<Option<ResumeState>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("read resume state {}", path.display()));
        }
    };
    let state: ResumeState =
        serde_json::from_str(&contents).map_err(|err| ReliabilityError::InvalidResumeState {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
    debug!(
        path = %path.display(),
        feature_index = state.feature_index,
        completed = state.completed_features.len(),
        "resume state loaded"
    );
    Ok(Some(state))
}

/// Remove the state file. Missing files are fine.
pub fn clear_state(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "resume state cleared");
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("remove resume state {}", path.display())),
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("resume state path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp resume state {}", tmp_path.display()))?;
    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err).with_context(|| format!("replace resume state {}", path.display()));
    }
    Ok(())
}
