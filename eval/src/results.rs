//! Per-commit eval result files (`eval-<feature>.json`).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use campaign_runner::core::types::sanitize_feature_name;
use campaign_runner::io::resume_state::TIMESTAMP_FORMAT;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::EvalError;
use crate::mechanical::MechanicalEval;
use crate::review::AgentReview;

/// Result of evaluating one commit. The agent review is present only when
/// the reviewer completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "EvalRecordFile", try_from = "EvalRecordFile")]
pub struct EvalRecord {
    pub eval_timestamp: String,
    pub mechanical: MechanicalEval,
    pub agent_eval: Option<AgentReview>,
}

/// On-disk shape: `agent_eval_available` plus `agent_eval` only when true.
#[derive(Serialize, Deserialize)]
struct EvalRecordFile {
    eval_timestamp: String,
    mechanical: MechanicalEval,
    agent_eval_available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    agent_eval: Option<AgentReview>,
}

impl From<EvalRecord> for EvalRecordFile {
    fn from(record: EvalRecord) -> Self {
        Self {
            eval_timestamp: record.eval_timestamp,
            mechanical: record.mechanical,
            agent_eval_available: record.agent_eval.is_some(),
            agent_eval: record.agent_eval,
        }
    }
}

impl TryFrom<EvalRecordFile> for EvalRecord {
    type Error = String;

    fn try_from(file: EvalRecordFile) -> Result<Self, Self::Error> {
        let agent_eval = match (file.agent_eval_available, file.agent_eval) {
            (true, Some(review)) => Some(review),
            (true, None) => return Err("agent_eval_available is true but agent_eval is missing".into()),
            (false, _) => None,
        };
        Ok(Self {
            eval_timestamp: file.eval_timestamp,
            mechanical: file.mechanical,
            agent_eval,
        })
    }
}

impl EvalRecord {
    /// Record stamped with the current UTC time.
    pub fn new(mechanical: MechanicalEval, agent_eval: Option<AgentReview>) -> Self {
        Self {
            eval_timestamp: Utc::now().format(TIMESTAMP_FORMAT).to_string(),
            mechanical,
            agent_eval,
        }
    }
}

/// Path of the result file for `feature_name` under `output_dir`.
pub fn result_path(output_dir: &Path, feature_name: &str) -> PathBuf {
    output_dir.join(format!("eval-{}.json", sanitize_feature_name(feature_name)))
}

/// Write `record` atomically; a later result for the same feature replaces it.
///
/// Names with nothing left after sanitizing (blank, or only symbols and
/// emoji) are rejected so distinct features never share `eval-.json`.
pub fn write_eval_result(output_dir: &Path, feature_name: &str, record: &EvalRecord) -> Result<PathBuf> {
    if sanitize_feature_name(feature_name).is_empty() {
        return Err(EvalError::EmptyFeatureName.into());
    }
    fs::create_dir_all(output_dir)
        .with_context(|| format!("create directory {}", output_dir.display()))?;

    let path = result_path(output_dir, feature_name);
    let mut payload = serde_json::to_string_pretty(record).context("serialize eval result")?;
    payload.push('\n');
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, payload).with_context(|| format!("write {}", tmp_path.display()))?;
    fs::rename(&tmp_path, &path).with_context(|| format!("rename {}", path.display()))?;
    info!(path = %path.display(), agent = record.agent_eval.is_some(), "wrote eval result");
    Ok(path)
}

/// Load a result file.
pub fn read_eval_result(path: &Path) -> Result<EvalRecord> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))
}
