//! Append-only JSONL log of agent cost and token usage.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::debug;

use crate::core::agent_output::CostRecord;
use crate::io::resume_state::TIMESTAMP_FORMAT;

/// Stamp `record` with the current UTC time and append it as one line.
pub fn append_cost_record(path: &Path, record: &CostRecord) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let stamped = CostRecord {
        timestamp: Utc::now().format(TIMESTAMP_FORMAT).to_string(),
        ..record.clone()
    };
    let mut line = serde_json::to_string(&stamped).context("serialize cost record")?;
    line.push('\n');

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open cost log {}", path.display()))?;
    file.write_all(line.as_bytes())
        .with_context(|| format!("append cost log {}", path.display()))?;
    debug!(path = %path.display(), model = %stamped.model, cost_usd = ?stamped.cost_usd, "cost logged");
    Ok(())
}
