//! Campaign configuration stored under `.campaign/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::truncate::DEFAULT_MAX_TOKENS;
use crate::io::backoff::BackoffPolicy;

/// Campaign configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields fall back to
/// defaults and relative paths resolve against the project root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CampaignConfig {
    /// Markdown roadmap table listing features and their dependencies.
    pub roadmap_path: PathBuf,

    /// Directory holding per-feature spec files (`<sanitized-name>.md`).
    pub specs_dir: PathBuf,

    /// Opaque tag recorded in resume state.
    pub branch_strategy: String,

    /// Token budget for a spec embedded into a build prompt.
    pub context_max_tokens: usize,

    pub agent: AgentConfig,

    pub drift: DriftConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent command; the rendered prompt is appended as the last argument.
    pub command: Vec<String>,
    pub max_retries: u32,
    pub backoff_cap_secs: u64,
    /// Wall-clock limit for a single attempt.
    pub timeout_secs: u64,
    /// Append `--output-format json` and parse the structured result.
    pub output_format_json: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DriftConfig {
    /// Check command run once per spec/source pair.
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            roadmap_path: PathBuf::from(".specs/roadmap.md"),
            specs_dir: PathBuf::from(".specs/features"),
            branch_strategy: "chained".to_string(),
            context_max_tokens: DEFAULT_MAX_TOKENS,
            agent: AgentConfig::default(),
            drift: DriftConfig::default(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "claude".to_string(),
                "-p".to_string(),
                "--dangerously-skip-permissions".to_string(),
            ],
            max_retries: 5,
            backoff_cap_secs: 60,
            timeout_secs: 600,
            output_format_json: true,
        }
    }
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            command: vec!["./scripts/check-drift.sh".to_string()],
            timeout_secs: 300,
        }
    }
}

impl AgentConfig {
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_retries: self.max_retries,
            backoff_cap: Duration::from_secs(self.backoff_cap_secs),
            attempt_timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

impl CampaignConfig {
    pub fn validate(&self) -> Result<()> {
        if self.roadmap_path.as_os_str().is_empty() {
            return Err(anyhow!("roadmap_path must not be empty"));
        }
        if self.context_max_tokens == 0 {
            return Err(anyhow!("context_max_tokens must be > 0"));
        }
        if self.agent.command.is_empty() || self.agent.command[0].trim().is_empty() {
            return Err(anyhow!("agent.command must be a non-empty array"));
        }
        if self.agent.timeout_secs == 0 {
            return Err(anyhow!("agent.timeout_secs must be > 0"));
        }
        if self.drift.command.is_empty() || self.drift.command[0].trim().is_empty() {
            return Err(anyhow!("drift.command must be a non-empty array"));
        }
        if self.drift.timeout_secs == 0 {
            return Err(anyhow!("drift.timeout_secs must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `CampaignConfig::default()`.
pub fn load_config(path: &Path) -> Result<CampaignConfig> {
    if !path.exists() {
        let cfg = CampaignConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: CampaignConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &CampaignConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
