//! Canonical on-disk locations for a campaign rooted at a project directory.

use std::path::{Path, PathBuf};

/// All runner-owned paths for a project root.
#[derive(Debug, Clone)]
pub struct CampaignPaths {
    pub root: PathBuf,
    pub campaign_dir: PathBuf,
    pub state_dir: PathBuf,
    pub config_path: PathBuf,
    pub lock_path: PathBuf,
    pub resume_state_path: PathBuf,
    pub logs_dir: PathBuf,
    pub cost_log_path: PathBuf,
    pub agent_output_dir: PathBuf,
}

impl CampaignPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let campaign_dir = root.join(".campaign");
        let state_dir = campaign_dir.join("state");
        let logs_dir = root.join("logs");
        Self {
            root: root.clone(),
            campaign_dir: campaign_dir.clone(),
            state_dir: state_dir.clone(),
            config_path: campaign_dir.join("config.toml"),
            lock_path: campaign_dir.join("build.lock"),
            resume_state_path: state_dir.join("resume.json"),
            logs_dir: logs_dir.clone(),
            cost_log_path: logs_dir.join("cost-log.jsonl"),
            agent_output_dir: logs_dir.join("agent"),
        }
    }

    /// Resolve a config-relative path against the project root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}
