//! Campaign-level aggregation of per-commit eval results.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use campaign_runner::io::resume_state::TIMESTAMP_FORMAT;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::results::{EvalRecord, read_eval_result};
use crate::review::{Compliance, Integration, Scope};

const CAMPAIGN_PREFIX: &str = "eval-campaign-";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceTally {
    pub pass: usize,
    pub warn: usize,
    pub fail: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeTally {
    pub focused: usize,
    pub moderate: usize,
    pub sprawling: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationTally {
    pub clean: usize,
    pub minor_issues: usize,
    pub major_issues: usize,
}

/// Aggregate written to `eval-campaign-<YYYYmmdd-HHMMSS>.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignSummary {
    pub campaign_timestamp: String,
    /// Result files found, including any that could not be parsed.
    pub total_features_evaluated: usize,
    pub type_redeclarations_total: usize,
    pub framework_compliance: ComplianceTally,
    pub scope_assessment: ScopeTally,
    pub integration_quality: IntegrationTally,
    pub features_with_issues_count: usize,
    pub features_with_issues: Vec<String>,
}

impl CampaignSummary {
    fn add(&mut self, record: &EvalRecord) {
        let mut has_issue = false;
        self.type_redeclarations_total += record.mechanical.type_redeclarations;
        if record.mechanical.type_redeclarations > 0 {
            has_issue = true;
        }

        if let Some(review) = &record.agent_eval {
            match review.framework_compliance {
                Some(Compliance::Pass) => self.framework_compliance.pass += 1,
                Some(Compliance::Warn) => {
                    self.framework_compliance.warn += 1;
                    has_issue = true;
                }
                Some(Compliance::Fail) => {
                    self.framework_compliance.fail += 1;
                    has_issue = true;
                }
                None => {}
            }
            match review.scope_assessment {
                Some(Scope::Focused) => self.scope_assessment.focused += 1,
                Some(Scope::Moderate) => self.scope_assessment.moderate += 1,
                Some(Scope::Sprawling) => {
                    self.scope_assessment.sprawling += 1;
                    has_issue = true;
                }
                None => {}
            }
            match review.integration_quality {
                Some(Integration::Clean) => self.integration_quality.clean += 1,
                Some(Integration::MinorIssues) => self.integration_quality.minor_issues += 1,
                Some(Integration::MajorIssues) => {
                    self.integration_quality.major_issues += 1;
                    has_issue = true;
                }
                None => {}
            }
        }

        if has_issue {
            self.features_with_issues
                .push(record.mechanical.feature_name.clone());
            self.features_with_issues_count = self.features_with_issues.len();
        }
    }
}

/// Result files in `output_dir`, sorted by name, excluding campaign summaries.
pub fn eval_result_files(output_dir: &Path) -> Result<Vec<PathBuf>> {
    if !output_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in
        fs::read_dir(output_dir).with_context(|| format!("read {}", output_dir.display()))?
    {
        let entry = entry.with_context(|| format!("read entry in {}", output_dir.display()))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with("eval-") && name.ends_with(".json") && !name.starts_with(CAMPAIGN_PREFIX)
        {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Aggregate every result file into a campaign summary file.
///
/// Returns `None` without writing anything when there are no result files.
/// Files that fail to parse are skipped with a warning but still count
/// toward `total_features_evaluated`.
#[instrument(skip_all, fields(dir = %output_dir.display()))]
pub fn generate_campaign_summary(output_dir: &Path) -> Result<Option<PathBuf>> {
    let files = eval_result_files(output_dir)?;
    if files.is_empty() {
        info!("no eval results to summarize");
        return Ok(None);
    }

    let now = Utc::now();
    let mut summary = CampaignSummary {
        campaign_timestamp: now.format(TIMESTAMP_FORMAT).to_string(),
        total_features_evaluated: files.len(),
        ..CampaignSummary::default()
    };
    for file in &files {
        match read_eval_result(file) {
            Ok(record) => summary.add(&record),
            Err(err) => warn!(path = %file.display(), err = %format!("{err:#}"), "skipping unreadable eval result"),
        }
    }

    let path = output_dir.join(format!("{CAMPAIGN_PREFIX}{}.json", now.format("%Y%m%d-%H%M%S")));
    let mut payload = serde_json::to_string_pretty(&summary).context("serialize campaign summary")?;
    payload.push('\n');
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, payload).with_context(|| format!("write {}", tmp_path.display()))?;
    fs::rename(&tmp_path, &path).with_context(|| format!("rename {}", path.display()))?;

    info!(
        total = summary.total_features_evaluated,
        redeclarations = summary.type_redeclarations_total,
        compliance = ?summary.framework_compliance,
        scope = ?summary.scope_assessment,
        integration = ?summary.integration_quality,
        issues = ?summary.features_with_issues,
        path = %path.display(),
        "eval campaign summary"
    );
    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::tests::{mechanical, review};
    use crate::results::write_eval_result;

    #[test]
    fn empty_directory_writes_nothing() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert_eq!(generate_campaign_summary(temp.path()).expect("summary"), None);
        assert_eq!(
            generate_campaign_summary(&temp.path().join("missing")).expect("summary"),
            None
        );
    }

    #[test]
    fn tallies_verdicts_and_flags_issues() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path();
        let records = [
            (
                "Auth",
                EvalRecord::new(
                    mechanical("Auth", 0),
                    Some(review(Compliance::Pass, Scope::Focused, Integration::Clean)),
                ),
            ),
            (
                "Dashboard",
                EvalRecord::new(
                    mechanical("Dashboard", 2),
                    Some(review(Compliance::Pass, Scope::Moderate, Integration::MinorIssues)),
                ),
            ),
            (
                "Reports",
                EvalRecord::new(
                    mechanical("Reports", 0),
                    Some(review(Compliance::Warn, Scope::Sprawling, Integration::MajorIssues)),
                ),
            ),
            ("Settings", EvalRecord::new(mechanical("Settings", 0), None)),
        ];
        for (name, record) in &records {
            write_eval_result(dir, name, record).expect("write");
        }
        fs::write(dir.join("eval-garbage.json"), "{not json").expect("garbage");
        fs::write(dir.join("eval-campaign-20260101-000000.json"), "{}").expect("old summary");
        fs::write(dir.join("notes.json"), "{}").expect("unrelated");

        let path = generate_campaign_summary(dir).expect("summary").expect("written");
        let summary: CampaignSummary =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");

        assert_eq!(summary.total_features_evaluated, 5);
        assert_eq!(summary.type_redeclarations_total, 2);
        assert_eq!(
            summary.framework_compliance,
            ComplianceTally {
                pass: 2,
                warn: 1,
                fail: 0
            }
        );
        assert_eq!(summary.scope_assessment.sprawling, 1);
        assert_eq!(summary.integration_quality.minor_issues, 1);
        assert_eq!(summary.integration_quality.major_issues, 1);
        // Files are read in name order.
        assert_eq!(summary.features_with_issues, vec!["Dashboard", "Reports"]);
        assert_eq!(summary.features_with_issues_count, 2);
        assert!(
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(CAMPAIGN_PREFIX))
        );
    }
}
