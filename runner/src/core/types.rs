//! Shared deterministic types for the reliability core.
//!
//! These types define stable contracts between core components. They should not
//! depend on external state or I/O and must remain deterministic across runs.

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static UNSAFE_NAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9._-]").expect("name regex should be valid"));

static DASH_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-{2,}").expect("dash regex should be valid"));

/// Roadmap status column, recognised by glyph substring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureStatus {
    Complete,
    Pending,
    InProgress,
    Paused,
    Failed,
    Unknown,
}

impl FeatureStatus {
    /// Classify a status cell. Completion wins over pending when both glyphs appear.
    pub fn from_cell(cell: &str) -> Self {
        if cell.contains('\u{2705}') {
            Self::Complete
        } else if cell.contains('\u{2b1c}') {
            Self::Pending
        } else if cell.contains('\u{1f504}') {
            Self::InProgress
        } else if cell.contains('\u{23f8}') {
            Self::Paused
        } else if cell.contains('\u{274c}') {
            Self::Failed
        } else {
            Self::Unknown
        }
    }
}

/// A pending unit of work in scheduling order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feature {
    pub id: u32,
    pub name: String,
    pub complexity: String,
}

/// Filesystem-safe form of a feature name: lowercased, anything outside
/// `[a-z0-9._-]` becomes `-`, dash runs collapse, outer dashes are trimmed.
pub fn sanitize_feature_name(name: &str) -> String {
    let lowered = name.to_lowercase();
    let replaced = UNSAFE_NAME_CHARS.replace_all(&lowered, "-");
    let collapsed = DASH_RUNS.replace_all(&replaced, "-");
    collapsed.trim_matches('-').to_string()
}

/// A spec artifact paired with an opaque descriptor of the sources it governs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriftPair {
    pub spec_file: PathBuf,
    pub source_files: String,
}

impl DriftPair {
    pub fn new(spec_file: impl Into<PathBuf>, source_files: impl Into<String>) -> Self {
        Self {
            spec_file: spec_file.into(),
            source_files: source_files.into(),
        }
    }
}

/// Persisted build-loop progress (`.campaign/state/resume.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeState {
    /// Position in the ordered feature list.
    pub feature_index: u64,
    /// Opaque branch strategy tag chosen by the driver.
    pub branch_strategy: String,
    /// Completed feature names, in completion order.
    #[serde(default)]
    pub completed_features: Vec<String>,
    pub current_branch: String,
    /// UTC timestamp stamped by the store on write.
    #[serde(default)]
    pub timestamp: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_glyphs_classify() {
        assert_eq!(FeatureStatus::from_cell("\u{2705} done"), FeatureStatus::Complete);
        assert_eq!(FeatureStatus::from_cell("\u{2b1c}"), FeatureStatus::Pending);
        assert_eq!(FeatureStatus::from_cell("\u{1f504}"), FeatureStatus::InProgress);
        assert_eq!(FeatureStatus::from_cell("\u{23f8}\u{fe0f}"), FeatureStatus::Paused);
        assert_eq!(FeatureStatus::from_cell("\u{274c}"), FeatureStatus::Failed);
        assert_eq!(FeatureStatus::from_cell("todo"), FeatureStatus::Unknown);
    }

    #[test]
    fn feature_names_sanitize_for_filenames() {
        assert_eq!(sanitize_feature_name("User Auth (v2)!"), "user-auth-v2");
        assert_eq!(sanitize_feature_name("--Export.CSV--"), "export.csv");
        assert_eq!(sanitize_feature_name("a__b"), "a__b");
        assert_eq!(sanitize_feature_name("!!!"), "");
    }
}
