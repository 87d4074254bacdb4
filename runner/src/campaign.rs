//! Campaign driver for `campaign-runner run`.
//!
//! Builds every pending roadmap feature in dependency order while holding the
//! build lock, checkpointing resume state after each success.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::core::types::Feature;
use crate::error::ReliabilityError;
use crate::io::builder::FeatureBuilder;
use crate::io::config::CampaignConfig;
use crate::io::git::Git;
use crate::io::lock::LockHandle;
use crate::io::paths::CampaignPaths;
use crate::io::prompt::{FeaturePromptInput, render_feature_prompt};
use crate::io::resume_state::{clear_state, read_state, write_state};
use crate::io::roadmap::{check_circular_deps, emit_topo_order};

/// Reason why `run_campaign` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CampaignStop {
    /// Every pending feature was built; resume state was cleared.
    Complete,
    /// The agent exited non-zero for a feature.
    FeatureFailed { name: String, exit_code: i32 },
    /// The agent stayed rate limited through every retry.
    RateLimited { name: String },
    /// A single agent attempt overran its timeout.
    TimedOut { name: String },
}

/// One successfully built feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureBuilt {
    pub feature: Feature,
    /// Resume-state index after this feature.
    pub feature_index: u64,
}

/// Summary of a campaign invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignOutcome {
    pub built: Vec<String>,
    /// Pending features skipped because resume state lists them as done.
    pub skipped: Vec<String>,
    pub stop: CampaignStop,
}

/// Run the campaign rooted at `root`.
///
/// Lock contention, a cyclic roadmap, or invalid resume state fail before any
/// feature is attempted. The lock is released on every exit path.
#[instrument(skip_all, fields(root = %root.display()))]
pub fn run_campaign<B: FeatureBuilder, F: FnMut(&FeatureBuilt)>(
    root: &Path,
    config: &CampaignConfig,
    builder: &B,
    on_feature: F,
) -> Result<CampaignOutcome> {
    let paths = CampaignPaths::new(root);
    let lock = LockHandle::acquire(&paths.lock_path)?;
    let result = drive(&paths, config, builder, on_feature);
    if let Err(err) = lock.release() {
        warn!(err = %format!("{err:#}"), "failed to release build lock");
    }
    result
}

fn drive<B: FeatureBuilder, F: FnMut(&FeatureBuilt)>(
    paths: &CampaignPaths,
    config: &CampaignConfig,
    builder: &B,
    mut on_feature: F,
) -> Result<CampaignOutcome> {
    let roadmap_path = paths.resolve(&config.roadmap_path);
    check_circular_deps(&roadmap_path)?;
    let order = emit_topo_order(&roadmap_path)?;

    let state = read_state(&paths.resume_state_path)
        .with_context(|| format!("load {}", paths.resume_state_path.display()))?;
    let (mut feature_index, mut completed) = match state {
        Some(state) => {
            info!(
                feature_index = state.feature_index,
                completed = state.completed_features.len(),
                "resuming campaign"
            );
            (state.feature_index, state.completed_features)
        }
        None => (0, Vec::new()),
    };

    let branch = Git::new(&paths.root).current_branch().unwrap_or_else(|err| {
        warn!(err = %format!("{err:#}"), "could not read current branch");
        "HEAD".to_string()
    });
    let specs_dir = paths.resolve(&config.specs_dir);

    let mut built = Vec::new();
    let mut skipped = Vec::new();
    for feature in order {
        if completed.contains(&feature.name) {
            info!(feature = %feature.name, "already built, skipping");
            skipped.push(feature.name);
            continue;
        }

        let prompt = render_feature_prompt(&FeaturePromptInput {
            feature: &feature,
            branch: &branch,
            completed: &completed,
            specs_dir: &specs_dir,
            context_max_tokens: config.context_max_tokens,
        })?;

        info!(feature = %feature.name, id = feature.id, "building feature");
        let exit_code = match builder.build(&feature, &prompt) {
            Ok(code) => code,
            Err(err) => {
                let stop = match ReliabilityError::find(&err) {
                    Some(ReliabilityError::RateLimitExhausted { .. }) => CampaignStop::RateLimited {
                        name: feature.name.clone(),
                    },
                    Some(ReliabilityError::ExecutionTimeout { .. }) => CampaignStop::TimedOut {
                        name: feature.name.clone(),
                    },
                    _ => return Err(err).with_context(|| format!("build {}", feature.name)),
                };
                warn!(feature = %feature.name, err = %format!("{err:#}"), "campaign halted");
                return Ok(CampaignOutcome {
                    built,
                    skipped,
                    stop,
                });
            }
        };

        if exit_code != 0 {
            warn!(feature = %feature.name, exit_code, "feature build failed");
            return Ok(CampaignOutcome {
                built,
                skipped,
                stop: CampaignStop::FeatureFailed {
                    name: feature.name,
                    exit_code,
                },
            });
        }

        completed.push(feature.name.clone());
        feature_index += 1;
        write_state(
            &paths.resume_state_path,
            feature_index,
            &config.branch_strategy,
            &completed,
            &branch,
        )?;
        built.push(feature.name.clone());
        on_feature(&FeatureBuilt {
            feature,
            feature_index,
        });
    }

    clear_state(&paths.resume_state_path)?;
    info!(built = built.len(), skipped = skipped.len(), "campaign complete");
    Ok(CampaignOutcome {
        built,
        skipped,
        stop: CampaignStop::Complete,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::FeatureStatus;
    use crate::test_support::{ScriptedBuild, ScriptedBuilder, write_roadmap};

    fn diamond(root: &Path) {
        write_roadmap(
            root,
            &[
                (1, "Auth", "-", FeatureStatus::Pending),
                (2, "Dashboard", "1", FeatureStatus::Pending),
                (3, "Settings", "1", FeatureStatus::Pending),
                (4, "Reports", "2, 3", FeatureStatus::Pending),
            ],
        );
    }

    #[test]
    fn builds_in_dependency_order_and_clears_state() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        diamond(root);
        let builder = ScriptedBuilder::new(vec![ScriptedBuild::Exit(0); 4]);
        let mut seen = Vec::new();

        let outcome = run_campaign(root, &CampaignConfig::default(), &builder, |built| {
            seen.push(built.feature_index)
        })
        .expect("campaign");

        assert_eq!(outcome.stop, CampaignStop::Complete);
        assert_eq!(outcome.built, vec!["Auth", "Dashboard", "Settings", "Reports"]);
        assert_eq!(seen, vec![1, 2, 3, 4]);
        assert_eq!(builder.built_names(), outcome.built);
        let paths = CampaignPaths::new(root);
        assert!(!paths.resume_state_path.exists());
        assert!(!paths.lock_path.exists());
    }

    /// Verifies a failed feature leaves resume state pointing after the last success.
    #[test]
    fn failure_stops_and_keeps_checkpoint() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        diamond(root);
        let builder = ScriptedBuilder::new(vec![ScriptedBuild::Exit(0), ScriptedBuild::Exit(2)]);

        let outcome =
            run_campaign(root, &CampaignConfig::default(), &builder, |_| {}).expect("campaign");

        assert_eq!(
            outcome.stop,
            CampaignStop::FeatureFailed {
                name: "Dashboard".to_string(),
                exit_code: 2
            }
        );
        let state = read_state(&CampaignPaths::new(root).resume_state_path)
            .expect("read")
            .expect("present");
        assert_eq!(state.feature_index, 1);
        assert_eq!(state.completed_features, vec!["Auth".to_string()]);
    }

    #[test]
    fn resume_skips_completed_features() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        diamond(root);
        let paths = CampaignPaths::new(root);
        write_state(
            &paths.resume_state_path,
            2,
            "chained",
            &["Auth".to_string(), "Dashboard".to_string()],
            "main",
        )
        .expect("seed state");
        let builder = ScriptedBuilder::new(vec![ScriptedBuild::Exit(0); 2]);

        let outcome =
            run_campaign(root, &CampaignConfig::default(), &builder, |_| {}).expect("campaign");

        assert_eq!(outcome.skipped, vec!["Auth", "Dashboard"]);
        assert_eq!(outcome.built, vec!["Settings", "Reports"]);
    }

    #[test]
    fn rate_limit_and_timeout_become_stop_reasons() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        diamond(root);

        let limited = ScriptedBuilder::new(vec![ScriptedBuild::RateLimited]);
        let outcome =
            run_campaign(root, &CampaignConfig::default(), &limited, |_| {}).expect("campaign");
        assert_eq!(
            outcome.stop,
            CampaignStop::RateLimited {
                name: "Auth".to_string()
            }
        );

        let slow = ScriptedBuilder::new(vec![ScriptedBuild::TimedOut]);
        let outcome =
            run_campaign(root, &CampaignConfig::default(), &slow, |_| {}).expect("campaign");
        assert_eq!(
            outcome.stop,
            CampaignStop::TimedOut {
                name: "Auth".to_string()
            }
        );
    }

    #[test]
    fn cycle_fails_before_any_build() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        write_roadmap(
            root,
            &[
                (1, "Auth", "4", FeatureStatus::Pending),
                (4, "Reports", "1", FeatureStatus::Pending),
            ],
        );
        let builder = ScriptedBuilder::new(Vec::new());

        let err = run_campaign(root, &CampaignConfig::default(), &builder, |_| {}).unwrap_err();
        assert!(matches!(
            ReliabilityError::find(&err),
            Some(ReliabilityError::CircularDependency { .. })
        ));
        assert!(builder.built_names().is_empty());
        assert!(!CampaignPaths::new(root).lock_path.exists());
    }

    #[test]
    fn held_lock_is_contention() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        diamond(root);
        let _held = LockHandle::acquire(&CampaignPaths::new(root).lock_path).expect("lock");
        let builder = ScriptedBuilder::new(Vec::new());

        let err = run_campaign(root, &CampaignConfig::default(), &builder, |_| {}).unwrap_err();
        assert!(matches!(
            ReliabilityError::find(&err),
            Some(ReliabilityError::LockContention { .. })
        ));
    }
}
