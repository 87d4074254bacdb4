//! Deterministic, agent-free evaluation of a single commit.
//!
//! Everything here is derived from git: diff stats against the parent (or
//! the empty tree for a root commit), test files touched, newly exported
//! TypeScript types and whether they already existed, and added imports.

use std::collections::HashSet;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use campaign_runner::io::git::Git;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::error::EvalError;

static SUBJECT_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^:]*:\s*").expect("subject prefix regex should be valid"));
static TYPE_EXPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"export\s+(?:type|interface)\s+(\w+)").expect("type export regex should be valid")
});

/// Diff statistics and type analysis for one commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MechanicalEval {
    pub commit: String,
    pub feature_name: String,
    pub files_changed: usize,
    pub files: Vec<String>,
    pub lines_added: u64,
    pub lines_removed: u64,
    pub new_type_exports: usize,
    #[serde(default)]
    pub new_type_names: Vec<String>,
    pub type_redeclarations: usize,
    pub redeclared_type_names: Vec<String>,
    pub import_count: usize,
    pub test_files_touched: bool,
    #[serde(default)]
    pub test_files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MechanicalOutcome {
    Evaluated(MechanicalEval),
    /// The commit is not a candidate for evaluation (e.g. a merge).
    Skipped { reason: String },
}

/// Abstraction over mechanical evaluation backends.
pub trait MechanicalEvaluator {
    fn evaluate(&self, commit: &str) -> Result<MechanicalOutcome>;
}

/// Evaluator backed by the project's git history.
#[derive(Debug, Clone)]
pub struct GitMechanicalEvaluator {
    git: Git,
}

impl GitMechanicalEvaluator {
    pub fn new(git: Git) -> Self {
        Self { git }
    }
}

impl MechanicalEvaluator for GitMechanicalEvaluator {
    #[instrument(skip_all, fields(commit = %short(commit)))]
    fn evaluate(&self, commit: &str) -> Result<MechanicalOutcome> {
        if commit.is_empty() || !self.git.object_exists(commit)? {
            return Err(EvalError::CommitNotFound {
                commit: commit.to_string(),
            }
            .into());
        }

        let parents = self.git.parent_count(commit)?;
        if parents > 1 {
            info!("skipping merge commit");
            return Ok(MechanicalOutcome::Skipped {
                reason: "merge commit".to_string(),
            });
        }

        let subject = self.git.commit_subject(commit)?;
        let base = self.git.diff_base(commit)?;
        let numstat = self.git.numstat(&base, commit)?;
        let diff = self.git.diff(&base, commit)?;

        let entries = parse_numstat(&numstat);
        let files: Vec<String> = entries.iter().map(|entry| entry.path.clone()).collect();
        let test_files: Vec<String> = files
            .iter()
            .filter(|path| is_test_file(path))
            .cloned()
            .collect();
        let new_type_names = extract_type_names(&diff);

        let mut redeclared = Vec::new();
        if parents == 1 {
            let parent = format!("{commit}^");
            for name in &new_type_names {
                let pattern = format!(r"export \(type\|interface\) {name}");
                let existing = self
                    .git
                    .grep_files(&pattern, &parent, &["*.ts", "*.tsx"])
                    .with_context(|| format!("search parent for type {name}"))?;
                if !existing.is_empty() {
                    debug!(name = %name, files = ?existing, "type already exported at parent");
                    redeclared.push(name.clone());
                }
            }
        }

        Ok(MechanicalOutcome::Evaluated(MechanicalEval {
            commit: commit.to_string(),
            feature_name: feature_name_from_subject(&subject),
            files_changed: entries.len(),
            lines_added: entries.iter().map(|entry| entry.added).sum(),
            lines_removed: entries.iter().map(|entry| entry.removed).sum(),
            files,
            new_type_exports: new_type_names.len(),
            new_type_names,
            type_redeclarations: redeclared.len(),
            redeclared_type_names: redeclared,
            import_count: count_added_imports(&diff),
            test_files_touched: !test_files.is_empty(),
            test_files,
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct NumstatEntry {
    added: u64,
    removed: u64,
    path: String,
}

/// Parse `git diff --numstat`; binary files (`-`) count as zero lines.
fn parse_numstat(output: &str) -> Vec<NumstatEntry> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let mut parts = line.splitn(3, '\t');
            let added = parts.next()?;
            let removed = parts.next()?;
            let path = parts.next()?;
            Some(NumstatEntry {
                added: added.parse().unwrap_or(0),
                removed: removed.parse().unwrap_or(0),
                path: path.to_string(),
            })
        })
        .collect()
}

fn is_test_file(path: &str) -> bool {
    path.contains("test") || path.contains("spec") || path.contains("__tests__")
}

/// Exported type and interface names on added lines, first occurrence order.
fn extract_type_names(diff: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    diff.lines()
        .filter(|line| line.starts_with('+'))
        .filter_map(|line| TYPE_EXPORT.captures(line))
        .filter_map(|caps| caps.get(1).map(|name| name.as_str().to_string()))
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

fn count_added_imports(diff: &str) -> usize {
    diff.lines()
        .filter(|line| line.starts_with('+') && !line.starts_with("+++"))
        .filter(|line| line.contains("import "))
        .count()
}

/// Commit subject with any leading `prefix:` removed.
pub fn feature_name_from_subject(subject: &str) -> String {
    SUBJECT_PREFIX.replace(subject.trim(), "").into_owned()
}

/// First eight characters of a commit hash, for log lines.
pub fn short(commit: &str) -> &str {
    commit.get(..8).unwrap_or(commit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use campaign_runner::test_support::TestRepo;

    fn evaluated(outcome: MechanicalOutcome) -> MechanicalEval {
        match outcome {
            MechanicalOutcome::Evaluated(eval) => eval,
            MechanicalOutcome::Skipped { reason } => panic!("unexpected skip: {reason}"),
        }
    }

    #[test]
    fn numstat_treats_binary_as_zero() {
        let entries = parse_numstat("3\t1\tsrc/a.ts\n-\t-\tassets/logo.png\n\nbad line\n");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].added, 3);
        assert_eq!(entries[1].added, 0);
        assert_eq!(entries[1].path, "assets/logo.png");
    }

    #[test]
    fn subject_prefix_is_stripped() {
        assert_eq!(feature_name_from_subject("feat: User Auth"), "User Auth");
        assert_eq!(feature_name_from_subject("fix(api):   Retry"), "Retry");
        assert_eq!(feature_name_from_subject("Plain subject"), "Plain subject");
    }

    #[test]
    fn type_names_are_deduplicated_in_order() {
        let diff = "\
+++ b/src/types.ts
+export type Session = { id: string };
+export interface User { id: string }
 export type Old = number;
-export type Removed = string;
+export  type Session = { id: number };
";
        assert_eq!(extract_type_names(diff), vec!["Session", "User"]);
    }

    #[test]
    fn imports_exclude_diff_headers() {
        let diff = "+++ b/import thing.ts\n+import { a } from './a';\n import { b } from './b';\n";
        assert_eq!(count_added_imports(diff), 1);
    }

    /// Verifies a root commit diffs against the empty tree and never counts
    /// redeclarations.
    #[test]
    fn root_commit_is_evaluated_against_empty_tree() {
        let repo = TestRepo::init();
        let commit = repo.commit_file(
            "src/types.ts",
            "export type User = { id: string };\n",
            "feat: Bootstrap",
        );
        let evaluator = GitMechanicalEvaluator::new(Git::new(repo.path()));

        let eval = evaluated(evaluator.evaluate(&commit).expect("evaluate"));
        assert_eq!(eval.feature_name, "Bootstrap");
        assert_eq!(eval.files, vec!["src/types.ts"]);
        assert_eq!(eval.lines_added, 1);
        assert_eq!(eval.new_type_names, vec!["User"]);
        assert_eq!(eval.type_redeclarations, 0);
    }

    #[test]
    fn redeclared_exports_are_flagged() {
        let repo = TestRepo::init();
        repo.commit_file(
            "src/types.ts",
            "export type User = { id: string };\n",
            "feat: Bootstrap",
        );
        repo.write_file("src/auth/user.test.ts", "import { x } from './x';\n")
            .expect("write test");
        let commit = repo.commit_file(
            "src/auth/user.ts",
            "import { db } from '../db';\nexport interface User { id: string }\nexport type Token = string;\n",
            "feat: Auth",
        );
        let evaluator = GitMechanicalEvaluator::new(Git::new(repo.path()));

        let eval = evaluated(evaluator.evaluate(&commit).expect("evaluate"));
        assert_eq!(eval.files_changed, 2);
        assert_eq!(eval.new_type_names, vec!["User", "Token"]);
        assert_eq!(eval.redeclared_type_names, vec!["User"]);
        assert_eq!(eval.type_redeclarations, 1);
        assert_eq!(eval.import_count, 2);
        assert!(eval.test_files_touched);
        assert_eq!(eval.test_files, vec!["src/auth/user.test.ts"]);
    }

    #[test]
    fn merge_commit_is_skipped() {
        let repo = TestRepo::init();
        repo.commit_file("a.txt", "a\n", "base");
        repo.git(&["checkout", "-q", "-b", "side"]).expect("branch");
        repo.commit_file("b.txt", "b\n", "side work");
        repo.git(&["checkout", "-q", "main"]).expect("checkout");
        repo.commit_file("c.txt", "c\n", "main work");
        repo.git(&["merge", "-q", "--no-ff", "-m", "merge side", "side"])
            .expect("merge");
        let merge = Git::new(repo.path()).head().expect("head");

        let outcome = GitMechanicalEvaluator::new(Git::new(repo.path()))
            .evaluate(&merge)
            .expect("evaluate");
        assert_eq!(
            outcome,
            MechanicalOutcome::Skipped {
                reason: "merge commit".to_string()
            }
        );
    }

    #[test]
    fn unknown_commit_is_an_error() {
        let repo = TestRepo::init();
        repo.commit_file("a.txt", "a\n", "base");
        let err = GitMechanicalEvaluator::new(Git::new(repo.path()))
            .evaluate("0123456789abcdef0123456789abcdef01234567")
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EvalError>(),
            Some(EvalError::CommitNotFound { .. })
        ));
    }
}
