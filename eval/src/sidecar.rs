//! Polling loop that evaluates each new commit as the build produces it.
//!
//! The sidecar only observes: it reads git history and writes result files
//! outside the build's control flow. A failure while evaluating one commit is
//! logged and counted, never fatal. The loop ends on shutdown, or once a
//! drain request has been honored and no new commits remain.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use campaign_runner::core::types::sanitize_feature_name;
use campaign_runner::io::git::Git;
use tracing::{info, instrument, warn};

use crate::config::SidecarConfig;
use crate::error::EvalError;
use crate::mechanical::{MechanicalEvaluator, MechanicalOutcome, short};
use crate::results::{EvalRecord, write_eval_result};
use crate::review::{AgentReview, Reviewer, is_credit_exhaustion};
use crate::summary::generate_campaign_summary;

/// Marker file in the project root that asks the sidecar to finish up.
pub const DRAIN_MARKER: &str = ".sdd-eval-drain";

const SLEEP_SLICE: Duration = Duration::from_millis(200);

/// Mutable loop state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CampaignState {
    /// High-water mark: every commit up to here has been considered.
    pub last_evaluated_commit: String,
    /// Set once the agent reports exhausted credits; never cleared.
    pub agent_evals_disabled: bool,
    pub eval_count: usize,
    pub eval_errors: usize,
    pub draining: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
    Continue,
    Stop,
}

pub struct Sidecar<M, R> {
    config: SidecarConfig,
    git: Git,
    mechanical: M,
    reviewer: R,
    shutdown: Arc<AtomicBool>,
    state: CampaignState,
}

impl<M: MechanicalEvaluator, R: Reviewer> Sidecar<M, R> {
    /// A sidecar that has not read HEAD yet; enough for one-off evaluations.
    pub fn new(config: SidecarConfig, mechanical: M, reviewer: R, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            git: Git::new(&config.project_dir),
            config,
            mechanical,
            reviewer,
            shutdown,
            state: CampaignState::default(),
        }
    }

    /// Start watching from the current HEAD.
    ///
    /// Clears a drain marker left over from an earlier run. Fails if HEAD
    /// cannot be read.
    #[instrument(skip_all, fields(project = %config.project_dir.display()))]
    pub fn initialize(
        config: SidecarConfig,
        mechanical: M,
        reviewer: R,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self> {
        let mut sidecar = Self::new(config, mechanical, reviewer, shutdown);
        fs::create_dir_all(&sidecar.config.output_dir).with_context(|| {
            format!("create directory {}", sidecar.config.output_dir.display())
        })?;
        remove_marker(&sidecar.drain_marker())?;

        let head = sidecar.git.head().map_err(|err| {
            warn!(err = %format!("{err:#}"), "could not read HEAD");
            EvalError::HeadUnreadable {
                path: sidecar.config.project_dir.clone(),
            }
        })?;
        info!(commit = %short(&head), "starting from commit");
        sidecar.state.last_evaluated_commit = head;
        Ok(sidecar)
    }

    pub fn state(&self) -> &CampaignState {
        &self.state
    }

    pub fn drain_marker(&self) -> PathBuf {
        self.config.project_dir.join(DRAIN_MARKER)
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// One poll cycle: wait, re-read HEAD, evaluate any new commits.
    pub fn poll_once(&mut self) -> Poll {
        if self.shutdown_requested() {
            return Poll::Stop;
        }
        if !self.state.draining && self.drain_marker().is_file() {
            info!("drain requested, processing remaining commits");
            self.state.draining = true;
        }
        if !self.state.draining {
            self.sleep();
        }
        if self.shutdown_requested() {
            return Poll::Stop;
        }

        let head = match self.git.head() {
            Ok(head) => head,
            Err(err) if self.state.draining => {
                warn!(err = %format!("{err:#}"), "could not read HEAD while draining, finishing");
                return Poll::Stop;
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "could not read HEAD, retrying next cycle");
                return Poll::Continue;
            }
        };
        if head == self.state.last_evaluated_commit {
            return if self.state.draining {
                Poll::Stop
            } else {
                Poll::Continue
            };
        }

        let commits = self
            .git
            .new_commits(&self.state.last_evaluated_commit, &head)
            .unwrap_or_else(|err| {
                warn!(err = %format!("{err:#}"), "could not list new commits");
                Vec::new()
            });
        for commit in &commits {
            if self.shutdown_requested() {
                break;
            }
            self.evaluate_commit(commit);
        }
        self.state.last_evaluated_commit = head;

        if commits.is_empty() && self.state.draining {
            Poll::Stop
        } else {
            Poll::Continue
        }
    }

    /// Poll until stopped, then write the campaign summary and clear the
    /// drain marker if a drain was honored.
    pub fn run(mut self) -> Result<CampaignState> {
        while self.poll_once() == Poll::Continue {}

        info!(
            evaluated = self.state.eval_count,
            errors = self.state.eval_errors,
            "sidecar shutting down"
        );
        if let Err(err) = generate_campaign_summary(&self.config.output_dir) {
            warn!(err = %format!("{err:#}"), "failed to write campaign summary");
        }
        if self.state.draining {
            info!("drain complete");
            remove_marker(&self.drain_marker())?;
        }
        Ok(self.state)
    }

    /// Evaluate one commit and write its result file.
    ///
    /// Returns the result path, or `None` when the commit was skipped or
    /// could not be evaluated.
    #[instrument(skip_all, fields(commit = %short(commit)))]
    pub fn evaluate_commit(&mut self, commit: &str) -> Option<PathBuf> {
        let mechanical = match self.mechanical.evaluate(commit) {
            Ok(MechanicalOutcome::Evaluated(eval)) => eval,
            Ok(MechanicalOutcome::Skipped { reason }) => {
                info!(%reason, "commit skipped");
                return None;
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "mechanical eval failed, skipping commit");
                self.state.eval_errors += 1;
                return None;
            }
        };
        info!(feature = %mechanical.feature_name, "evaluating commit");

        let feature_name = if sanitize_feature_name(&mechanical.feature_name).is_empty() {
            short(commit).to_string()
        } else {
            mechanical.feature_name.clone()
        };
        let review = if self.config.agent_enabled && !self.state.agent_evals_disabled {
            self.review(commit)
        } else {
            None
        };

        let record = EvalRecord::new(mechanical, review);
        match write_eval_result(&self.config.output_dir, &feature_name, &record) {
            Ok(path) => {
                self.state.eval_count += 1;
                Some(path)
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "failed to write eval result");
                self.state.eval_errors += 1;
                None
            }
        }
    }

    fn review(&mut self, commit: &str) -> Option<AgentReview> {
        let run = match self.reviewer.review(commit) {
            Ok(run) => run,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "agent review failed, mechanical only");
                self.state.eval_errors += 1;
                return None;
            }
        };
        if run.exit_code != 0 {
            if is_credit_exhaustion(&run.output) {
                warn!("agent credits exhausted, disabling agent reviews for this run");
                self.state.agent_evals_disabled = true;
            } else {
                warn!(exit_code = run.exit_code, "agent review failed, mechanical only");
                self.state.eval_errors += 1;
            }
            return None;
        }
        AgentReview::from_output(&run.output)
    }

    fn sleep(&self) {
        let deadline = Instant::now() + self.config.interval;
        while !self.shutdown_requested() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}

fn remove_marker(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("remove {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    use anyhow::anyhow;
    use campaign_runner::test_support::TestRepo;

    use crate::mechanical::GitMechanicalEvaluator;
    use crate::results::read_eval_result;
    use crate::review::ReviewRun;
    use crate::summary::eval_result_files;

    const PASSING_REVIEW: &str = "EVAL_COMPLETE: true\n\
EVAL_FRAMEWORK_COMPLIANCE: pass\n\
EVAL_SCOPE_ASSESSMENT: focused\n\
EVAL_INTEGRATION_QUALITY: clean\n\
EVAL_REPEATED_MISTAKES: none\n\
EVAL_NOTES: ok\n";

    /// Git-backed evaluator that fails for commits with a given subject.
    struct FailOnSubject {
        inner: GitMechanicalEvaluator,
        git: Git,
        subject: &'static str,
    }

    impl MechanicalEvaluator for FailOnSubject {
        fn evaluate(&self, commit: &str) -> Result<MechanicalOutcome> {
            if self.git.commit_subject(commit)? == self.subject {
                return Err(anyhow!("scripted mechanical failure"));
            }
            self.inner.evaluate(commit)
        }
    }

    #[derive(Clone)]
    enum Scripted {
        Exit(i32, &'static str),
        Error,
    }

    /// Replays scripted review runs, then passes every later review.
    struct ScriptedReviewer {
        script: RefCell<Vec<Scripted>>,
        calls: Cell<usize>,
    }

    impl ScriptedReviewer {
        fn new(mut script: Vec<Scripted>) -> Self {
            script.reverse();
            Self {
                script: RefCell::new(script),
                calls: Cell::new(0),
            }
        }
    }

    impl Reviewer for &ScriptedReviewer {
        fn review(&self, _commit: &str) -> Result<ReviewRun> {
            self.calls.set(self.calls.get() + 1);
            match self.script.borrow_mut().pop() {
                Some(Scripted::Exit(exit_code, output)) => Ok(ReviewRun {
                    exit_code,
                    output: output.to_string(),
                }),
                Some(Scripted::Error) => Err(anyhow!("agent timed out")),
                None => Ok(ReviewRun {
                    exit_code: 0,
                    output: PASSING_REVIEW.to_string(),
                }),
            }
        }
    }

    struct Fixture {
        repo: TestRepo,
        output: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let repo = TestRepo::init();
            repo.commit_file("README.md", "# app\n", "chore: init");
            Self {
                repo,
                output: tempfile::tempdir().expect("tempdir"),
            }
        }

        fn config(&self) -> SidecarConfig {
            SidecarConfig {
                project_dir: self.repo.path().to_path_buf(),
                interval: Duration::from_secs(3600),
                agent_enabled: true,
                model: None,
                output_dir: self.output.path().to_path_buf(),
            }
        }

        fn git(&self) -> Git {
            Git::new(self.repo.path())
        }

        fn features(&self) {
            self.repo.commit_file("src/auth.ts", "export type User = {};\n", "feat: Auth");
            self.repo
                .commit_file("src/dashboard.ts", "export const d = 1;\n", "feat: Dashboard");
            self.repo
                .commit_file("src/reports.ts", "export const r = 1;\n", "feat: Reports");
        }

        fn request_drain(&self) {
            fs::write(self.repo.path().join(DRAIN_MARKER), "").expect("drain marker");
        }

        fn result_names(&self) -> Vec<String> {
            eval_result_files(self.output.path())
                .expect("list results")
                .iter()
                .filter_map(|path| path.file_name()?.to_str().map(str::to_string))
                .collect()
        }
    }

    fn not_shutdown() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(false))
    }

    /// Verifies a drained run evaluates every new commit, keeps going past a
    /// mechanical failure, advances the high-water mark and writes a summary.
    #[test]
    fn drain_evaluates_batch_and_summarizes() {
        let fixture = Fixture::new();
        let reviewer = ScriptedReviewer::new(Vec::new());
        let evaluator = FailOnSubject {
            inner: GitMechanicalEvaluator::new(fixture.git()),
            git: fixture.git(),
            subject: "feat: Dashboard",
        };
        let sidecar =
            Sidecar::initialize(fixture.config(), evaluator, &reviewer, not_shutdown()).expect("init");
        fixture.features();
        fixture.request_drain();

        let state = sidecar.run().expect("run");

        assert_eq!(state.eval_count, 2);
        assert_eq!(state.eval_errors, 1);
        assert!(state.draining);
        assert_eq!(state.last_evaluated_commit, fixture.git().head().expect("head"));
        assert_eq!(fixture.result_names(), vec!["eval-auth.json", "eval-reports.json"]);
        assert!(!fixture.repo.path().join(DRAIN_MARKER).exists());

        let summaries: Vec<_> = fs::read_dir(fixture.output.path())
            .expect("read output")
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with("eval-campaign-"))
            .collect();
        assert_eq!(summaries.len(), 1);

        let auth = read_eval_result(&fixture.output.path().join("eval-auth.json")).expect("auth");
        assert_eq!(auth.mechanical.new_type_names, vec!["User"]);
        assert!(auth.agent_eval.is_some());
    }

    #[test]
    fn credit_exhaustion_disables_reviews_for_the_run() {
        let fixture = Fixture::new();
        let reviewer = ScriptedReviewer::new(vec![Scripted::Exit(
            1,
            "Error: Your credit balance is too low",
        )]);
        let evaluator = GitMechanicalEvaluator::new(fixture.git());
        let mut sidecar =
            Sidecar::initialize(fixture.config(), evaluator, &reviewer, not_shutdown()).expect("init");
        fixture.features();
        fixture.request_drain();

        assert_eq!(sidecar.poll_once(), Poll::Continue);
        assert_eq!(sidecar.poll_once(), Poll::Stop);

        let state = sidecar.state();
        assert!(state.agent_evals_disabled);
        assert_eq!(reviewer.calls.get(), 1);
        assert_eq!(state.eval_count, 3);
        assert_eq!(state.eval_errors, 0);
        for name in fixture.result_names() {
            let record = read_eval_result(&fixture.output.path().join(name)).expect("record");
            assert!(record.agent_eval.is_none());
        }
    }

    #[test]
    fn agent_failures_fall_back_to_mechanical_per_commit() {
        let fixture = Fixture::new();
        let reviewer = ScriptedReviewer::new(vec![
            Scripted::Exit(1, "segmentation fault"),
            Scripted::Error,
        ]);
        let evaluator = GitMechanicalEvaluator::new(fixture.git());
        let mut sidecar =
            Sidecar::initialize(fixture.config(), evaluator, &reviewer, not_shutdown()).expect("init");
        fixture.features();
        fixture.request_drain();

        sidecar.poll_once();

        let state = sidecar.state();
        assert!(!state.agent_evals_disabled);
        assert_eq!(reviewer.calls.get(), 3);
        assert_eq!(state.eval_count, 3);
        assert_eq!(state.eval_errors, 2);
        let reports =
            read_eval_result(&fixture.output.path().join("eval-reports.json")).expect("reports");
        assert!(reports.agent_eval.is_some());
        let auth = read_eval_result(&fixture.output.path().join("eval-auth.json")).expect("auth");
        assert!(auth.agent_eval.is_none());
    }

    #[test]
    fn disabled_agent_never_reviews() {
        let fixture = Fixture::new();
        let reviewer = ScriptedReviewer::new(Vec::new());
        let config = SidecarConfig {
            agent_enabled: false,
            ..fixture.config()
        };
        let mut sidecar = Sidecar::initialize(
            config,
            GitMechanicalEvaluator::new(fixture.git()),
            &reviewer,
            not_shutdown(),
        )
        .expect("init");
        fixture.features();
        fixture.request_drain();

        sidecar.poll_once();
        assert_eq!(reviewer.calls.get(), 0);
        assert_eq!(sidecar.state().eval_count, 3);
    }

    #[test]
    fn shutdown_stops_before_polling() {
        let fixture = Fixture::new();
        let reviewer = ScriptedReviewer::new(Vec::new());
        let shutdown = Arc::new(AtomicBool::new(false));
        let start = fixture.git().head().expect("head");
        let sidecar = Sidecar::initialize(
            fixture.config(),
            GitMechanicalEvaluator::new(fixture.git()),
            &reviewer,
            Arc::clone(&shutdown),
        )
        .expect("init");
        fixture.features();
        shutdown.store(true, Ordering::SeqCst);

        let state = sidecar.run().expect("run");
        assert_eq!(state.last_evaluated_commit, start);
        assert_eq!(state.eval_count, 0);
        assert!(fixture.result_names().is_empty());
    }

    #[test]
    fn initialize_clears_stale_marker_and_requires_head() {
        let fixture = Fixture::new();
        fixture.request_drain();
        let reviewer = ScriptedReviewer::new(Vec::new());
        Sidecar::initialize(
            fixture.config(),
            GitMechanicalEvaluator::new(fixture.git()),
            &reviewer,
            not_shutdown(),
        )
        .expect("init");
        assert!(!fixture.repo.path().join(DRAIN_MARKER).exists());

        let empty = TestRepo::init();
        let config = SidecarConfig::for_project(empty.path());
        let err = Sidecar::initialize(
            config,
            GitMechanicalEvaluator::new(Git::new(empty.path())),
            &reviewer,
            not_shutdown(),
        )
        .err()
        .expect("no HEAD");
        assert!(matches!(
            err.downcast_ref::<EvalError>(),
            Some(EvalError::HeadUnreadable { .. })
        ));
    }

    /// Sets the shutdown flag once the first commit has been evaluated.
    struct ShutdownAfterFirst {
        inner: GitMechanicalEvaluator,
        shutdown: Arc<AtomicBool>,
    }

    impl MechanicalEvaluator for ShutdownAfterFirst {
        fn evaluate(&self, commit: &str) -> Result<MechanicalOutcome> {
            let outcome = self.inner.evaluate(commit);
            self.shutdown.store(true, Ordering::SeqCst);
            outcome
        }
    }

    /// Records every commit handed to the mechanical step.
    struct RecordingEvaluator {
        inner: GitMechanicalEvaluator,
        seen: RefCell<Vec<String>>,
    }

    impl MechanicalEvaluator for &RecordingEvaluator {
        fn evaluate(&self, commit: &str) -> Result<MechanicalOutcome> {
            self.seen.borrow_mut().push(commit.to_string());
            self.inner.evaluate(commit)
        }
    }

    #[test]
    fn merge_commits_in_range_are_not_evaluated() {
        let fixture = Fixture::new();
        let reviewer = ScriptedReviewer::new(Vec::new());
        let evaluator = RecordingEvaluator {
            inner: GitMechanicalEvaluator::new(fixture.git()),
            seen: RefCell::new(Vec::new()),
        };
        let mut sidecar = Sidecar::initialize(
            fixture.config(),
            &evaluator,
            &reviewer,
            not_shutdown(),
        )
        .expect("init");

        fixture.repo.git(&["checkout", "-q", "-b", "topic"]).expect("branch");
        fixture
            .repo
            .commit_file("src/settings.ts", "export const s = 1;\n", "feat: Settings");
        fixture.repo.git(&["checkout", "-q", "main"]).expect("checkout main");
        fixture
            .repo
            .commit_file("src/billing.ts", "export const b = 1;\n", "feat: Billing");
        fixture
            .repo
            .git(&["merge", "-q", "--no-ff", "--no-edit", "-m", "merge: Topic", "topic"])
            .expect("merge");
        let merge = fixture.git().head().expect("merge head");
        fixture.request_drain();

        assert_eq!(sidecar.poll_once(), Poll::Continue);
        assert_eq!(sidecar.poll_once(), Poll::Stop);

        let state = sidecar.state();
        assert_eq!(state.eval_count, 2);
        assert_eq!(state.eval_errors, 0);
        assert_eq!(reviewer.calls.get(), 2);
        assert_eq!(state.last_evaluated_commit, merge);
        assert_eq!(evaluator.seen.borrow().len(), 2);
        assert!(!evaluator.seen.borrow().contains(&merge));
        assert_eq!(
            fixture.result_names(),
            vec!["eval-billing.json", "eval-settings.json"]
        );
    }

    #[test]
    fn unreadable_head_retries_unless_draining() {
        let fixture = Fixture::new();
        let reviewer = ScriptedReviewer::new(Vec::new());
        let config = SidecarConfig {
            interval: Duration::ZERO,
            ..fixture.config()
        };
        let start = fixture.git().head().expect("head");
        let mut sidecar = Sidecar::initialize(
            config,
            GitMechanicalEvaluator::new(fixture.git()),
            &reviewer,
            not_shutdown(),
        )
        .expect("init");
        fixture
            .repo
            .git(&["symbolic-ref", "HEAD", "refs/heads/missing"])
            .expect("point HEAD at nothing");

        assert_eq!(sidecar.poll_once(), Poll::Continue);
        assert!(!sidecar.state().draining);
        assert_eq!(sidecar.state().last_evaluated_commit, start);

        fixture.request_drain();
        assert_eq!(sidecar.poll_once(), Poll::Stop);
        assert!(sidecar.state().draining);
        assert_eq!(sidecar.state().eval_count, 0);
        assert_eq!(sidecar.state().eval_errors, 0);
    }

    #[test]
    fn drain_without_new_commits_stops_immediately() {
        let fixture = Fixture::new();
        let reviewer = ScriptedReviewer::new(Vec::new());
        let mut sidecar = Sidecar::initialize(
            fixture.config(),
            GitMechanicalEvaluator::new(fixture.git()),
            &reviewer,
            not_shutdown(),
        )
        .expect("init");
        fixture.request_drain();

        let started = Instant::now();
        assert_eq!(sidecar.poll_once(), Poll::Stop);
        assert!(started.elapsed() < Duration::from_secs(30));

        let state = sidecar.run().expect("run");
        assert!(state.draining);
        assert_eq!(state.eval_count, 0);
        assert!(fixture.result_names().is_empty());
        assert!(!fixture.repo.path().join(DRAIN_MARKER).exists());
    }

    #[test]
    fn shutdown_mid_batch_skips_remaining_commits() {
        let fixture = Fixture::new();
        let reviewer = ScriptedReviewer::new(Vec::new());
        let shutdown = Arc::new(AtomicBool::new(false));
        let evaluator = ShutdownAfterFirst {
            inner: GitMechanicalEvaluator::new(fixture.git()),
            shutdown: Arc::clone(&shutdown),
        };
        let mut sidecar =
            Sidecar::initialize(fixture.config(), evaluator, &reviewer, Arc::clone(&shutdown))
                .expect("init");
        fixture.features();
        fixture.request_drain();

        assert_eq!(sidecar.poll_once(), Poll::Continue);
        assert_eq!(sidecar.poll_once(), Poll::Stop);

        assert_eq!(sidecar.state().eval_count, 1);
        assert_eq!(reviewer.calls.get(), 1);
        assert_eq!(fixture.result_names(), vec!["eval-auth.json"]);
    }

    #[test]
    fn unnamed_feature_falls_back_to_short_hash() {
        let fixture = Fixture::new();
        let reviewer = ScriptedReviewer::new(Vec::new());
        let config = SidecarConfig {
            agent_enabled: false,
            ..fixture.config()
        };
        let mut sidecar = Sidecar::new(
            config,
            GitMechanicalEvaluator::new(fixture.git()),
            &reviewer,
            not_shutdown(),
        );
        let rocket = fixture.repo.commit_file("src/launch.ts", "x\n", "feat: 🚀");
        let sparkles = fixture.repo.commit_file("src/shine.ts", "y\n", "feat: ✨");

        let first = sidecar.evaluate_commit(&rocket).expect("rocket result");
        let second = sidecar.evaluate_commit(&sparkles).expect("sparkles result");

        assert_eq!(first, fixture.output.path().join(format!("eval-{}.json", short(&rocket))));
        assert_ne!(first, second);
        assert_eq!(sidecar.state().eval_count, 2);
        let record = read_eval_result(&first).expect("record");
        assert_eq!(record.mechanical.feature_name, "🚀");
    }
}
