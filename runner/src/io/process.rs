//! Helpers for running child processes with timeouts and bounded output.

use std::io::{self, Read};
use std::mem;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Default cap on captured bytes per stream.
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 4 * 1024 * 1024;

/// How long reader threads may take to hit EOF after the child has exited.
pub const READER_GRACE: Duration = Duration::from_secs(2);

/// An external command described by value, so it can be re-spawned per attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Extra environment for the child.
    pub env: Vec<(String, String)>,
    /// Variables stripped from the inherited environment.
    pub env_remove: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            env_remove: Vec::new(),
        }
    }

    /// Build from an argv vector (`argv[0]` is the program).
    pub fn from_argv(argv: &[String]) -> Result<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| anyhow!("command must not be empty"))?;
        Ok(Self::new(program.clone()).args(args.iter().cloned()))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.args.extend(args);
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn env_remove(mut self, key: impl Into<String>) -> Self {
        self.env_remove.push(key.into());
        self
    }

    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        for key in &self.env_remove {
            cmd.env_remove(key);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }
}

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    /// Exit code, or `-1` when the child was killed by a signal.
    pub fn exit_code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }

    /// Stdout followed by stderr, lossily decoded.
    pub fn combined(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&self.stderr));
        text
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Run `cmd` with stdin closed, killing it once `timeout` elapses.
///
/// The child leads its own process group, and a timeout kills the whole
/// group so helpers it forked cannot keep the call alive. Both pipes are
/// drained on reader threads while the child runs, keeping at most
/// `output_limit_bytes` of each; once the child is gone the readers get
/// [`READER_GRACE`] to reach EOF before their partial output is taken as-is.
/// A timed-out child is reported with `timed_out` set; whether that is an
/// error is the caller's decision.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0);

    debug!(program = ?cmd.get_program(), "spawning child process");
    let mut child = cmd.spawn().map_err(|err| {
        error!(err = %err, program = ?cmd.get_program(), "failed to spawn command");
        anyhow!(err).context(format!("spawn {:?}", cmd.get_program()))
    })?;

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        return Err(anyhow!("child output was not piped"));
    };
    let stdout_sink = Arc::new(Mutex::new(Captured::default()));
    let stderr_sink = Arc::new(Mutex::new(Captured::default()));
    let (done_tx, done_rx) = mpsc::channel();
    spawn_reader(stdout, output_limit_bytes, Arc::clone(&stdout_sink), done_tx.clone());
    spawn_reader(stderr, output_limit_bytes, Arc::clone(&stderr_sink), done_tx);

    let (status, timed_out) = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => (status, false),
        None => {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing process group");
            kill_group(&mut child)?;
            (child.wait().context("wait command after kill")?, true)
        }
    };

    let deadline = Instant::now() + READER_GRACE;
    for _ in 0..2 {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if done_rx.recv_timeout(remaining).is_err() {
            warn!(
                grace_ms = READER_GRACE.as_millis(),
                "output pipe still open after child exit, keeping partial output"
            );
            break;
        }
    }

    let (stdout, stdout_truncated) = take_captured(&stdout_sink);
    let (stderr, stderr_truncated) = take_captured(&stderr_sink);
    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

/// SIGKILL the child's process group, falling back to the child alone.
fn kill_group(child: &mut Child) -> Result<()> {
    let group = i32::try_from(child.id()).map(Pid::from_raw);
    match group.map(|pgid| killpg(pgid, Signal::SIGKILL)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(Errno::ESRCH)) => Ok(()),
        other => {
            warn!(result = ?other, "process group kill failed, killing child only");
            child.kill().context("kill command")
        }
    }
}

type Captured = (Vec<u8>, usize);

fn spawn_reader<R: Read + Send + 'static>(
    reader: R,
    limit: usize,
    sink: Arc<Mutex<Captured>>,
    done: mpsc::Sender<()>,
) {
    thread::spawn(move || {
        if let Err(err) = drain_capped(reader, limit, &sink) {
            warn!(err = %err, "reading command output failed");
        }
        // The receiver may already have given up on this reader.
        let _ = done.send(());
    });
}

fn take_captured(sink: &Mutex<Captured>) -> Captured {
    mem::take(&mut *sink.lock().unwrap_or_else(PoisonError::into_inner))
}

/// Read `reader` to EOF into `sink`, keeping the first `limit` bytes and
/// counting the rest.
fn drain_capped<R: Read>(mut reader: R, limit: usize, sink: &Mutex<Captured>) -> io::Result<()> {
    let mut chunk = [0u8; 8192];
    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        let mut captured = sink.lock().unwrap_or_else(PoisonError::into_inner);
        let (kept, dropped) = &mut *captured;
        let take = n.min(limit.saturating_sub(kept.len()));
        kept.extend_from_slice(&chunk[..take]);
        *dropped += n - take;
    }
}
