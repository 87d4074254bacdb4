//! Process-level mutual exclusion over a lock file.
//!
//! The file holds the owner's pid for stale detection by other processes, and
//! the open descriptor carries an exclusive advisory lock for as long as the
//! [`LockHandle`] lives.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use tracing::{debug, info, instrument, warn};

use crate::error::ReliabilityError;

/// An acquired build lock. Released on [`LockHandle::release`] or drop.
#[derive(Debug)]
pub struct LockHandle {
    path: PathBuf,
    file: Option<File>,
}

impl LockHandle {
    /// Take the lock at `path`, clearing it first if its recorded owner is
    /// dead or its contents are unreadable.
    ///
    /// Never waits: a live owner or a held advisory lock fails immediately
    /// with [`ReliabilityError::LockContention`].
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create lock directory {}", parent.display()))?;
        }

        if path.exists() {
            match read_owner(path) {
                Some(pid) if is_process_alive(pid) => {
                    return Err(ReliabilityError::LockContention {
                        path: path.to_path_buf(),
                        pid: Some(pid),
                    }
                    .into());
                }
                Some(pid) => {
                    warn!(pid, "removing stale lock file, owner no longer running");
                    remove_if_present(path)?;
                }
                None => {
                    warn!("removing unreadable lock file");
                    remove_if_present(path)?;
                }
            }
        }

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("open lock file {}", path.display()))?;
        if let Err(err) = fs2::FileExt::try_lock_exclusive(&file) {
            debug!(err = %err, "advisory lock unavailable");
            return Err(ReliabilityError::LockContention {
                path: path.to_path_buf(),
                pid: read_owner(path),
            }
            .into());
        }

        file.set_len(0)
            .with_context(|| format!("truncate lock file {}", path.display()))?;
        writeln!(file, "{}", std::process::id())
            .with_context(|| format!("write lock file {}", path.display()))?;
        file.sync_all()
            .with_context(|| format!("sync lock file {}", path.display()))?;

        info!(pid = std::process::id(), "lock acquired");
        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unlock, close and delete the lock file.
    pub fn release(mut self) -> Result<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<()> {
        if let Some(file) = self.file.take() {
            if let Err(err) = fs2::FileExt::unlock(&file) {
                debug!(err = %err, "advisory unlock failed");
            }
            drop(file);
            debug!(path = %self.path.display(), "lock released");
        }
        remove_if_present(&self.path)
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if self.file.is_some()
            && let Err(err) = self.release_inner()
        {
            warn!(err = %err, path = %self.path.display(), "failed to release lock on drop");
        }
    }
}

/// Remove a lock file without holding its handle. Missing files are fine.
pub fn release_lock(path: &Path) -> Result<()> {
    remove_if_present(path)
}

/// Whether `pid` names a running process.
///
/// Uses the null signal: success or `EPERM` means the process exists.
pub fn is_process_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    match kill(Pid::from_raw(raw), None) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

fn read_owner(path: &Path) -> Option<u32> {
    let contents = fs::read_to_string(path).ok()?;
    contents.trim().parse::<u32>().ok().filter(|pid| *pid > 0)
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("remove lock file {}", path.display())),
    }
}
