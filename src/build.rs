//! Running the document build command.
//!
//! The [`Builder`] trait is the seam between the pipeline and whatever turns
//! the checked-out sources into a PDF. [`ShellBuilder`] runs a user-supplied
//! command line through the platform shell (`sh -c` on unix, `cmd /C` on
//! windows) with the build directory as its working directory.
//!
//! stdout and stderr are drained on background threads so a chatty build can
//! never block on a full pipe; only their tails are kept for diagnostics.
//!
//! On unix the shell is the leader of a fresh process group. A build that
//! outlives its timeout is killed as a whole group, including whatever
//! `make` or `latexmk` started, and the group is gone before the walk moves
//! on to the next revision.

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;

#[cfg(unix)]
use std::sync::atomic::{AtomicU32, Ordering};

/// Bytes of output kept for diagnostics.
const TAIL_BYTES: usize = 2048;

/// How often a build with a timeout is polled.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long a killed process group may take to disappear.
#[cfg(unix)]
const GROUP_EXIT_GRACE: Duration = Duration::from_secs(2);

/// Process group of the build that is running right now, 0 when none.
#[cfg(unix)]
static ACTIVE_GROUP: AtomicU32 = AtomicU32::new(0);

/// Outcome of a build command that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitInfo {
    /// Exit code; `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub success: bool,
    pub duration: Duration,
    pub stdout_tail: String,
    pub stderr_tail: String,
}

/// The build command could not be run to completion.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("failed to start build command: {0}")]
    Spawn(#[source] io::Error),
    #[error("failed waiting for build command: {0}")]
    Wait(#[source] io::Error),
    #[error("build command timed out after {}s", .0.as_secs())]
    TimedOut(Duration),
}

/// Why a revision produced no PDF. Skips that revision only.
#[derive(Error, Debug)]
pub enum BuildFailure {
    #[error(transparent)]
    Invocation(#[from] BuildError),
    #[error("build command exited with {}: {stderr_tail}", exit_label(.code))]
    NonZeroExit {
        code: Option<i32>,
        stderr_tail: String,
    },
    #[error("build succeeded but produced no PDF at {}", .0.display())]
    MissingOutput(PathBuf),
    #[error("build directory does not exist in this revision: {}", .0.display())]
    MissingDirectory(PathBuf),
}

fn exit_label(code: &Option<i32>) -> String {
    match *code {
        Some(c) => format!("status {}", c),
        None => "a signal".to_string(),
    }
}

/// Something that can build the document in a directory.
///
/// Implementations must not assume anything about the directory beyond it
/// being the build directory of the currently checked-out revision.
pub trait Builder {
    fn build(&self, dir: &Path) -> Result<ExitInfo, BuildError>;
}

/// Runs a command line through the platform shell.
#[derive(Debug, Clone)]
pub struct ShellBuilder {
    command: String,
    timeout: Option<Duration>,
}

impl ShellBuilder {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            timeout: None,
        }
    }

    /// Kill the build if it runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn shell_command(&self) -> Command {
        #[cfg(windows)]
        let mut cmd = {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(&self.command);
            c
        };
        #[cfg(not(windows))]
        let mut cmd = {
            let mut c = Command::new("sh");
            c.arg("-c").arg(&self.command);
            c
        };
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

impl Builder for ShellBuilder {
    fn build(&self, dir: &Path) -> Result<ExitInfo, BuildError> {
        tracing::debug!(dir = %dir.display(), command = %self.command, "running build");
        let started = Instant::now();
        let mut child = self
            .shell_command()
            .current_dir(dir)
            .spawn()
            .map_err(BuildError::Spawn)?;
        #[cfg(unix)]
        ACTIVE_GROUP.store(child.id(), Ordering::SeqCst);

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let waited = match self.timeout {
            Some(limit) => wait_with_deadline(&mut child, limit)
                .and_then(|status| status.ok_or(BuildError::TimedOut(limit))),
            None => child.wait().map_err(BuildError::Wait),
        };
        #[cfg(unix)]
        ACTIVE_GROUP.store(0, Ordering::SeqCst);
        let status = match waited {
            Ok(status) => status,
            Err(e) => {
                // Detach the drains: a stray process outside the group may
                // still hold the pipes open.
                drop(stdout);
                drop(stderr);
                return Err(e);
            }
        };

        let info = ExitInfo {
            code: status.code(),
            success: status.success(),
            duration: started.elapsed(),
            stdout_tail: tail(&join(stdout)),
            stderr_tail: tail(&join(stderr)),
        };
        tracing::debug!(
            code = ?info.code,
            elapsed_ms = info.duration.as_millis() as u64,
            stdout = %info.stdout_tail,
            stderr = %info.stderr_tail,
            "build finished"
        );
        Ok(info)
    }
}

type Drain = Option<JoinHandle<io::Result<Vec<u8>>>>;

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Drain {
    pipe.map(|mut reader| {
        std::thread::spawn(move || {
            let mut bytes = Vec::new();
            reader.read_to_end(&mut bytes)?;
            Ok(bytes)
        })
    })
}

fn join(handle: Drain) -> Vec<u8> {
    handle
        .and_then(|h| h.join().ok())
        .and_then(|r| r.ok())
        .unwrap_or_default()
}

/// Wait for `child` up to `limit`. `Ok(None)` means it was killed.
fn wait_with_deadline(
    child: &mut Child,
    limit: Duration,
) -> Result<Option<ExitStatus>, BuildError> {
    let deadline = Instant::now() + limit;
    loop {
        if let Some(status) = child.try_wait().map_err(BuildError::Wait)? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            tracing::debug!(pid = child.id(), "build deadline passed, killing");
            kill_build(child);
            return Ok(None);
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Kill the build and everything it started, then reap it.
fn kill_build(child: &mut Child) {
    #[cfg(unix)]
    {
        let group = child.id();
        signal_group(group, libc::SIGKILL);
        let _ = child.wait();
        let deadline = Instant::now() + GROUP_EXIT_GRACE;
        while signal_group(group, 0) && Instant::now() < deadline {
            std::thread::sleep(POLL_INTERVAL);
        }
        if signal_group(group, 0) {
            tracing::warn!(group, "build processes still present after kill");
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child.kill();
        let _ = child.wait();
    }
}

/// Send `signal` to every process in `group`. Signal 0 only checks that
/// the group still has members. Returns whether the call succeeded.
#[cfg(unix)]
fn signal_group(group: u32, signal: libc::c_int) -> bool {
    let Ok(pgid) = libc::pid_t::try_from(group) else {
        return false;
    };
    // SAFETY: killpg has no memory effects; `pgid` is a group this module
    // created with `process_group(0)`.
    unsafe { libc::killpg(pgid, signal) == 0 }
}

/// Kill the build that is running right now, if any. Used on a hard exit
/// so no build keeps writing into the working tree.
pub fn kill_active_build() {
    #[cfg(unix)]
    {
        let group = ACTIVE_GROUP.swap(0, Ordering::SeqCst);
        if group != 0 {
            signal_group(group, libc::SIGKILL);
        }
    }
}

/// Last [`TAIL_BYTES`] of `bytes` as lossy UTF-8, trimmed.
pub(crate) fn tail(bytes: &[u8]) -> String {
    let start = bytes.len().saturating_sub(TAIL_BYTES);
    String::from_utf8_lossy(&bytes[start..]).trim().to_string()
}
