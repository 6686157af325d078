//! Worker process backends.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::role::{WORKER_ID_ENV, WorkerId};

/// Grace period between SIGTERM and a forced kill
const STOP_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// How a worker ended. Both fields are informational only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerExit {
    pub code: Option<i32>,
    /// Terminating signal number (unix only).
    pub signal: Option<i32>,
}

impl WorkerExit {
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<ExitStatus> for WorkerExit {
    fn from(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

/// A running worker as seen by the supervisor.
#[derive(Debug)]
pub struct WorkerHandle {
    pid: Option<u32>,
    kill: CancellationToken,
    exit: oneshot::Receiver<WorkerExit>,
}

impl WorkerHandle {
    /// `kill` asks the backend to stop the worker; `exit` fires once it has ended.
    #[must_use]
    pub fn new(
        pid: Option<u32>,
        kill: CancellationToken,
        exit: oneshot::Receiver<WorkerExit>,
    ) -> Self {
        Self { pid, kill, exit }
    }

    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        Option<u32>,
        CancellationToken,
        oneshot::Receiver<WorkerExit>,
    ) {
        (self.pid, self.kill, self.exit)
    }
}

/// Spawns worker processes.
#[async_trait]
pub trait WorkerBackend: Send + Sync {
    async fn spawn(&self, id: WorkerId) -> Result<WorkerHandle>;
}

/// Re-launches an executable (by default the current one) as a worker.
///
/// The child inherits stdio and gets its id in [`WORKER_ID_ENV`]. Killing a handle sends
/// SIGTERM and force-kills after the grace period.
#[derive(Debug, Clone)]
pub struct LocalProcessBackend {
    program: PathBuf,
    args: Vec<OsString>,
    grace: Duration,
}

impl LocalProcessBackend {
    #[must_use]
    pub fn new(
        program: impl Into<PathBuf>,
        args: impl IntoIterator<Item = impl Into<OsString>>,
    ) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            grace: STOP_GRACE_PERIOD,
        }
    }

    /// The running executable with the arguments it was started with.
    ///
    /// # Errors
    /// Fails if the current executable path cannot be determined.
    pub fn current_exe() -> Result<Self> {
        let program = std::env::current_exe().context("failed to resolve current executable")?;
        Ok(Self::new(program, std::env::args_os().skip(1)))
    }

    #[must_use]
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }
}

#[cfg(unix)]
fn send_terminate_signal(child: &Child) -> bool {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return false;
    };
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    kill(Pid::from_raw(pid), Signal::SIGTERM).is_ok()
}

#[cfg(not(unix))]
fn send_terminate_signal(_child: &Child) -> bool {
    false
}

/// SIGTERM, wait up to `grace`, then force kill.
async fn stop_child_with_grace(child: &mut Child, id: WorkerId, grace: Duration) -> WorkerExit {
    let graceful = send_terminate_signal(child);
    tracing::debug!(worker_id = id, graceful, "sent termination signal");

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => return status.into(),
        Ok(Err(e)) => {
            tracing::warn!(worker_id = id, error = %e, "failed to wait for worker");
        }
        Err(_) => {
            tracing::debug!(worker_id = id, "grace period expired, force killing");
        }
    }

    if let Err(e) = child.kill().await {
        tracing::warn!(worker_id = id, error = %e, "failed to force kill worker");
    }
    match child.wait().await {
        Ok(status) => status.into(),
        Err(_) => WorkerExit::default(),
    }
}

#[async_trait]
impl WorkerBackend for LocalProcessBackend {
    async fn spawn(&self, id: WorkerId) -> Result<WorkerHandle> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env(WORKER_ID_ENV, id.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn worker process {}", self.program.display()))?;
        let pid = child.id();

        let kill = CancellationToken::new();
        let (tx, rx) = oneshot::channel();
        let stop = kill.clone();
        let grace = self.grace;

        tokio::spawn(async move {
            let exit = tokio::select! {
                status = child.wait() => match status {
                    Ok(status) => status.into(),
                    Err(e) => {
                        tracing::warn!(worker_id = id, error = %e, "failed to wait for worker");
                        WorkerExit::default()
                    }
                },
                () = stop.cancelled() => stop_child_with_grace(&mut child, id, grace).await,
            };
            if tx.send(exit).is_err() {
                tracing::trace!(worker_id = id, "worker handle dropped before exit");
            }
        });

        Ok(WorkerHandle::new(pid, kill, rx))
    }
}
