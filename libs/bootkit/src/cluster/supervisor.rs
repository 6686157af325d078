//! Process supervisor.
//!
//! The primary forks `cpus` workers and keeps the pool at that size: every worker exit
//! removes the worker's entry at once and, with auto-restart enabled, schedules one new
//! fork after the configured delay. Exits are funneled into a single control loop, which
//! is the only place the restart logic runs.
//!
//! A worker process never touches the pool; it builds its own [`Runtime`] flagged as a
//! worker and initializes it.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::backend::{LocalProcessBackend, WorkerBackend, WorkerExit};
use super::role::{Role, WorkerId};
use super::settings::ClusterSettings;
use crate::error::{ClusterError, error_chain};
use crate::events::Listeners;
use crate::runtime::{Runtime, RuntimeOptions};

/// Upper bound on waiting for killed workers during `shutdown`.
const SHUTDOWN_WAIT: Duration = Duration::from_secs(10);

/// Supervisor construction parameters.
#[derive(Clone)]
pub struct ClusterOptions {
    /// Runtime wiring used by worker processes.
    pub core: RuntimeOptions,
    pub settings: ClusterSettings,
    /// Detected from the environment when unset.
    pub role: Option<Role>,
    /// `LocalProcessBackend::current_exe()` when unset.
    pub backend: Option<Arc<dyn WorkerBackend>>,
}

impl ClusterOptions {
    #[must_use]
    pub fn new(core: RuntimeOptions) -> Self {
        Self {
            core,
            settings: ClusterSettings::default(),
            role: None,
            backend: None,
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: ClusterSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn WorkerBackend>) -> Self {
        self.backend = Some(backend);
        self
    }
}

impl fmt::Debug for ClusterOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterOptions")
            .field("core", &self.core)
            .field("settings", &self.settings)
            .field("role", &self.role)
            .field("custom_backend", &self.backend.is_some())
            .finish()
    }
}

/// A live entry of the worker table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInfo {
    pub id: WorkerId,
    pub pid: Option<u32>,
    pub started_at: Instant,
}

/// Supervisor notifications.
pub enum ClusterEvent<'a> {
    /// The initial fork loop completed.
    Ready(&'a ClusteredCore),
    WorkerInit(&'a WorkerInfo),
    WorkerExit {
        worker: &'a WorkerInfo,
        exit: WorkerExit,
    },
}

pub type ClusterListener = dyn Fn(&ClusterEvent<'_>) + Send + Sync;

enum Control {
    Exited { id: WorkerId, exit: WorkerExit },
    Respawn,
}

struct WorkerEntry {
    info: WorkerInfo,
    kill: CancellationToken,
    watcher: JoinHandle<()>,
}

struct Supervisor {
    settings: ClusterSettings,
    backend: Arc<dyn WorkerBackend>,
    listeners: Arc<Listeners<ClusterListener>>,
    next_id: AtomicU32,
    workers: Mutex<BTreeMap<WorkerId, WorkerEntry>>,
    control: mpsc::UnboundedSender<Control>,
    control_rx: Mutex<Option<mpsc::UnboundedReceiver<Control>>>,
    stopping: CancellationToken,
}

enum Mode {
    Primary(Arc<Supervisor>),
    Worker(Runtime),
}

/// Runs either the supervisor (primary role) or the worker's own runtime.
pub struct ClusteredCore {
    role: Role,
    mode: Mode,
    listeners: Arc<Listeners<ClusterListener>>,
    started: AtomicBool,
}

impl ClusteredCore {
    /// # Errors
    /// `ClusterError::InvalidWorkerId` for a garbled role variable,
    /// `ClusterError::Backend` if the default backend cannot be set up,
    /// `ClusterError::Runtime` if a worker's runtime cannot be built.
    pub fn new(options: ClusterOptions) -> Result<Self, ClusterError> {
        let ClusterOptions {
            core,
            settings,
            role,
            backend,
        } = options;

        let role = match role {
            Some(role) => role,
            None => Role::detect()?,
        };
        let listeners = Arc::new(Listeners::new());

        let mode = match role {
            Role::Worker(id) => Mode::Worker(Runtime::new(core.worker(id))?),
            Role::Primary => {
                let backend = match backend {
                    Some(backend) => backend,
                    None => Arc::new(
                        LocalProcessBackend::current_exe().map_err(ClusterError::Backend)?,
                    ),
                };
                let (control, control_rx) = mpsc::unbounded_channel();
                Mode::Primary(Arc::new(Supervisor {
                    settings,
                    backend,
                    listeners: Arc::clone(&listeners),
                    next_id: AtomicU32::new(1),
                    workers: Mutex::new(BTreeMap::new()),
                    control,
                    control_rx: Mutex::new(Some(control_rx)),
                    stopping: CancellationToken::new(),
                }))
            }
        };

        Ok(Self {
            role,
            mode,
            listeners,
            started: AtomicBool::new(false),
        })
    }

    /// Primary: fork the pool and start supervising it. Worker: initialize the runtime.
    ///
    /// A second call is a no-op.
    ///
    /// # Errors
    /// Primary: `ClusterError::Spawn` if one of the initial workers cannot be forked (the
    /// ones already running are stopped). Worker: the runtime's init error.
    pub async fn init(&self) -> Result<(), ClusterError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        match &self.mode {
            Mode::Worker(runtime) => {
                tracing::info!(worker_id = ?self.role.worker_id(), "Starting worker runtime");
                runtime.init().await?;
            }
            Mode::Primary(supervisor) => {
                let control_rx = supervisor.control_rx.lock().take();
                if let Some(rx) = control_rx {
                    tokio::spawn(Arc::clone(supervisor).control_loop(rx));
                }

                let count = supervisor.settings.worker_count();
                tracing::info!(
                    workers = count,
                    auto_restart = supervisor.settings.auto_restart().enabled,
                    delay = %humantime::format_duration(supervisor.settings.auto_restart().delay()),
                    "Starting cluster primary"
                );

                for _ in 0..count {
                    if let Err(err) = supervisor.fork_worker().await {
                        tracing::error!(error = %error_chain(&err), "initial fork failed");
                        supervisor.stop().await;
                        return Err(err);
                    }
                }

                tracing::info!(workers = self.worker_count(), "Cluster ready");
                self.emit(&ClusterEvent::Ready(self));
            }
        }
        Ok(())
    }

    /// Primary: stop restarting and terminate every worker. Worker: shut the runtime down.
    pub async fn shutdown(&self) {
        match &self.mode {
            Mode::Worker(runtime) => runtime.shutdown().await,
            Mode::Primary(supervisor) => supervisor.stop().await,
        }
    }

    /// Ask worker `id` to stop. Its entry is removed once the exit is observed.
    ///
    /// Returns `false` if no such worker is running.
    pub fn kill_worker(&self, id: WorkerId) -> bool {
        let Mode::Primary(supervisor) = &self.mode else {
            return false;
        };
        let workers = supervisor.workers.lock();
        let Some(entry) = workers.get(&id) else {
            return false;
        };
        tracing::info!(worker_id = id, "killing worker");
        entry.kill.cancel();
        true
    }

    /// Snapshot of the worker table, ordered by id. Empty in a worker.
    #[must_use]
    pub fn workers(&self) -> Vec<WorkerInfo> {
        match &self.mode {
            Mode::Primary(supervisor) => supervisor
                .workers
                .lock()
                .values()
                .map(|entry| entry.info.clone())
                .collect(),
            Mode::Worker(_) => Vec::new(),
        }
    }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        match &self.mode {
            Mode::Primary(supervisor) => supervisor.workers.lock().len(),
            Mode::Worker(_) => 0,
        }
    }

    /// The worker's runtime; `None` on the primary, which never runs modules.
    #[must_use]
    pub fn actual_core(&self) -> Option<&Runtime> {
        match &self.mode {
            Mode::Worker(runtime) => Some(runtime),
            Mode::Primary(_) => None,
        }
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.role.is_primary()
    }

    #[must_use]
    pub fn is_worker(&self) -> bool {
        !self.role.is_primary()
    }

    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&ClusterEvent<'_>) + Send + Sync + 'static,
    {
        self.listeners.push(Arc::new(listener));
    }

    fn emit(&self, event: &ClusterEvent<'_>) {
        for listener in self.listeners.snapshot() {
            listener(event);
        }
    }
}

impl Supervisor {
    fn emit(&self, event: &ClusterEvent<'_>) {
        for listener in self.listeners.snapshot() {
            listener(event);
        }
    }

    async fn fork_worker(self: &Arc<Self>) -> Result<WorkerInfo, ClusterError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let handle = self
            .backend
            .spawn(id)
            .await
            .map_err(|source| ClusterError::Spawn {
                worker_id: id,
                source,
            })?;
        let (pid, kill, exit) = handle.into_parts();

        let info = WorkerInfo {
            id,
            pid,
            started_at: Instant::now(),
        };

        // The watcher holds its exit report until `WorkerInit` has been emitted.
        let announced = CancellationToken::new();
        {
            // Insert before the watcher can report an exit for this id.
            let mut workers = self.workers.lock();
            let control = self.control.clone();
            let gate = announced.clone();
            let watcher = tokio::spawn(async move {
                // A dropped sender means the backend lost track of the process.
                let exit = exit.await.unwrap_or_default();
                gate.cancelled().await;
                if control.send(Control::Exited { id, exit }).is_err() {
                    tracing::trace!(worker_id = id, "supervisor gone; exit not reported");
                }
            });
            workers.insert(
                id,
                WorkerEntry {
                    info: info.clone(),
                    kill: kill.clone(),
                    watcher,
                },
            );
        }

        if self.stopping.is_cancelled() {
            // Lost the race against shutdown; the table has already been drained.
            self.workers.lock().remove(&id);
            kill.cancel();
            announced.cancel();
            return Ok(info);
        }

        tracing::info!(worker_id = id, pid = ?pid, "worker started");
        self.emit(&ClusterEvent::WorkerInit(&info));
        announced.cancel();
        Ok(info)
    }

    async fn control_loop(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<Control>) {
        loop {
            let msg = tokio::select! {
                biased;
                () = self.stopping.cancelled() => break,
                msg = rx.recv() => msg,
            };
            match msg {
                Some(Control::Exited { id, exit }) => self.on_exit(id, exit),
                Some(Control::Respawn) => self.respawn().await,
                None => break,
            }
        }
        tracing::debug!("supervisor control loop stopped");
    }

    fn on_exit(&self, id: WorkerId, exit: WorkerExit) {
        let Some(entry) = self.workers.lock().remove(&id) else {
            return;
        };

        tracing::warn!(
            worker_id = id,
            code = ?exit.code,
            signal = ?exit.signal,
            "worker exited"
        );
        self.emit(&ClusterEvent::WorkerExit {
            worker: &entry.info,
            exit,
        });

        if self.settings.auto_restart().enabled {
            self.schedule_respawn();
        }
    }

    fn schedule_respawn(&self) {
        let delay = self.settings.auto_restart().delay();
        let control = self.control.clone();
        let stopping = self.stopping.clone();
        tracing::info!(delay = %humantime::format_duration(delay), "scheduling worker restart");

        tokio::spawn(async move {
            tokio::select! {
                () = stopping.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    if control.send(Control::Respawn).is_err() {
                        tracing::trace!("supervisor gone; restart dropped");
                    }
                }
            }
        });
    }

    async fn respawn(self: &Arc<Self>) {
        if let Err(err) = self.fork_worker().await {
            tracing::error!(error = %error_chain(&err), "worker restart failed");
            self.schedule_respawn();
        }
    }

    async fn stop(&self) {
        if self.stopping.is_cancelled() {
            return;
        }
        self.stopping.cancel();

        let entries: Vec<WorkerEntry> = {
            let mut workers = self.workers.lock();
            std::mem::take(&mut *workers).into_values().collect()
        };
        tracing::info!(workers = entries.len(), "Stopping cluster workers");

        for entry in &entries {
            entry.kill.cancel();
        }
        for entry in entries {
            if tokio::time::timeout(SHUTDOWN_WAIT, entry.watcher).await.is_err() {
                tracing::warn!(worker_id = entry.info.id, "worker did not exit in time");
            }
        }
        tracing::info!("Cluster stopped");
    }
}

impl fmt::Debug for ClusteredCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusteredCore")
            .field("role", &self.role)
            .field("workers", &self.worker_count())
            .field("started", &self.started.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
