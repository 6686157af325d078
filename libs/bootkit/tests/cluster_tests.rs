#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Supervisor behavior against an in-memory worker backend.

use bootkit::cluster::{WorkerBackend, WorkerExit, WorkerHandle, WorkerId};
use bootkit::{
    ClusterError, ClusterEvent, ClusterOptions, ClusterSettings, ClusteredCore, Dependencies,
    InitCtx, Injectable, Module, Mountable, Role, RuntimeOptions, async_trait,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Fake workers: each one lives until it is killed or told to crash.
#[derive(Default)]
struct MockBackend {
    spawned: Mutex<Vec<WorkerId>>,
    crash: Mutex<HashMap<WorkerId, CancellationToken>>,
    fail_next: AtomicUsize,
    exit_on_spawn: AtomicBool,
}

impl MockBackend {
    fn spawned(&self) -> Vec<WorkerId> {
        self.spawned.lock().clone()
    }

    fn crash(&self, id: WorkerId) {
        if let Some(token) = self.crash.lock().get(&id) {
            token.cancel();
        }
    }

    fn fail_next_spawns(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Workers die right after they are spawned.
    fn exit_on_spawn(&self) {
        self.exit_on_spawn.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl WorkerBackend for MockBackend {
    async fn spawn(&self, id: WorkerId) -> anyhow::Result<WorkerHandle> {
        if self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            anyhow::bail!("no capacity for worker {id}");
        }

        self.spawned.lock().push(id);
        let kill = CancellationToken::new();
        let crash = CancellationToken::new();
        self.crash.lock().insert(id, crash.clone());
        if self.exit_on_spawn.load(Ordering::SeqCst) {
            crash.cancel();
        }

        let (tx, rx) = oneshot::channel();
        let killed = kill.clone();
        tokio::spawn(async move {
            let exit = tokio::select! {
                () = killed.cancelled() => WorkerExit { code: None, signal: Some(15) },
                () = crash.cancelled() => WorkerExit { code: Some(1), signal: None },
            };
            tx.send(exit).ok();
        });

        Ok(WorkerHandle::new(Some(40_000 + id), kill, rx))
    }
}

fn primary(backend: &Arc<MockBackend>, cpus: usize, restart: bool, delay_ms: u64) -> ClusteredCore {
    let options = ClusterOptions::new(RuntimeOptions::new().without_signal_hook())
        .with_settings(
            ClusterSettings::default()
                .with_cpus(cpus)
                .with_auto_restart(restart, delay_ms),
        )
        .with_role(Role::Primary)
        .with_backend(backend.clone());
    ClusteredCore::new(options).unwrap()
}

fn record_events(cluster: &ClusteredCore) -> Arc<Mutex<Vec<String>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    cluster.subscribe(move |event| {
        let entry = match event {
            ClusterEvent::Ready(core) => format!("ready:{}", core.worker_count()),
            ClusterEvent::WorkerInit(worker) => format!("init:{}", worker.id),
            ClusterEvent::WorkerExit { worker, exit } => {
                let code = exit.code.map_or_else(|| "signal".to_owned(), |c| c.to_string());
                format!("exit:{}:{code}", worker.id)
            }
        };
        sink.lock().push(entry);
    });
    events
}

async fn eventually(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(3), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn ids(cluster: &ClusteredCore) -> Vec<WorkerId> {
    cluster.workers().iter().map(|w| w.id).collect()
}

#[tokio::test]
async fn forks_pool_and_replaces_killed_worker_after_delay() {
    let backend = Arc::new(MockBackend::default());
    let cluster = primary(&backend, 4, true, 100);
    let events = record_events(&cluster);

    cluster.init().await.unwrap();
    assert!(cluster.is_primary());
    assert!(cluster.actual_core().is_none());
    assert_eq!(cluster.worker_count(), 4);
    assert_eq!(
        *events.lock(),
        ["init:1", "init:2", "init:3", "init:4", "ready:4"]
    );
    assert_eq!(cluster.workers()[0].pid, Some(40_001));

    let killed_at = Instant::now();
    assert!(cluster.kill_worker(2));
    eventually(|| cluster.worker_count() == 3).await;
    assert_eq!(ids(&cluster), [1, 3, 4]);

    eventually(|| cluster.worker_count() == 4).await;
    assert!(killed_at.elapsed() >= Duration::from_millis(100));
    assert_eq!(ids(&cluster), [1, 3, 4, 5]);

    // Exactly one replacement.
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(cluster.worker_count(), 4);
    assert_eq!(backend.spawned(), [1, 2, 3, 4, 5]);
    assert_eq!(events.lock()[5..], ["exit:2:signal", "init:5"]);

    cluster.shutdown().await;
    assert_eq!(cluster.worker_count(), 0);
}

#[tokio::test]
async fn crashed_worker_is_replaced_the_same_way() {
    let backend = Arc::new(MockBackend::default());
    let cluster = primary(&backend, 2, true, 50);
    let events = record_events(&cluster);
    cluster.init().await.unwrap();

    backend.crash(1);
    eventually(|| ids(&cluster) == [2, 3]).await;
    assert!(events.lock().contains(&"exit:1:1".to_owned()));

    cluster.shutdown().await;
}

#[tokio::test]
async fn disabled_auto_restart_never_replaces() {
    let backend = Arc::new(MockBackend::default());
    let cluster = primary(&backend, 3, false, 10);
    cluster.init().await.unwrap();

    assert!(cluster.kill_worker(1));
    eventually(|| cluster.worker_count() == 2).await;

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(ids(&cluster), [2, 3]);
    assert_eq!(backend.spawned().len(), 3);

    cluster.shutdown().await;
}

#[tokio::test]
async fn failed_restart_is_retried_after_the_delay() {
    let backend = Arc::new(MockBackend::default());
    let cluster = primary(&backend, 1, true, 30);
    cluster.init().await.unwrap();

    backend.fail_next_spawns(1);
    backend.crash(1);

    eventually(|| ids(&cluster) == [3]).await;
    assert_eq!(backend.spawned(), [1, 3], "worker 2 never started");

    cluster.shutdown().await;
}

#[tokio::test]
async fn shutdown_stops_restarts_and_kills_workers() {
    let backend = Arc::new(MockBackend::default());
    let cluster = primary(&backend, 2, true, 20);
    let events = record_events(&cluster);
    cluster.init().await.unwrap();

    cluster.shutdown().await;
    assert_eq!(cluster.worker_count(), 0);
    assert!(!cluster.kill_worker(1));

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(cluster.worker_count(), 0);
    assert_eq!(backend.spawned(), [1, 2]);
    assert!(!events.lock().iter().any(|e| e.starts_with("exit:")));

    // Idempotent.
    cluster.shutdown().await;
}

#[tokio::test]
async fn initial_fork_failure_is_an_error() {
    let backend = Arc::new(MockBackend::default());
    backend.fail_next_spawns(1);
    let cluster = primary(&backend, 2, true, 20);

    let err = cluster.init().await.unwrap_err();
    assert!(matches!(err, ClusterError::Spawn { worker_id: 1, .. }));
    assert_eq!(cluster.worker_count(), 0);
}

#[tokio::test]
async fn second_init_does_not_fork_again() {
    let backend = Arc::new(MockBackend::default());
    let cluster = primary(&backend, 2, true, 20);
    cluster.init().await.unwrap();
    cluster.init().await.unwrap();
    assert_eq!(backend.spawned(), [1, 2]);
    cluster.shutdown().await;
}

struct RoleProbe;

impl Injectable for RoleProbe {
    fn construct(_deps: Dependencies) -> anyhow::Result<Self> {
        Ok(RoleProbe)
    }
}

#[async_trait]
impl Module for RoleProbe {
    async fn init(&self, ctx: &InitCtx) -> anyhow::Result<()> {
        ctx.runtime().storage().insert("worker", ctx.is_worker());
        Ok(())
    }
}

#[tokio::test]
async fn worker_role_runs_its_own_runtime() {
    let options = ClusterOptions::new(
        RuntimeOptions::new()
            .without_signal_hook()
            .module(RoleProbe::class()),
    )
    .with_role(Role::Worker(7));
    let cluster = ClusteredCore::new(options).unwrap();
    cluster.init().await.unwrap();

    assert!(cluster.is_worker());
    assert_eq!(cluster.worker_count(), 0);
    assert!(!cluster.kill_worker(7));

    let runtime = cluster.actual_core().unwrap();
    assert_eq!(runtime.meta().worker_id, Some(7));
    assert!(*runtime.storage().get::<bool>("worker").unwrap());

    cluster.shutdown().await;
    assert_eq!(runtime.state(), bootkit::RuntimeState::Shutdown);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn instant_exit_is_reported_after_worker_init() {
    let backend = Arc::new(MockBackend::default());
    backend.exit_on_spawn();
    let cluster = primary(&backend, 1, false, 10);
    // Slow listener widens the window between spawn and the init notification.
    cluster.subscribe(|event| {
        if matches!(event, ClusterEvent::WorkerInit(_)) {
            std::thread::sleep(Duration::from_millis(100));
        }
    });
    let events = record_events(&cluster);

    cluster.init().await.unwrap();
    eventually(|| cluster.worker_count() == 0).await;
    eventually(|| events.lock().len() == 3).await;

    let events = events.lock().clone();
    assert_eq!(events[0], "init:1");
    assert!(events[1..].contains(&"exit:1:1".to_owned()), "{}", events.join(", "));

    cluster.shutdown().await;
}
