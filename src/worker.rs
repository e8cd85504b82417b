//! The background worker. Owns a dedicated OS thread that hosts the
//! cooperative scheduler: it starts the local watcher, launches the
//! remote poller and the operations-queue drain loop as supervised
//! tasks, and restarts either one on an unexpected termination, bounded
//! by a rolling restart budget that escalates to a fatal error when
//! exhausted. Control from the caller (`sync_now`, `stop`) crosses into
//! the dedicated thread over a plain `mpsc` channel.

use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::callbacks::{InterventionCallback, InterventionRequest, InterventionResolution, Notification, NotificationCallback};
use crate::config::Config;
use crate::error::WorkerError;
use crate::model::IntentEnvelope;
use crate::poller::{RemoteIndex, RemotePoller};
use crate::queue::OperationsQueue;
use crate::remote::RemoteApi;
use crate::resolver::SharedSnapshotResolver;
use crate::snapshot::SnapshotStore;
use crate::watcher::LocalWatcher;

/// At most this many restarts per supervised task within `RESTART_WINDOW`
/// before the worker gives up and terminates fatally.
const RESTART_BUDGET: u32 = 5;
const RESTART_WINDOW: Duration = Duration::from_secs(60);
const SUPERVISOR_TICK: Duration = Duration::from_millis(200);

type SharedIntervention = Arc<dyn Fn(&InterventionRequest) -> InterventionResolution + Send + Sync>;
type SharedNotification = Arc<dyn Fn(&Notification) + Send + Sync>;

enum ControlMsg {
    SyncNow,
    Stop,
}

#[derive(Clone)]
struct WorkerContext {
    config: Config,
    remote: Arc<dyn RemoteApi>,
    intervention_cb: Option<SharedIntervention>,
    notification_cb: Option<SharedNotification>,
}

/// Owns the dedicated worker thread once `start()` has been called. Before
/// that, it's just a builder for the context the thread will run with.
///
/// Unlike `OperationsQueue` and `RemotePoller`, which are handed an
/// already-constructed `Arc<RwLock<Snapshot>>`, the worker owns the
/// Snapshot's lifecycle itself: it loads it from disk in `run()` and
/// derives the local watcher's `Resolver` from that same instance, so
/// there's exactly one Snapshot in play across C2/C3/C4 for the lifetime
/// of a run.
pub struct BackgroundWorker {
    config: Config,
    remote: Arc<dyn RemoteApi>,
    intervention_cb: Option<SharedIntervention>,
    notification_cb: Option<SharedNotification>,
    control_tx: Option<Sender<ControlMsg>>,
    join_handle: Option<JoinHandle<()>>,
}

impl BackgroundWorker {
    pub fn new(config: Config, remote: Arc<dyn RemoteApi>) -> Self {
        Self {
            config,
            remote,
            intervention_cb: None,
            notification_cb: None,
            control_tx: None,
            join_handle: None,
        }
    }

    /// Register the intervention callback. Must be called before `start()`
    /// (spec.md §4.5 "Controls").
    pub fn set_intervention_cb(&mut self, f: impl Fn(&InterventionRequest) -> InterventionResolution + Send + Sync + 'static) {
        self.intervention_cb = Some(Arc::new(f));
    }

    /// Register the notification callback. Must be called before `start()`.
    pub fn set_notification_cb(&mut self, f: impl Fn(&Notification) + Send + Sync + 'static) {
        self.notification_cb = Some(Arc::new(f));
    }

    /// Load the user record (here: the validated `Config`), instantiate
    /// C4, initialize C3, start C2, and launch C3's polling task and C4's
    /// drain task on the dedicated scheduler thread (spec.md §4.5).
    pub fn start(&mut self) -> Result<(), WorkerError> {
        if self.join_handle.is_some() {
            return Ok(());
        }

        let (control_tx, control_rx) = mpsc::channel();
        let ctx = WorkerContext {
            config: self.config.clone(),
            remote: Arc::clone(&self.remote),
            intervention_cb: self.intervention_cb.clone(),
            notification_cb: self.notification_cb.clone(),
        };

        let handle = thread::Builder::new()
            .name("syncore-worker".into())
            .spawn(move || {
                if let Err(e) = run(&ctx, &control_rx) {
                    error!("background worker terminated fatally: {}", e);
                }
            })?;

        self.control_tx = Some(control_tx);
        self.join_handle = Some(handle);
        Ok(())
    }

    /// Schedule a one-shot remote poll cycle (spec.md §4.5 `sync_now`).
    /// Thread-safe; a no-op if the worker isn't running.
    pub fn sync_now(&self) {
        if let Some(tx) = &self.control_tx {
            let _ = tx.send(ControlMsg::SyncNow);
        }
    }

    /// Cancel all supervised tasks, stop C2, then stop the scheduler.
    /// Blocks until the worker thread joins (spec.md §4.5 `stop`).
    pub fn stop(&mut self) {
        if let Some(tx) = self.control_tx.take() {
            let _ = tx.send(ControlMsg::Stop);
        }
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.join_handle.is_some()
    }
}

impl Drop for BackgroundWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Tracks restart timestamps in a rolling window for one supervised task,
/// enforcing the bounded-frequency restart policy from spec.md §7.
struct RestartTracker {
    restarts: VecDeque<Instant>,
}

impl RestartTracker {
    fn new() -> Self {
        Self { restarts: VecDeque::new() }
    }

    /// Record a restart attempt now; returns `false` once the budget for
    /// the rolling window is exhausted (escalate to Fatal).
    fn record_and_check(&mut self) -> bool {
        let now = Instant::now();
        self.restarts.push_back(now);
        while let Some(&front) = self.restarts.front() {
            if now.duration_since(front) > RESTART_WINDOW {
                self.restarts.pop_front();
            } else {
                break;
            }
        }
        self.restarts.len() as u32 <= RESTART_BUDGET
    }

    fn count(&self) -> u32 {
        self.restarts.len() as u32
    }
}

struct DrainTask {
    handle: JoinHandle<()>,
    stop: Arc<AtomicBool>,
}

fn state_dir(ctx: &WorkerContext) -> std::path::PathBuf {
    ctx.config.sync_root.join(".syncore")
}

fn boxed_intervention(ctx: &WorkerContext) -> Option<InterventionCallback> {
    ctx.intervention_cb.clone().map(|cb| -> InterventionCallback { Box::new(move |req| cb(req)) })
}

fn boxed_notification(ctx: &WorkerContext) -> Option<NotificationCallback> {
    ctx.notification_cb.clone().map(|cb| -> NotificationCallback { Box::new(move |n| cb(n)) })
}

fn spawn_poller(
    ctx: &WorkerContext,
    remote_index: RemoteIndex,
    snapshot: Arc<RwLock<crate::model::Snapshot>>,
    sink: Sender<IntentEnvelope>,
) -> RemotePoller {
    RemotePoller::start(Arc::clone(&ctx.remote), snapshot, remote_index, ctx.config.poll_interval, sink)
}

fn spawn_drain(
    ctx: &WorkerContext,
    snapshot: Arc<RwLock<crate::model::Snapshot>>,
    remote_index: RemoteIndex,
    intent_rx: Arc<Mutex<Receiver<IntentEnvelope>>>,
) -> Result<DrainTask, WorkerError> {
    let store = SnapshotStore::open(state_dir(ctx))?;
    let mut queue = OperationsQueue::new(
        ctx.config.sync_root.clone(),
        Arc::clone(&ctx.remote),
        remote_index,
        snapshot,
        store,
        ctx.config.retry_ceiling,
    );
    if let Some(cb) = boxed_intervention(ctx) {
        queue.set_intervention_cb(cb);
    }
    if let Some(cb) = boxed_notification(ctx) {
        queue.set_notification_cb(cb);
    }

    let stop = Arc::new(AtomicBool::new(false));
    let stop_task = Arc::clone(&stop);
    let handle = thread::Builder::new().name("syncore-queue-drain".into()).spawn(move || {
        let rx = intent_rx;
        let result = catch_unwind(AssertUnwindSafe(|| {
            let guard = rx.lock().unwrap_or_else(|e| e.into_inner());
            queue.drain(&guard, &stop_task);
        }));
        if result.is_err() {
            error!("queue drain task panicked");
        }
    })?;

    Ok(DrainTask { handle, stop })
}

fn run(ctx: &WorkerContext, control_rx: &Receiver<ControlMsg>) -> Result<(), WorkerError> {
    info!("starting background worker for {}", ctx.config.sync_root.display());

    let store = SnapshotStore::open(state_dir(ctx))?;
    let snapshot = Arc::new(RwLock::new(store.load()?));
    let remote_index: RemoteIndex = Arc::new(RwLock::new(HashMap::new()));

    let (intent_tx, intent_rx) = mpsc::channel::<IntentEnvelope>();
    let intent_rx = Arc::new(Mutex::new(intent_rx));

    let resolver: Arc<dyn crate::resolver::Resolver> = Arc::new(SharedSnapshotResolver::new(Arc::clone(&snapshot)));

    let mut local_watcher = LocalWatcher::start(
        &ctx.config.sync_root,
        ctx.config.ignore.clone(),
        ctx.config.debounce,
        Arc::clone(&resolver),
        intent_tx.clone(),
    )?;

    let mut poller = spawn_poller(ctx, Arc::clone(&remote_index), Arc::clone(&snapshot), intent_tx.clone());
    let mut poller_restarts = RestartTracker::new();

    let mut drain = spawn_drain(ctx, Arc::clone(&snapshot), Arc::clone(&remote_index), Arc::clone(&intent_rx))?;
    let mut drain_restarts = RestartTracker::new();

    let outcome = loop {
        match control_rx.recv_timeout(SUPERVISOR_TICK) {
            Ok(ControlMsg::SyncNow) => poller.poll_now(),
            Ok(ControlMsg::Stop) | Err(RecvTimeoutError::Disconnected) => break Ok(()),
            Err(RecvTimeoutError::Timeout) => {}
        }

        if poller.is_finished() {
            if !poller_restarts.record_and_check() {
                break Err(WorkerError::Fatal {
                    task: "poller",
                    failures: poller_restarts.count(),
                    window: RESTART_WINDOW,
                });
            }
            warn!("remote poller terminated unexpectedly; restarting");
            poller = spawn_poller(ctx, Arc::clone(&remote_index), Arc::clone(&snapshot), intent_tx.clone());
        }

        if !drain.stop.load(Ordering::SeqCst) && drain.handle.is_finished() {
            if !drain_restarts.record_and_check() {
                break Err(WorkerError::Fatal {
                    task: "queue-drain",
                    failures: drain_restarts.count(),
                    window: RESTART_WINDOW,
                });
            }
            warn!("queue drain task terminated unexpectedly; restarting");
            match spawn_drain(ctx, Arc::clone(&snapshot), Arc::clone(&remote_index), Arc::clone(&intent_rx)) {
                Ok(next) => drain = next,
                Err(e) => break Err(e),
            }
        }
    };

    poller.stop();
    drain.stop.store(true, Ordering::SeqCst);
    let _ = drain.handle.join();
    local_watcher.stop();

    let final_snapshot = snapshot.read().expect("snapshot lock poisoned").clone();
    if let Ok(mut store) = SnapshotStore::open(state_dir(ctx)) {
        let _ = store.compact(&final_snapshot);
    }

    info!("background worker stopped");
    outcome
}
