//! WorkerMonitor - one background loop draining one queue.
//!
//! 1 cycle:
//! 1. snapshot the pending count (a task recycled during this cycle waits for
//!    the next one)
//! 2. for each slot: check the run flag, reserve, acquire the sandbox, inject
//!    storage, dispatch, harvest storage, settle the outcome, pause briefly
//! 3. an empty queue (snapshot 0 or an early `QueueIsEmpty`) releases the
//!    sandbox, and so does a dispatch fault (error or panic) so the next task
//!    starts in a fresh context
//! 4. idle wait until stop, wake, or the idle interval elapses
//!
//! - A stop is always observed before the next reserve or during the idle wait.
//! - Sandbox release exhaustion and any other cycle error end the loop
//!   (`LoopExit::Fatal`). Nothing restarts it except another `start`.
//! - The client lock is never held across a dispatch, so `stop` can always
//!   fail an outstanding reservation even when the dispatch hangs.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::FutureExt;
use tokio::sync::{Mutex, Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::domain::{Outcome, PerformResult, TaskRecord, TaskStorage};
use crate::error::{FerryError, Result};
use crate::queue::{QueueClient, SERVICE_STOPPING};
use crate::sandbox::SandboxManager;

/// Why an idle wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    Stopped,
    Woken,
    TimedOut,
}

/// How the loop task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopExit {
    /// Observed the cleared run flag.
    Stopped,
    /// Did not stop within the join window and was aborted.
    Aborted,
    /// Fail-stop on an error it could not absorb.
    Fatal(String),
}

struct Shared {
    queue: String,
    config: WorkerConfig,
    client: Mutex<QueueClient>,
    sandbox: Mutex<SandboxManager>,
    wake: Notify,
    active: AtomicUsize,
    last_exit: watch::Sender<Option<LoopExit>>,
}

struct Running {
    run_tx: watch::Sender<bool>,
    join: JoinHandle<LoopExit>,
}

pub struct WorkerMonitor {
    shared: Arc<Shared>,
    lifecycle: Mutex<Option<Running>>,
}

impl WorkerMonitor {
    pub fn new(
        queue: impl Into<String>,
        config: WorkerConfig,
        client: QueueClient,
        sandbox: SandboxManager,
    ) -> Result<Self> {
        let queue = queue.into();
        if queue.trim().is_empty() {
            return Err(FerryError::NoQueueSpecified);
        }

        let (last_exit, _) = watch::channel(None);
        Ok(Self {
            shared: Arc::new(Shared {
                queue,
                config,
                client: Mutex::new(client),
                sandbox: Mutex::new(sandbox),
                wake: Notify::new(),
                active: AtomicUsize::new(0),
                last_exit,
            }),
            lifecycle: Mutex::new(None),
        })
    }

    pub fn queue(&self) -> &str {
        &self.shared.queue
    }

    /// Spawn the loop unless one is already running or idling.
    pub async fn start(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        if let Some(running) = lifecycle.as_ref()
            && !running.join.is_finished()
        {
            debug!(queue = %self.shared.queue, "worker loop already running");
            return;
        }

        let (run_tx, run_rx) = watch::channel(true);
        let shared = Arc::clone(&self.shared);
        let join = tokio::spawn(run_loop(shared, run_rx));

        *lifecycle = Some(Running { run_tx, join });
        info!(queue = %self.shared.queue, "worker started");
    }

    /// Stop the loop and settle everything it may have left behind.
    ///
    /// Every step runs even if an earlier one failed; the first error is
    /// returned after all of them have been attempted.
    pub async fn stop(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        let mut first_error: Option<FerryError> = None;

        if let Some(Running { run_tx, mut join }) = lifecycle.take() {
            // ignore send error: the loop may already be gone
            let _ = run_tx.send(false);
            self.shared.wake.notify_one();

            let window = self.shared.config.stop_join_timeout();
            match tokio::time::timeout(window, &mut join).await {
                Ok(Ok(exit)) => debug!(queue = %self.shared.queue, ?exit, "worker loop joined"),
                Ok(Err(e)) => warn!(queue = %self.shared.queue, error = %e, "worker loop panicked"),
                Err(_) => {
                    warn!(
                        queue = %self.shared.queue,
                        timeout = ?window,
                        "worker loop did not stop in time, aborting"
                    );
                    join.abort();
                    if let Err(e) = join.await
                        && !e.is_cancelled()
                    {
                        warn!(queue = %self.shared.queue, error = %e, "aborted worker loop failed");
                    }
                    self.shared.last_exit.send_replace(Some(LoopExit::Aborted));
                }
            }
        }

        {
            let mut client = self.shared.client.lock().await;
            if let Some(task) = client.current_task() {
                info!(queue = %self.shared.queue, task_id = %task.id, "failing in-flight task");
                if let Err(e) = client.fail(SERVICE_STOPPING).await {
                    error!(queue = %self.shared.queue, error = %e, "could not fail in-flight task");
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Err(e) = self.shared.sandbox.lock().await.release().await {
            error!(queue = %self.shared.queue, error = %e, "could not release sandbox on stop");
            first_error.get_or_insert(e);
        }

        info!(queue = %self.shared.queue, "worker stopped");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Cut the current idle wait short. Harmless when nothing is waiting.
    pub fn wake(&self) {
        self.shared.wake.notify_one();
    }

    /// Loop tasks currently alive (0 or 1).
    pub fn active_loops(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.active_loops() > 0
    }

    pub fn last_exit(&self) -> Option<LoopExit> {
        self.shared.last_exit.borrow().clone()
    }
}

impl Drop for WorkerMonitor {
    fn drop(&mut self) {
        if let Ok(mut lifecycle) = self.lifecycle.try_lock()
            && let Some(running) = lifecycle.take()
        {
            let _ = running.run_tx.send(false);
            running.join.abort();
        }
    }
}

/// Keeps `Shared::active` honest even when the loop task is aborted.
struct ActiveGuard<'a>(&'a AtomicUsize);

impl<'a> ActiveGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn run_loop(shared: Arc<Shared>, mut run_rx: watch::Receiver<bool>) -> LoopExit {
    let active = ActiveGuard::enter(&shared.active);
    info!(queue = %shared.queue, "worker loop started");

    let exit = loop {
        if let Err(e) = drain_cycle(&shared, &run_rx).await {
            error!(queue = %shared.queue, error = %e, "worker loop failed, stopping");
            fail_outstanding(&shared, &e).await;
            break LoopExit::Fatal(e.to_string());
        }

        let running = *run_rx.borrow();
        if !running {
            break LoopExit::Stopped;
        }

        match idle_wait(&shared, &mut run_rx).await {
            WakeReason::Stopped => break LoopExit::Stopped,
            reason => debug!(queue = %shared.queue, ?reason, "idle wait over"),
        }
    };

    info!(queue = %shared.queue, ?exit, "worker loop exited");
    drop(active);
    shared.last_exit.send_replace(Some(exit.clone()));
    exit
}

async fn idle_wait(shared: &Shared, run_rx: &mut watch::Receiver<bool>) -> WakeReason {
    tokio::select! {
        // the flag only ever changes to false; a dropped sender means stop too
        _ = run_rx.changed() => WakeReason::Stopped,
        _ = shared.wake.notified() => WakeReason::Woken,
        _ = tokio::time::sleep(shared.config.idle_sleep()) => WakeReason::TimedOut,
    }
}

async fn drain_cycle(shared: &Shared, run_rx: &watch::Receiver<bool>) -> Result<()> {
    let task_count = shared
        .client
        .lock()
        .await
        .pending_count(&shared.queue)
        .await?;

    if task_count == 0 {
        shared.sandbox.lock().await.release().await?;
        return Ok(());
    }
    debug!(queue = %shared.queue, task_count, "drain cycle");

    for _ in 0..task_count {
        let running = *run_rx.borrow();
        if !running {
            debug!(queue = %shared.queue, "stop observed before reserve");
            break;
        }

        let reserved = shared.client.lock().await.reserve(&shared.queue).await;
        let task = match reserved {
            Ok(task) => task,
            Err(FerryError::QueueIsEmpty) => {
                debug!(queue = %shared.queue, "queue drained early");
                shared.sandbox.lock().await.release().await?;
                break;
            }
            // the entry is already parked on the failed list
            Err(FerryError::Codec(e)) => {
                warn!(queue = %shared.queue, error = %e, "skipped undecodable task");
                continue;
            }
            Err(e) => return Err(e),
        };

        let dispatched = dispatch(shared, &task).await?;
        settle(shared, &task, dispatched.result, dispatched.storage).await?;

        // a faulted context may be dead; the next task gets a fresh one
        if dispatched.faulted {
            warn!(queue = %shared.queue, task_id = %task.id, "releasing faulted sandbox");
            shared.sandbox.lock().await.release().await?;
        }

        tokio::time::sleep(shared.config.dispatch_pause()).await;
    }
    Ok(())
}

struct Dispatched {
    result: PerformResult,
    storage: TaskStorage,
    /// The capability returned an error or panicked.
    faulted: bool,
}

/// Run one task in the sandbox. Capability errors and panics become
/// `CriticalFailure`; only sandbox acquisition errors propagate.
async fn dispatch(shared: &Shared, task: &TaskRecord) -> Result<Dispatched> {
    let mut sandbox = shared.sandbox.lock().await;
    let capability = sandbox.acquire().await?;

    capability.set_task_storage(task.storage.clone());
    let outcome = AssertUnwindSafe(capability.perform(&task.parameters))
        .catch_unwind()
        .await;
    let storage = capability.take_task_storage();

    let (result, faulted) = match outcome {
        Ok(Ok(result)) => (result, false),
        Ok(Err(e)) => (PerformResult::critical_failure(format!("sandbox fault: {e}")), true),
        Err(panic) => (
            PerformResult::critical_failure(format!("sandbox fault: {}", panic_message(&*panic))),
            true,
        ),
    };
    Ok(Dispatched {
        result,
        storage,
        faulted,
    })
}

async fn settle(
    shared: &Shared,
    task: &TaskRecord,
    result: PerformResult,
    storage: TaskStorage,
) -> Result<()> {
    let mut client = shared.client.lock().await;
    if let Some(current) = client.current_task_mut() {
        current.storage = storage;
    }

    if let Some(data) = &result.data {
        debug!(queue = %shared.queue, task_id = %task.id, %data, "dispatch data");
    }

    match result.outcome {
        Outcome::Success => client.succeed().await,
        Outcome::Failure => client.fail(&result.reason_or_default()).await,
        Outcome::CriticalFailure => client.critical_fail(&result.reason_or_default()).await,
    }
}

async fn fail_outstanding(shared: &Shared, cause: &FerryError) {
    let mut client = shared.client.lock().await;
    if client.is_reserved()
        && let Err(e) = client.fail(&cause.to_string()).await
    {
        error!(queue = %shared.queue, error = %e, "could not fail in-flight task");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}
