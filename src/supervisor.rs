// src/supervisor.rs

//! Top-level orchestration.
//!
//! The supervisor owns the work channel, the per-task preemption slots and
//! the runner tracker. It seeds the graph's leaves, dispatches a
//! [`crate::runner`] per delivered task, releases downstream tasks as
//! upstreams become fulfilled, watches the two termination predicates, and
//! waits for every runner on shutdown.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use anyhow::{bail, Result};
use futures::FutureExt;
use std::future::Future;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::config::model::RestartPolicy;
use crate::dag::{Task, TaskGraph};
use crate::locks::NamedLocks;
use crate::runner;
use crate::status::{Reason, StatusTable};
use crate::watch;

/// Shared context threaded through runners, probe loops and watch loops.
///
/// Built once per run; tests construct isolated instances.
pub struct RunCtx {
    pub graph: TaskGraph,
    pub statuses: StatusTable,
    pub locks: NamedLocks,
    pub work_tx: mpsc::UnboundedSender<Arc<Task>>,
    pub root: CancellationToken,

    /// Per-run cancellation handles by task name, so one in-flight run can
    /// be interrupted without tearing down the task's supervision.
    pub runs: StdMutex<HashMap<String, CancellationToken>>,

    /// SIGTERM -> SIGKILL grace for child process groups.
    pub grace: Duration,
}

impl RunCtx {
    /// Enqueue every downstream of `name` whose upstreams are all fulfilled:
    /// `success`, or `running` when the upstream is a background task.
    pub fn release_downstream(&self, name: &str) {
        if self.root.is_cancelled() {
            return;
        }

        for downstream in self.graph.downstream(name) {
            let fulfilled = downstream.spec.dependencies.iter().all(|upstream| {
                let Some(rec) = self.statuses.get(upstream) else {
                    return false;
                };
                match rec.reason {
                    Reason::Success => true,
                    Reason::Running => self
                        .graph
                        .get(upstream)
                        .map(|u| u.spec.is_background())
                        .unwrap_or(false),
                    _ => false,
                }
            });

            if fulfilled {
                debug!(task = %downstream.name, upstream = %name, "upstreams fulfilled; enqueueing");
                let _ = self.work_tx.send(downstream.clone());
            }
        }
    }

    /// Interrupt a single in-flight run without tearing down the task's
    /// supervision. The runner classifies the abort as a run failure and
    /// applies its restart policy. Returns false when no run is registered
    /// under the name.
    pub fn interrupt_run(&self, name: &str) -> bool {
        match self
            .runs
            .lock()
            .expect("run registry poisoned")
            .get(name)
        {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Spawn a supervision future behind a crash boundary: an unhandled
    /// panic (already printed by the panic hook) trips the root token so the
    /// whole run tears down instead of limping on.
    pub fn spawn_guarded<F>(self: &Arc<Self>, what: &'static str, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let root = self.root.clone();
        tokio::spawn(async move {
            if AssertUnwindSafe(fut).catch_unwind().await.is_err() {
                error!(what, "supervision task panicked; shutting down");
                root.cancel();
            }
        });
    }
}

/// Preemption slot for one dispatched incarnation of a task.
#[derive(Debug, Clone)]
pub struct RunSlot {
    /// Per-process token, child of root. Cancelling it stops the incarnation
    /// (watch loop included).
    pub stop: CancellationToken,
    /// Latch tripped when the runner has fully released its gates and child.
    pub done: CancellationToken,
}

impl RunSlot {
    fn new(root: &CancellationToken) -> Self {
        Self {
            stop: root.child_token(),
            done: CancellationToken::new(),
        }
    }
}

pub struct Supervisor {
    ctx: Arc<RunCtx>,
    work_rx: mpsc::UnboundedReceiver<Arc<Task>>,
    slots: HashMap<String, RunSlot>,
    tracker: TaskTracker,
    watch_enabled: bool,
}

impl Supervisor {
    pub fn new(
        ctx: Arc<RunCtx>,
        work_rx: mpsc::UnboundedReceiver<Arc<Task>>,
        watch_enabled: bool,
    ) -> Self {
        Self {
            ctx,
            work_rx,
            slots: HashMap::new(),
            tracker: TaskTracker::new(),
            watch_enabled,
        }
    }

    /// Drive the run to completion.
    ///
    /// Returns an error when any `restartPolicy: Never` task ended in
    /// `error`; the process exit code is derived from this.
    pub async fn run(mut self) -> Result<()> {
        for task in self.ctx.graph.iter() {
            self.ctx.statuses.init(&task.name);
        }

        {
            let ctx = self.ctx.clone();
            self.ctx
                .spawn_guarded("termination-watch", termination_watch(ctx));
        }

        for leaf in self.ctx.graph.leaves() {
            debug!(task = %leaf.name, "seeding leaf");
            let _ = self.ctx.work_tx.send(leaf.clone());
        }

        let root = self.ctx.root.clone();
        loop {
            let delivered = tokio::select! {
                _ = root.cancelled() => None,
                delivered = self.work_rx.recv() => delivered,
            };
            match delivered {
                Some(task) => self.dispatch(task),
                None => break,
            }
        }

        debug!("terminating; waiting for runners to finish");
        self.tracker.close();
        self.tracker.wait().await;

        let failed: Vec<String> = self
            .ctx
            .graph
            .iter()
            .filter(|t| {
                t.spec.restart_policy() == RestartPolicy::Never
                    && matches!(
                        self.ctx.statuses.get(&t.name),
                        Some(rec) if rec.reason == Reason::Error
                    )
            })
            .map(|t| t.name.clone())
            .collect();

        if !failed.is_empty() {
            bail!("{} errored", failed.join(", "));
        }
        Ok(())
    }

    /// Spawn one incarnation of a task: its watch loop (bound to the
    /// per-process token) and its runner. Slot swapping happens here, in the
    /// single dispatch loop, so preemption is serialized per task name.
    fn dispatch(&mut self, task: Arc<Task>) {
        if self.ctx.root.is_cancelled() {
            return;
        }

        info!(task = %task.name, "dispatching");
        let slot = RunSlot::new(&self.ctx.root);
        let previous = self.slots.insert(task.name.clone(), slot.clone());

        if self.watch_enabled && !task.spec.watch.is_empty() {
            let ctx = self.ctx.clone();
            let watch_task = task.clone();
            let token = slot.stop.clone();
            self.ctx.spawn_guarded("watch-loop", async move {
                watch::watch_loop(ctx, watch_task, token).await;
            });
        }

        let ctx = self.ctx.clone();
        let root = self.ctx.root.clone();
        self.tracker.spawn(async move {
            let name = task.name.clone();
            let fut = runner::run_task(ctx, task, slot.stop.clone(), previous);
            if AssertUnwindSafe(fut).catch_unwind().await.is_err() {
                error!(task = %name, "task runner panicked; shutting down");
                root.cancel();
            }
            slot.done.cancel();
        });
    }
}

/// Once per second, evaluate the two termination predicates:
///
/// - allComplete: every non-background task is terminal.
/// - anyFatal: some `restartPolicy: Never` task is in error.
///
/// Either trips the root token.
async fn termination_watch(ctx: Arc<RunCtx>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = ctx.root.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let all_complete = ctx.graph.all(|t| {
            !t.spec.is_background()
                && matches!(
                    ctx.statuses.get(&t.name),
                    Some(rec) if rec.reason.is_terminal()
                )
        });

        let any_fatal = ctx.graph.any(|t| {
            t.spec.restart_policy() == RestartPolicy::Never
                && matches!(
                    ctx.statuses.get(&t.name),
                    Some(rec) if rec.reason == Reason::Error
                )
        });

        if all_complete || any_fatal {
            info!(all_complete, any_fatal, "termination condition met");
            ctx.root.cancel();
            return;
        }
    }
}
