// src/runner.rs

//! Per-task supervision.
//!
//! One runner per dispatched task: it preempts any prior incarnation,
//! acquires its gates, runs the child process with its probe loops, and
//! loops through restart-with-backoff until the restart policy or a token
//! says otherwise. Status writes for a task only ever come from its own
//! runner (and the probe callbacks it owns).

use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::model::RestartPolicy;
use crate::dag::Task;
use crate::exec::{self, TaskLog};
use crate::probe::{self, ProbeParams};
use crate::status::Reason;
use crate::supervisor::{RunCtx, RunSlot};

pub async fn run_task(
    ctx: Arc<RunCtx>,
    task: Arc<Task>,
    process: CancellationToken,
    previous: Option<RunSlot>,
) {
    // Preempt: stop any prior incarnation of this task and wait until it has
    // released its gates and child process.
    if let Some(prev) = previous {
        debug!(task = %task.name, "preempting previous run");
        prev.stop.cancel();
        prev.done.cancelled().await;
    }

    let log = match TaskLog::new(&task.name, task.spec.log.as_deref()) {
        Ok(log) => log,
        Err(err) => {
            warn!(task = %task.name, error = %err, "cannot open log sink");
            ctx.statuses.set_reason(&task.name, Reason::Error);
            return;
        }
    };

    // Gate: named mutex first, then a semaphore permit. Both acquisitions
    // abort cleanly when the process token trips while waiting; the guards
    // release when the runner exits.
    let _mutex_guard = match &task.spec.mutex {
        Some(label) => {
            log.line(&format!("waiting for mutex {label:?}"));
            let mutex = ctx.locks.mutex(label);
            tokio::select! {
                guard = mutex.lock_owned() => {
                    log.line(&format!("locked mutex {label:?}"));
                    Some(guard)
                }
                _ = process.cancelled() => return,
            }
        }
        None => None,
    };

    let _permit = match &task.spec.semaphore {
        Some(label) => {
            let semaphore = match ctx.locks.semaphore(label) {
                Ok(sem) => sem,
                Err(err) => {
                    // Unreachable after validation, but do not run ungated.
                    warn!(task = %task.name, error = %err, "semaphore lookup failed");
                    ctx.statuses.set_reason(&task.name, Reason::Error);
                    return;
                }
            };
            log.line(&format!("waiting for semaphore {label:?}"));
            tokio::select! {
                permit = semaphore.acquire_owned() => match permit {
                    Ok(permit) => {
                        log.line(&format!("acquired semaphore {label:?}"));
                        Some(permit)
                    }
                    Err(_closed) => return,
                },
                _ = process.cancelled() => return,
            }
        }
        None => None,
    };

    loop {
        if process.is_cancelled() {
            return;
        }

        // Fresh targets mean the work is already done; watch triggers will
        // re-dispatch if inputs change again.
        if exec::should_skip(&task.spec) {
            log.line("skipping, targets are up to date");
            ctx.statuses.set_reason(&task.name, Reason::Success);
            ctx.release_downstream(&task.name);
            return;
        }

        let run = process.child_token();
        ctx.runs
            .lock()
            .expect("run registry poisoned")
            .insert(task.name.clone(), run.clone());

        ctx.statuses.set_reason(&task.name, Reason::Starting);

        let result = run_once(&ctx, &task, &log, &run).await;

        // Stop this run's probe loops.
        run.cancel();

        if process.is_cancelled() {
            // Terminated from above; not a task failure.
            return;
        }

        match result {
            Err(err) => {
                log.line(&format!("task failed: {err:#}"));
                ctx.statuses.set_reason(&task.name, Reason::Error);
                ctx.statuses.bump_backoff(&task.name);
            }
            Ok(()) => {
                ctx.statuses.set_reason(&task.name, Reason::Success);
                ctx.statuses.reset_backoff(&task.name);
                ctx.release_downstream(&task.name);
                if !task.spec.restarts_after_success() {
                    return;
                }
            }
        }

        if task.spec.restart_policy() == RestartPolicy::Never {
            return;
        }

        let backoff = ctx
            .statuses
            .get(&task.name)
            .map(|rec| rec.backoff)
            .unwrap_or_default();
        log.line(&format!("backing off {:?}", backoff.duration));
        tokio::select! {
            _ = process.cancelled() => return,
            _ = tokio::time::sleep(backoff.duration) => {}
        }
    }
}

/// One run: wait for ports, arm probes, execute the child.
async fn run_once(
    ctx: &Arc<RunCtx>,
    task: &Arc<Task>,
    log: &TaskLog,
    run: &CancellationToken,
) -> Result<()> {
    for port in task.spec.host_ports() {
        log.line(&format!("waiting for port {port} to be free"));
        exec::wait_port_free(port, run).await?;
    }

    if let Some(probe) = &task.spec.liveness_probe {
        let params = ProbeParams::from_config(probe)?;
        log.line(&format!("liveness probe {:?}", params.action));

        let loop_token = run.clone();
        let trip = run.clone();
        let live_log = log.clone();
        ctx.spawn_guarded("liveness-probe", async move {
            probe::run_probe(params, loop_token, move |live, err| {
                if !live {
                    live_log.line("is dead, stopping");
                    if let Some(err) = err {
                        debug!(error = %err, "liveness failure");
                    }
                    trip.cancel();
                }
            })
            .await;
        });
    }

    if let Some(probe) = &task.spec.readiness_probe {
        let params = ProbeParams::from_config(probe)?;
        ctx.statuses.set_reason(&task.name, Reason::Starting);
        log.line(&format!("readiness probe {:?}", params.action));

        let loop_token = run.clone();
        let ready_ctx = ctx.clone();
        let name = task.name.clone();
        let ready_log = log.clone();
        ctx.spawn_guarded("readiness-probe", async move {
            probe::run_probe(params, loop_token, move |ready, _err| {
                if ready {
                    ready_log.line("is ready, starting downstream");
                    ready_ctx.statuses.set_reason(&name, Reason::Running);
                    ready_ctx.release_downstream(&name);
                } else {
                    ready_log.line("is not ready");
                    ready_ctx.statuses.set_reason(&name, Reason::Error);
                }
            })
            .await;
        });
    } else {
        ctx.statuses.set_reason(&task.name, Reason::Running);
    }

    exec::run_process(task, log, run, ctx.grace).await
}
