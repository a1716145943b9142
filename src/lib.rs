// src/lib.rs

pub mod backoff;
pub mod cli;
pub mod config;
pub mod dag;
pub mod errors;
pub mod exec;
pub mod locks;
pub mod logging;
pub mod probe;
pub mod render;
pub mod runner;
pub mod status;
pub mod supervisor;
pub mod watch;

use std::collections::HashMap;
use std::io::IsTerminal;
use std::sync::{Arc, Mutex as StdMutex};

use anyhow::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cli::CliArgs;
use crate::dag::TaskGraph;
use crate::locks::NamedLocks;
use crate::status::StatusTable;
use crate::supervisor::{RunCtx, Supervisor};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - tasks file loading and validation
/// - the effective graph (`needed_for` the requested roots)
/// - signal handling into the root cancellation token
/// - the status renderer (interactive terminals only)
/// - the supervisor
pub async fn run(args: CliArgs) -> Result<()> {
    let file = config::load_and_validate(&args.config)?;

    let no_watch = args.no_watch || env_disables_watch();
    let is_ci = ci_environment();

    let graph = TaskGraph::from_file(&file).needed_for(&args.tasks)?;

    let root = CancellationToken::new();
    spawn_signal_handler(root.clone())?;

    let (work_tx, work_rx) = mpsc::unbounded_channel();

    let ctx = Arc::new(RunCtx {
        graph,
        statuses: StatusTable::new(),
        locks: NamedLocks::new(&file.spec.semaphores),
        work_tx,
        root,
        runs: StdMutex::new(HashMap::new()),
        grace: file.spec.termination_grace_period(),
    });

    info!(
        name = %file.metadata.name,
        tasks = ctx.graph.len(),
        watch = !no_watch,
        ci = is_ci,
        "bringing stack up"
    );

    if !is_ci && std::io::stdout().is_terminal() {
        print!("\x1b[2J");
        let render_ctx = ctx.clone();
        ctx.spawn_guarded("status-renderer", async move {
            render::render_loop(render_ctx).await;
        });
    }

    Supervisor::new(ctx, work_rx, !no_watch).run().await
}

fn env_disables_watch() -> bool {
    matches!(std::env::var("WATCH").ok().as_deref(), Some("0"))
        || matches!(std::env::var("KIT_WATCH").ok().as_deref(), Some("0"))
}

/// CI detection: `CI` (Travis, CircleCI, GitLab, ...), `BUILD_ID` (Jenkins,
/// TeamCity), `RUN_ID` (TaskCluster, Codefresh), GitHub Actions.
fn ci_environment() -> bool {
    let set = |key: &str| std::env::var(key).map(|v| !v.is_empty()).unwrap_or(false);
    set("CI")
        || set("BUILD_ID")
        || set("RUN_ID")
        || std::env::var("GITHUB_ACTIONS").map(|v| v == "true").unwrap_or(false)
}

#[cfg(unix)]
fn spawn_signal_handler(root: CancellationToken) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = interrupt.recv() => {}
            _ = terminate.recv() => {}
            _ = hangup.recv() => {}
        }
        info!("signal received; shutting down");
        root.cancel();
    });

    Ok(())
}

#[cfg(not(unix))]
fn spawn_signal_handler(root: CancellationToken) -> Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; shutting down");
            root.cancel();
        }
    });
    Ok(())
}
