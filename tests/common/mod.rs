// tests/common/mod.rs

//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use stackup::config::{self, model::TasksFile};
use stackup::dag::TaskGraph;
use stackup::locks::NamedLocks;
use stackup::status::StatusTable;
use stackup::supervisor::{RunCtx, Supervisor};

/// Parse and validate a tasks document through the real loader.
pub fn load(doc: &str) -> TasksFile {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("tasks.yaml");
    std::fs::write(&path, doc).expect("write tasks.yaml");
    config::load_and_validate(&path).expect("valid tasks file")
}

/// Build an isolated run context plus the supervisor consuming it.
pub fn stack(doc: &str, roots: &[&str], watch: bool) -> (Arc<RunCtx>, Supervisor) {
    let file = load(doc);
    let roots: Vec<String> = roots.iter().map(|s| s.to_string()).collect();
    let graph = TaskGraph::from_file(&file)
        .needed_for(&roots)
        .expect("known roots");

    let (work_tx, work_rx) = mpsc::unbounded_channel();
    let ctx = Arc::new(RunCtx {
        graph,
        statuses: StatusTable::new(),
        locks: NamedLocks::new(&file.spec.semaphores),
        work_tx,
        root: CancellationToken::new(),
        runs: StdMutex::new(HashMap::new()),
        grace: Duration::from_secs(2),
    });

    let supervisor = Supervisor::new(ctx.clone(), work_rx, watch);
    (ctx, supervisor)
}

/// Run a stack to completion with a hard timeout.
pub async fn run_stack(doc: &str, roots: &[&str]) -> (anyhow::Result<()>, Arc<RunCtx>) {
    let (ctx, supervisor) = stack(doc, roots, false);
    let result = tokio::time::timeout(Duration::from_secs(30), supervisor.run())
        .await
        .expect("supervisor timed out");
    (result, ctx)
}

/// Poll a predicate until it holds or the deadline passes.
pub async fn wait_for(deadline: Duration, mut pred: impl FnMut() -> bool) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if pred() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    pred()
}
