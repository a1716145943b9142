// src/watch/watcher.rs

use std::time::Duration;

use anyhow::{bail, Context, Result};
use notify::event::ModifyKind;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::dag::Task;
use crate::supervisor::RunCtx;
use tokio_util::sync::CancellationToken;

/// Debounce window: a burst of events (editor save, git checkout) collapses
/// into a single re-run.
const DEBOUNCE: Duration = Duration::from_secs(1);

/// Sentinel for "not armed"; effectively never expires.
const NEVER: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Watch a task's declared paths and re-enqueue the task once changes have
/// settled for [`DEBOUNCE`].
///
/// Directories register recursively; single files register alone. Permission
/// and other metadata-only changes are ignored (editors and tooling trigger
/// them constantly without content changes).
///
/// Fatal conditions (missing watch path, watcher initialisation failure) trip
/// the root token so the whole run tears down cleanly.
pub async fn watch_loop(ctx: Arc<RunCtx>, task: Arc<Task>, token: CancellationToken) {
    if let Err(err) = watch_loop_inner(&ctx, &task, &token).await {
        error!(task = %task.name, error = %format!("{err:#}"), "file watch failed; shutting down");
        ctx.root.cancel();
    }
}

async fn watch_loop_inner(
    ctx: &Arc<RunCtx>,
    task: &Arc<Task>,
    token: &CancellationToken,
) -> Result<()> {
    // Channel from the synchronous notify callback into the async world.
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| {
            let _ = event_tx.send(res);
        },
        Config::default(),
    )
    .context("initialising file watcher")?;

    // Watch paths resolve against the task's workingDir, like its targets.
    let base = task
        .spec
        .working_dir
        .clone()
        .unwrap_or_else(|| std::path::PathBuf::from("."));

    for path in &task.spec.watch {
        let path = base.join(path);
        let meta = std::fs::metadata(&path).with_context(|| format!("watch path {path:?}"))?;
        let mode = if meta.is_dir() {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher
            .watch(&path, mode)
            .with_context(|| format!("watching {path:?}"))?;
    }

    debug!(task = %task.name, paths = ?task.spec.watch, "watching for changes");

    let debounce = tokio::time::sleep(NEVER);
    tokio::pin!(debounce);

    loop {
        tokio::select! {
            _ = token.cancelled() => return Ok(()),

            _ = &mut debounce => {
                debounce.as_mut().reset(Instant::now() + NEVER);
                debug!(task = %task.name, "changes settled; re-running");
                let _ = ctx.work_tx.send(task.clone());
            }

            event = event_rx.recv() => match event {
                Some(Ok(event)) => {
                    if is_relevant(&event.kind) {
                        debug!(task = %task.name, paths = ?event.paths, "change detected");
                        debounce.as_mut().reset(Instant::now() + DEBOUNCE);
                    }
                }
                Some(Err(err)) => return Err(err).context("file watch error"),
                None => bail!("file watcher channel closed"),
            }
        }
    }
}

/// Content-affecting events only; access and metadata churn never re-runs a
/// task.
fn is_relevant(kind: &EventKind) -> bool {
    !matches!(
        kind,
        EventKind::Access(_) | EventKind::Modify(ModifyKind::Metadata(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, MetadataKind};

    #[test]
    fn metadata_and_access_events_are_ignored() {
        assert!(!is_relevant(&EventKind::Access(AccessKind::Read)));
        assert!(!is_relevant(&EventKind::Modify(ModifyKind::Metadata(
            MetadataKind::Permissions
        ))));

        assert!(is_relevant(&EventKind::Create(
            notify::event::CreateKind::File
        )));
        assert!(is_relevant(&EventKind::Modify(ModifyKind::Data(
            notify::event::DataChange::Content
        ))));
        assert!(is_relevant(&EventKind::Remove(
            notify::event::RemoveKind::File
        )));
    }
}
