// src/render.rs

//! Terminal status renderer.
//!
//! A strict reader of the status table: every ~10ms it snapshots each task's
//! record and repaints one status line per task at the top of the screen, in
//! declaration order. Suppressed entirely under CI environments.

use std::fmt::Write as _;
use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use crate::dag::TaskGraph;
use crate::status::{Reason, StatusTable};
use crate::supervisor::RunCtx;

const REFRESH: Duration = Duration::from_millis(10);

/// Repaint until the root token trips.
pub async fn render_loop(ctx: Arc<RunCtx>) {
    let mut ticker = tokio::time::interval(REFRESH);
    loop {
        tokio::select! {
            _ = ctx.root.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let frame = build_frame(&ctx.graph, &ctx.statuses, terminal_height());
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(frame.as_bytes());
        let _ = out.flush();
    }
}

fn terminal_height() -> u16 {
    match crossterm::terminal::size() {
        Ok((_cols, rows)) if rows > 0 => rows,
        _ => 24,
    }
}

/// One frame: cursor home, a colored entry per task, clear to end of line,
/// park the cursor at the bottom so task output scrolls underneath.
fn build_frame(graph: &TaskGraph, statuses: &StatusTable, height: u16) -> String {
    let mut buf = String::new();

    buf.push_str("\x1b[H");
    buf.push_str("\x1b[2K");

    for task in graph.iter() {
        let Some(rec) = statuses.get(&task.name) else {
            continue;
        };

        buf.push_str(reason_sgr(rec.reason));
        let _ = write!(buf, "{} {} ", task.name, rec.reason);
        buf.push_str("\x1b[2m");
        let _ = write!(buf, "{:?}", task.spec.host_ports());
        buf.push_str("   \x1b[0m");
    }

    buf.push_str("\x1b[K\n");
    let _ = write!(buf, "\x1b[{height};0H");
    buf
}

fn reason_sgr(reason: Reason) -> &'static str {
    match reason {
        Reason::Waiting => "\x1b[2m",
        Reason::Starting => "\x1b[33m",
        Reason::Running => "\x1b[32m",
        Reason::Success => "\x1b[34m",
        Reason::Error => "\x1b[31m",
    }
}
