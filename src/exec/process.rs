// src/exec/process.rs

//! Host-process execution for `command` and `sh` activities.
//!
//! The child gets its own process group (so shells and their descendants die
//! together), both output streams are pumped line-by-line into the task's
//! log sink, and cancellation escalates SIGTERM -> grace period -> SIGKILL.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::dag::Task;
use crate::exec::log::TaskLog;

/// Run the task's child process to completion.
///
/// - `Ok(())` on a zero exit status.
/// - `Err` on spawn failure, a nonzero exit, or cancellation (callers
///   classify cancellation by inspecting their token, not this error).
///
/// Tasks with no activity (pure aggregation nodes) return `Ok(())`
/// immediately.
pub async fn run_process(
    task: &Task,
    log: &TaskLog,
    token: &CancellationToken,
    grace: Duration,
) -> Result<()> {
    let Some(mut cmd) = build_command(task) else {
        return Ok(());
    };

    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    unsafe {
        // New session => new process group, so we can signal the whole tree.
        cmd.pre_exec(|| {
            nix::unistd::setsid()
                .map(|_| ())
                .map_err(|e| std::io::Error::from_raw_os_error(e as i32))
        });
    }

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process for task '{}'", task.name))?;

    let stdout_pump = child.stdout.take().map(|s| pump_lines(s, log.clone()));
    let stderr_pump = child.stderr.take().map(|s| pump_lines(s, log.clone()));

    let status = tokio::select! {
        status = child.wait() => {
            status.with_context(|| format!("waiting for process of task '{}'", task.name))?
        }
        _ = token.cancelled() => {
            terminate(&mut child, grace).await;
            drain(stdout_pump, stderr_pump).await;
            bail!("task '{}' terminated", task.name);
        }
    };

    drain(stdout_pump, stderr_pump).await;

    debug!(
        task = %task.name,
        exit_code = status.code().unwrap_or(-1),
        success = status.success(),
        "task process exited"
    );

    if status.success() {
        Ok(())
    } else {
        bail!("task '{}' exited with {status}", task.name);
    }
}

/// Build the command for the task's activity, or `None` when there is
/// nothing to execute. Container activities never get here; validation
/// rejects them at startup.
fn build_command(task: &Task) -> Option<Command> {
    let spec = &task.spec;

    let mut cmd = if !spec.command.is_empty() {
        let argv = spec.command.as_slice();
        let mut c = Command::new(&argv[0]);
        c.args(&argv[1..]);
        c
    } else if let Some(script) = &spec.sh {
        let mut c = Command::new("sh");
        c.arg("-c").arg(script);
        c
    } else {
        return None;
    };

    if let Some(dir) = &spec.working_dir {
        cmd.current_dir(dir);
    }
    for (key, value) in spec.env.iter() {
        cmd.env(key, value);
    }

    Some(cmd)
}

fn pump_lines(
    stream: impl AsyncRead + Unpin + Send + 'static,
    log: TaskLog,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let reader = BufReader::new(stream);
        let mut lines = reader.lines();
        while let Ok(Some(line)) = lines.next_line().await {
            log.line(&line);
        }
    })
}

/// Flush remaining output; the pumps end at pipe EOF.
async fn drain(
    stdout: Option<tokio::task::JoinHandle<()>>,
    stderr: Option<tokio::task::JoinHandle<()>>,
) {
    if let Some(handle) = stdout {
        let _ = handle.await;
    }
    if let Some(handle) = stderr {
        let _ = handle.await;
    }
}

/// SIGTERM the process group, give it the grace period, then SIGKILL.
#[cfg(unix)]
async fn terminate(child: &mut Child, grace: Duration) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        // Already reaped.
        return;
    };
    let pgid = Pid::from_raw(pid as i32);

    let _ = killpg(pgid, Signal::SIGTERM);
    if tokio::time::timeout(grace, child.wait()).await.is_err() {
        debug!(pid, "grace period expired, sending SIGKILL");
        let _ = killpg(pgid, Signal::SIGKILL);
        let _ = child.wait().await;
    }
}

#[cfg(not(unix))]
async fn terminate(child: &mut Child, _grace: Duration) {
    let _ = child.kill().await;
}
