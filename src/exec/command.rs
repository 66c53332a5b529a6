// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! External command execution.
//!
//! Commands run in array form — the argv is handed to the OS verbatim, no
//! shell ever sees it. Each invocation gets a wall-clock deadline and a
//! cooperative cancellation check; on either, the child is asked to
//! terminate (SIGTERM on unix) and killed outright after a grace period.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::errors::ExecutionError;

/// One command invocation.
#[derive(Debug, Clone)]
pub struct CommandSpec<'a> {
    /// argv, argv[0] being the program. Callers validate with
    /// [`crate::exec::validate_args`] before building a spec.
    pub argv: &'a [String],
    /// Full child environment; nothing is inherited.
    pub env: &'a BTreeMap<String, String>,
    pub cwd: &'a Path,
    pub timeout: Duration,
    /// Time between terminate and kill.
    pub grace: Duration,
}

#[derive(Debug)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub duration: Duration,
}

/// Run the command to completion, deadline, or cancellation.
///
/// A nonzero exit is *not* an error here — the worker decides what a
/// status code means. Errors are reserved for the command not running to
/// completion: spawn failure, signal death, timeout, or cancellation.
pub async fn run_command(
    spec: CommandSpec<'_>,
    cancel: &CancellationToken,
) -> Result<CommandOutput, ExecutionError> {
    let started = Instant::now();

    let mut child = Command::new(&spec.argv[0])
        .args(&spec.argv[1..])
        .env_clear()
        .envs(spec.env)
        .current_dir(spec.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ExecutionError::Spawn {
            message: e.to_string(),
        })?;

    // Drain pipes concurrently so a chatty child can't fill them and wedge.
    let mut stdout_pipe = child.stdout.take().expect("stdout was piped");
    let mut stderr_pipe = child.stderr.take().expect("stderr was piped");
    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stdout_pipe.read_to_end(&mut buf).await;
        buf
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stderr_pipe.read_to_end(&mut buf).await;
        buf
    });

    // The select borrows the child through the deadline-wrapped wait;
    // termination handling happens after the select so the borrow is over.
    let waited = tokio::select! {
        waited = tokio::time::timeout(spec.timeout, child.wait()) => Some(waited),
        _ = cancel.cancelled() => None,
    };
    let status = match waited {
        None => {
            terminate_then_kill(&mut child, spec.grace).await;
            return Err(ExecutionError::Cancelled);
        }
        Some(Err(_elapsed)) => {
            terminate_then_kill(&mut child, spec.grace).await;
            return Err(ExecutionError::Timeout { limit: spec.timeout });
        }
        Some(Ok(status)) => {
            status.map_err(|e| ExecutionError::Spawn { message: e.to_string() })?
        }
    };

    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();
    let duration = started.elapsed();

    match status.code() {
        Some(code) => Ok(CommandOutput {
            exit_code: code,
            stdout,
            stderr,
            duration,
        }),
        None => Err(ExecutionError::Signaled {
            signal: exit_signal(&status),
        }),
    }
}

/// Ask nicely, wait out the grace period, then stop asking.
async fn terminate_then_kill(child: &mut Child, grace: Duration) {
    send_terminate(child);
    if tokio::time::timeout(grace, child.wait()).await.is_err() {
        let _ = child.start_kill();
        let _ = child.wait().await;
    }
}

#[cfg(unix)]
fn send_terminate(child: &Child) {
    if let Some(pid) = child.id() {
        // SAFETY: plain syscall on a pid we own; the worst a stale pid can
        // do is ESRCH, which we ignore.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &Child) {
    // No graceful terminate off unix; the grace period just delays the kill.
    let _ = child;
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status.signal().unwrap_or(0)
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> i32 {
    0
}
