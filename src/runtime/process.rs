//! Deadline-bound subprocess execution
//!
//! Every external command races its exit against a cancellation token. When
//! the token fires first the child is killed before the call returns, so a
//! timed-out step never leaves a hung command behind.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;

use super::output::OutputSink;
use crate::common::{Error, Result};

/// How long drain tasks may keep reading after a killed child
const DRAIN_GRACE: Duration = Duration::from_millis(200);

/// Cancellation token that fires by itself once `timeout` elapses
///
/// The timer task is stopped when the deadline is dropped.
#[derive(Debug)]
pub struct Deadline {
    token: CancellationToken,
    timer: JoinHandle<()>,
}

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        let token = CancellationToken::new();
        let fire = token.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            fire.cancel();
        });
        Self { token, timer }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Whether the timeout has already fired
    pub fn expired(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        self.timer.abort();
    }
}

/// Prefixes applied to each captured stream
#[derive(Debug, Clone)]
pub struct StreamPrefixes {
    pub stdout: String,
    pub stderr: String,
}

impl StreamPrefixes {
    pub fn same(prefix: &str) -> Self {
        Self {
            stdout: prefix.to_string(),
            stderr: prefix.to_string(),
        }
    }
}

/// Run `cmd`, writing both output streams line by line into `sink`
///
/// Returns only once the process has exited and both streams have been read
/// to end-of-stream. A nonzero exit is an error.
pub async fn run_streamed(
    mut cmd: Command,
    label: &str,
    prefixes: StreamPrefixes,
    sink: &OutputSink,
    cancel: &CancellationToken,
) -> Result<()> {
    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = spawn(&mut cmd, label)?;
    let stdout = child.stdout.take().ok_or_else(|| Error::Spawn {
        command: label.to_string(),
        error: "stdout was not captured".to_string(),
    })?;
    let stderr = child.stderr.take().ok_or_else(|| Error::Spawn {
        command: label.to_string(),
        error: "stderr was not captured".to_string(),
    })?;

    let out_task = tokio::spawn(drain_lines(stdout, prefixes.stdout, sink.clone()));
    let err_task = tokio::spawn(drain_lines(stderr, prefixes.stderr, sink.clone()));

    let status = wait_or_kill(&mut child, label, cancel).await;

    // Both streams must hit EOF before control returns to the caller
    let drained = join_drains([out_task, err_task], status.is_err(), label, cancel).await;
    let status = status?;
    drained?;

    check_status(status, label)
}

/// Run `cmd` and return its stdout as text
///
/// stderr is read alongside and logged at debug level.
pub async fn run_captured(
    mut cmd: Command,
    label: &str,
    cancel: &CancellationToken,
) -> Result<String> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = spawn(&mut cmd, label)?;
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let out_task = tokio::spawn(read_all(stdout));
    let err_task = tokio::spawn(read_all(stderr));

    let status = wait_or_kill(&mut child, label, cancel).await;
    if status.is_err() {
        out_task.abort();
        err_task.abort();
    }
    let status = status?;

    let aborts = [out_task.abort_handle(), err_task.abort_handle()];
    let (stdout, stderr) = tokio::select! {
        read = async { (out_task.await.unwrap_or_default(), err_task.await.unwrap_or_default()) } => read,
        _ = cancel.cancelled() => {
            aborts.iter().for_each(AbortHandle::abort);
            return Err(Error::Cancelled(label.to_string()));
        }
    };
    if !stderr.trim().is_empty() {
        tracing::debug!(command = label, "stderr: {}", stderr.trim());
    }

    check_status(status, label)?;
    Ok(stdout)
}

fn spawn(cmd: &mut Command, label: &str) -> Result<Child> {
    tracing::debug!(command = label, "spawn");
    cmd.spawn().map_err(|e| Error::Spawn {
        command: label.to_string(),
        error: e.to_string(),
    })
}

async fn wait_or_kill(
    child: &mut Child,
    label: &str,
    cancel: &CancellationToken,
) -> Result<ExitStatus> {
    tokio::select! {
        status = child.wait() => status.map_err(Error::from),
        _ = cancel.cancelled() => {
            tracing::debug!(command = label, "cancelled; killing child");
            if let Err(e) = child.kill().await {
                tracing::warn!(command = label, "Failed to kill child: {}", e);
            }
            Err(Error::Cancelled(label.to_string()))
        }
    }
}

fn check_status(status: ExitStatus, label: &str) -> Result<()> {
    if status.success() {
        tracing::debug!(command = label, "exit success");
        Ok(())
    } else {
        Err(Error::command_failed(label, status))
    }
}

/// Wait for the drain tasks to reach end-of-stream
///
/// A grandchild that outlives the child keeps the pipes open. After a kill
/// the tasks get a short grace period; otherwise they are bounded by
/// `cancel`, and a fired token aborts them with [`Error::Cancelled`].
async fn join_drains(
    tasks: [JoinHandle<()>; 2],
    killed: bool,
    label: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    let aborts: Vec<AbortHandle> = tasks.iter().map(JoinHandle::abort_handle).collect();
    let joined = async move {
        for task in tasks {
            let _ = task.await;
        }
    };

    if killed {
        if tokio::time::timeout(DRAIN_GRACE, joined).await.is_err() {
            aborts.iter().for_each(AbortHandle::abort);
        }
        return Ok(());
    }

    tokio::select! {
        _ = joined => Ok(()),
        _ = cancel.cancelled() => {
            tracing::debug!(command = label, "cancelled while draining output");
            aborts.iter().for_each(AbortHandle::abort);
            Err(Error::Cancelled(label.to_string()))
        }
    }
}

async fn drain_lines<R>(stream: R, prefix: String, sink: OutputSink)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                sink.line(&prefix, line.trim_end_matches(['\n', '\r']));
            }
            Err(e) => {
                tracing::warn!("Failed to read output for '{}': {}", prefix, e);
                break;
            }
        }
    }
}

async fn read_all<R>(stream: Option<R>) -> String
where
    R: AsyncRead + Unpin,
{
    let Some(mut stream) = stream else {
        return String::new();
    };
    let mut bytes = Vec::new();
    if let Err(e) = stream.read_to_end(&mut bytes).await {
        tracing::warn!("Failed to read command output: {}", e);
    }
    String::from_utf8_lossy(&bytes).into_owned()
}
