//! Process execution for kima script runs.
//!
//! This module contains the `ProcessRunner`, which owns at most one running
//! script at a time. Output is read in chunks from both pipes, published as
//! `RunnerEvent::Output` as soon as it arrives, and collected into an
//! `OutputRecord` that travels with the single `RunnerEvent::Completed` message
//! sent when the child terminates.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};

use crate::command::{Command as KimaCommand, Invocation};
use crate::events::{Event, RunId, RunOutcome, RunnerEvent};
use crate::output::{OutputRecord, StreamKind, Utf8Decoder};

/// File name of the script looked up next to the executable.
pub const SCRIPT_NAME: &str = "kima.sh";

/// Whether a script run is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
}

/// Reasons a run could not be started. None of these are fatal to the application.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("script not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("script is not executable: {}", .0.display())]
    NotExecutable(PathBuf),
    #[error("`{0}` is still running; stop it before starting another command")]
    Busy(KimaCommand),
    #[error("failed to launch {}: {source}", .path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Owns the single in-flight script process.
pub struct ProcessRunner {
    script: PathBuf,
    event_tx: mpsc::Sender<Event>,
    next_run: RunId,
    active: Option<ActiveRun>,
}

struct ActiveRun {
    run_id: RunId,
    command: KimaCommand,
    cancel: Option<oneshot::Sender<()>>,
}

impl ProcessRunner {
    pub fn new(script: PathBuf, event_tx: mpsc::Sender<Event>) -> Self {
        Self {
            script,
            event_tx,
            next_run: 1,
            active: None,
        }
    }

    pub fn script(&self) -> &Path {
        &self.script
    }

    pub fn state(&self) -> RunState {
        if self.active.is_some() {
            RunState::Running
        } else {
            RunState::Idle
        }
    }

    /// Launches `script command [argument]`.
    ///
    /// Must be called from within a tokio runtime. On success the run is
    /// supervised by a background task that publishes its output and exactly one
    /// completion event.
    pub fn start(&mut self, invocation: &Invocation) -> Result<RunId, LaunchError> {
        if let Some(active) = &self.active {
            return Err(LaunchError::Busy(active.command));
        }
        check_script(&self.script)?;

        let mut command = Command::new(&self.script);
        command
            .args(invocation.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group, so stopping a run also reaches whatever the script spawned.
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn().map_err(|source| {
            if source.kind() == io::ErrorKind::PermissionDenied {
                LaunchError::NotExecutable(self.script.clone())
            } else {
                LaunchError::Spawn {
                    path: self.script.clone(),
                    source,
                }
            }
        })?;

        let run_id = self.next_run;
        self.next_run += 1;
        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.active = Some(ActiveRun {
            run_id,
            command: invocation.command,
            cancel: Some(cancel_tx),
        });
        tracing::info!(
            run_id,
            pid = child.id(),
            command = %invocation.display(&self.script),
            "spawned script"
        );
        tokio::spawn(supervise(
            run_id,
            invocation.command,
            child,
            cancel_rx,
            self.event_tx.clone(),
        ));
        Ok(run_id)
    }

    /// Forcibly terminates the running script, if any.
    ///
    /// Returns `true` when a run was signalled. Its completion still arrives as a
    /// `RunnerEvent::Completed` with `RunOutcome::Cancelled`.
    pub fn stop(&mut self) -> bool {
        let Some(active) = self.active.as_mut() else {
            return false;
        };
        match active.cancel.take() {
            Some(cancel) => {
                tracing::info!(run_id = active.run_id, "stopping script");
                let _ = cancel.send(());
                true
            }
            None => false,
        }
    }

    /// Returns the runner to idle once the completion for `run_id` has been received.
    pub fn on_completion(&mut self, run_id: RunId) -> bool {
        match &self.active {
            Some(active) if active.run_id == run_id => {
                self.active = None;
                true
            }
            _ => false,
        }
    }
}

/// Resolves the script path: an explicit override, else `kima.sh` beside the executable.
pub fn resolve_script(override_path: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = override_path {
        return Ok(path);
    }
    let exe = std::env::current_exe().context("failed to locate the running executable")?;
    let dir = exe
        .parent()
        .with_context(|| format!("executable {} has no parent directory", exe.display()))?;
    Ok(dir.join(SCRIPT_NAME))
}

/// Startup capability check: the script must exist and be executable.
pub fn preflight(script: &Path) -> Result<()> {
    check_script(script).with_context(|| {
        format!(
            "kima script unavailable; install it next to this binary or pass --script ({})",
            script.display()
        )
    })
}

fn check_script(script: &Path) -> Result<(), LaunchError> {
    let metadata = match std::fs::metadata(script) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(LaunchError::NotFound(script.to_path_buf()));
        }
        Err(source) => {
            return Err(LaunchError::Spawn {
                path: script.to_path_buf(),
                source,
            });
        }
    };
    if !metadata.is_file() {
        return Err(LaunchError::NotExecutable(script.to_path_buf()));
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(LaunchError::NotExecutable(script.to_path_buf()));
        }
    }
    Ok(())
}

async fn supervise(
    run_id: RunId,
    command: KimaCommand,
    mut child: Child,
    cancel_rx: oneshot::Receiver<()>,
    tx: mpsc::Sender<Event>,
) {
    let pid = child.id();
    let _ = tx
        .send(Event::Runner(RunnerEvent::Started { run_id, pid }))
        .await;

    let stdout = child
        .stdout
        .take()
        .map(|out| tokio::spawn(read_stream(run_id, StreamKind::Stdout, out, tx.clone())));
    let stderr = child
        .stderr
        .take()
        .map(|err| tokio::spawn(read_stream(run_id, StreamKind::Stderr, err, tx.clone())));

    let mut cancel_rx = cancel_rx;
    let (mut outcome, exit_code) = tokio::select! {
        status = child.wait() => {
            let code = match status {
                Ok(status) => status.code(),
                Err(err) => {
                    tracing::warn!(run_id, error = %err, "failed to wait for script");
                    None
                }
            };
            (RunOutcome::Exited { code }, code)
        }
        _ = &mut cancel_rx => {
            if let Some(pid) = pid {
                kill_group(pid);
            }
            let _ = child.kill().await;
            let _ = child.wait().await;
            (RunOutcome::Cancelled, None)
        }
    };

    let drain = async move {
        let mut record = OutputRecord::default();
        for (stream, handle) in [(StreamKind::Stdout, stdout), (StreamKind::Stderr, stderr)] {
            let Some(handle) = handle else { continue };
            record.push(stream, &handle.await.unwrap_or_default());
        }
        record
    };
    tokio::pin!(drain);
    // Background processes left behind by the script can hold the pipes open.
    let mut record = if outcome == RunOutcome::Cancelled {
        drain.await
    } else {
        tokio::select! {
            record = &mut drain => record,
            _ = &mut cancel_rx => {
                if let Some(pid) = pid {
                    kill_group(pid);
                }
                // The stop is what the user sees; the record keeps the script's own exit code.
                outcome = RunOutcome::Cancelled;
                drain.await
            }
        }
    };
    record.exit_code = exit_code;

    match outcome {
        RunOutcome::Exited { code } => tracing::info!(run_id, ?code, "script exited"),
        RunOutcome::Cancelled => tracing::info!(run_id, ?exit_code, "script cancelled"),
    }
    let _ = tx
        .send(Event::Runner(RunnerEvent::Completed {
            run_id,
            command,
            record,
            outcome,
        }))
        .await;
}

// Every read is published immediately, so output without a trailing newline
// (progress text, prompts) shows up while the script is still running.
async fn read_stream<R>(
    run_id: RunId,
    stream: StreamKind,
    mut reader: R,
    tx: mpsc::Sender<Event>,
) -> String
where
    R: AsyncRead + Unpin,
{
    let mut decoder = Utf8Decoder::default();
    let mut collected = String::new();
    let mut buf = vec![0u8; 8 * 1024];
    loop {
        let text = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => decoder.decode(&buf[..n]),
            Err(err) => {
                tracing::warn!(run_id, ?stream, error = %err, "stopped reading script output");
                break;
            }
        };
        publish(run_id, stream, text, &mut collected, &tx).await;
    }
    publish(run_id, stream, decoder.finish(), &mut collected, &tx).await;
    collected
}

async fn publish(
    run_id: RunId,
    stream: StreamKind,
    text: String,
    collected: &mut String,
    tx: &mpsc::Sender<Event>,
) {
    if text.is_empty() {
        return;
    }
    collected.push_str(&text);
    let _ = tx
        .send(Event::Runner(RunnerEvent::Output {
            run_id,
            stream,
            text,
        }))
        .await;
}

#[cfg(unix)]
fn kill_group(pid: u32) {
    unsafe {
        let _ = libc::kill(-(pid as i32), libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) {}
