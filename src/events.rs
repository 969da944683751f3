//! Event definitions for the application event loop.
//!
//! The runner publishes `RunnerEvent`s on the same channel that carries terminal
//! input, so the shell reacts to process output and key presses in one place.

use crossterm::event::KeyEvent;

use crate::command::Command;
use crate::output::{OutputRecord, StreamKind};

/// Identifies one `start()` call on the runner.
pub type RunId = u64;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The script exited on its own. `code` is `None` when it died from a signal.
    Exited { code: Option<i32> },
    /// The run was stopped by the user.
    Cancelled,
}

/// Messages published by the process runner.
#[derive(Debug, Clone)]
pub enum RunnerEvent {
    /// The script was spawned.
    Started { run_id: RunId, pid: Option<u32> },
    /// Decoded output arrived on stdout or stderr, exactly as read; it may end mid-line.
    Output {
        run_id: RunId,
        stream: StreamKind,
        text: String,
    },
    /// The script terminated; sent exactly once per run, after both streams are drained.
    Completed {
        run_id: RunId,
        command: Command,
        record: OutputRecord,
        outcome: RunOutcome,
    },
}

/// Signals the application reacts to when asked to shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

impl ShutdownSignal {
    pub fn label(self) -> &'static str {
        match self {
            ShutdownSignal::Interrupt => "SIGINT",
            ShutdownSignal::Terminate => "SIGTERM",
        }
    }
}

/// Represents an event in the application's main event loop.
#[derive(Debug, Clone)]
pub enum Event {
    Runner(RunnerEvent),
    /// A keyboard event received from the user.
    Key(KeyEvent),
    /// The terminal window was resized.
    Resize { width: u16, height: u16 },
    /// The process received a termination signal.
    Shutdown { signal: ShutdownSignal },
}
