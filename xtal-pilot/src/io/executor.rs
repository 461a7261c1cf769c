//! The seam between the controller and whatever actually runs a stage.
//!
//! The controller is written against the [`Executor`] trait; production
//! uses [`SubprocessExecutor`], tests substitute a scripted one. Events
//! flow back over a channel so the executor can live on a worker thread
//! while a front-end streams output.

use std::path::PathBuf;
use std::sync::mpsc::{Receiver, Sender};
use std::time::Duration;

use anyhow::Result;
use tracing::instrument;

use crate::io::process;

/// One resolved invocation handed to an executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    /// Program name followed by its arguments.
    pub argv: Vec<String>,
    /// Directory the tool runs in; artifact paths in `argv` are relative
    /// to it.
    pub workdir: PathBuf,
    /// How often the executor checks for cancellation while waiting.
    pub poll_interval: Duration,
}

/// Messages an executor pushes while a tool runs.
///
/// Every `Line` is delivered before the terminal `Exited` or `Cancelled`
/// event, which is always last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecEvent {
    /// The tool process is up.
    Started { pid: u32 },
    /// One line of the tool's stdout or stderr.
    Line(String),
    /// The tool finished on its own. `code` is `None` when it died to a
    /// signal.
    Exited { code: Option<i32> },
    /// The tool was stopped after a cancel request.
    Cancelled,
}

/// Ask the executor to stop the running tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelRequest;

pub trait Executor {
    /// Run one invocation, pushing [`ExecEvent`]s onto `events` and
    /// honoring `cancel`.
    ///
    /// Tool failure is not an `Err`: it arrives as `Exited` with a
    /// non-zero code. `Err` means the run itself could not be carried
    /// out (spawn failure, broken pipes).
    fn exec(
        &self,
        request: &ExecRequest,
        events: &Sender<ExecEvent>,
        cancel: &Receiver<CancelRequest>,
    ) -> Result<()>;
}

/// Executor that spawns the tool as a child process and streams its
/// output line by line.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubprocessExecutor;

impl Executor for SubprocessExecutor {
    #[instrument(skip_all, fields(program = request.argv.first().map_or("", String::as_str)))]
    fn exec(
        &self,
        request: &ExecRequest,
        events: &Sender<ExecEvent>,
        cancel: &Receiver<CancelRequest>,
    ) -> Result<()> {
        process::stream_command(request, events, cancel)?;
        Ok(())
    }
}
