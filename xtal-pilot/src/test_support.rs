//! Scripted executors and workspace builders for tests.
//!
//! Compiled for this crate's own tests and, behind the `test-support`
//! feature, for integration tests of downstream front-ends.

use std::collections::VecDeque;
use std::fs;
use std::sync::Mutex;
use std::sync::mpsc::{Receiver, Sender};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};

use crate::io::executor::{CancelRequest, ExecEvent, ExecRequest, Executor};
use crate::io::workspace::{InitOptions, Workspace, init_workspace};

/// Scripted behavior for one executor invocation.
#[derive(Debug, Clone)]
pub struct ScriptedRun {
    /// Output lines streamed before the terminal event.
    pub lines: Vec<String>,
    /// Exit code reported when the run is not cancelled.
    pub exit_code: i32,
    /// Files written under the request's workdir before exiting, as
    /// (relative path, contents) pairs.
    pub files: Vec<(String, String)>,
    /// Park after streaming until a cancel request arrives, then report
    /// `Cancelled`. Falls back to a normal exit after a few seconds so a
    /// forgotten cancel cannot hang a test run.
    pub wait_for_cancel: bool,
}

impl ScriptedRun {
    pub fn success() -> Self {
        Self {
            lines: Vec::new(),
            exit_code: 0,
            files: Vec::new(),
            wait_for_cancel: false,
        }
    }

    pub fn failure(exit_code: i32) -> Self {
        Self {
            exit_code,
            ..Self::success()
        }
    }

    pub fn cancelled() -> Self {
        Self {
            wait_for_cancel: true,
            ..Self::success()
        }
    }

    pub fn with_lines(mut self, lines: &[&str]) -> Self {
        self.lines = strings(lines);
        self
    }

    pub fn with_file(mut self, path: &str, contents: &str) -> Self {
        self.files.push((path.to_string(), contents.to_string()));
        self
    }
}

/// An [`Executor`] that replays scripted runs and records every request.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    script: Mutex<VecDeque<ScriptedRun>>,
    requests: Mutex<Vec<ExecRequest>>,
}

impl ScriptedExecutor {
    pub fn new(runs: Vec<ScriptedRun>) -> Self {
        Self {
            script: Mutex::new(runs.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every request seen so far, in order.
    pub fn requests(&self) -> Vec<ExecRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    /// Argv of the `index`-th request.
    pub fn argv(&self, index: usize) -> Vec<String> {
        self.requests()[index].argv.clone()
    }
}

impl Executor for ScriptedExecutor {
    fn exec(
        &self,
        request: &ExecRequest,
        events: &Sender<ExecEvent>,
        cancel: &Receiver<CancelRequest>,
    ) -> Result<()> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        let run = self
            .script
            .lock()
            .expect("script lock")
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted run left for {:?}", request.argv))?;

        let _ = events.send(ExecEvent::Started { pid: 4242 });
        for line in &run.lines {
            let _ = events.send(ExecEvent::Line(line.clone()));
        }
        for (rel, contents) in &run.files {
            let path = request.workdir.join(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create {}", parent.display()))?;
            }
            fs::write(&path, contents)
                .with_context(|| format!("write scripted file {}", path.display()))?;
        }

        if run.wait_for_cancel && cancel.recv_timeout(Duration::from_secs(5)).is_ok() {
            let _ = events.send(ExecEvent::Cancelled);
            return Ok(());
        }
        let _ = events.send(ExecEvent::Exited {
            code: Some(run.exit_code),
        });
        Ok(())
    }
}

/// Initialize a session in a fresh temporary directory.
pub fn temp_workspace() -> Result<(tempfile::TempDir, Workspace)> {
    let temp = tempfile::tempdir().context("create tempdir")?;
    let workspace = init_workspace(temp.path(), &InitOptions::default())?;
    Ok((temp, workspace))
}

/// Owned strings from literals, for command and parameter lists.
pub fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
