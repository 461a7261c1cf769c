//! The run controller: turns "run this stage here" into a step, an
//! external process, and a persisted outcome.
//!
//! Request handling is two-phase. Pre-flight checks (legal successor,
//! inputs present) fail with typed errors and leave the tree untouched.
//! Once the step exists and its command is being resolved, failures are
//! no longer thrown: they are recorded on the step itself, because from
//! that point on the attempt is part of the history.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::artifacts::{self, ArtifactKind, required_inputs};
use crate::core::command::{self, AuxKind, ResolvedCommand};
use crate::core::stage::Stage;
use crate::error::PilotError;
use crate::io::executor::{CancelRequest, ExecEvent, ExecRequest, Executor};
use crate::io::session_store::{load_session, save_session};
use crate::io::workspace::Workspace;
use crate::tree::{RunTree, StepNode, StepStatus};

/// Result of one completed run attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub line_number: u32,
    /// `Succeeded`, `Failed`, or `Pending` after a cancellation.
    pub status: StepStatus,
    pub exit_code: Option<i32>,
    /// Captured-output file of a failed run, relative to the session root.
    pub error_log: Option<PathBuf>,
}

/// Outcome of [`RunController::launch`].
#[derive(Debug)]
pub enum Launched {
    /// The executor is running. Drain events, then hand the value back to
    /// [`RunController::finish`].
    Running(RunningStep),
    /// The command could not be resolved after the step was already
    /// created; the failure is recorded on the step.
    Failed(StepOutcome),
}

/// A launched, not yet finished step.
#[derive(Debug)]
pub struct RunningStep {
    line_number: u32,
    planned: BTreeMap<ArtifactKind, PathBuf>,
    events: Receiver<ExecEvent>,
    cancel: Sender<CancelRequest>,
    worker: JoinHandle<Result<()>>,
    pid: Option<u32>,
    lines: Vec<String>,
    terminal: Option<Terminal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Terminal {
    Exited { code: Option<i32> },
    Cancelled,
}

impl RunningStep {
    pub fn line_number(&self) -> u32 {
        self.line_number
    }

    /// Pid of the external process, once its `Started` event has been
    /// observed.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Ask the executor to kill the running tool. Returns immediately;
    /// the result arrives as a `Cancelled` event.
    pub fn request_cancel(&self) {
        let _ = self.cancel.send(CancelRequest);
    }

    /// Next event from the executor, `None` once the stream is drained.
    pub fn next_event(&mut self) -> Option<ExecEvent> {
        let event = self.events.recv().ok()?;
        match &event {
            ExecEvent::Started { pid } => self.pid = Some(*pid),
            ExecEvent::Line(line) => self.lines.push(line.clone()),
            ExecEvent::Exited { code } => self.terminal = Some(Terminal::Exited { code: *code }),
            ExecEvent::Cancelled => self.terminal = Some(Terminal::Cancelled),
        }
        Some(event)
    }
}

/// Orchestrates one session: the tree, its persistence, and an executor.
pub struct RunController<E> {
    workspace: Workspace,
    executor: Arc<E>,
    tree: RunTree,
}

impl<E: Executor + Send + Sync + 'static> RunController<E> {
    /// Open the workspace's persisted session.
    pub fn open(workspace: Workspace, executor: E) -> Result<Self> {
        let tree = load_session(&workspace.session_path())?;
        Ok(Self {
            workspace,
            executor: Arc::new(executor),
            tree,
        })
    }

    pub fn tree(&self) -> &RunTree {
        &self.tree
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn current(&self) -> Result<&StepNode> {
        Ok(self.tree.current_node()?)
    }

    /// Move the current pointer and persist.
    pub fn goto(&mut self, line: u32) -> Result<u32> {
        self.tree.goto(line)?;
        self.persist()?;
        debug!(line, "moved current step");
        Ok(line)
    }

    /// Make a pending sibling of the current step, move to it, persist.
    pub fn branch(&mut self) -> Result<u32> {
        let line = self.tree.branch_from(self.tree.current_line())?;
        self.tree.goto(line)?;
        self.persist()?;
        info!(line, "branched");
        Ok(line)
    }

    /// Run a stage to completion, forwarding output lines to `sink`.
    pub fn run(
        &mut self,
        stage: &str,
        params: Vec<String>,
        mut sink: impl FnMut(&str),
    ) -> Result<StepOutcome> {
        match self.launch(stage, params)? {
            Launched::Failed(outcome) => Ok(outcome),
            Launched::Running(mut running) => {
                while let Some(event) = running.next_event() {
                    if let ExecEvent::Line(line) = &event {
                        sink(line);
                    }
                }
                self.finish(running)
            }
        }
    }

    /// Start a stage without waiting for it.
    ///
    /// On `Ok(Launched::Running(_))` the step is `Running` with its
    /// planned artifacts registered; the caller drains events (streaming
    /// them to a display, optionally cancelling) and then calls
    /// [`RunController::finish`].
    #[instrument(skip_all, fields(stage = %stage))]
    pub fn launch(&mut self, stage: &str, params: Vec<String>) -> Result<Launched> {
        let stage = Stage::parse(stage)
            .ok_or_else(|| PilotError::InvalidTransition(format!("unknown stage '{stage}'")))?;
        let params = self.apply_import_template(stage, params);
        self.preflight(stage, &params)?;
        let line = self.advance_or_edit(stage, &params)?;

        // The step exists now; a resolution failure is recorded, not thrown.
        let resolved = match self.resolve(stage, line, &params) {
            Ok(resolved) => resolved,
            Err(err) => {
                let outcome = self.record_failure(line, None, &[], Some(&err))?;
                self.persist()?;
                return Ok(Launched::Failed(outcome));
            }
        };
        debug!(line, argv = ?resolved.argv, "command resolved");

        let node = self.tree.node_mut(line)?;
        node.artifacts
            .extend(resolved.artifacts.iter().map(|(k, v)| (*k, v.clone())));
        node.mark_running();
        info!(line, %stage, "step started");

        let (events_tx, events_rx) = mpsc::channel();
        let (cancel_tx, cancel_rx) = mpsc::channel();
        let request = ExecRequest {
            argv: resolved.argv,
            workdir: self.workspace.root().to_path_buf(),
            poll_interval: self.workspace.config().poll_interval(),
        };
        let executor = Arc::clone(&self.executor);
        let worker = std::thread::spawn(move || executor.exec(&request, &events_tx, &cancel_rx));

        Ok(Launched::Running(RunningStep {
            line_number: line,
            planned: resolved.artifacts,
            events: events_rx,
            cancel: cancel_tx,
            worker,
            pid: None,
            lines: Vec::new(),
            terminal: None,
        }))
    }

    /// Apply the outcome of a launched step and persist the tree.
    pub fn finish(&mut self, mut running: RunningStep) -> Result<StepOutcome> {
        while running.next_event().is_some() {}
        let worker_result = match running.worker.join() {
            Ok(result) => result,
            Err(_) => Err(anyhow!("executor worker panicked")),
        };
        let line = running.line_number;

        let outcome = match (running.terminal, worker_result) {
            (Some(Terminal::Cancelled), _) => {
                self.tree.node_mut(line)?.revert_to_pending();
                warn!(line, "step cancelled, back to pending");
                StepOutcome {
                    line_number: line,
                    status: StepStatus::Pending,
                    exit_code: None,
                    error_log: None,
                }
            }
            (Some(Terminal::Exited { code: Some(0) }), Ok(())) => {
                self.tree.node_mut(line)?.mark_succeeded(running.planned);
                info!(line, "step succeeded");
                StepOutcome {
                    line_number: line,
                    status: StepStatus::Succeeded,
                    exit_code: Some(0),
                    error_log: None,
                }
            }
            (Some(Terminal::Exited { code }), Ok(())) => {
                self.record_failure(line, code, &running.lines, None)?
            }
            (_, Err(err)) => self.record_failure(line, None, &running.lines, Some(&err))?,
            (None, Ok(())) => self.record_failure(
                line,
                None,
                &running.lines,
                Some(&anyhow!("executor finished without reporting an exit")),
            )?,
        };
        self.persist()?;
        Ok(outcome)
    }

    /// Generate the standalone report page for the current step.
    ///
    /// Soft operation: stages with nothing to report and tool failures
    /// both come back as `Ok(None)`.
    pub fn generate_report(&mut self) -> Result<Option<PathBuf>> {
        self.generate_aux(AuxKind::Report)
    }

    /// Generate predicted reflection positions for the current step.
    pub fn generate_predictions(&mut self) -> Result<Option<PathBuf>> {
        self.generate_aux(AuxKind::Predictions)
    }

    fn generate_aux(&mut self, kind: AuxKind) -> Result<Option<PathBuf>> {
        let node = self.tree.current_node()?;
        if node.status != StepStatus::Succeeded {
            debug!(line = node.line_number, %kind, "step has not succeeded, nothing to generate");
            return Ok(None);
        }
        let Some(stage) = node.stage() else {
            return Ok(None);
        };
        let line = node.line_number;
        let Some(resolved) = command::resolve_aux(
            kind,
            stage,
            line,
            &node.artifacts,
            self.workspace.files_dir_rel(),
            &self.workspace.config().tool_prefix,
        ) else {
            debug!(line, %kind, "stage has no such auxiliary output");
            return Ok(None);
        };

        let flag = node.aux_flag();
        flag.set(true);
        let result = self.run_aux_tool(resolved.argv);
        flag.set(false);

        match result {
            Ok(Some(0)) => {
                let path = resolved.artifacts.values().next().cloned();
                self.tree.node_mut(line)?.artifacts.extend(resolved.artifacts);
                self.persist()?;
                info!(line, %kind, "auxiliary artifact generated");
                Ok(path)
            }
            Ok(code) => {
                warn!(line, %kind, exit_code = ?code, "generator failed, skipping");
                Ok(None)
            }
            Err(err) => {
                warn!(line, %kind, error = %err, "generator failed, skipping");
                Ok(None)
            }
        }
    }

    /// Run a generator inline and report its exit code.
    fn run_aux_tool(&self, argv: Vec<String>) -> Result<Option<i32>> {
        let (events_tx, events_rx) = mpsc::channel();
        let (_cancel_tx, cancel_rx) = mpsc::channel();
        let request = ExecRequest {
            argv,
            workdir: self.workspace.root().to_path_buf(),
            poll_interval: self.workspace.config().poll_interval(),
        };
        self.executor.exec(&request, &events_tx, &cancel_rx)?;
        drop(events_tx);

        let mut code = None;
        for event in events_rx {
            if let ExecEvent::Exited { code: c } = event {
                code = c;
            }
        }
        Ok(code)
    }

    fn apply_import_template(&self, stage: Stage, mut params: Vec<String>) -> Vec<String> {
        if stage == Stage::Import
            && !command::import_has_input(&params)
            && let Some(template) = &self.workspace.config().import_template
        {
            debug!(template, "filling import input from configured template");
            params.push(format!("template={template}"));
        }
        params
    }

    /// All checks that must pass before the tree is touched.
    fn preflight(&self, stage: Stage, params: &[String]) -> Result<(), PilotError> {
        let current = self.tree.current_node()?;
        match current.status {
            StepStatus::Running => {
                return Err(PilotError::InvalidTransition(format!(
                    "step {} is still running",
                    current.line_number
                )));
            }
            StepStatus::Failed => {
                return Err(PilotError::InvalidTransition(format!(
                    "step {} failed; goto another step or branch before running again",
                    current.line_number
                )));
            }
            StepStatus::Succeeded | StepStatus::Pending => {}
        }

        // A succeeded current step becomes the parent; a pending one is
        // overwritten in place, so its own parent stays the parent.
        let parent_line = match current.status {
            StepStatus::Succeeded => current.line_number,
            _ => current.parent.ok_or_else(|| {
                PilotError::InvalidTransition("the root step cannot be rerun".to_string())
            })?,
        };
        let parent = self.tree.node(parent_line)?;
        self.tree.check_successor(parent, stage)?;

        if stage == Stage::Import && !command::import_has_input(params) {
            return Err(PilotError::MissingInput);
        }
        for &kind in required_inputs(stage) {
            require_artifact(parent, stage, kind)?;
        }
        if stage == Stage::Reindex {
            let grandparent_line = parent.parent.ok_or_else(|| {
                PilotError::InvalidTransition(
                    "reindex needs a reflection-producing step above the lattice search"
                        .to_string(),
                )
            })?;
            let grandparent = self.tree.node(grandparent_line)?;
            require_artifact(grandparent, stage, ArtifactKind::ReflectionData)?;
        }
        Ok(())
    }

    /// Turn the request into a concrete step: a new child under a
    /// succeeded current step, or the current pending step edited in
    /// place. Returns the step's line number.
    fn advance_or_edit(&mut self, stage: Stage, params: &[String]) -> Result<u32, PilotError> {
        let mut command = Vec::with_capacity(params.len() + 1);
        command.push(stage.as_str().to_string());
        command.extend(params.iter().cloned());

        let current = self.tree.current_node()?;
        if current.status == StepStatus::Succeeded {
            let line = self.tree.create_child(current.line_number, command)?;
            self.tree.goto(line)?;
            Ok(line)
        } else {
            let line = current.line_number;
            self.tree.edit_command(line, command)?;
            Ok(line)
        }
    }

    fn resolve(&self, stage: Stage, line: u32, params: &[String]) -> Result<ResolvedCommand> {
        let files_dir = self.workspace.files_dir_rel();
        let prefix = &self.workspace.config().tool_prefix;
        let node = self.tree.node(line)?;
        let parent_line = node
            .parent
            .ok_or_else(|| anyhow!("step {line} has no parent"))?;
        let parent = self.tree.node(parent_line)?;

        if stage == Stage::Reindex {
            let solution = command::reindex_solution(params);
            let summary = parent
                .artifacts
                .get(&ArtifactKind::ExperimentDescription)
                .ok_or_else(|| anyhow!("step {parent_line} has no lattice summary"))?;
            let change_of_basis = self.read_change_of_basis(summary, solution)?;
            let grandparent_line = parent
                .parent
                .ok_or_else(|| anyhow!("step {parent_line} has no parent"))?;
            let reflections = self
                .tree
                .node(grandparent_line)?
                .artifacts
                .get(&ArtifactKind::ReflectionData)
                .ok_or_else(|| anyhow!("step {grandparent_line} has no reflection data"))?;
            Ok(command::resolve_reindex(
                line,
                solution,
                &change_of_basis,
                parent_line,
                reflections,
                files_dir,
                prefix,
            ))
        } else {
            Ok(command::resolve_standard(
                stage,
                line,
                params,
                parent_line,
                &parent.artifacts,
                files_dir,
                prefix,
            )?)
        }
    }

    /// Look up the change-of-basis operator for a solution in the lattice
    /// search's summary file.
    fn read_change_of_basis(&self, summary_rel: &Path, solution: u32) -> Result<String> {
        let path = self.workspace.resolve(summary_rel);
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("failed to read lattice summary {}", path.display()))?;
        let summary: serde_json::Value = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse lattice summary {}", path.display()))?;
        summary
            .get(solution.to_string())
            .and_then(|entry| entry.get("cb_op"))
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                anyhow!(
                    "no change-of-basis operator for solution {solution} in {}",
                    path.display()
                )
            })
    }

    /// Mark the step failed and capture its output to an error log.
    fn record_failure(
        &mut self,
        line: u32,
        exit_code: Option<i32>,
        lines: &[String],
        fault: Option<&anyhow::Error>,
    ) -> Result<StepOutcome> {
        let rel = artifacts::error_log_path(line, self.workspace.files_dir_rel());
        let path = self.workspace.resolve(&rel);
        let report = failure_report(
            lines,
            exit_code,
            fault,
            self.workspace.config().output_limit_bytes,
        );
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(&path, report)
            .with_context(|| format!("failed to write error log {}", path.display()))?;

        let node = self.tree.node_mut(line)?;
        node.error_log = Some(rel.clone());
        node.mark_failed();
        warn!(line, exit_code = ?exit_code, "step failed");
        Ok(StepOutcome {
            line_number: line,
            status: StepStatus::Failed,
            exit_code,
            error_log: Some(rel),
        })
    }

    fn persist(&self) -> Result<()> {
        save_session(&self.workspace.session_path(), &self.tree)
    }
}

fn require_artifact(node: &StepNode, stage: Stage, kind: ArtifactKind) -> Result<(), PilotError> {
    if node.status != StepStatus::Succeeded || !node.artifacts.contains_key(&kind) {
        return Err(PilotError::MissingArtifact {
            stage,
            kind,
            from: node.line_number,
        });
    }
    Ok(())
}

/// Bounded capture of a failed run's output plus a terminal note. Keeps
/// a prefix of the stream; everything after the first line that does not
/// fit is dropped.
fn failure_report(
    lines: &[String],
    exit_code: Option<i32>,
    fault: Option<&anyhow::Error>,
    limit: usize,
) -> String {
    let mut buf = String::new();
    let mut dropped = 0usize;
    for line in lines {
        if dropped > 0 || buf.len() + line.len() + 1 > limit {
            dropped += line.len() + 1;
            continue;
        }
        buf.push_str(line);
        buf.push('\n');
    }
    if dropped > 0 {
        buf.push_str(&format!("[output truncated, {dropped} bytes dropped]\n"));
    }
    match (exit_code, fault) {
        (Some(code), _) => buf.push_str(&format!("[exited with status {code}]\n")),
        (None, Some(err)) => buf.push_str(&format!("[run aborted: {err:#}]\n")),
        (None, None) => buf.push_str("[exited without a status code]\n"),
    }
    buf
}
