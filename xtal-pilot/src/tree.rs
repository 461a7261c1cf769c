//! The persistent run history: an arena of steps keyed by line number.
//!
//! Parent and child links are line numbers rather than owned references,
//! so branches form freely without ownership cycles. The tree never
//! deletes a node; abandoned and failed branches stay visible for audit
//! and retry.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::core::artifacts::ArtifactKind;
use crate::core::stage::{ROOT_SUCCESSORS, Stage};
use crate::error::PilotError;

/// Command held by the synthetic root node.
pub const ROOT_COMMAND: &str = "Root";

/// Run state of one step.
///
/// `Running` is transient: it exists only while an executor is active and
/// is normalized back to `Pending` when a session is restored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared "busy generating an auxiliary artifact" marker on a step.
///
/// Set by the controller around report/prediction generation and polled
/// by the watcher; it carries no correctness weight and is not persisted.
#[derive(Debug, Clone, Default)]
pub struct AuxFlag(Arc<AtomicBool>);

impl AuxFlag {
    pub fn set(&self, value: bool) {
        self.0.store(value, Ordering::Relaxed);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// One attempted-or-pending stage invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepNode {
    /// Tree-wide ordinal, assigned at creation and never reused.
    pub line_number: u32,
    /// Stage name followed by its parameter strings. Empty on a freshly
    /// branched placeholder until the user supplies a command.
    pub command: Vec<String>,
    pub status: StepStatus,
    /// Line number of the parent step; `None` only on the root.
    pub parent: Option<u32>,
    /// Creation order, never reordered.
    pub children: Vec<u32>,
    /// Semantic kind to generated file path, registered when the command
    /// is resolved rather than after success.
    pub artifacts: BTreeMap<ArtifactKind, PathBuf>,
    /// Captured-output file of the last failed run, if any.
    pub error_log: Option<PathBuf>,
    #[serde(skip)]
    aux: AuxFlag,
}

// The aux flag is transient display state and takes no part in equality.
impl PartialEq for StepNode {
    fn eq(&self, other: &Self) -> bool {
        self.line_number == other.line_number
            && self.command == other.command
            && self.status == other.status
            && self.parent == other.parent
            && self.children == other.children
            && self.artifacts == other.artifacts
            && self.error_log == other.error_log
    }
}

impl Eq for StepNode {}

impl StepNode {
    /// Stage this step runs, if its command holds a known stage name.
    pub fn stage(&self) -> Option<Stage> {
        self.command.first().and_then(|name| Stage::parse(name))
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Display form of the command, `(unset)` for a placeholder.
    pub fn label(&self) -> String {
        if self.command.is_empty() {
            "(unset)".to_string()
        } else {
            self.command.join(" ")
        }
    }

    pub fn aux_flag(&self) -> AuxFlag {
        self.aux.clone()
    }

    /// Replace the command of a step that has not run yet.
    pub fn set_command(&mut self, command: Vec<String>) -> Result<(), PilotError> {
        if self.status != StepStatus::Pending {
            return Err(PilotError::InvalidTransition(format!(
                "cannot edit step {}: its run is {}",
                self.line_number, self.status
            )));
        }
        self.command = command;
        Ok(())
    }

    pub fn mark_running(&mut self) {
        self.status = StepStatus::Running;
    }

    /// Record success and merge the produced artifact paths.
    pub fn mark_succeeded(&mut self, artifacts: BTreeMap<ArtifactKind, PathBuf>) {
        self.artifacts.extend(artifacts);
        self.status = StepStatus::Succeeded;
    }

    pub fn mark_failed(&mut self) {
        self.status = StepStatus::Failed;
    }

    /// Cancellation support: back to `Pending` with pre-registered
    /// artifacts and any stale error log cleared, ready to edit and retry.
    pub fn revert_to_pending(&mut self) {
        self.status = StepStatus::Pending;
        self.artifacts.clear();
        self.error_log = None;
    }
}

/// Arena of [`StepNode`]s plus the current position and ordinal counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTree {
    nodes: BTreeMap<u32, StepNode>,
    current: u32,
    next_line_number: u32,
}

impl RunTree {
    /// A fresh tree holding only the root, which counts as succeeded so
    /// that an import step may run beneath it.
    pub fn new() -> Self {
        let root = StepNode {
            line_number: 0,
            command: vec![ROOT_COMMAND.to_string()],
            status: StepStatus::Succeeded,
            parent: None,
            children: Vec::new(),
            artifacts: BTreeMap::new(),
            error_log: None,
            aux: AuxFlag::default(),
        };
        Self {
            nodes: BTreeMap::from([(0, root)]),
            current: 0,
            next_line_number: 1,
        }
    }

    pub fn current_line(&self) -> u32 {
        self.current
    }

    pub fn current_node(&self) -> Result<&StepNode, PilotError> {
        self.node(self.current)
    }

    pub fn node(&self, line: u32) -> Result<&StepNode, PilotError> {
        self.nodes.get(&line).ok_or(PilotError::NotFound(line))
    }

    pub(crate) fn node_mut(&mut self, line: u32) -> Result<&mut StepNode, PilotError> {
        self.nodes.get_mut(&line).ok_or(PilotError::NotFound(line))
    }

    pub fn step_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn next_line_number(&self) -> u32 {
        self.next_line_number
    }

    /// All steps in line-number order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &StepNode)> + '_ {
        self.nodes.iter().map(|(line, node)| (*line, node))
    }

    /// Append a new step under `parent_line`.
    ///
    /// A non-empty command must start with a stage that is a legal
    /// successor of the parent's stage; an empty command is a placeholder
    /// (used by branching) and is validated once it is edited. On failure
    /// the tree is unchanged.
    pub fn create_child(
        &mut self,
        parent_line: u32,
        command: Vec<String>,
    ) -> Result<u32, PilotError> {
        let parent = self.node(parent_line)?;
        if let Some(first) = command.first() {
            let stage = Self::parse_stage(first)?;
            self.check_successor(parent, stage)?;
        }

        let line = self.next_line_number;
        self.next_line_number += 1;
        let node = StepNode {
            line_number: line,
            command,
            status: StepStatus::Pending,
            parent: Some(parent_line),
            children: Vec::new(),
            artifacts: BTreeMap::new(),
            error_log: None,
            aux: AuxFlag::default(),
        };
        self.nodes.insert(line, node);
        if let Some(parent) = self.nodes.get_mut(&parent_line) {
            parent.children.push(line);
        }
        Ok(line)
    }

    /// Replace the command of a pending step, revalidating the stage
    /// against the step's parent.
    pub fn edit_command(&mut self, line: u32, command: Vec<String>) -> Result<(), PilotError> {
        let parent_line = self.node(line)?.parent;
        if let Some(first) = command.first() {
            let stage = Self::parse_stage(first)?;
            let Some(parent_line) = parent_line else {
                return Err(PilotError::InvalidTransition(
                    "the root does not take a stage command".to_string(),
                ));
            };
            let parent = self.node(parent_line)?;
            self.check_successor(parent, stage)?;
        }
        self.node_mut(line)?.set_command(command)
    }

    /// Move the current pointer.
    pub fn goto(&mut self, line: u32) -> Result<&StepNode, PilotError> {
        if !self.nodes.contains_key(&line) {
            return Err(PilotError::NotFound(line));
        }
        self.current = line;
        self.node(line)
    }

    /// Make a sibling of `line`: a placeholder child of its parent.
    ///
    /// Existing children are never touched, and the root (which has no
    /// parent to branch from) is refused.
    pub fn branch_from(&mut self, line: u32) -> Result<u32, PilotError> {
        let parent = self.node(line)?.parent.ok_or_else(|| {
            PilotError::InvalidTransition("the root has no parent to branch from".to_string())
        })?;
        self.create_child(parent, Vec::new())
    }

    /// Stages a run request would accept at `line` right now: successors
    /// of the step's own stage once it has succeeded, successors of its
    /// parent while it is still pending (a run overwrites in place), and
    /// nothing while it is running or failed.
    pub fn available_stages(&self, line: u32) -> Result<&'static [Stage], PilotError> {
        let node = self.node(line)?;
        match node.status {
            StepStatus::Running | StepStatus::Failed => Ok(&[]),
            StepStatus::Succeeded => self.successors_of(node),
            StepStatus::Pending => match node.parent {
                Some(parent) => self.successors_of(self.node(parent)?),
                None => Ok(&[]),
            },
        }
    }

    /// Forget transient run state after a restore.
    pub fn normalize_restored(&mut self) {
        for node in self.nodes.values_mut() {
            if node.status == StepStatus::Running {
                node.status = StepStatus::Pending;
            }
        }
    }

    fn parse_stage(name: &str) -> Result<Stage, PilotError> {
        Stage::parse(name)
            .ok_or_else(|| PilotError::InvalidTransition(format!("unknown stage '{name}'")))
    }

    fn successors_of(&self, node: &StepNode) -> Result<&'static [Stage], PilotError> {
        if node.is_root() {
            return Ok(ROOT_SUCCESSORS);
        }
        match node.stage() {
            Some(stage) => Ok(stage.successors()),
            None => Err(PilotError::InvalidTransition(format!(
                "step {} has no stage to follow from",
                node.line_number
            ))),
        }
    }

    pub(crate) fn check_successor(
        &self,
        parent: &StepNode,
        stage: Stage,
    ) -> Result<(), PilotError> {
        if !self.successors_of(parent)?.contains(&stage) {
            let from = parent.command.first().map_or("(unset)", String::as_str);
            return Err(PilotError::InvalidTransition(format!(
                "stage '{stage}' cannot follow '{from}'"
            )));
        }
        Ok(())
    }
}

impl Default for RunTree {
    fn default() -> Self {
        Self::new()
    }
}
