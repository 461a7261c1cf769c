//! Typed failures shared by the tree and controller.

use thiserror::Error;

use crate::core::artifacts::ArtifactKind;
use crate::core::stage::Stage;

/// Failure kinds returned synchronously by tree and controller operations.
///
/// A failed run of an external stage is deliberately not a variant here: it
/// is recorded on the step itself (status `Failed` plus a captured-output
/// log), because a failed pipeline stage is an expected outcome the user
/// inspects and retries, not a caller error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PilotError {
    /// A stage that the successor table forbids at this point, or a
    /// mutation of a step whose run already happened.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// A line number with no step in the tree.
    #[error("no step with line number {0}")]
    NotFound(u32),

    /// A required upstream output that was never produced.
    #[error("stage '{stage}' requires a {kind} artifact from step {from}, which never produced one")]
    MissingArtifact {
        stage: Stage,
        kind: ArtifactKind,
        from: u32,
    },

    /// The persisted session failed integrity checks on load.
    #[error("corrupt session state: {0}")]
    CorruptState(String),

    /// An import submitted without anything to import.
    #[error("import needs an input path, a template= or directory= parameter, or a configured import_template")]
    MissingInput,
}
