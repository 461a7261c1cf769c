//! Persistence of the run tree as one versioned JSON file.
//!
//! The file is rewritten whole after every mutation; a temp-file rename
//! keeps a crash from ever leaving a half-written session behind. A file
//! that fails to parse, carries an unknown version, or violates the
//! structural rules is reported as corrupt, never silently replaced by a
//! fresh tree.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::invariants;
use crate::error::PilotError;
use crate::tree::RunTree;

const FORMAT_VERSION: u32 = 1;

#[derive(Deserialize)]
struct SessionFile {
    version: u32,
    tree: RunTree,
}

#[derive(Serialize)]
struct SessionFileRef<'a> {
    version: u32,
    tree: &'a RunTree,
}

/// Load, validate, and normalize the session at `path`.
pub fn load_session(path: &Path) -> Result<RunTree> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read session {}", path.display()))?;
    let file: SessionFile = serde_json::from_str(&contents).map_err(|err| {
        PilotError::CorruptState(format!("cannot parse session {}: {err}", path.display()))
    })?;
    if file.version != FORMAT_VERSION {
        return Err(PilotError::CorruptState(format!(
            "session {} has format version {} (this build reads {})",
            path.display(),
            file.version,
            FORMAT_VERSION
        ))
        .into());
    }

    let mut tree = file.tree;
    let violations = invariants::validate(&tree);
    if !violations.is_empty() {
        return Err(PilotError::CorruptState(format!(
            "session {} failed integrity checks: {}",
            path.display(),
            violations.join("; ")
        ))
        .into());
    }

    // A run that was in flight when the process died is back to editable.
    tree.normalize_restored();
    debug!(
        path = %path.display(),
        steps = tree.step_count(),
        current = tree.current_line(),
        "session loaded"
    );
    Ok(tree)
}

/// Write the session atomically (temp file in the same directory, then
/// rename).
pub fn save_session(path: &Path, tree: &RunTree) -> Result<()> {
    let file = SessionFileRef {
        version: FORMAT_VERSION,
        tree,
    };
    let mut contents = serde_json::to_string_pretty(&file).context("failed to serialize session")?;
    contents.push('\n');

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, contents).with_context(|| format!("failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("failed to move session into place at {}", path.display()))?;
    debug!(path = %path.display(), steps = tree.step_count(), "session saved");
    Ok(())
}
