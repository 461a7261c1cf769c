//! Session directory layout and initialization.
//!
//! A session is one directory: the tool runs with it as its working
//! directory, and everything the controller generates lives in a
//! `pilot_files/` subdirectory. All paths recorded in the session are
//! relative to the session root, so the directory can be moved or
//! archived wholesale.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{debug, info};

use crate::io::config::{PilotConfig, load_config, write_config};
use crate::io::session_store::save_session;
use crate::tree::RunTree;

/// Subdirectory holding artifacts, logs, config, and the session file.
pub const FILES_DIR: &str = "pilot_files";

const SESSION_FILE: &str = "session.json";
const CONFIG_FILE: &str = "config.toml";

/// An opened session directory with its loaded config.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    config: PilotConfig,
}

impl Workspace {
    /// Open an initialized session directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.join(FILES_DIR).is_dir() {
            bail!(
                "{} is not an initialized session directory (run `xtal-pilot init`)",
                root.display()
            );
        }
        let config = load_config(&root.join(FILES_DIR).join(CONFIG_FILE))?;
        debug!(root = %root.display(), "workspace opened");
        Ok(Self { root, config })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &PilotConfig {
        &self.config
    }

    /// Artifact directory as recorded in commands and the session file:
    /// relative to the root, which is also the tools' working directory.
    pub fn files_dir_rel(&self) -> &'static Path {
        Path::new(FILES_DIR)
    }

    pub fn files_dir(&self) -> PathBuf {
        self.root.join(FILES_DIR)
    }

    pub fn session_path(&self) -> PathBuf {
        self.files_dir().join(SESSION_FILE)
    }

    pub fn config_path(&self) -> PathBuf {
        self.files_dir().join(CONFIG_FILE)
    }

    /// Resolve a session-relative path for filesystem access.
    pub fn resolve(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InitOptions {
    /// Replace an existing session (history and config) with a fresh one.
    pub force: bool,
}

/// Create the session layout under `root` with an empty history.
pub fn init_workspace(root: &Path, options: &InitOptions) -> Result<Workspace> {
    let files_dir = root.join(FILES_DIR);
    let session_path = files_dir.join(SESSION_FILE);
    if session_path.exists() && !options.force {
        bail!(
            "{} is already an initialized session (pass --force to discard its history)",
            root.display()
        );
    }

    fs::create_dir_all(&files_dir)
        .with_context(|| format!("failed to create {}", files_dir.display()))?;
    let config = PilotConfig::default();
    write_config(&files_dir.join(CONFIG_FILE), &config)?;
    save_session(&session_path, &RunTree::new())?;
    info!(root = %root.display(), "session initialized");

    Ok(Workspace {
        root: root.to_path_buf(),
        config,
    })
}
