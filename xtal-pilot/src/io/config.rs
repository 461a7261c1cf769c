//! Session configuration, stored as TOML beside the history file.
//!
//! The file is meant to be edited by hand; every field has a default so
//! a partial (or absent) file still yields a working session.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Tunable knobs of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PilotConfig {
    /// Prefix joined to a stage name to form the external program
    /// (`dials.` turns `import` into `dials.import`).
    pub tool_prefix: String,
    /// Image template handed to `import` when the user supplies no input
    /// path of their own.
    pub import_template: Option<String>,
    /// How often a running tool is checked for exit and cancellation,
    /// and how often the busy watcher polls.
    pub poll_interval_ms: u64,
    /// Captured output beyond this many bytes is dropped from a failed
    /// step's error log.
    pub output_limit_bytes: usize,
}

impl Default for PilotConfig {
    fn default() -> Self {
        Self {
            tool_prefix: "dials.".to_string(),
            import_template: None,
            poll_interval_ms: 250,
            output_limit_bytes: 100_000,
        }
    }
}

impl PilotConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tool_prefix.trim().is_empty() {
            bail!("tool_prefix must not be empty");
        }
        if let Some(template) = &self.import_template
            && template.trim().is_empty()
        {
            bail!("import_template must not be blank when set");
        }
        if self.poll_interval_ms == 0 {
            bail!("poll_interval_ms must be at least 1");
        }
        if self.output_limit_bytes == 0 {
            bail!("output_limit_bytes must be at least 1");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Load the config from `path`, falling back to defaults if the file
/// does not exist.
pub fn load_config(path: &Path) -> Result<PilotConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "no config file, using defaults");
        return Ok(PilotConfig::default());
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: PilotConfig = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    debug!(path = %path.display(), "config loaded");
    Ok(config)
}

/// Write the config atomically (temp file in the same directory, then
/// rename).
pub fn write_config(path: &Path, config: &PilotConfig) -> Result<()> {
    config.validate()?;
    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    let tmp = path.with_extension("toml.tmp");
    fs::write(&tmp, contents).with_context(|| format!("failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("failed to move config into place at {}", path.display()))?;
    Ok(())
}
