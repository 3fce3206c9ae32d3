//! Settings file for the command-line client.
//!
//! ```json
//! {
//!   "dispatcher": { "id_offset": 100, "fail_outstanding_on_close": true },
//!   "errors": { "entries": [...], "overrides": [...], "fallback": {...} }
//! }
//! ```
//!
//! Both sections are optional.

use std::path::Path;

use anyhow::{Context, Result};
use jobwire::{DispatcherConfig, ErrorCatalog};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliSettings {
    pub dispatcher: DispatcherConfig,
    /// Catalog used to present server failures.
    pub errors: ErrorCatalog,
}

impl CliSettings {
    /// Parse settings. The catalog's cancellation entry follows
    /// `dispatcher.cancelled_code`.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let mut settings: Self = serde_json::from_str(json).context("Invalid settings JSON")?;
        settings.dispatcher.validate()?;
        settings.errors = settings
            .errors
            .with_cancelled_code(settings.dispatcher.cancelled_code);
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        Self::from_json_str(&json)
            .with_context(|| format!("Failed to load settings from {}", path.display()))
    }
}
