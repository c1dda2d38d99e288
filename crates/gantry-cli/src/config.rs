//! Settings resolution for the CLI.
//!
//! Defaults, then the optional JSON settings file, then command-line flags.

use gantry_core::{EnvironmentSettings, validate_settings};
use std::path::Path;
use tracing::debug;

use crate::error::CliError;

/// Build validated settings from an optional file and flag overrides.
pub fn load_settings(
    file: Option<&Path>,
    overrides: &EnvironmentSettings,
) -> Result<EnvironmentSettings, CliError> {
    let mut settings = EnvironmentSettings::with_defaults();

    if let Some(path) = file {
        let text = std::fs::read_to_string(path)
            .map_err(|e| CliError::Config(format!("{}: {e}", path.display())))?;
        let from_file: EnvironmentSettings = serde_json::from_str(&text)
            .map_err(|e| CliError::Config(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), "Loaded settings file");
        settings.merge(&from_file);
    }

    settings.merge(overrides);
    validate_settings(&settings)?;
    Ok(settings)
}
