//! Configuration file loading
//!
//! The initial snapshot of a tier is read from a file whose format follows its
//! extension: `.json`, `.toml`, `.yaml` or `.yml`. Without an explicit path the
//! file is looked up as `~/.config/sensor-mesh/<role>.{json,toml,yaml}`.

use std::path::{Path, PathBuf};

use super::{TierConfig, TierRole};
use crate::{Error, Result};

/// Supported file formats
const EXTENSIONS: [&str; 4] = ["json", "toml", "yaml", "yml"];

/// Load and validate a snapshot for `role` from `path`
///
/// # Errors
///
/// Returns error if the file cannot be read, does not parse, or does not fit the role
pub fn load_snapshot(path: &Path, role: TierRole) -> Result<TierConfig> {
    let content = std::fs::read_to_string(path)?;
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    let config: TierConfig = match extension.as_str() {
        "json" => TierConfig::from_json(&content)?,
        "toml" => toml::from_str(&content)?,
        "yaml" | "yml" => serde_yaml::from_str(&content)?,
        other => {
            return Err(Error::Config(format!(
                "unsupported config format '{other}' for {}",
                path.display()
            )));
        }
    };

    config.validate()?;
    config.check_role(role)?;

    tracing::info!(path = %path.display(), %role, id = %config.id, "loaded config file");
    Ok(config)
}

/// Resolve the config file to use for `role`
///
/// An explicit path wins; otherwise the first existing default candidate is used.
///
/// # Errors
///
/// Returns error if no explicit path is given and no default file exists
pub fn resolve_path(explicit: Option<&Path>, role: TierRole) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    let dir = config_dir()
        .ok_or_else(|| Error::Config("could not determine config directory".to_string()))?;

    EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{role}.{ext}")))
        .find(|p| p.exists())
        .ok_or_else(|| {
            Error::Config(format!(
                "no config given and none found under {}",
                dir.display()
            ))
        })
}

/// Return the config directory: `~/.config/sensor-mesh`
#[must_use]
pub fn config_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("sensor-mesh"))
}
