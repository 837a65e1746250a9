//! Configuration loading and external tool path resolution

use crate::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// External tool locations read from the config file.
///
/// Everything is optional; resolution falls back through CLI argument,
/// environment variable, config file, compiled default, in that order.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolConfig {
    /// ASTAP plate-solver executable
    pub astap_path: Option<PathBuf>,
    /// ASTAP star database directory (no default; solving is disabled
    /// without it)
    pub astap_db_path: Option<PathBuf>,
    /// Quality analyzer executable
    pub analyzer_path: Option<PathBuf>,
}

/// Resolve one tool path following the priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file value
/// 4. Compiled default (fallback, may be absent)
pub fn resolve_tool_path(
    cli_arg: Option<&str>,
    env_var_name: &str,
    file_value: Option<&PathBuf>,
    default: Option<PathBuf>,
) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(PathBuf::from(path));
    }
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    if let Some(path) = file_value {
        return Some(path.clone());
    }
    default
}

/// Load the tool configuration from the platform config directory.
///
/// Looks for `fitsort/config.toml` under the user config dir
/// (`~/.config/fitsort/config.toml` on Linux), then `/etc/fitsort/config.toml`
/// on Linux. A missing file is not an error; it yields the empty config.
pub fn load_tool_config() -> Result<ToolConfig> {
    let path = match find_config_file() {
        Some(p) => p,
        None => return Ok(ToolConfig::default()),
    };

    let content = std::fs::read_to_string(&path)?;
    let config: ToolConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;

    tracing::debug!(config_file = %path.display(), "Loaded tool configuration");
    Ok(config)
}

fn find_config_file() -> Option<PathBuf> {
    if let Some(user_config) = dirs::config_dir().map(|d| d.join("fitsort").join("config.toml")) {
        if user_config.exists() {
            return Some(user_config);
        }
    }
    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/fitsort/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }
    None
}

/// Compiled default for the ASTAP executable.
///
/// macOS installs it inside the app bundle; elsewhere assume PATH.
pub fn default_astap_path() -> PathBuf {
    if cfg!(target_os = "macos") {
        PathBuf::from("/Applications/ASTAP.app/Contents/MacOS/astap")
    } else {
        PathBuf::from("astap")
    }
}
