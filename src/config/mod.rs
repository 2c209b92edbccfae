mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Locations searched, in order, when no config path is given.
const DEFAULT_PATHS: [&str; 4] = [
    "./mediarun.toml",
    "./config.toml",
    "~/.config/mediarun/config.toml",
    "/etc/mediarun/config.toml",
];

/// Parse configuration from TOML text.
pub fn from_toml(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;
    validate_config(&config)?;
    Ok(config)
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;
    Ok(config)
}

/// Load config from the given path or a default location, falling back to
/// defaults.
///
/// An explicit path that cannot be loaded is an error. A default location that
/// exists but cannot be loaded is logged and skipped.
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    for path_str in DEFAULT_PATHS {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if !path.exists() {
            continue;
        }
        match load_config(path) {
            Ok(config) => {
                tracing::info!("Loaded config from {}", path.display());
                return Ok(config);
            }
            Err(e) => tracing::warn!("Ignoring config {}: {e:#}", path.display()),
        }
    }

    tracing::debug!("No config file found, using defaults");
    Ok(Config::default())
}

/// Reject unusable configuration and return non-fatal warnings.
pub fn validate_config(config: &Config) -> Result<Vec<String>> {
    if config.tool.program.as_os_str().is_empty() {
        anyhow::bail!("tool.program cannot be empty");
    }
    if config.tool.stderr_limit_bytes == 0 {
        anyhow::bail!("tool.stderr_limit_bytes cannot be 0");
    }

    let mut warnings = config.jobs.warnings();
    if config.tool.health_timeout_secs == 0 {
        warnings.push("tool.health_timeout_secs = 0 is raised to 1 second".to_string());
    }
    if config.tool.run_timeout_secs > 0 && config.tool.run_timeout_secs < 10 {
        warnings.push(format!(
            "tool.run_timeout_secs = {} is very short for transcodes",
            config.tool.run_timeout_secs
        ));
    }

    for warning in &warnings {
        tracing::warn!("{warning}");
    }
    Ok(warnings)
}
