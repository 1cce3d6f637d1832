use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Project/user configuration for the gateway binary.
///
/// Loaded from `mcp-gateway.toml`, discovered by walking up from the current
/// directory. All fields are optional so an empty file is valid; CLI flags
/// always override values found here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct GatewayConfig {
    /// Default per-request timeout in seconds for tool-call forwarding.
    pub timeout_secs: Option<u64>,
    /// Names of backends to auto-activate on startup, in addition to any
    /// backend whose own `auto_activate` flag is set in the registry.
    pub auto_activate: Vec<String>,
    /// Override for the backend registry file location.
    pub registry_path: Option<PathBuf>,
    /// Override for the memory store file location.
    pub memory_path: Option<PathBuf>,
    /// `RUST_LOG`-style filter applied when no `RUST_LOG` env var is set.
    pub log_level: Option<String>,
}

impl GatewayConfig {
    /// Load configuration from `path`, or discover `mcp-gateway.toml` by
    /// walking up from the current directory. Returns defaults when no file
    /// is found anywhere in the tree.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let config_path = match path {
            Some(p) => Some(PathBuf::from(p)),
            None => discover_config()?,
        };

        let Some(config_path) = config_path else {
            return Ok(Self::default());
        };

        let contents = std::fs::read_to_string(&config_path)?;
        let config: GatewayConfig = toml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("invalid config at {}: {e}", config_path.display()))?;
        Ok(config)
    }
}

/// Search for `mcp-gateway.toml` in the current directory and its parents.
/// Returns `Ok(None)` rather than an error when nothing is found — an
/// absent project config is a normal, valid state.
pub fn discover_config() -> Result<Option<PathBuf>> {
    let cwd = std::env::current_dir()?;
    let mut dir = cwd.as_path();

    loop {
        let candidate = dir.join("mcp-gateway.toml");
        if candidate.exists() {
            return Ok(Some(candidate));
        }
        match dir.parent() {
            Some(parent) => dir = parent,
            None => return Ok(None),
        }
    }
}

/// Return the platform-specific config directory (`~/.config/mcp-gateway` on Linux).
pub fn config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|d| d.join("mcp-gateway"))
        .ok_or_else(|| anyhow::anyhow!("could not determine config directory"))
}

/// Return the path to the backend registry file, honoring `override_path`.
pub fn registry_path(override_path: Option<&PathBuf>) -> Result<PathBuf> {
    if let Some(p) = override_path {
        return Ok(p.clone());
    }
    Ok(config_dir()?.join("backends.json"))
}

/// Return the path to the memory store file, honoring `override_path`.
pub fn memory_path(override_path: Option<&PathBuf>) -> Result<PathBuf> {
    if let Some(p) = override_path {
        return Ok(p.clone());
    }
    Ok(config_dir()?.join("memory.json"))
}
