//! Backend Registry: a persistent, name-keyed map of launch configurations
//! for backend MCP servers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Launch configuration for a single backend MCP server. Immutable once
/// loaded; changed only through explicit `BackendRegistry` mutations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackendConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub auto_activate: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub estimated_tokens: u32,
}

/// Persistent name -> `BackendConfig` map, backed by a single JSON file.
pub struct BackendRegistry {
    path: PathBuf,
    backends: HashMap<String, BackendConfig>,
}

impl BackendRegistry {
    /// Load the registry from `path`. A missing file yields an empty
    /// registry; a file that fails to parse entirely also yields an empty
    /// registry (with a warning logged), matching §4.1/§6.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let backends = Self::read_file(&path).unwrap_or_else(|| {
            tracing::warn!(path = %path.display(), "backend registry missing or unparseable, starting empty");
            HashMap::new()
        });
        Self { path, backends }
    }

    fn read_file(path: &Path) -> Option<HashMap<String, BackendConfig>> {
        let contents = std::fs::read_to_string(path).ok()?;
        let raw: HashMap<String, serde_json::Value> = serde_json::from_str(&contents).ok()?;
        let mut backends = HashMap::new();
        for (name, value) in raw {
            match serde_json::from_value::<BackendConfig>(value) {
                Ok(cfg) => {
                    backends.insert(name, cfg);
                }
                Err(e) => {
                    tracing::warn!(backend = %name, error = %e, "skipping invalid registry entry");
                }
            }
        }
        Some(backends)
    }

    pub fn get(&self, name: &str) -> Option<&BackendConfig> {
        self.backends.get(name)
    }

    pub fn add(&mut self, name: impl Into<String>, config: BackendConfig) {
        self.backends.insert(name.into(), config);
    }

    pub fn remove(&mut self, name: &str) -> Option<BackendConfig> {
        self.backends.remove(name)
    }

    pub fn all(&self) -> &HashMap<String, BackendConfig> {
        &self.backends
    }

    /// Names of backends configured with `auto_activate = true`.
    pub fn auto_activate_list(&self) -> Vec<String> {
        self.backends
            .iter()
            .filter(|(_, cfg)| cfg.auto_activate)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Persist the registry to disk via temp-file + rename so readers never
    /// observe a truncated file.
    pub fn save(&self) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_string_pretty(&self.backends)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, payload)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_config() -> BackendConfig {
        BackendConfig {
            command: "echo".into(),
            args: vec!["hi".into()],
            env: HashMap::new(),
            auto_activate: true,
            description: "sample".into(),
            estimated_tokens: 120,
        }
    }

    #[test]
    fn missing_file_yields_empty_registry() {
        let dir = tempdir().unwrap();
        let registry = BackendRegistry::load(dir.path().join("backends.json"));
        assert!(registry.all().is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("backends.json");
        let mut registry = BackendRegistry::load(&path);
        registry.add("dummy", sample_config());
        registry.save().unwrap();

        let reloaded = BackendRegistry::load(&path);
        assert_eq!(reloaded.get("dummy"), Some(&sample_config()));
    }

    #[test]
    fn save_is_a_fixed_point() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("backends.json");
        let mut registry = BackendRegistry::load(&path);
        registry.add("dummy", sample_config());
        registry.save().unwrap();
        let first = std::fs::read_to_string(&path).unwrap();

        let reloaded = BackendRegistry::load(&path);
        reloaded.save().unwrap();
        let second = std::fs::read_to_string(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn auto_activate_list_filters() {
        let dir = tempdir().unwrap();
        let mut registry = BackendRegistry::load(dir.path().join("backends.json"));
        registry.add("auto", sample_config());
        let mut manual = sample_config();
        manual.auto_activate = false;
        registry.add("manual", manual);

        assert_eq!(registry.auto_activate_list(), vec!["auto".to_string()]);
    }

    #[test]
    fn invalid_entry_is_skipped_not_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("backends.json");
        std::fs::write(&path, r#"{"good": {"command": "echo"}, "bad": {"no_command": true}}"#)
            .unwrap();
        let registry = BackendRegistry::load(&path);
        assert!(registry.get("good").is_some());
        assert!(registry.get("bad").is_none());
    }
}
