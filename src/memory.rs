//! Conversational Memory: installation history, failure signatures, and
//! derived user preferences, persisted atomically to a single JSON file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

const MAX_RECORDS: usize = 1000;
const COMBO_WINDOW_MINUTES: i64 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallationRecord {
    pub server_name: String,
    pub option_name: String,
    pub installed_at: DateTime<Utc>,
    pub success: bool,
    #[serde(default)]
    pub project_path: Option<String>,
    #[serde(default)]
    pub client_targets: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub server_name: String,
    pub occurred_at: DateTime<Utc>,
    pub error_signature: String,
    pub error_message: String,
    #[serde(default)]
    pub fix_applied: Option<String>,
    #[serde(default)]
    pub system_state: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserPreferences {
    pub preferred_install_method: Option<String>,
    #[serde(default)]
    pub preferred_clients: Vec<String>,
    pub prefers_official: Option<bool>,
    #[serde(default)]
    pub common_server_combos: Vec<Vec<String>>,
    #[serde(default)]
    pub interaction_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MemoryState {
    #[serde(default)]
    installations: Vec<InstallationRecord>,
    #[serde(default)]
    failures: Vec<FailureRecord>,
    #[serde(default)]
    preferences: UserPreferences,
    #[serde(default = "Utc::now")]
    last_updated: DateTime<Utc>,
}

impl Default for MemoryState {
    fn default() -> Self {
        Self {
            installations: Vec::new(),
            failures: Vec::new(),
            preferences: UserPreferences::default(),
            last_updated: Utc::now(),
        }
    }
}

/// Persistent conversational memory. Thread-safe via a single mutex around
/// all state, matching the concurrency model of §5.
pub struct ConversationalMemory {
    path: PathBuf,
    state: Mutex<MemoryState>,
}

impl ConversationalMemory {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = Self::read_file(&path).unwrap_or_else(|| {
            tracing::warn!(path = %path.display(), "memory file missing or corrupt, resetting to defaults");
            MemoryState::default()
        });
        Self {
            path,
            state: Mutex::new(state),
        }
    }

    fn read_file(path: &Path) -> Option<MemoryState> {
        let contents = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&contents).ok()
    }

    fn save(&self, state: &mut MemoryState) -> std::io::Result<()> {
        state.last_updated = Utc::now();
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_string_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, payload)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn trim(state: &mut MemoryState) {
        if state.installations.len() > MAX_RECORDS {
            let cut = state.installations.len() - MAX_RECORDS;
            state.installations.drain(0..cut);
        }
        if state.failures.len() > MAX_RECORDS {
            let cut = state.failures.len() - MAX_RECORDS;
            state.failures.drain(0..cut);
        }
    }

    pub fn record_installation(
        &self,
        server: &str,
        option: &str,
        success: bool,
        project_path: Option<String>,
        client_targets: Vec<String>,
    ) -> InstallationRecord {
        let record = InstallationRecord {
            server_name: server.to_string(),
            option_name: option.to_string(),
            installed_at: Utc::now(),
            success,
            project_path,
            client_targets,
        };

        let mut state = self.state.lock().unwrap();
        state.installations.push(record.clone());
        Self::trim(&mut state);
        Self::recompute_preferences(&mut state);
        let _ = self.save(&mut state);
        record
    }

    /// Derive the error signature from the first non-empty line of `message`,
    /// truncated to 200 characters.
    fn extract_error_signature(message: &str) -> String {
        for line in message.lines() {
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                return trimmed.chars().take(200).collect();
            }
        }
        "unknown_error".to_string()
    }

    pub fn record_failure(
        &self,
        server: &str,
        signature: Option<String>,
        message: &str,
        system_state: HashMap<String, serde_json::Value>,
    ) -> FailureRecord {
        let signature = signature.unwrap_or_else(|| Self::extract_error_signature(message));
        let record = FailureRecord {
            server_name: server.to_string(),
            occurred_at: Utc::now(),
            error_signature: signature,
            error_message: message.to_string(),
            fix_applied: None,
            system_state,
        };

        let mut state = self.state.lock().unwrap();
        state.failures.push(record.clone());
        Self::trim(&mut state);
        let _ = self.save(&mut state);
        record
    }

    /// Most relevant prior failure for `server`: prefer the most recent one
    /// with a non-empty `fix_applied`, otherwise the most recent of any.
    pub fn check_failure_memory(&self, server: &str) -> Option<FailureRecord> {
        let state = self.state.lock().unwrap();
        let candidates: Vec<&FailureRecord> = state
            .failures
            .iter()
            .filter(|f| f.server_name == server)
            .collect();
        if candidates.is_empty() {
            return None;
        }
        let with_fix: Vec<&FailureRecord> = candidates
            .iter()
            .copied()
            .filter(|f| f.fix_applied.is_some())
            .collect();
        let pool = if with_fix.is_empty() { &candidates } else { &with_fix };
        pool.iter()
            .max_by_key(|f| f.occurred_at)
            .map(|f| (*f).clone())
    }

    fn recompute_preferences(state: &mut MemoryState) {
        let installs = &state.installations;
        let prefs = &mut state.preferences;

        let mut method_counts: HashMap<&str, usize> = HashMap::new();
        for r in installs.iter().filter(|r| r.success) {
            *method_counts.entry(r.option_name.as_str()).or_insert(0) += 1;
        }
        if let Some((name, _)) = method_counts.iter().max_by_key(|(_, count)| **count) {
            prefs.preferred_install_method = Some(name.to_string());
        }

        let mut client_counts: HashMap<&str, usize> = HashMap::new();
        for r in installs {
            for c in &r.client_targets {
                *client_counts.entry(c.as_str()).or_insert(0) += 1;
            }
        }
        if !client_counts.is_empty() {
            let mut ranked: Vec<(&str, usize)> = client_counts.into_iter().collect();
            ranked.sort_by(|a, b| b.1.cmp(&a.1));
            prefs.preferred_clients = ranked.into_iter().map(|(c, _)| c.to_string()).collect();
        }

        let official_kw = ["official", "recommended"];
        let mut official = 0usize;
        let mut enhanced = 0usize;
        for r in installs.iter().filter(|r| r.success) {
            let lower = r.option_name.to_lowercase();
            if official_kw.iter().any(|k| lower.contains(k)) {
                official += 1;
            } else {
                enhanced += 1;
            }
        }
        if official + enhanced > 0 {
            prefs.prefers_official = Some(official >= enhanced);
        }

        prefs.common_server_combos = Self::detect_server_combos(installs);
    }

    /// Servers installed successfully within a 5-minute window of each other
    /// count as "together". Returns the top 10 combos appearing >= 2 times.
    fn detect_server_combos(installs: &[InstallationRecord]) -> Vec<Vec<String>> {
        let mut successful: Vec<&InstallationRecord> =
            installs.iter().filter(|r| r.success).collect();
        successful.sort_by_key(|r| r.installed_at);

        let window = ChronoDuration::minutes(COMBO_WINDOW_MINUTES);
        let mut combo_counts: HashMap<Vec<String>, usize> = HashMap::new();

        for (i, rec) in successful.iter().enumerate() {
            let mut group: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
            group.insert(rec.server_name.clone());
            for other in &successful[i + 1..] {
                if other.installed_at - rec.installed_at <= window {
                    group.insert(other.server_name.clone());
                } else {
                    break;
                }
            }
            if group.len() >= 2 {
                let key: Vec<String> = group.into_iter().collect();
                *combo_counts.entry(key).or_insert(0) += 1;
            }
        }

        // Spec's own seed test (scenario 5) expects a combo observed exactly
        // once within one window to surface; see DESIGN.md Open Question
        // decision 5 for why this keeps the top 10 by frequency without the
        // >=2-occurrences floor the source text otherwise describes.
        let mut combos: Vec<(Vec<String>, usize)> = combo_counts.into_iter().collect();
        combos.sort_by(|a, b| b.1.cmp(&a.1));
        combos.truncate(10);
        combos.into_iter().map(|(combo, _)| combo).collect()
    }

    pub fn get_preferences(&self) -> UserPreferences {
        self.state.lock().unwrap().preferences.clone()
    }

    pub fn update_preferences(&self, _action: &str) -> UserPreferences {
        let mut state = self.state.lock().unwrap();
        state.preferences.interaction_count += 1;
        Self::recompute_preferences(&mut state);
        let _ = self.save(&mut state);
        state.preferences.clone()
    }

    /// Installation history, newest first, optionally filtered to records
    /// whose `project_path` equals `project` or is a sub-path of it.
    pub fn get_installation_history(&self, project: Option<&str>) -> Vec<InstallationRecord> {
        let state = self.state.lock().unwrap();
        let mut records: Vec<InstallationRecord> = state.installations.clone();

        if let Some(project) = project {
            let norm = format!("{}/", project.trim_end_matches('/'));
            records.retain(|r| match &r.project_path {
                Some(p) => p == project || format!("{}/", p.trim_end_matches('/')) == norm || p.starts_with(&norm),
                None => false,
            });
        }

        records.sort_by(|a, b| b.installed_at.cmp(&a.installed_at));
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn memory() -> (tempfile::TempDir, ConversationalMemory) {
        let dir = tempdir().unwrap();
        let mem = ConversationalMemory::load(dir.path().join("memory.json"));
        (dir, mem)
    }

    #[test]
    fn record_installation_recomputes_preferred_method() {
        let (_dir, mem) = memory();
        mem.record_installation("a", "official", true, None, vec![]);
        mem.record_installation("a", "official", true, None, vec![]);
        mem.record_installation("a", "enhanced", true, None, vec![]);
        let prefs = mem.get_preferences();
        assert_eq!(prefs.preferred_install_method.as_deref(), Some("official"));
        assert_eq!(prefs.prefers_official, Some(true));
    }

    #[test]
    fn trim_keeps_most_recent_1000() {
        let (_dir, mem) = memory();
        for i in 0..1001 {
            mem.record_installation(&format!("s{i}"), "opt", true, None, vec![]);
        }
        let history = mem.get_installation_history(None);
        assert_eq!(history.len(), 1000);
        assert_eq!(history.last().unwrap().server_name, "s1");
        assert_eq!(history.first().unwrap().server_name, "s1000");
    }

    #[test]
    fn check_failure_memory_prefers_fix_applied() {
        let (_dir, mem) = memory();
        mem.record_failure("x", None, "boom\n", HashMap::new());
        let mut state = mem.state.lock().unwrap();
        state.failures[0].fix_applied = Some("restarted".into());
        drop(state);
        mem.record_failure("x", None, "boom again", HashMap::new());

        let result = mem.check_failure_memory("x").unwrap();
        assert_eq!(result.fix_applied.as_deref(), Some("restarted"));
    }

    #[test]
    fn error_signature_truncated_to_200() {
        let long = "x".repeat(300);
        let sig = ConversationalMemory::extract_error_signature(&format!("\n  \n{long}"));
        assert_eq!(sig.len(), 200);
    }

    #[test]
    fn installation_history_project_prefix_is_exact_not_loose() {
        let (_dir, mem) = memory();
        mem.record_installation("a", "opt", true, Some("/tmp/proj".into()), vec![]);
        mem.record_installation("b", "opt", true, Some("/tmp/proj2".into()), vec![]);
        let history = mem.get_installation_history(Some("/tmp/proj"));
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].server_name, "a");
    }

    #[test]
    fn combo_within_window_appears_once() {
        let (_dir, mem) = memory();
        let base = Utc::now();
        {
            let mut state = mem.state.lock().unwrap();
            state.installations.push(InstallationRecord {
                server_name: "X".into(),
                option_name: "opt".into(),
                installed_at: base,
                success: true,
                project_path: None,
                client_targets: vec![],
            });
            state.installations.push(InstallationRecord {
                server_name: "Y".into(),
                option_name: "opt".into(),
                installed_at: base + ChronoDuration::minutes(2),
                success: true,
                project_path: None,
                client_targets: vec![],
            });
            state.installations.push(InstallationRecord {
                server_name: "Z".into(),
                option_name: "opt".into(),
                installed_at: base + ChronoDuration::minutes(10),
                success: true,
                project_path: None,
                client_targets: vec![],
            });
        }
        mem.update_preferences("test");
        let combos = mem.get_preferences().common_server_combos;
        assert!(combos.contains(&vec!["X".to_string(), "Y".to_string()]));
        assert!(!combos.iter().any(|c| c.contains(&"Z".to_string())));
    }
}
