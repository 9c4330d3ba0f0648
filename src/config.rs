// ⚙️ Configuration - JSON file + environment overrides
//
// Resolution order (later wins):
//   1. built-in defaults
//   2. JSON file ($COA_MAPPER_CONFIG, default ./coa-mapper.json), if present
//   3. COA_MAPPER_* environment variables

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const CONFIG_PATH_VAR: &str = "COA_MAPPER_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "coa-mapper.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database_path: PathBuf,
    pub workspace_id: String,
    /// Source chart provider the workspace migrates from
    pub provider: Option<String>,
    /// Recorded as the creator of new mappings
    pub actor: String,
    pub export_dir: PathBuf,
    /// Undo depth; None keeps everything
    pub history_capacity: Option<usize>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_path: PathBuf::from("coa-mapper.db"),
            workspace_id: "default".to_string(),
            provider: None,
            actor: std::env::var("USER").unwrap_or_else(|_| "operator".to_string()),
            export_dir: PathBuf::from("."),
            history_capacity: None,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Read a JSON config file. A missing file yields the defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config {}", path.display()))
    }

    /// Defaults ← file ← process environment
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::from_file(Path::new(&path))?;
        let env: HashMap<String, String> = std::env::vars().collect();
        config.apply_overrides(&env);
        Ok(config)
    }

    /// Apply COA_MAPPER_* overrides from an explicit variable table
    pub fn apply_overrides(&mut self, env: &HashMap<String, String>) {
        let get = |key: &str| env.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

        if let Some(db) = get("COA_MAPPER_DB") {
            self.database_path = PathBuf::from(db);
        }
        if let Some(workspace) = get("COA_MAPPER_WORKSPACE") {
            self.workspace_id = workspace.to_string();
        }
        if let Some(provider) = get("COA_MAPPER_PROVIDER") {
            self.provider = Some(provider.to_string());
        }
        if let Some(actor) = get("COA_MAPPER_ACTOR") {
            self.actor = actor.to_string();
        }
        if let Some(level) = get("COA_MAPPER_LOG") {
            self.log_level = level.to_string();
        }
    }

    pub fn level_filter(&self) -> log::LevelFilter {
        self.log_level
            .parse()
            .unwrap_or(log::LevelFilter::Info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::from_file(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.workspace_id, "default");
        assert_eq!(config.database_path, PathBuf::from("coa-mapper.db"));
        assert!(config.history_capacity.is_none());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"workspace_id": "fund-7", "history_capacity": 50}}"#).unwrap();
        file.flush().unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.workspace_id, "fund-7");
        assert_eq!(config.history_capacity, Some(50));
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        file.flush().unwrap();
        assert!(Config::from_file(file.path()).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        let env: HashMap<String, String> = [
            ("COA_MAPPER_DB", "/tmp/m.db"),
            ("COA_MAPPER_WORKSPACE", "ws-1"),
            ("COA_MAPPER_PROVIDER", "STATE_STREET"),
            ("COA_MAPPER_ACTOR", "alex"),
            ("COA_MAPPER_LOG", "debug"),
            ("COA_MAPPER_UNUSED", "x"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        config.apply_overrides(&env);
        assert_eq!(config.database_path, PathBuf::from("/tmp/m.db"));
        assert_eq!(config.workspace_id, "ws-1");
        assert_eq!(config.provider.as_deref(), Some("STATE_STREET"));
        assert_eq!(config.actor, "alex");
        assert_eq!(config.level_filter(), log::LevelFilter::Debug);
    }

    #[test]
    fn test_blank_override_is_ignored() {
        let mut config = Config::default();
        let env: HashMap<String, String> =
            [("COA_MAPPER_WORKSPACE".to_string(), "  ".to_string())].into_iter().collect();
        config.apply_overrides(&env);
        assert_eq!(config.workspace_id, "default");
    }
}
