//! Settings resolution: environment variables, default directories, and
//! the optional per-repository workspace config.
//!
//! The workspace config lives at `.spall/spall.json`, discovered by
//! walking from the current directory upward to the first ancestor that
//! contains a `.spall/` directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

pub const ENV_DATA_DIR: &str = "SPALL_DATA_DIR";
pub const ENV_CACHE_DIR: &str = "SPALL_CACHE_DIR";
pub const ENV_SERVER_PERSIST: &str = "SPALL_SERVER_PERSIST";
pub const ENV_SERVER_FORCE: &str = "SPALL_SERVER_FORCE";
pub const ENV_SERVER_IDLE_TIMEOUT_MS: &str = "SPALL_SERVER_IDLE_TIMEOUT_MS";

const SPALL_DIR_NAME: &str = ".spall";
const WORKSPACE_CONFIG_FILE: &str = "spall.json";

/// Default idle timeout before an idle daemon stops itself.
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 1000;

/// Resolved daemon/CLI settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Holds `spall.db`, `server.lock`, and the daemon log.
    pub data_dir: PathBuf,
    /// Holds downloaded model files under `models/`.
    pub cache_dir: PathBuf,
    /// Disables idle auto-shutdown.
    pub persist: bool,
    /// Take over a stale or live lock on startup.
    pub force: bool,
    pub idle_timeout_ms: u64,
}

impl Settings {
    /// Resolves settings from the environment, falling back to platform
    /// directories.
    pub fn from_env() -> Self {
        let data_dir = std::env::var(ENV_DATA_DIR).map(PathBuf::from).unwrap_or_else(|_| {
            dirs::data_local_dir()
                .map(|d| d.join("spall"))
                .unwrap_or_else(|| PathBuf::from(".spall-data"))
        });
        let cache_dir = std::env::var(ENV_CACHE_DIR).map(PathBuf::from).unwrap_or_else(|_| {
            dirs::cache_dir()
                .map(|d| d.join("spall"))
                .unwrap_or_else(|| data_dir.join("cache"))
        });
        let idle_timeout_ms = std::env::var(ENV_SERVER_IDLE_TIMEOUT_MS)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_IDLE_TIMEOUT_MS);
        Self {
            data_dir,
            cache_dir,
            persist: env_flag(ENV_SERVER_PERSIST),
            force: env_flag(ENV_SERVER_FORCE),
            idle_timeout_ms,
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("spall.db")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join("server.lock")
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join("spall.log")
    }

    pub fn models_dir(&self) -> PathBuf {
        self.cache_dir.join("models")
    }
}

fn env_flag(name: &str) -> bool {
    matches!(
        std::env::var(name).as_deref(),
        Ok("1") | Ok("true") | Ok("TRUE") | Ok("True")
    )
}

/// The workspace identity section of `.spall/spall.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceRef {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
}

/// Retrieval scope defaults for a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeConfig {
    /// Corpora queried by default.
    pub read: Vec<String>,
    /// Corpus new notes are written to.
    pub write: String,
}

/// Parsed workspace config, always normalized to the richer shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkspaceConfig {
    pub workspace: WorkspaceRef,
    pub scope: ScopeConfig,
}

/// On-disk shape. Accepts both the current `scope` form and the legacy
/// top-level `include` list.
#[derive(Debug, Deserialize)]
struct RawWorkspaceConfig {
    workspace: WorkspaceRef,
    #[serde(default)]
    scope: Option<ScopeConfig>,
    #[serde(default)]
    include: Option<Vec<String>>,
}

impl WorkspaceConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let parsed: RawWorkspaceConfig = serde_json::from_str(&raw)
            .map_err(|e| Error::config(format!("{}: {e}", path.display())))?;
        let scope = match (parsed.scope, parsed.include) {
            (Some(scope), _) => scope,
            // Legacy shape: map `include` onto scope.read.
            (None, Some(include)) => ScopeConfig {
                read: include,
                write: "default".to_string(),
            },
            (None, None) => ScopeConfig {
                read: Vec::new(),
                write: "default".to_string(),
            },
        };
        Ok(Self {
            workspace: parsed.workspace,
            scope,
        })
    }

    /// Serializes the richer shape only; the legacy `include` field is
    /// never written back.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::config(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Walks from `start` upward to the first ancestor containing `.spall/`
/// and loads its config, if any.
pub fn discover_workspace_config(start: &Path) -> Option<(PathBuf, WorkspaceConfig)> {
    let mut current = Some(start);
    while let Some(dir) = current {
        let spall_dir = dir.join(SPALL_DIR_NAME);
        if spall_dir.is_dir() {
            let config_path = spall_dir.join(WORKSPACE_CONFIG_FILE);
            match WorkspaceConfig::load(&config_path) {
                Ok(config) => return Some((dir.to_path_buf(), config)),
                Err(e) => {
                    debug!("found {} but no usable config: {e}", spall_dir.display());
                    return None;
                }
            }
        }
        current = dir.parent();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn write_config(root: &Path, body: &str) -> PathBuf {
        let dir = root.join(SPALL_DIR_NAME);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(WORKSPACE_CONFIG_FILE);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn loads_rich_shape() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(
            tmp.path(),
            r#"{"workspace": {"name": "me"}, "scope": {"read": ["docs", "src"], "write": "docs"}}"#,
        );
        let config = WorkspaceConfig::load(&path).unwrap();
        assert_eq!(config.workspace.name, "me");
        assert_eq!(config.scope.read, vec!["docs", "src"]);
        assert_eq!(config.scope.write, "docs");
    }

    #[test]
    fn legacy_include_maps_to_scope_read() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(
            tmp.path(),
            r#"{"workspace": {"name": "me", "id": 4}, "include": ["notes"]}"#,
        );
        let config = WorkspaceConfig::load(&path).unwrap();
        assert_eq!(config.workspace.id, Some(4));
        assert_eq!(config.scope.read, vec!["notes"]);
        assert_eq!(config.scope.write, "default");
    }

    #[test]
    fn save_writes_rich_shape_only() {
        let tmp = TempDir::new().unwrap();
        let config = WorkspaceConfig {
            workspace: WorkspaceRef {
                name: "me".into(),
                id: None,
            },
            scope: ScopeConfig {
                read: vec!["a".into()],
                write: "a".into(),
            },
        };
        let path = tmp.path().join(".spall").join("spall.json");
        config.save(&path).unwrap();
        let body = std::fs::read_to_string(&path).unwrap();
        assert!(body.contains("\"scope\""));
        assert!(!body.contains("\"include\""));
    }

    #[test]
    fn discovery_walks_ancestors() {
        let tmp = TempDir::new().unwrap();
        write_config(tmp.path(), r#"{"workspace": {"name": "root"}}"#);
        let nested = tmp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let (root, config) = discover_workspace_config(&nested).unwrap();
        assert_eq!(root, tmp.path());
        assert_eq!(config.workspace.name, "root");
    }

    #[test]
    fn discovery_returns_none_without_spall_dir() {
        let tmp = TempDir::new().unwrap();
        assert!(discover_workspace_config(tmp.path()).is_none());
    }

    #[test]
    #[serial]
    fn settings_honor_env_overrides() {
        std::env::set_var(ENV_DATA_DIR, "/tmp/spall-test-data");
        std::env::set_var(ENV_SERVER_PERSIST, "true");
        std::env::set_var(ENV_SERVER_IDLE_TIMEOUT_MS, "250");

        let settings = Settings::from_env();
        assert_eq!(settings.data_dir, PathBuf::from("/tmp/spall-test-data"));
        assert!(settings.persist);
        assert_eq!(settings.idle_timeout_ms, 250);
        assert_eq!(
            settings.lock_path(),
            PathBuf::from("/tmp/spall-test-data/server.lock")
        );

        std::env::remove_var(ENV_DATA_DIR);
        std::env::remove_var(ENV_SERVER_PERSIST);
        std::env::remove_var(ENV_SERVER_IDLE_TIMEOUT_MS);
    }

    #[test]
    #[serial]
    fn idle_timeout_defaults_when_unset() {
        std::env::remove_var(ENV_SERVER_IDLE_TIMEOUT_MS);
        let settings = Settings::from_env();
        assert_eq!(settings.idle_timeout_ms, DEFAULT_IDLE_TIMEOUT_MS);
    }
}
