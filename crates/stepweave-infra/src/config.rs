//! Orchestrator configuration loader.
//!
//! Reads `config.toml` from the data directory (`~/.stepweave/` unless
//! `STEPWEAVE_DATA_DIR` says otherwise) into [`OrchestratorConfig`]. Falls
//! back to defaults when the file is missing or malformed.

use std::path::{Path, PathBuf};

use stepweave_types::config::OrchestratorConfig;

use crate::sqlite::pool::database_url_for;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "STEPWEAVE_DATA_DIR";

/// Resolve the data directory.
///
/// Priority:
/// 1. `STEPWEAVE_DATA_DIR` environment variable
/// 2. `~/.stepweave`
/// 3. `.stepweave` in the current directory
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".stepweave");
    }

    PathBuf::from(".stepweave")
}

/// Load orchestrator configuration from `{data_dir}/config.toml`.
///
/// - Missing file: [`OrchestratorConfig::default()`].
/// - Unreadable or unparsable file: logs a warning, returns the default.
pub async fn load_orchestrator_config(data_dir: &Path) -> OrchestratorConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return OrchestratorConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return OrchestratorConfig::default();
        }
    };

    match toml::from_str::<OrchestratorConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            OrchestratorConfig::default()
        }
    }
}

/// Database URL for run persistence: the configured `database_url`, else the
/// data directory's `stepweave.db`.
pub fn resolve_database_url(config: &OrchestratorConfig, data_dir: &Path) -> String {
    config
        .database_url
        .clone()
        .unwrap_or_else(|| database_url_for(data_dir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_orchestrator_config(tmp.path()).await;
        assert_eq!(config, OrchestratorConfig::default());
    }

    #[tokio::test]
    async fn load_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("config.toml"),
            r#"
step_timeout_secs = 30
max_parallel_steps = 2
backoff_unit_ms = 50
database_url = "sqlite:///var/lib/stepweave/runs.db"
"#,
        )
        .await
        .unwrap();

        let config = load_orchestrator_config(tmp.path()).await;
        assert_eq!(config.step_timeout_secs, 30);
        assert_eq!(config.max_parallel_steps, 2);
        assert_eq!(config.backoff_unit_ms, 50);
        assert_eq!(config.max_graph_steps, 100);
        assert_eq!(
            resolve_database_url(&config, tmp.path()),
            "sqlite:///var/lib/stepweave/runs.db"
        );
    }

    #[tokio::test]
    async fn load_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("config.toml"), "max_parallel_steps = \"many\"")
            .await
            .unwrap();

        let config = load_orchestrator_config(tmp.path()).await;
        assert_eq!(config, OrchestratorConfig::default());
    }

    #[test]
    fn database_url_defaults_to_data_dir() {
        let url = resolve_database_url(&OrchestratorConfig::default(), Path::new("/srv/sw"));
        assert_eq!(url, "sqlite:///srv/sw/stepweave.db");
    }

    #[test]
    fn resolve_data_dir_from_env() {
        // SAFETY: This test is the only one touching this variable and restores it immediately.
        unsafe {
            std::env::set_var(DATA_DIR_ENV, "/tmp/test-stepweave");
        }
        let dir = resolve_data_dir();
        assert_eq!(dir, PathBuf::from("/tmp/test-stepweave"));
        unsafe {
            std::env::remove_var(DATA_DIR_ENV);
        }
    }
}
