//! Configuration loader and validator for the assistant store.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    #[serde(default)]
    pub database: Database,
    #[serde(default)]
    pub log: Log,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
}

/// SQLite connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Database {
    /// Defaults to `sqlite://<data_dir>/assistant.db` when unset or empty.
    pub url: Option<String>,
    pub max_connections: u32,
    pub busy_timeout_ms: u64,
}

impl Default for Database {
    fn default() -> Self {
        Database {
            url: None,
            max_connections: 5,
            busy_timeout_ms: 5_000,
        }
    }
}

/// Logging settings. `RUST_LOG` wins over `filter` when set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Log {
    pub filter: String,
}

impl Default for Log {
    fn default() -> Self {
        Log {
            filter: "info".into(),
        }
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// `DATABASE_URL`, then `database.url`, then a file under `app.data_dir`.
    pub fn database_url(&self) -> String {
        self.database_url_with(std::env::var("DATABASE_URL").ok())
    }

    fn database_url_with(&self, env: Option<String>) -> String {
        env.filter(|u| !u.trim().is_empty())
            .or_else(|| self.database.url.clone().filter(|u| !u.trim().is_empty()))
            .unwrap_or_else(|| {
                format!(
                    "sqlite://{}/assistant.db",
                    self.app.data_dir.trim_end_matches('/')
                )
            })
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if let Some(url) = cfg.database.url.as_deref().filter(|u| !u.trim().is_empty()) {
        if !url.starts_with("sqlite:") {
            return Err(ConfigError::Invalid("database.url must be a sqlite: URL"));
        }
    }
    if cfg.database.max_connections == 0 {
        return Err(ConfigError::Invalid("database.max_connections must be > 0"));
    }
    if cfg.log.filter.trim().is_empty() {
        return Err(ConfigError::Invalid("log.filter must be non-empty"));
    }
    Ok(())
}

/// Example YAML printed by `assistant-store example-config`.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"

database:
  # url: "sqlite://./data/assistant.db"
  max_connections: 5
  busy_timeout_ms: 5000

log:
  filter: "info,sqlx=warn"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.database.max_connections, 5);
        assert_eq!(cfg.log.filter, "info,sqlx=warn");
    }

    #[test]
    fn sections_default_when_missing() {
        let cfg: Config = serde_yaml::from_str("app:\n  data_dir: /tmp/x\n").unwrap();
        assert_eq!(cfg.database, Database::default());
        assert_eq!(cfg.log.filter, "info");
    }

    #[test]
    fn invalid_values() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.data_dir = " ".into();
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("app.data_dir")), _ => panic!("wrong error") }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.database.url = Some("postgres://localhost/db".into());
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("database.url")), _ => panic!("wrong error") }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.database.max_connections = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn database_url_precedence() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        assert_eq!(cfg.database_url_with(None), "sqlite://./data/assistant.db");

        cfg.database.url = Some(String::new());
        assert_eq!(cfg.database_url_with(None), "sqlite://./data/assistant.db");

        cfg.database.url = Some("sqlite://other.db".into());
        assert_eq!(cfg.database_url_with(None), "sqlite://other.db");
        assert_eq!(
            cfg.database_url_with(Some("sqlite::memory:".into())),
            "sqlite::memory:"
        );
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.app.data_dir, "./data");
    }
}
