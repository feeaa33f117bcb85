//! Configuration management for SessionVault
//!
//! This module handles loading and validating configuration from files,
//! environment variables, and command-line arguments.

use crate::error::{Result, VaultError};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Main configuration structure for SessionVault
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Storage backend selection
    #[serde(default)]
    pub storage: StorageConfig,

    /// Crash-recovery snapshotting
    #[serde(default)]
    pub recovery: RecoveryConfig,
}

/// Storage backend configuration
///
/// `options` is passed verbatim to the backend constructor:
/// `base_dir` for `filesystem`, `path` and `user_id` for `sqlite`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Backend key: filesystem, sqlite, memory
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Backend-specific options
    #[serde(default)]
    pub options: HashMap<String, String>,
}

fn default_backend() -> String {
    "filesystem".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            options: HashMap::new(),
        }
    }
}

impl StorageConfig {
    /// Option key that holds the on-disk location for `backend`
    fn location_key(backend: &str) -> Option<&'static str> {
        match backend {
            "filesystem" => Some("base_dir"),
            "sqlite" => Some("path"),
            _ => None,
        }
    }

    /// Fill in the data-directory default for the selected backend
    fn apply_default_location(&mut self) {
        let default = match self.backend.as_str() {
            "filesystem" => default_data_dir().join("sessions"),
            "sqlite" => default_data_dir().join("sessions.db"),
            _ => return,
        };
        if let Some(key) = Self::location_key(&self.backend) {
            self.options
                .entry(key.to_string())
                .or_insert_with(|| default.display().to_string());
        }
    }
}

/// Auto-recovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Run the periodic snapshotter
    #[serde(default = "default_recovery_enabled")]
    pub enabled: bool,

    /// Milliseconds between snapshots
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Snapshots older than this are ignored
    #[serde(default = "default_max_age_seconds")]
    pub max_age_seconds: u64,

    /// Rotated backups to keep; zero or negative disables rotation
    #[serde(default = "default_backup_count")]
    pub backup_count: i32,

    /// Recovery file location; defaults under the data directory
    #[serde(default)]
    pub recovery_file: Option<PathBuf>,
}

fn default_recovery_enabled() -> bool {
    true
}

fn default_interval_ms() -> u64 {
    30_000
}

fn default_max_age_seconds() -> u64 {
    86_400
}

fn default_backup_count() -> i32 {
    3
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: default_recovery_enabled(),
            interval_ms: default_interval_ms(),
            max_age_seconds: default_max_age_seconds(),
            backup_count: default_backup_count(),
            recovery_file: None,
        }
    }
}

impl RecoveryConfig {
    /// Effective recovery file path
    pub fn recovery_path(&self) -> PathBuf {
        self.recovery_file.clone().unwrap_or_else(|| {
            default_data_dir()
                .join("recovery")
                .join("session_recovery.json")
        })
    }
}

/// Platform data directory, or `./.sessionvault` when none can be determined
pub fn default_data_dir() -> PathBuf {
    ProjectDirs::from("com", "sessionvault", "sessionvault")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".sessionvault"))
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Returns
    ///
    /// Returns the loaded and merged configuration
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);
        config.storage.apply_default_location();

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| VaultError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| VaultError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(backend) = std::env::var("SESSIONVAULT_BACKEND") {
            self.storage.backend = backend;
        }

        if let Ok(dir) = std::env::var("SESSIONVAULT_DATA_DIR") {
            self.storage.options.insert("base_dir".to_string(), dir);
        }

        if let Ok(db_path) = std::env::var("SESSIONVAULT_DB_PATH") {
            self.storage.options.insert("path".to_string(), db_path);
        }

        if let Ok(user_id) = std::env::var("SESSIONVAULT_USER_ID") {
            self.storage.options.insert("user_id".to_string(), user_id);
        }

        if let Ok(enabled) = std::env::var("SESSIONVAULT_RECOVERY_ENABLED") {
            match enabled.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.recovery.enabled = true,
                "0" | "false" | "no" | "off" => self.recovery.enabled = false,
                _ => tracing::warn!("Invalid SESSIONVAULT_RECOVERY_ENABLED: {}", enabled),
            }
        }

        if let Ok(interval) = std::env::var("SESSIONVAULT_RECOVERY_INTERVAL_MS") {
            if let Ok(value) = interval.parse() {
                self.recovery.interval_ms = value;
            } else {
                tracing::warn!("Invalid SESSIONVAULT_RECOVERY_INTERVAL_MS: {}", interval);
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(backend) = &cli.backend {
            self.storage.backend = backend.clone();
        }

        if let Some(path) = &cli.storage_path {
            match StorageConfig::location_key(&self.storage.backend) {
                Some(key) => {
                    self.storage
                        .options
                        .insert(key.to_string(), path.display().to_string());
                }
                None => tracing::warn!(
                    "--storage-path has no effect for the {} backend",
                    self.storage.backend
                ),
            }
        }

        if cli.verbose {
            tracing::debug!("Verbose mode enabled");
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `VaultError::Config` if any check fails
    pub fn validate(&self) -> Result<()> {
        if self.storage.backend.is_empty() {
            return Err(VaultError::Config("storage.backend cannot be empty".to_string()).into());
        }

        if self.recovery.interval_ms == 0 {
            return Err(VaultError::Config(
                "recovery.interval_ms must be greater than 0".to_string(),
            )
            .into());
        }

        if self.recovery.max_age_seconds == 0 {
            return Err(VaultError::Config(
                "recovery.max_age_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use serial_test::serial;
    use std::env;

    const ENV_VARS: [&str; 6] = [
        "SESSIONVAULT_BACKEND",
        "SESSIONVAULT_DATA_DIR",
        "SESSIONVAULT_DB_PATH",
        "SESSIONVAULT_USER_ID",
        "SESSIONVAULT_RECOVERY_ENABLED",
        "SESSIONVAULT_RECOVERY_INTERVAL_MS",
    ];

    fn clear_env() {
        for var in ENV_VARS {
            env::remove_var(var);
        }
    }

    fn cli() -> Cli {
        Cli {
            config: None,
            verbose: false,
            backend: None,
            storage_path: None,
            command: Commands::List,
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.storage.backend, "filesystem");
        assert!(config.recovery.enabled);
        assert_eq!(config.recovery.interval_ms, 30_000);
        assert_eq!(config.recovery.max_age_seconds, 86_400);
        assert_eq!(config.recovery.backup_count, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_empty_backend() {
        let mut config = Config::default();
        config.storage.backend = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_interval() {
        let mut config = Config::default();
        config.recovery.interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_max_age() {
        let mut config = Config::default();
        config.recovery.max_age_seconds = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<VaultError>(),
            Some(VaultError::Config(_))
        ));
    }

    #[test]
    fn test_config_from_yaml() {
        let yaml = r#"
storage:
  backend: sqlite
  options:
    path: /tmp/vault.db
    user_id: alice
recovery:
  interval_ms: 5000
  backup_count: 0
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.storage.backend, "sqlite");
        assert_eq!(config.storage.options["user_id"], "alice");
        assert_eq!(config.recovery.interval_ms, 5000);
        assert_eq!(config.recovery.backup_count, 0);
        assert!(config.recovery.enabled);
        assert_eq!(config.recovery.max_age_seconds, 86_400);
    }

    #[test]
    #[serial]
    fn test_load_nonexistent_file_uses_defaults() {
        clear_env();
        let config = Config::load("nonexistent.yaml", &cli()).unwrap();
        assert_eq!(config.storage.backend, "filesystem");
        assert!(config
            .storage
            .options
            .get("base_dir")
            .is_some_and(|d| d.ends_with("sessions")));
    }

    #[test]
    #[serial]
    fn test_load_reads_file() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "storage:\n  backend: memory\nrecovery:\n  enabled: false\n",
        )
        .unwrap();
        let config = Config::load(path.to_str().unwrap(), &cli()).unwrap();
        assert_eq!(config.storage.backend, "memory");
        assert!(!config.recovery.enabled);
    }

    #[test]
    #[serial]
    fn test_load_invalid_yaml_is_config_error() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "storage: [unclosed").unwrap();
        let err = Config::load(path.to_str().unwrap(), &cli()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<VaultError>(),
            Some(VaultError::Config(_))
        ));
    }

    #[test]
    #[serial]
    fn test_apply_env_vars_overrides_storage_and_recovery() {
        clear_env();
        env::set_var("SESSIONVAULT_BACKEND", "sqlite");
        env::set_var("SESSIONVAULT_DB_PATH", "/tmp/env.db");
        env::set_var("SESSIONVAULT_USER_ID", "bob");
        env::set_var("SESSIONVAULT_RECOVERY_ENABLED", "false");
        env::set_var("SESSIONVAULT_RECOVERY_INTERVAL_MS", "250");

        let config = Config::load("nonexistent.yaml", &cli()).unwrap();
        clear_env();

        assert_eq!(config.storage.backend, "sqlite");
        assert_eq!(config.storage.options["path"], "/tmp/env.db");
        assert_eq!(config.storage.options["user_id"], "bob");
        assert!(!config.recovery.enabled);
        assert_eq!(config.recovery.interval_ms, 250);
    }

    #[test]
    #[serial]
    fn test_invalid_env_interval_is_ignored() {
        clear_env();
        env::set_var("SESSIONVAULT_RECOVERY_INTERVAL_MS", "soon");
        let config = Config::load("nonexistent.yaml", &cli()).unwrap();
        clear_env();
        assert_eq!(config.recovery.interval_ms, 30_000);
    }

    #[test]
    #[serial]
    fn test_cli_storage_path_maps_to_backend_option() {
        clear_env();
        let mut cli = cli();
        cli.backend = Some("sqlite".to_string());
        cli.storage_path = Some(PathBuf::from("/tmp/cli.db"));
        let config = Config::load("nonexistent.yaml", &cli).unwrap();
        assert_eq!(config.storage.backend, "sqlite");
        assert_eq!(config.storage.options["path"], "/tmp/cli.db");
        assert!(!config.storage.options.contains_key("base_dir"));

        let mut cli = self::cli();
        cli.storage_path = Some(PathBuf::from("/tmp/sessions"));
        let config = Config::load("nonexistent.yaml", &cli).unwrap();
        assert_eq!(config.storage.options["base_dir"], "/tmp/sessions");
    }

    #[test]
    fn test_recovery_path_default_and_override() {
        let mut recovery = RecoveryConfig::default();
        assert!(recovery
            .recovery_path()
            .ends_with(Path::new("recovery").join("session_recovery.json")));
        recovery.recovery_file = Some(PathBuf::from("/tmp/r.json"));
        assert_eq!(recovery.recovery_path(), PathBuf::from("/tmp/r.json"));
    }
}
