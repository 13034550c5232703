use crate::models::AppConfig;
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use ::config::{Config, Environment, File, FileFormat};
use std::fs;

/// Prefix for environment overrides, e.g. `VAC__SWEEP__VOLTAGE_MAX=5`
pub const ENV_PREFIX: &str = "VAC";

/// Default configuration file name, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "vac.yaml";

/// Configuration manager for loading and saving the YAML configuration.
///
/// Sources are layered in this order, later ones winning:
/// 1. Built-in defaults ([`AppConfig::default`])
/// 2. The YAML file, if present
/// 3. `VAC__`-prefixed environment variables (`__` separates levels)
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_path: Utf8PathBuf,
}

impl ConfigManager {
    /// Create a ConfigManager for the given file.
    ///
    /// The file does not have to exist; defaults are used in that case.
    pub fn new<P: AsRef<Utf8Path>>(config_path: P) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
        }
    }

    /// Load, merge and validate the configuration.
    ///
    /// # Errors
    /// Fails when the file is unreadable or malformed, an environment value
    /// has the wrong type, or validation rejects the result.
    pub fn load(&self) -> Result<AppConfig> {
        if !self.config_path.exists() {
            tracing::warn!(
                "Config file not found at {}, using defaults",
                self.config_path
            );
        }

        let settings = Config::builder()
            .add_source(File::new(self.config_path.as_str(), FileFormat::Yaml).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read config: {}", self.config_path))?;

        let config: AppConfig = settings
            .try_deserialize()
            .with_context(|| format!("Failed to parse config: {}", self.config_path))?;

        config
            .validate()
            .with_context(|| format!("Invalid config: {}", self.config_path))?;

        tracing::info!("Loaded config from {}", self.config_path);
        Ok(config)
    }

    /// Save the configuration as YAML, creating parent directories.
    pub fn save(&self, config: &AppConfig) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            if !parent.as_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {}", parent))?;
            }
        }

        let yaml_string =
            serde_yaml_ng::to_string(config).context("Failed to serialize config to YAML")?;

        fs::write(&self.config_path, yaml_string)
            .with_context(|| format!("Failed to write config: {}", self.config_path))?;

        tracing::info!("Saved config to {}", self.config_path);
        Ok(())
    }

    /// Get the configuration file path.
    pub fn config_path(&self) -> &Utf8Path {
        &self.config_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_config_manager() -> (ConfigManager, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let dir = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        let manager = ConfigManager::new(dir.join("vac.yaml"));
        (manager, temp_dir)
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let (manager, _temp_dir) = create_test_config_manager();
        let config = manager.load().unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_load_save_config() {
        let (manager, _temp_dir) = create_test_config_manager();

        let mut config = AppConfig::default();
        config.sweep.voltage_max = 4.0;
        config.plot.enabled = false;
        manager.save(&config).unwrap();

        let loaded = manager.load().unwrap();
        assert_eq!(loaded.sweep.voltage_max, 4.0);
        assert!(!loaded.plot.enabled);
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let (manager, _temp_dir) = create_test_config_manager();
        fs::write(manager.config_path(), "sweep:\n  voltage_step: -1.0\n").unwrap();

        let err = manager.load().unwrap_err();
        assert!(format!("{:#}", err).contains("voltage_step must be positive"));
    }
}
