//! # Configuration Loader
//!
//! Loading, saving, and default-creation of the TOML configuration file.
//!
//! ## Examples
//!
//! ```no_run
//! use drover_proxy::config::loader::ConfigLoader;
//! use std::path::Path;
//!
//! let loader = ConfigLoader::new(Path::new("./config")).unwrap();
//! println!("log level: {}", loader.get_config().application.log_level);
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::config::schema::AppConfig;
use crate::definitions::errors::{ConfigError, ConfigResult};

/// Configuration loader that handles loading and saving configuration
/// files.
pub struct ConfigLoader {
    /// Directory containing configuration files
    config_dir: PathBuf,

    /// Base configuration file name
    config_filename: String,

    /// Current configuration
    config: AppConfig,
}

impl ConfigLoader {
    /// Creates a loader with the default `config.toml` filename.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory cannot be created or the file
    /// is malformed.
    pub fn new<P: AsRef<Path>>(config_dir: P) -> ConfigResult<Self> {
        Self::with_filename(config_dir, "config.toml")
    }

    /// Creates a loader with a custom filename, creating the directory
    /// and a default file when missing.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory cannot be created or the file
    /// is malformed.
    pub fn with_filename<P: AsRef<Path>>(config_dir: P, filename: &str) -> ConfigResult<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            info!("creating configuration directory {config_dir:?}");
            fs::create_dir_all(&config_dir).map_err(ConfigError::IoError)?;
        }

        let config_path = config_dir.join(filename);
        let config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            info!("configuration file not found, creating default");
            let default_config = AppConfig::default();
            Self::save_to_file(&default_config, &config_path)?;
            default_config
        };

        Ok(ConfigLoader {
            config_dir,
            config_filename: filename.to_string(),
            config,
        })
    }

    /// The current configuration.
    #[must_use]
    pub fn get_config(&self) -> &AppConfig {
        &self.config
    }

    /// Mutable access to the current configuration.
    pub fn get_config_mut(&mut self) -> &mut AppConfig {
        &mut self.config
    }

    /// Replaces the configuration and persists it.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be written.
    pub fn update_config(&mut self, config: AppConfig) -> ConfigResult<()> {
        let config_path = self.config_dir.join(&self.config_filename);
        Self::save_to_file(&config, &config_path)?;
        self.config = config;
        debug!("configuration updated and saved to {config_path:?}");
        Ok(())
    }

    /// Reloads the configuration from disk.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingConfig` when the file disappeared.
    pub fn reload(&mut self) -> ConfigResult<()> {
        let config_path = self.config_dir.join(&self.config_filename);
        if config_path.exists() {
            self.config = Self::load_from_file(&config_path)?;
            debug!("configuration reloaded from {config_path:?}");
            Ok(())
        } else {
            warn!("configuration file not found at {config_path:?}");
            Err(ConfigError::MissingConfig(config_path))
        }
    }

    /// Saves the current configuration to disk.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be written.
    pub fn save(&self) -> ConfigResult<()> {
        let config_path = self.config_dir.join(&self.config_filename);
        Self::save_to_file(&self.config, &config_path)?;
        debug!("configuration saved to {config_path:?}");
        Ok(())
    }

    fn load_from_file(path: &Path) -> ConfigResult<AppConfig> {
        let content = fs::read_to_string(path).map_err(ConfigError::IoError)?;
        let config = toml::from_str(&content)?;
        Ok(config)
    }

    fn save_to_file(config: &AppConfig, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(config)?;
        fs::write(path, content).map_err(ConfigError::IoError)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = std::env::temp_dir().join(format!("drover-config-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);

        let loader = ConfigLoader::new(&dir).unwrap();
        assert!(dir.join("config.toml").exists());
        assert_eq!(loader.get_config().application.log_level, "info");

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn updates_persist_across_reload() {
        let dir = std::env::temp_dir().join(format!("drover-config-rw-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);

        let mut loader = ConfigLoader::new(&dir).unwrap();
        let mut config = loader.get_config().clone();
        config.pool.min_req_proxy = 7;
        loader.update_config(config).unwrap();

        let mut fresh = ConfigLoader::new(&dir).unwrap();
        fresh.reload().unwrap();
        assert_eq!(fresh.get_config().pool.min_req_proxy, 7);

        let _ = fs::remove_dir_all(&dir);
    }
}
