use std::{collections::HashMap, env, fs, path::{Path, PathBuf}};

use super::ContainerConfig;
use crate::errors::ConfigError;

pub const CONFIG_FILE_NAME: &str = "flexdi.toml";

/// Configuration loader responsible for loading config from files and environment
#[derive(Debug, Default)]
pub struct ConfigLoader {
    base_path: Option<PathBuf>,
    file: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader that looks for `flexdi.toml` in the working directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config loader with custom base path (for testing)
    pub fn with_base_path(base_path: PathBuf) -> Self {
        Self {
            base_path: Some(base_path),
            file: None,
        }
    }

    /// Use an explicit configuration file; unlike the default location it must exist
    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }

    /// Load complete container configuration
    pub fn load_config(&self) -> Result<ContainerConfig, ConfigError> {
        let env_map = self.collect_env_vars();
        self.load_with_env(&env_map)
    }

    /// Same as [`load_config`](Self::load_config) with an explicit environment snapshot
    pub fn load_with_env(&self, env_map: &HashMap<String, String>) -> Result<ContainerConfig, ConfigError> {
        let mut config = match &self.file {
            Some(file) => Self::load_file(file)?,
            None => {
                let default_path = self.default_path();
                if default_path.exists() {
                    Self::load_file(&default_path)?
                } else {
                    tracing::debug!(path = %default_path.display(), "No configuration file, using defaults");
                    ContainerConfig::default()
                }
            }
        };

        config.apply_env(env_map)?;
        Ok(config)
    }

    /// Read and parse a single TOML file
    pub fn load_file(path: &Path) -> Result<ContainerConfig, ConfigError> {
        let shown = path.display().to_string();
        let content = fs::read_to_string(path).map_err(|e| ConfigError::FileRead(shown.clone(), e))?;
        let config = ContainerConfig::from_toml_str(&content, &shown)?;
        tracing::debug!(path = %shown, "Loaded configuration file");
        Ok(config)
    }

    fn default_path(&self) -> PathBuf {
        match &self.base_path {
            Some(base) => base.join(CONFIG_FILE_NAME),
            None => PathBuf::from(CONFIG_FILE_NAME),
        }
    }

    /// Collect relevant environment variables
    fn collect_env_vars(&self) -> HashMap<String, String> {
        env::vars().filter(|(key, _)| key.starts_with("FLEXDI_")).collect()
    }
}
