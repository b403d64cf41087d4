pub mod loader;

use crate::errors::ConfigError;
use crate::logging::LogFormat;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

pub use loader::{ConfigLoader, CONFIG_FILE_NAME};

/// Environment variables that override file settings
pub const ENV_ROOT_RETRY: &str = "FLEXDI_ROOT_RETRY";
pub const ENV_PARENT_LOOKUP: &str = "FLEXDI_PARENT_LOOKUP";
pub const ENV_DEPENDENT_SCAN: &str = "FLEXDI_DEPENDENT_SCAN";
pub const ENV_LOG_LEVEL: &str = "FLEXDI_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "FLEXDI_LOG_FORMAT";

/// Top-level container configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    pub resolution: ResolutionConfig,
    pub unload: UnloadConfig,
    pub logging: LogSettings,
}

/// Fallback behavior of provider resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionConfig {
    /// Retry a failed dependency once through the root module
    pub root_retry: bool,
    /// Search modules that import the current one as the last step
    pub parent_lookup: bool,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            root_retry: true,
            parent_lookup: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnloadConfig {
    pub dependent_scan: DependentScan,
}

/// Which loaded modules count as dependents when deciding whether a module can be unloaded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependentScan {
    /// Singleton importers keep their imports alive too
    #[default]
    AllLoaded,
    /// Only non-singleton importers are considered
    NonSingletonOnly,
}

impl FromStr for DependentScan {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "all_loaded" | "all" => Ok(DependentScan::AllLoaded),
            "non_singleton_only" | "non_singleton" => Ok(DependentScan::NonSingletonOnly),
            _ => Err(ConfigError::InvalidValue {
                key: "unload.dependent_scan".to_string(),
                value: value.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl ContainerConfig {
    /// Parse configuration from TOML text; `origin` is only used in error messages
    pub fn from_toml_str(content: &str, origin: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::TomlParse(origin.to_string(), e))
    }

    /// Apply overrides collected from the environment
    pub fn apply_env(&mut self, env_map: &HashMap<String, String>) -> Result<(), ConfigError> {
        if let Some(value) = env_map.get(ENV_ROOT_RETRY) {
            self.resolution.root_retry = parse_bool(ENV_ROOT_RETRY, value)?;
        }
        if let Some(value) = env_map.get(ENV_PARENT_LOOKUP) {
            self.resolution.parent_lookup = parse_bool(ENV_PARENT_LOOKUP, value)?;
        }
        if let Some(value) = env_map.get(ENV_DEPENDENT_SCAN) {
            self.unload.dependent_scan = value.parse()?;
        }
        if let Some(value) = env_map.get(ENV_LOG_LEVEL) {
            self.logging.level = value.trim().to_string();
        }
        if let Some(value) = env_map.get(ENV_LOG_FORMAT) {
            self.logging.format = value.parse()?;
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}
