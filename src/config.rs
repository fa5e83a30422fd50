//! Application configuration
//!
//! Optional JSON file read by the CLI and the server (`--config`). Every field
//! has a default, so an empty object (or no file at all) gives the stock
//! setup: all six slots loaded from `saved_models/`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::inference::RegistryConfig;
use crate::utils::error::{Result, XrayError};
use crate::utils::logging::LogLevel;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Where checkpoints live and which slots to load
    #[serde(flatten)]
    pub registry: RegistryConfig,

    /// Minimum log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            registry: RegistryConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Parsed log level; unknown names fall back to `info`
    pub fn log_level(&self) -> LogLevel {
        self.log_level.parse().unwrap_or(LogLevel::Info)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.registry.slots.is_empty() {
            return Err(XrayError::Config("at least one model slot is required".to_string()));
        }

        let mut seen = Vec::new();
        for slot in &self.registry.slots {
            if seen.contains(slot) {
                return Err(XrayError::Config(format!("model slot '{}' listed twice", slot)));
            }
            seen.push(*slot);
        }

        Ok(())
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| XrayError::Config(format!("cannot serialize config: {}", e)))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load and validate configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)
            .map_err(|e| XrayError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }
}
