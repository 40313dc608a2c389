//! Bridge configuration file.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use uabridge_commands::{CoordinatorConfig, DispatcherConfig};
use uabridge_core::config::{defaults, env_vars, normalize_endpoint};
use uabridge_devices::{DeviceConfig, DeviceProfile, SimulationConfig};

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// `[transport]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub endpoint: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: defaults::ENDPOINT.to_string(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub dispatcher: DispatcherConfig,
    pub coordinator: CoordinatorConfig,
    pub transport: TransportConfig,
    pub profiles: Vec<DeviceProfile>,
    pub devices: Vec<DeviceConfig>,
    pub simulation: SimulationConfig,
}

impl BridgeConfig {
    /// Load a file, apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(content)?;
        config.normalize();
        Ok(config)
    }

    fn normalize(&mut self) {
        self.transport.endpoint = normalize_endpoint(&self.transport.endpoint);
        for device in &mut self.devices {
            device.endpoint = normalize_endpoint(&device.endpoint);
        }
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(endpoint) = env_vars::endpoint() {
            self.transport.endpoint = normalize_endpoint(&endpoint);
        }
        if let Some(ms) = env_vars::transport_timeout_ms() {
            self.coordinator.transport_timeout_ms = ms;
        }
        if let Some(ms) = env_vars::command_timeout_ms() {
            self.coordinator.command_timeout_ms = ms;
        }
        if let Some(max) = env_vars::max_concurrent() {
            self.coordinator.max_concurrent_operations = max;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.coordinator.transport_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "coordinator.transport_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.coordinator.command_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "coordinator.command_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.coordinator.max_concurrent_operations == 0 {
            return Err(ConfigError::Invalid(
                "coordinator.max_concurrent_operations must be greater than zero".into(),
            ));
        }
        if self.dispatcher.handler_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "dispatcher.handler_timeout_ms must be greater than zero".into(),
            ));
        }

        for profile in &self.profiles {
            profile.validate().map_err(ConfigError::Invalid)?;
        }

        let profiles: HashSet<&str> = self.profiles.iter().map(|p| p.name.as_str()).collect();
        let mut devices = HashSet::new();
        for device in &self.devices {
            if !profiles.contains(device.profile.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "device '{}' uses unknown profile '{}'",
                    device.name, device.profile
                )));
            }
            if !devices.insert(device.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "device '{}' is declared twice",
                    device.name
                )));
            }
        }
        Ok(())
    }
}
