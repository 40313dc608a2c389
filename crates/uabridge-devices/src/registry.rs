//! Profile registry and the resolver interface used by the command layer.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use uabridge_core::{CommandVerb, Operation};

use crate::error::DeviceError;
use crate::profile::{DeviceConfig, DeviceObject, DeviceProfile};

/// A device object found by its protocol address.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeBinding {
    pub device_name: String,
    pub object: DeviceObject,
}

/// Resolution of devices, commands and objects from profile-derived tables.
///
/// The command layer only depends on this trait; [`ProfileRegistry`] is the
/// in-memory implementation.
#[async_trait]
pub trait ProfileResolver: Send + Sync {
    /// Look up a device instance.
    async fn resolve_device(&self, device: &str) -> Result<DeviceConfig, DeviceError>;

    /// Operations of `command` for `verb` on `device`.
    async fn resolve_operations(
        &self,
        device: &str,
        command: &str,
        verb: CommandVerb,
    ) -> Result<Vec<Operation>, DeviceError>;

    /// Bind a profile object name to the device, `None` if the profile has no such object.
    async fn resolve_object(&self, device: &str, object: &str) -> Option<DeviceObject>;

    /// Reverse lookup of an unsolicited report's source.
    async fn resolve_node(&self, endpoint: &str, node_id: &str) -> Option<NodeBinding>;
}

/// In-memory registry of profiles and devices.
pub struct ProfileRegistry {
    /// Profiles indexed by name
    profiles: Arc<RwLock<HashMap<String, DeviceProfile>>>,
    /// Devices indexed by name
    devices: Arc<RwLock<HashMap<String, DeviceConfig>>>,
    /// Index: profile name -> device names
    profile_index: Arc<RwLock<HashMap<String, Vec<String>>>>,
}

impl ProfileRegistry {
    pub fn new() -> Self {
        Self {
            profiles: Arc::new(RwLock::new(HashMap::new())),
            devices: Arc::new(RwLock::new(HashMap::new())),
            profile_index: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register (or replace) a profile.
    pub async fn register_profile(&self, profile: DeviceProfile) -> Result<(), DeviceError> {
        profile.validate().map_err(DeviceError::InvalidProfile)?;

        let name = profile.name.clone();
        let replaced = self
            .profiles
            .write()
            .await
            .insert(name.clone(), profile)
            .is_some();

        tracing::debug!(profile = %name, replaced, "Registered device profile");
        Ok(())
    }

    pub async fn get_profile(&self, name: &str) -> Option<DeviceProfile> {
        self.profiles.read().await.get(name).cloned()
    }

    pub async fn list_profiles(&self) -> Vec<DeviceProfile> {
        self.profiles.read().await.values().cloned().collect()
    }

    /// Remove a profile that no device references.
    pub async fn unregister_profile(&self, name: &str) -> Result<(), DeviceError> {
        {
            let index = self.profile_index.read().await;
            if let Some(devices) = index.get(name) {
                if !devices.is_empty() {
                    return Err(DeviceError::ProfileInUse {
                        profile: name.to_string(),
                        count: devices.len(),
                    });
                }
            }
        }

        self.profiles
            .write()
            .await
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| DeviceError::ProfileNotFound(name.to_string()))
    }

    /// Register a device. Its profile must already be registered.
    pub async fn register_device(&self, config: DeviceConfig) -> Result<(), DeviceError> {
        if !self.profiles.read().await.contains_key(&config.profile) {
            return Err(DeviceError::ProfileNotFound(config.profile.clone()));
        }

        let mut devices = self.devices.write().await;
        if devices.contains_key(&config.name) {
            return Err(DeviceError::AlreadyExists(config.name.clone()));
        }

        self.profile_index
            .write()
            .await
            .entry(config.profile.clone())
            .or_default()
            .push(config.name.clone());

        tracing::debug!(
            device = %config.name,
            profile = %config.profile,
            endpoint = %config.endpoint,
            "Registered device"
        );
        devices.insert(config.name.clone(), config);
        Ok(())
    }

    pub async fn unregister_device(&self, name: &str) -> Result<(), DeviceError> {
        let removed = self
            .devices
            .write()
            .await
            .remove(name)
            .ok_or_else(|| DeviceError::DeviceNotFound(name.to_string()))?;

        if let Some(names) = self.profile_index.write().await.get_mut(&removed.profile) {
            names.retain(|n| n != name);
        }
        Ok(())
    }

    pub async fn get_device(&self, name: &str) -> Option<DeviceConfig> {
        self.devices.read().await.get(name).cloned()
    }

    pub async fn list_devices(&self) -> Vec<DeviceConfig> {
        self.devices.read().await.values().cloned().collect()
    }

    pub async fn list_devices_by_profile(&self, profile: &str) -> Vec<DeviceConfig> {
        let names = self
            .profile_index
            .read()
            .await
            .get(profile)
            .cloned()
            .unwrap_or_default();

        let devices = self.devices.read().await;
        names
            .iter()
            .filter_map(|n| devices.get(n).cloned())
            .collect()
    }

    pub async fn device_count(&self) -> usize {
        self.devices.read().await.len()
    }

    pub async fn profile_count(&self) -> usize {
        self.profiles.read().await.len()
    }

    async fn device_with_profile(
        &self,
        device: &str,
    ) -> Result<(DeviceConfig, DeviceProfile), DeviceError> {
        let config = self
            .get_device(device)
            .await
            .ok_or_else(|| DeviceError::DeviceNotFound(device.to_string()))?;
        let profile = self
            .get_profile(&config.profile)
            .await
            .ok_or_else(|| DeviceError::ProfileNotFound(config.profile.clone()))?;
        Ok((config, profile))
    }
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProfileResolver for ProfileRegistry {
    async fn resolve_device(&self, device: &str) -> Result<DeviceConfig, DeviceError> {
        self.get_device(device)
            .await
            .ok_or_else(|| DeviceError::DeviceNotFound(device.to_string()))
    }

    async fn resolve_operations(
        &self,
        device: &str,
        command: &str,
        verb: CommandVerb,
    ) -> Result<Vec<Operation>, DeviceError> {
        let (_, profile) = self.device_with_profile(device).await?;

        let operations = profile
            .command(command)
            .map(|c| c.operations(verb))
            .unwrap_or_default();

        if operations.is_empty() {
            return Err(DeviceError::CommandNotFound {
                device: device.to_string(),
                command: command.to_string(),
                verb,
            });
        }
        Ok(operations)
    }

    async fn resolve_object(&self, device: &str, object: &str) -> Option<DeviceObject> {
        let (config, profile) = self.device_with_profile(device).await.ok()?;
        profile
            .object(object)
            .map(|definition| DeviceObject::bind(&config, definition))
    }

    async fn resolve_node(&self, endpoint: &str, node_id: &str) -> Option<NodeBinding> {
        let devices = self.devices.read().await;
        let profiles = self.profiles.read().await;

        devices
            .values()
            .filter(|d| d.endpoint == endpoint)
            .find_map(|device| {
                let profile = profiles.get(&device.profile)?;
                let definition = profile.object_by_node(node_id)?;
                Some(NodeBinding {
                    device_name: device.name.clone(),
                    object: DeviceObject::bind(device, definition),
                })
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{CommandDefinition, ObjectDefinition, ResourceOperation};
    use uabridge_core::ValueType;

    fn sensor_profile() -> DeviceProfile {
        DeviceProfile::new("sensor")
            .with_object(ObjectDefinition::new("temp", "ns=2;s=Temperature", ValueType::Float))
            .with_command(CommandDefinition::new("temp").with_get(ResourceOperation::new("temp")))
    }

    #[tokio::test]
    async fn test_device_requires_profile() {
        let registry = ProfileRegistry::new();
        let result = registry
            .register_device(DeviceConfig::new("D1", "sensor", "opc.tcp://plc:4840"))
            .await;
        assert_eq!(result, Err(DeviceError::ProfileNotFound("sensor".into())));
    }

    #[tokio::test]
    async fn test_profile_in_use_cannot_be_removed() {
        let registry = ProfileRegistry::new();
        registry.register_profile(sensor_profile()).await.unwrap();
        registry
            .register_device(DeviceConfig::new("D1", "sensor", "opc.tcp://plc:4840"))
            .await
            .unwrap();

        assert!(matches!(
            registry.unregister_profile("sensor").await,
            Err(DeviceError::ProfileInUse { count: 1, .. })
        ));

        registry.unregister_device("D1").await.unwrap();
        registry.unregister_profile("sensor").await.unwrap();
        assert_eq!(registry.profile_count().await, 0);
    }

    #[tokio::test]
    async fn test_resolve_node() {
        let registry = ProfileRegistry::new();
        registry.register_profile(sensor_profile()).await.unwrap();
        registry
            .register_device(DeviceConfig::new("D1", "sensor", "opc.tcp://a:4840"))
            .await
            .unwrap();
        registry
            .register_device(DeviceConfig::new("D2", "sensor", "opc.tcp://b:4840"))
            .await
            .unwrap();

        let binding = registry
            .resolve_node("opc.tcp://b:4840", "ns=2;s=Temperature")
            .await
            .unwrap();
        assert_eq!(binding.device_name, "D2");
        assert_eq!(binding.object.name, "temp");

        assert!(registry
            .resolve_node("opc.tcp://c:4840", "ns=2;s=Temperature")
            .await
            .is_none());
    }
}
