//! Device profiles and device instances.
//!
//! A [`DeviceProfile`] is the template shared by every device of one model:
//! the objects (OPC-UA nodes) it exposes and the commands built from them.
//! A [`DeviceConfig`] binds a named device to a profile and an endpoint.

use serde::{Deserialize, Serialize};

use uabridge_core::{CommandVerb, Operation, OperationKind, ReadingValue, ValueType};

/// An addressable object (property/variable/method) of a device profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectDefinition {
    /// Object name, unique within the profile
    pub name: String,
    /// OPC-UA node identifier, e.g. `ns=2;s=Temperature`
    pub node_id: String,
    /// Declared value type
    pub value_type: ValueType,
    #[serde(default = "default_true")]
    pub readable: bool,
    #[serde(default)]
    pub writable: bool,
    /// Engineering unit, informational only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
}

fn default_true() -> bool {
    true
}

impl ObjectDefinition {
    pub fn new(name: impl Into<String>, node_id: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            node_id: node_id.into(),
            value_type,
            readable: true,
            writable: false,
            units: None,
        }
    }

    pub fn writable(mut self) -> Self {
        self.writable = true;
        self
    }

    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = Some(units.into());
        self
    }
}

/// One entry of a command's `get` or `set` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceOperation {
    /// Object the operation targets
    pub object: String,
    /// Explicit operation kind; defaults to read for `get` and write for `set`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<OperationKind>,
    /// Value written when the caller does not supply one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<ReadingValue>,
}

impl ResourceOperation {
    pub fn new(object: impl Into<String>) -> Self {
        Self {
            object: object.into(),
            kind: None,
            default_value: None,
        }
    }

    pub fn with_kind(mut self, kind: OperationKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_default_value(mut self, value: impl Into<ReadingValue>) -> Self {
        self.default_value = Some(value.into());
        self
    }
}

/// A named command: the operations run for `get` and for `set`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandDefinition {
    pub name: String,
    #[serde(default)]
    pub get: Vec<ResourceOperation>,
    #[serde(default)]
    pub set: Vec<ResourceOperation>,
}

impl CommandDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            get: Vec::new(),
            set: Vec::new(),
        }
    }

    pub fn with_get(mut self, op: ResourceOperation) -> Self {
        self.get.push(op);
        self
    }

    pub fn with_set(mut self, op: ResourceOperation) -> Self {
        self.set.push(op);
        self
    }

    /// Resolve the operations for one verb. Empty when the verb is not supported.
    pub fn operations(&self, verb: CommandVerb) -> Vec<Operation> {
        let (entries, default_kind) = match verb {
            CommandVerb::Get => (&self.get, OperationKind::Read),
            CommandVerb::Set => (&self.set, OperationKind::Write),
        };

        entries
            .iter()
            .map(|entry| Operation {
                command: self.name.clone(),
                object: entry.object.clone(),
                kind: entry.kind.unwrap_or(default_kind),
                default_value: entry.default_value.clone(),
            })
            .collect()
    }
}

/// Device profile (template).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    /// Unique profile name
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub objects: Vec<ObjectDefinition>,
    #[serde(default)]
    pub commands: Vec<CommandDefinition>,
}

impl DeviceProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            objects: Vec::new(),
            commands: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_object(mut self, object: ObjectDefinition) -> Self {
        self.objects.push(object);
        self
    }

    pub fn with_command(mut self, command: CommandDefinition) -> Self {
        self.commands.push(command);
        self
    }

    pub fn object(&self, name: &str) -> Option<&ObjectDefinition> {
        self.objects.iter().find(|o| o.name == name)
    }

    pub fn command(&self, name: &str) -> Option<&CommandDefinition> {
        self.commands.iter().find(|c| c.name == name)
    }

    pub fn object_by_node(&self, node_id: &str) -> Option<&ObjectDefinition> {
        self.objects.iter().find(|o| o.node_id == node_id)
    }

    /// Check internal consistency: a name and unique object and command names.
    ///
    /// Commands may reference objects the profile lacks; executing such a
    /// command fails at resolution time.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("profile name is empty".to_string());
        }

        let mut seen = std::collections::HashSet::new();
        for object in &self.objects {
            if !seen.insert(object.name.as_str()) {
                return Err(format!(
                    "profile '{}' declares object '{}' twice",
                    self.name, object.name
                ));
            }
        }

        let mut commands = std::collections::HashSet::new();
        for command in &self.commands {
            if !commands.insert(command.name.as_str()) {
                return Err(format!(
                    "profile '{}' declares command '{}' twice",
                    self.name, command.name
                ));
            }
        }

        Ok(())
    }
}

/// Administrative state of a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminState {
    #[default]
    Unlocked,
    Locked,
}

/// Device instance configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique device name
    pub name: String,
    /// Profile the device is built from
    pub profile: String,
    /// Server endpoint of the device
    pub endpoint: String,
    #[serde(default)]
    pub admin_state: AdminState,
}

impl DeviceConfig {
    pub fn new(
        name: impl Into<String>,
        profile: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            profile: profile.into(),
            endpoint: endpoint.into(),
            admin_state: AdminState::Unlocked,
        }
    }

    pub fn locked(mut self) -> Self {
        self.admin_state = AdminState::Locked;
        self
    }

    pub fn is_locked(&self) -> bool {
        self.admin_state == AdminState::Locked
    }
}

/// A profile object resolved for a concrete device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceObject {
    pub device_name: String,
    pub endpoint: String,
    pub name: String,
    pub node_id: String,
    pub value_type: ValueType,
    pub readable: bool,
    pub writable: bool,
}

impl DeviceObject {
    pub fn bind(device: &DeviceConfig, object: &ObjectDefinition) -> Self {
        Self {
            device_name: device.name.clone(),
            endpoint: device.endpoint.clone(),
            name: object.name.clone(),
            node_id: object.node_id.clone(),
            value_type: object.value_type,
            readable: object.readable,
            writable: object.writable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thermostat() -> DeviceProfile {
        DeviceProfile::new("thermostat")
            .with_object(ObjectDefinition::new("temp", "ns=2;s=Temperature", ValueType::Float))
            .with_object(
                ObjectDefinition::new("setpoint", "ns=2;s=Setpoint", ValueType::Float).writable(),
            )
            .with_command(
                CommandDefinition::new("climate")
                    .with_get(ResourceOperation::new("temp"))
                    .with_get(ResourceOperation::new("setpoint"))
                    .with_set(ResourceOperation::new("setpoint").with_default_value(20.0)),
            )
    }

    #[test]
    fn test_command_operations_by_verb() {
        let profile = thermostat();
        let command = profile.command("climate").unwrap();

        let get = command.operations(CommandVerb::Get);
        assert_eq!(get.len(), 2);
        assert!(get.iter().all(|op| op.kind == OperationKind::Read));
        assert_eq!(get[0].command, "climate");

        let set = command.operations(CommandVerb::Set);
        assert_eq!(set.len(), 1);
        assert_eq!(set[0].kind, OperationKind::Write);
        assert_eq!(set[0].default_value, Some(ReadingValue::Float(20.0)));
    }

    #[test]
    fn test_validate_rejects_duplicate_objects() {
        let profile = thermostat()
            .with_object(ObjectDefinition::new("temp", "ns=2;s=Other", ValueType::Float));
        assert!(profile.validate().is_err());
        assert!(thermostat().validate().is_ok());
    }

    #[test]
    fn test_object_by_node() {
        let profile = thermostat();
        assert_eq!(
            profile.object_by_node("ns=2;s=Setpoint").map(|o| o.name.as_str()),
            Some("setpoint")
        );
        assert!(profile.object_by_node("ns=2;s=Missing").is_none());
    }
}
