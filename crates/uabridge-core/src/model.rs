//! Domain model shared by the device and command layers.
//!
//! A device profile describes *commands*, each of which is a group of
//! [`Operation`]s. Executing a command produces [`Reading`]s. Each caller
//! invocation is tracked by a [`TransactionId`]; every live protocol request
//! issued on its behalf gets an [`OpId`].

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Identifier of one caller-visible command invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub Uuid);

impl TransactionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one issued sub-operation.
///
/// Allocated from a table-wide counter, so an id is never reused while the
/// table lives, even across transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OpId(pub u64);

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

/// Links a protocol request back to the transaction and sub-operation that
/// issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Correlation {
    pub transaction_id: TransactionId,
    pub op_id: OpId,
}

impl Correlation {
    pub fn new(transaction_id: TransactionId, op_id: OpId) -> Self {
        Self {
            transaction_id,
            op_id,
        }
    }
}

impl fmt::Display for Correlation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.transaction_id, self.op_id)
    }
}

/// Verb of a caller command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandVerb {
    /// Read the command's objects.
    Get,
    /// Write the command's objects.
    Set,
}

impl CommandVerb {
    /// `get` when the caller passed no arguments, `set` otherwise.
    pub fn from_arguments(arguments: Option<&serde_json::Value>) -> Self {
        match arguments {
            None | Some(serde_json::Value::Null) => Self::Get,
            Some(_) => Self::Set,
        }
    }
}

impl fmt::Display for CommandVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "get"),
            Self::Set => write!(f, "set"),
        }
    }
}

/// Kind of protocol work an operation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Read,
    Write,
    Subscribe,
    Invoke,
}

impl OperationKind {
    /// Whether a successful completion of this kind leaves the object's
    /// current value known, so it may be cached.
    pub fn is_cacheable(&self) -> bool {
        !matches!(self, Self::Invoke)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
            Self::Subscribe => write!(f, "subscribe"),
            Self::Invoke => write!(f, "invoke"),
        }
    }
}

/// One addressable unit of protocol work within a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Owning command name
    pub command: String,
    /// Target object (profile resource) name
    pub object: String,
    /// What to do with the object
    pub kind: OperationKind,
    /// Value written when a `set` does not name this object explicitly
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<ReadingValue>,
}

impl Operation {
    pub fn new(command: impl Into<String>, object: impl Into<String>, kind: OperationKind) -> Self {
        Self {
            command: command.into(),
            object: object.into(),
            kind,
            default_value: None,
        }
    }

    pub fn with_default_value(mut self, value: impl Into<ReadingValue>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Identity used for last-known-value caching.
    ///
    /// Two commands touching the same object share the cached value.
    pub fn cache_key(&self) -> &str {
        &self.object
    }
}

/// Declared data type of a device object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Integer,
    Float,
    String,
    Boolean,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer => write!(f, "integer"),
            Self::Float => write!(f, "float"),
            Self::String => write!(f, "string"),
            Self::Boolean => write!(f, "boolean"),
        }
    }
}

/// Value carried by a reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReadingValue {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    String(String),
    Null,
}

impl ReadingValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::Boolean(_) => "boolean",
            Self::String(_) => "string",
            Self::Null => "null",
        }
    }

    /// Coerce a caller-supplied JSON value into the declared object type.
    ///
    /// Strings are parsed leniently ("21.5" for a float, "on" for a boolean)
    /// because command arguments frequently arrive as text.
    pub fn from_json(json: &serde_json::Value, expected: ValueType) -> Result<Self> {
        let mismatch = || Error::TypeMismatch {
            value: json.to_string(),
            expected: expected.to_string(),
        };

        match (json, expected) {
            (serde_json::Value::Null, _) => Ok(Self::Null),
            (serde_json::Value::Number(n), ValueType::Integer) => {
                n.as_i64().map(Self::Integer).ok_or_else(mismatch)
            }
            (serde_json::Value::Number(n), ValueType::Float) => {
                n.as_f64().map(Self::Float).ok_or_else(mismatch)
            }
            (serde_json::Value::Bool(b), ValueType::Boolean) => Ok(Self::Boolean(*b)),
            (serde_json::Value::String(s), ValueType::String) => Ok(Self::String(s.clone())),
            (serde_json::Value::String(s), ValueType::Integer) => {
                s.trim().parse::<i64>().map(Self::Integer).map_err(|_| mismatch())
            }
            (serde_json::Value::String(s), ValueType::Float) => {
                s.trim().parse::<f64>().map(Self::Float).map_err(|_| mismatch())
            }
            (serde_json::Value::String(s), ValueType::Boolean) => {
                match s.trim().to_lowercase().as_str() {
                    "true" | "1" | "yes" | "on" => Ok(Self::Boolean(true)),
                    "false" | "0" | "no" | "off" => Ok(Self::Boolean(false)),
                    _ => Err(mismatch()),
                }
            }
            (serde_json::Value::Number(n), ValueType::String) => Ok(Self::String(n.to_string())),
            (serde_json::Value::Bool(b), ValueType::String) => Ok(Self::String(b.to_string())),
            _ => Err(mismatch()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Integer(v) => serde_json::Value::from(*v),
            Self::Float(v) => serde_json::Value::from(*v),
            Self::Boolean(v) => serde_json::Value::Bool(*v),
            Self::String(v) => serde_json::Value::String(v.clone()),
            Self::Null => serde_json::Value::Null,
        }
    }
}

impl fmt::Display for ReadingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Boolean(v) => write!(f, "{}", v),
            Self::String(v) => write!(f, "{}", v),
            Self::Null => write!(f, "null"),
        }
    }
}

impl From<i64> for ReadingValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for ReadingValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for ReadingValue {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<String> for ReadingValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for ReadingValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

/// A single value produced by a device for one of its objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Device the value belongs to
    pub device_name: String,
    /// Profile object (resource) the value was read from or written to
    pub resource_name: String,
    /// The value
    pub value: ReadingValue,
    /// Origin timestamp, milliseconds since the Unix epoch
    pub origin: i64,
}

impl Reading {
    pub fn new(
        device_name: impl Into<String>,
        resource_name: impl Into<String>,
        value: impl Into<ReadingValue>,
    ) -> Self {
        Self {
            device_name: device_name.into(),
            resource_name: resource_name.into(),
            value: value.into(),
            origin: Utc::now().timestamp_millis(),
        }
    }

    pub fn with_origin(mut self, origin: i64) -> Self {
        self.origin = origin;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_verb_from_arguments() {
        assert_eq!(CommandVerb::from_arguments(None), CommandVerb::Get);
        assert_eq!(
            CommandVerb::from_arguments(Some(&serde_json::Value::Null)),
            CommandVerb::Get
        );
        assert_eq!(
            CommandVerb::from_arguments(Some(&json!({"setpoint": 20}))),
            CommandVerb::Set
        );
    }

    #[test]
    fn test_from_json_coercion() {
        assert_eq!(
            ReadingValue::from_json(&json!(21.5), ValueType::Float).unwrap(),
            ReadingValue::Float(21.5)
        );
        assert_eq!(
            ReadingValue::from_json(&json!("42"), ValueType::Integer).unwrap(),
            ReadingValue::Integer(42)
        );
        assert_eq!(
            ReadingValue::from_json(&json!("on"), ValueType::Boolean).unwrap(),
            ReadingValue::Boolean(true)
        );
        assert!(ReadingValue::from_json(&json!("warm"), ValueType::Float).is_err());
        assert!(ReadingValue::from_json(&json!(1.5), ValueType::Integer).is_err());
    }

    #[test]
    fn test_reading_value_serializes_untagged() {
        let reading = Reading::new("D1", "temp", 21.5).with_origin(1000);
        let encoded = serde_json::to_value(&reading).unwrap();
        assert_eq!(encoded["value"], json!(21.5));

        let decoded: Reading = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, reading);
    }

    #[test]
    fn test_operation_cache_key_is_object() {
        let op = Operation::new("status", "temp", OperationKind::Read);
        assert_eq!(op.cache_key(), "temp");
        assert!(op.kind.is_cacheable());
        assert!(OperationKind::Write.is_cacheable());
        assert!(!OperationKind::Invoke.is_cacheable());
    }
}
