//! Device layer errors.

use uabridge_core::CommandVerb;

/// Errors raised while registering or resolving devices and profiles.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeviceError {
    /// Device not found
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Profile not found
    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    /// Command not found for the requested verb
    #[error("Command '{command}' ({verb}) not found for device '{device}'")]
    CommandNotFound {
        device: String,
        command: String,
        verb: CommandVerb,
    },

    /// Device is administratively locked
    #[error("Device is locked: {0}")]
    Locked(String),

    /// Already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Profile failed validation
    #[error("Invalid profile: {0}")]
    InvalidProfile(String),

    /// Profile still referenced by devices
    #[error("Profile '{profile}' is in use by {count} device(s)")]
    ProfileInUse { profile: String, count: usize },
}
