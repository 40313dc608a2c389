//! Command layer errors.

use uabridge_core::{CommandVerb, OpId, TransactionId};
use uabridge_devices::DeviceError;

/// Errors returned to callers of the command layer.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommandError {
    #[error("Device not found: {0}")]
    NotFoundDevice(String),

    #[error("Command '{command}' ({verb}) not found for device '{device}'")]
    NotFoundCommand {
        device: String,
        command: String,
        verb: CommandVerb,
    },

    #[error("Object '{object}' not found for device '{device}'")]
    NotFoundObject { device: String, object: String },

    #[error("Device is locked: {0}")]
    Locked(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Operation {op_id} of transaction {transaction_id} already completed")]
    DuplicateCompletion {
        transaction_id: TransactionId,
        op_id: OpId,
    },

    #[error("Operation {op_id} was not issued by transaction {transaction_id}")]
    UnknownOperation {
        transaction_id: TransactionId,
        op_id: OpId,
    },

    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    #[error("Dispatcher is not running")]
    DispatcherNotRunning,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<DeviceError> for CommandError {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::DeviceNotFound(device) => Self::NotFoundDevice(device),
            DeviceError::CommandNotFound {
                device,
                command,
                verb,
            } => Self::NotFoundCommand {
                device,
                command,
                verb,
            },
            DeviceError::Locked(device) => Self::Locked(device),
            other => Self::Config(other.to_string()),
        }
    }
}

/// Dispatcher errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DispatchError {
    #[error("Dispatch queue is closed")]
    QueueClosed,

    #[error("Dispatcher is already running")]
    AlreadyRunning,

    #[error("Dispatcher is not running")]
    NotRunning,

    #[error("Handler failed: {0}")]
    Handler(String),

    #[error("Handler timed out after {0}ms")]
    HandlerTimeout(u64),
}

impl From<CommandError> for DispatchError {
    fn from(err: CommandError) -> Self {
        Self::Handler(err.to_string())
    }
}

impl From<DispatchError> for CommandError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::QueueClosed | DispatchError::NotRunning => Self::DispatcherNotRunning,
            other => Self::Transport(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, CommandError>;
