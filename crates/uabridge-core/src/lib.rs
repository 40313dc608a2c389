//! Core types for uabridge.
//!
//! This crate defines the vocabulary shared by the device, command and CLI
//! crates: readings and their values, operation descriptors, identifiers for
//! transactions and sub-operations, configuration defaults and the monitored
//! data bus that carries unsolicited device reports.

pub mod config;
pub mod error;
pub mod eventbus;
pub mod model;

pub use error::{Error, Result};
pub use eventbus::{MonitoredData, MonitoredDataBus, MonitoredDataReceiver};
pub use model::{
    CommandVerb, Correlation, OpId, Operation, OperationKind, Reading, ReadingValue, TransactionId,
    ValueType,
};

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::config::{defaults, env_vars};
    pub use crate::error::{Error, Result};
    pub use crate::eventbus::{MonitoredData, MonitoredDataBus};
    pub use crate::model::{
        CommandVerb, Correlation, OpId, Operation, OperationKind, Reading, ReadingValue, TransactionId,
        ValueType,
    };
}
