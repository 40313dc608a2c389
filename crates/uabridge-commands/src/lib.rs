//! Command execution and correlation engine.
//!
//! ## Architecture
//!
//! - **ResultCache**: last known value per (device, object)
//! - **Dispatcher**: single consumer of the inbound/outbound message queue
//! - **ErrorAdapter**: turns transport failures into queue messages
//! - **TransactionTable**: issued and completed sub-operations per command
//! - **CorrelationRouter**: dispatch handlers feeding the table, cache and bus
//! - **CommandCoordinator**: splits a command, runs it, waits for the result
//!
//! ```text
//! caller ─► CommandCoordinator ─► worker ─► Transport
//!                 ▲                  │ ok        │ error / timeout
//!                 │                  ▼           ▼
//!          TransactionTable ◄── complete    ErrorAdapter ─► Dispatcher ─► CorrelationRouter ─► fail
//! ```

pub mod bridge;
pub mod cache;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod error_adapter;
pub mod message;
pub mod router;
pub mod transaction;

pub use bridge::Bridge;
pub use cache::{CacheEntry, ResultCache};
pub use coordinator::{CommandCoordinator, CommandResponse, CoordinatorConfig, ExecuteOptions};
pub use dispatcher::{
    DispatchQueue, Dispatcher, DispatcherConfig, DispatcherState, DispatcherStats, MessageHandler,
};
pub use error::{CommandError, DispatchError, Result};
pub use error_adapter::{ErrorAdapter, ErrorContext};
pub use message::{DispatchMessage, ErrorNotice, InboundResponse, MessageKind, MonitoredReport};
pub use router::CorrelationRouter;
pub use transaction::{FailureKind, OpFailure, Progress, TransactionOutcome, TransactionTable};
