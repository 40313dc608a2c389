//! Transport boundary.
//!
//! The real OPC-UA client stack lives outside this workspace. The command
//! layer talks to it through [`Transport`], sending one [`ProtocolRequest`]
//! per sub-operation and receiving a [`ProtocolResponse`] or a
//! [`TransportError`].

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use uabridge_core::{Correlation, ReadingValue};

/// Protocol-level result status, a subset of the OPC-UA status codes the
/// bridge distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    Good,
    BadTimeout,
    BadCommunicationError,
    BadNodeIdUnknown,
    BadNotReadable,
    BadNotWritable,
    BadTypeMismatch,
    BadNotConnected,
    BadInternalError,
}

impl StatusCode {
    pub fn is_good(&self) -> bool {
        matches!(self, Self::Good)
    }

    /// Numeric code as defined by OPC-UA Part 6.
    pub fn code(&self) -> u32 {
        match self {
            Self::Good => 0x0000_0000,
            Self::BadTimeout => 0x800A_0000,
            Self::BadCommunicationError => 0x8005_0000,
            Self::BadNodeIdUnknown => 0x8034_0000,
            Self::BadNotReadable => 0x803A_0000,
            Self::BadNotWritable => 0x803B_0000,
            Self::BadTypeMismatch => 0x8074_0000,
            Self::BadNotConnected => 0x808A_0000,
            Self::BadInternalError => 0x8002_0000,
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} (0x{:08X})", self, self.code())
    }
}

/// What a request asks the server to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "value", rename_all = "lowercase")]
pub enum RequestAction {
    Read,
    Write(ReadingValue),
    Subscribe,
    Call(Vec<ReadingValue>),
    Browse,
}

/// A single request for the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolRequest {
    pub endpoint: String,
    pub node_id: String,
    pub action: RequestAction,
    /// Set when the request belongs to a command transaction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation: Option<Correlation>,
}

impl ProtocolRequest {
    pub fn new(endpoint: impl Into<String>, node_id: impl Into<String>, action: RequestAction) -> Self {
        Self {
            endpoint: endpoint.into(),
            node_id: node_id.into(),
            action,
            correlation: None,
        }
    }

    pub fn with_correlation(mut self, correlation: Correlation) -> Self {
        self.correlation = Some(correlation);
        self
    }
}

/// A transport response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolResponse {
    pub endpoint: String,
    pub node_id: String,
    pub status: StatusCode,
    /// Value read, or echoed back after a write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<ReadingValue>,
    /// Server source timestamp, milliseconds since the Unix epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_timestamp: Option<i64>,
    /// Child node ids, populated by browse requests
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<String>,
}

impl ProtocolResponse {
    pub fn good(endpoint: impl Into<String>, node_id: impl Into<String>, value: Option<ReadingValue>) -> Self {
        Self {
            endpoint: endpoint.into(),
            node_id: node_id.into(),
            status: StatusCode::Good,
            value,
            source_timestamp: None,
            references: Vec::new(),
        }
    }

    pub fn with_source_timestamp(mut self, timestamp: i64) -> Self {
        self.source_timestamp = Some(timestamp);
        self
    }
}

/// Transport errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    #[error("Not connected to {0}")]
    NotConnected(String),

    #[error("Communication error: {0}")]
    Communication(String),

    #[error("Bad status {status}: {message}")]
    Status { status: StatusCode, message: String },
}

impl TransportError {
    /// Status code reported for this failure.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Timeout(_) => StatusCode::BadTimeout,
            Self::NotConnected(_) => StatusCode::BadNotConnected,
            Self::Communication(_) => StatusCode::BadCommunicationError,
            Self::Status { status, .. } => *status,
        }
    }
}

/// The protocol transport.
///
/// Implementations must be safe to call from many tasks at once; each call is
/// one independent request/response exchange.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Default endpoint of this transport.
    fn endpoint(&self) -> &str;

    /// Send a request and wait for its response.
    async fn send(&self, request: ProtocolRequest) -> Result<ProtocolResponse, TransportError>;
}
