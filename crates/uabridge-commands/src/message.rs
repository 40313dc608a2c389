//! Messages carried by the dispatch queue.

use std::fmt;

use serde::{Deserialize, Serialize};

use uabridge_core::{Correlation, ReadingValue};
use uabridge_devices::{ProtocolRequest, ProtocolResponse, StatusCode};

/// Routing tag of a [`DispatchMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    OutboundRequest,
    OutboundRequests,
    InboundResponse,
    InboundBrowseResponse,
    InboundReport,
    InboundError,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::OutboundRequest => "outbound_request",
            Self::OutboundRequests => "outbound_requests",
            Self::InboundResponse => "inbound_response",
            Self::InboundBrowseResponse => "inbound_browse_response",
            Self::InboundReport => "inbound_report",
            Self::InboundError => "inbound_error",
        };
        f.write_str(name)
    }
}

/// A solicited response delivered through the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundResponse {
    /// Present when the request was issued for a transaction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation: Option<Correlation>,
    pub response: ProtocolResponse,
}

impl InboundResponse {
    pub fn new(response: ProtocolResponse, correlation: Option<Correlation>) -> Self {
        Self {
            correlation,
            response,
        }
    }
}

/// An unsolicited data change reported by a server subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredReport {
    pub endpoint: String,
    pub node_id: String,
    pub value: ReadingValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_timestamp: Option<i64>,
}

impl MonitoredReport {
    pub fn new(
        endpoint: impl Into<String>,
        node_id: impl Into<String>,
        value: impl Into<ReadingValue>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            node_id: node_id.into(),
            value: value.into(),
            source_timestamp: None,
        }
    }
}

/// A failure turned into a message by the error adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorNotice {
    pub status: StatusCode,
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    /// Profile object the failed operation targeted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation: Option<Correlation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl ErrorNotice {
    /// Human-readable description used in failure records and logs.
    pub fn describe(&self) -> String {
        match &self.cause {
            Some(cause) => format!("{}: {}", self.status, cause),
            None => self.status.to_string(),
        }
    }
}

/// Unit of work flowing through the dispatcher. The variant alone
/// determines which handler receives it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum DispatchMessage {
    OutboundRequest(ProtocolRequest),
    OutboundRequests(Vec<ProtocolRequest>),
    InboundResponse(InboundResponse),
    InboundBrowseResponse(InboundResponse),
    InboundReport(MonitoredReport),
    InboundError(ErrorNotice),
}

impl DispatchMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::OutboundRequest(_) => MessageKind::OutboundRequest,
            Self::OutboundRequests(_) => MessageKind::OutboundRequests,
            Self::InboundResponse(_) => MessageKind::InboundResponse,
            Self::InboundBrowseResponse(_) => MessageKind::InboundBrowseResponse,
            Self::InboundReport(_) => MessageKind::InboundReport,
            Self::InboundError(_) => MessageKind::InboundError,
        }
    }

    /// Correlation carried by the payload, if any.
    pub fn correlation(&self) -> Option<Correlation> {
        match self {
            Self::OutboundRequest(request) => request.correlation,
            Self::InboundResponse(inbound) | Self::InboundBrowseResponse(inbound) => {
                inbound.correlation
            }
            Self::InboundError(notice) => notice.correlation,
            Self::OutboundRequests(_) | Self::InboundReport(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uabridge_core::{OpId, TransactionId};
    use uabridge_devices::RequestAction;

    #[test]
    fn test_kind_and_correlation() {
        let correlation = Correlation::new(TransactionId::new(), OpId(7));
        let request = ProtocolRequest::new("opc.tcp://plc:4840", "ns=2;s=Temperature", RequestAction::Read)
            .with_correlation(correlation);

        let message = DispatchMessage::OutboundRequest(request);
        assert_eq!(message.kind(), MessageKind::OutboundRequest);
        assert_eq!(message.correlation(), Some(correlation));

        let report = DispatchMessage::InboundReport(MonitoredReport::new(
            "opc.tcp://plc:4840",
            "ns=2;s=Temperature",
            21.5,
        ));
        assert_eq!(report.kind(), MessageKind::InboundReport);
        assert_eq!(report.correlation(), None);
    }

    #[test]
    fn test_message_serializes_with_kind_tag() {
        let message = DispatchMessage::InboundReport(MonitoredReport::new(
            "opc.tcp://plc:4840",
            "ns=2;s=Temperature",
            21.5,
        ));
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["kind"], "inbound_report");
        assert_eq!(json["payload"]["value"], 21.5);
    }
}
