//! Turns failures into inbound-error messages.
//!
//! Transport failures are not returned to the worker's caller. They are
//! reported here, travel through the dispatch queue like any response and
//! end up as a failure record on their transaction.

use uabridge_core::config::defaults;
use uabridge_core::Correlation;
use uabridge_devices::StatusCode;

use crate::dispatcher::DispatchQueue;
use crate::message::{DispatchMessage, ErrorNotice};

/// Whatever is known about the failed exchange.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorContext {
    pub endpoint: Option<String>,
    pub node_id: Option<String>,
    pub object: Option<String>,
    pub correlation: Option<Correlation>,
    pub cause: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn with_object(mut self, object: impl Into<String>) -> Self {
        self.object = Some(object.into());
        self
    }

    pub fn with_correlation(mut self, correlation: Correlation) -> Self {
        self.correlation = Some(correlation);
        self
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }
}

/// Error adapter.
#[derive(Clone)]
pub struct ErrorAdapter {
    queue: DispatchQueue,
    default_endpoint: String,
}

impl ErrorAdapter {
    pub fn new(queue: DispatchQueue) -> Self {
        Self::with_default_endpoint(queue, defaults::ENDPOINT)
    }

    /// Use `endpoint` when a report carries no endpoint of its own.
    pub fn with_default_endpoint(queue: DispatchQueue, endpoint: impl Into<String>) -> Self {
        Self {
            queue,
            default_endpoint: endpoint.into(),
        }
    }

    /// Build the notice for `status` without enqueueing it.
    pub fn notice(&self, status: StatusCode, context: ErrorContext) -> ErrorNotice {
        ErrorNotice {
            status,
            endpoint: context
                .endpoint
                .unwrap_or_else(|| self.default_endpoint.clone()),
            node_id: context.node_id,
            object: context.object,
            correlation: context.correlation,
            cause: context.cause,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Enqueue an inbound-error message. Never blocks; if the queue is gone
    /// the notice is logged and dropped.
    pub fn report(&self, status: StatusCode, context: ErrorContext) {
        let notice = self.notice(status, context);
        tracing::debug!(
            status = %notice.status,
            endpoint = %notice.endpoint,
            node_id = ?notice.node_id,
            "Reporting transport failure"
        );

        if let Err(e) = self.queue.enqueue(DispatchMessage::InboundError(notice.clone())) {
            tracing::error!(
                error = %e,
                status = %notice.status,
                correlation = ?notice.correlation,
                "Failed to enqueue error notice"
            );
        }
    }
}
