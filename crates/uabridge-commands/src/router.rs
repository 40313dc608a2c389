//! Built-in dispatch handlers.
//!
//! [`CorrelationRouter`] closes the loop between the dispatch queue and the
//! transaction table: responses and error notices carrying a correlation
//! complete their sub-operation, unsolicited reports refresh the cache and
//! go out on the monitored data bus, and outbound requests are sent through
//! the transport with the answer fed back into the queue.
//!
//! Outbound sends run on their own tasks. The consumer only hands them off,
//! so a node that never answers cannot hold back the messages behind it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use uabridge_core::{MonitoredData, MonitoredDataBus, Reading, ReadingValue};
use uabridge_devices::{
    NodeBinding, ProfileResolver, ProtocolRequest, ProtocolResponse, RequestAction, Transport,
};

use crate::cache::ResultCache;
use crate::dispatcher::{DispatchQueue, MessageHandler};
use crate::error::DispatchError;
use crate::error_adapter::{ErrorAdapter, ErrorContext};
use crate::message::{DispatchMessage, ErrorNotice, InboundResponse, MonitoredReport};
use crate::transaction::{OpFailure, TransactionTable};

/// Sends outbound requests and feeds the outcome back into the queue.
#[derive(Clone)]
struct OutboundSender {
    transport: Arc<dyn Transport>,
    queue: DispatchQueue,
    errors: ErrorAdapter,
    transport_timeout: Duration,
}

impl OutboundSender {
    async fn send(self, request: ProtocolRequest) {
        let browse = matches!(request.action, RequestAction::Browse);
        let correlation = request.correlation;
        let context = || {
            let mut context = ErrorContext::new()
                .with_endpoint(request.endpoint.clone())
                .with_node(request.node_id.clone());
            if let Some(correlation) = correlation {
                context = context.with_correlation(correlation);
            }
            context
        };

        match tokio::time::timeout(self.transport_timeout, self.transport.send(request.clone())).await
        {
            Ok(Ok(response)) => {
                let inbound = InboundResponse::new(response, correlation);
                let message = if browse {
                    DispatchMessage::InboundBrowseResponse(inbound)
                } else {
                    DispatchMessage::InboundResponse(inbound)
                };
                if let Err(e) = self.queue.enqueue(message) {
                    tracing::error!(error = %e, node_id = %request.node_id, "Failed to enqueue response");
                }
            }
            Ok(Err(e)) => self
                .errors
                .report(e.status_code(), context().with_cause(e.to_string())),
            Err(_) => self.errors.report(
                uabridge_devices::StatusCode::BadTimeout,
                context().with_cause(format!(
                    "no response within {}ms",
                    self.transport_timeout.as_millis()
                )),
            ),
        }
    }
}

/// Routes dispatched messages to the transaction table, cache and bus.
pub struct CorrelationRouter {
    transactions: Arc<TransactionTable>,
    cache: Arc<ResultCache>,
    resolver: Arc<dyn ProfileResolver>,
    outbound: OutboundSender,
    errors: ErrorAdapter,
    monitored: MonitoredDataBus,
}

impl CorrelationRouter {
    pub fn new(
        transactions: Arc<TransactionTable>,
        cache: Arc<ResultCache>,
        resolver: Arc<dyn ProfileResolver>,
        transport: Arc<dyn Transport>,
        queue: DispatchQueue,
        monitored: MonitoredDataBus,
        transport_timeout: Duration,
    ) -> Self {
        let errors = ErrorAdapter::with_default_endpoint(queue.clone(), transport.endpoint());
        Self {
            transactions,
            cache,
            resolver,
            outbound: OutboundSender {
                transport,
                queue,
                errors: errors.clone(),
                transport_timeout,
            },
            errors,
            monitored,
        }
    }

    fn readings_for(
        binding: Option<&NodeBinding>,
        response: &ProtocolResponse,
        browse: bool,
    ) -> Vec<Reading> {
        let (device, resource) = match binding {
            Some(binding) => (binding.device_name.as_str(), binding.object.name.as_str()),
            None => (response.endpoint.as_str(), response.node_id.as_str()),
        };
        let origin = response
            .source_timestamp
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());

        if browse {
            return response
                .references
                .iter()
                .map(|reference| {
                    Reading::new(device, resource, ReadingValue::String(reference.clone()))
                        .with_origin(origin)
                })
                .collect();
        }

        let value = response.value.clone().unwrap_or(ReadingValue::Null);
        vec![Reading::new(device, resource, value).with_origin(origin)]
    }
}

#[async_trait]
impl MessageHandler for CorrelationRouter {
    async fn handle_outbound(&self, requests: Vec<ProtocolRequest>) -> Result<(), DispatchError> {
        tracing::debug!(count = requests.len(), "Sending outbound requests");
        for request in requests {
            tokio::spawn(self.outbound.clone().send(request));
        }
        Ok(())
    }

    async fn handle_response(
        &self,
        inbound: InboundResponse,
        browse: bool,
    ) -> Result<(), DispatchError> {
        let response = inbound.response;

        if !response.status.is_good() {
            let mut context = ErrorContext::new()
                .with_endpoint(response.endpoint.clone())
                .with_node(response.node_id.clone());
            if let Some(correlation) = inbound.correlation {
                context = context.with_correlation(correlation);
            }
            self.errors.report(response.status, context);
            return Ok(());
        }

        let binding = self
            .resolver
            .resolve_node(&response.endpoint, &response.node_id)
            .await;
        let readings = Self::readings_for(binding.as_ref(), &response, browse);

        // Unsolicited values are still the node's latest known value
        if let (Some(binding), false) = (&binding, browse) {
            if response.value.as_ref().is_some_and(|v| !v.is_null()) {
                self.cache
                    .put(&binding.device_name, &binding.object.name, readings.clone());
            }
        }

        match inbound.correlation {
            Some(correlation) => {
                self.transactions
                    .complete(correlation.transaction_id, correlation.op_id, readings)?;
                Ok(())
            }
            None => {
                tracing::debug!(
                    endpoint = %response.endpoint,
                    node_id = %response.node_id,
                    "Response without correlation"
                );
                Ok(())
            }
        }
    }

    async fn handle_report(&self, report: MonitoredReport) -> Result<(), DispatchError> {
        let binding = self
            .resolver
            .resolve_node(&report.endpoint, &report.node_id)
            .await
            .ok_or_else(|| {
                DispatchError::Handler(format!(
                    "no device object for node '{}' on {}",
                    report.node_id, report.endpoint
                ))
            })?;

        let mut reading = Reading::new(&binding.device_name, &binding.object.name, report.value);
        if let Some(timestamp) = report.source_timestamp {
            reading = reading.with_origin(timestamp);
        }

        if !reading.value.is_null() {
            self.cache.put(
                &binding.device_name,
                &binding.object.name,
                vec![reading.clone()],
            );
        }

        let delivered = self.monitored.publish(MonitoredData {
            device_name: binding.device_name.clone(),
            endpoint: report.endpoint,
            node_id: report.node_id,
            readings: vec![reading],
        });
        tracing::trace!(device = %binding.device_name, delivered, "Monitored data published");
        Ok(())
    }

    async fn handle_error(&self, notice: ErrorNotice) -> Result<(), DispatchError> {
        let Some(correlation) = notice.correlation else {
            tracing::warn!(
                status = %notice.status,
                endpoint = %notice.endpoint,
                node_id = ?notice.node_id,
                cause = ?notice.cause,
                "Uncorrelated transport error"
            );
            return Ok(());
        };

        let mut failure = OpFailure::new(correlation.op_id, notice.status, notice.describe());
        if let Some(object) = notice.object {
            failure = failure.with_object(object);
        }
        self.transactions
            .fail(correlation.transaction_id, failure)?;
        Ok(())
    }
}
