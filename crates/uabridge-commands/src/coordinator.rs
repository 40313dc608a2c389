//! Command execution.
//!
//! [`CommandCoordinator::execute`] turns one caller command into the
//! protocol operations of its profile, serves what it can from the result
//! cache, runs the rest concurrently and waits for the transaction to
//! settle before handing back every reading it collected.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;

use uabridge_core::config::defaults;
use uabridge_core::{
    CommandVerb, Correlation, Operation, OperationKind, Reading, ReadingValue, TransactionId,
};
use uabridge_devices::{
    DeviceObject, ProfileResolver, ProtocolRequest, RequestAction, StatusCode, Transport,
};

use crate::cache::ResultCache;
use crate::error::{CommandError, Result};
use crate::error_adapter::{ErrorAdapter, ErrorContext};
use crate::transaction::{OpFailure, TransactionTable};

/// Coordinator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Bound on a single transport call
    pub transport_timeout_ms: u64,
    /// Default bound on a whole command
    pub command_timeout_ms: u64,
    /// Live operations allowed in flight at once, across all commands
    pub max_concurrent_operations: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            transport_timeout_ms: defaults::TRANSPORT_TIMEOUT_MS,
            command_timeout_ms: defaults::COMMAND_TIMEOUT_MS,
            max_concurrent_operations: defaults::MAX_CONCURRENT_OPERATIONS,
        }
    }
}

impl CoordinatorConfig {
    pub fn transport_timeout(&self) -> Duration {
        Duration::from_millis(self.transport_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

/// Per-call options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecuteOptions {
    /// Bypass the cache and query every operation live
    pub immediate: bool,
    /// Overrides the configured command timeout
    pub deadline: Option<Duration>,
}

impl ExecuteOptions {
    pub fn immediate() -> Self {
        Self {
            immediate: true,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Aggregated result of one command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub transaction_id: TransactionId,
    pub device_name: String,
    pub command: String,
    pub verb: CommandVerb,
    /// Cache-served readings first, then live readings in completion order
    pub readings: Vec<Reading>,
    pub failures: Vec<OpFailure>,
    /// Number of live operations issued
    pub issued: usize,
}

impl CommandResponse {
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// One element of the caller's arguments.
#[derive(Debug, Clone, PartialEq)]
struct RequestedElement {
    /// `None` selects every operation of the command
    object: Option<String>,
    value: Option<Value>,
}

fn parse_arguments(verb: CommandVerb, arguments: Option<&Value>) -> Result<Vec<RequestedElement>> {
    let arguments = match (verb, arguments) {
        (CommandVerb::Get, _) | (CommandVerb::Set, None) => {
            return Ok(vec![RequestedElement {
                object: None,
                value: None,
            }])
        }
        (CommandVerb::Set, Some(arguments)) => arguments,
    };

    let elements: Vec<RequestedElement> = match arguments {
        Value::Object(map) => map
            .iter()
            .map(|(object, value)| RequestedElement {
                object: Some(object.clone()),
                value: Some(value.clone()),
            })
            .collect(),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                let object = item
                    .get("object")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        CommandError::InvalidArguments(format!(
                            "array element without an 'object' name: {}",
                            item
                        ))
                    })?;
                Ok(RequestedElement {
                    object: Some(object.to_string()),
                    value: item.get("value").cloned(),
                })
            })
            .collect::<Result<_>>()?,
        other => {
            return Err(CommandError::InvalidArguments(format!(
                "expected an object or an array, got {}",
                other
            )))
        }
    };

    if elements.is_empty() {
        return Err(CommandError::InvalidArguments("no values to set".to_string()));
    }
    Ok(elements)
}

/// An operation scheduled for one command, with the caller's value if any.
struct Planned {
    object: String,
    operation: Option<Operation>,
    value: Option<Value>,
}

fn plan(operations: &[Operation], elements: Vec<RequestedElement>) -> Vec<Planned> {
    let mut planned = Vec::new();

    for element in &elements {
        match &element.object {
            None => planned.extend(operations.iter().map(|op| Planned {
                object: op.object.clone(),
                operation: Some(op.clone()),
                value: None,
            })),
            Some(object) => planned.push(Planned {
                object: object.clone(),
                operation: operations.iter().find(|op| &op.object == object).cloned(),
                value: element.value.clone(),
            }),
        }
    }

    // Operations the caller did not name run with their default value
    let named = |object: &str| {
        elements
            .iter()
            .any(|e| e.object.is_none() || e.object.as_deref() == Some(object))
    };
    for op in operations {
        if !named(&op.object) && op.default_value.is_some() {
            planned.push(Planned {
                object: op.object.clone(),
                operation: Some(op.clone()),
                value: None,
            });
        }
    }

    planned
}

fn request_action(
    operation: &Operation,
    object: &DeviceObject,
    value: Option<&Value>,
) -> Result<RequestAction> {
    let supplied = || -> Result<Option<ReadingValue>> {
        match value {
            Some(value) => ReadingValue::from_json(value, object.value_type)
                .map(Some)
                .map_err(|e| {
                    CommandError::InvalidArguments(format!("object '{}': {}", object.name, e))
                }),
            None => Ok(operation.default_value.clone()),
        }
    };

    match operation.kind {
        OperationKind::Read => Ok(RequestAction::Read),
        OperationKind::Subscribe => Ok(RequestAction::Subscribe),
        OperationKind::Write => supplied()?.map(RequestAction::Write).ok_or_else(|| {
            CommandError::InvalidArguments(format!("no value for object '{}'", object.name))
        }),
        OperationKind::Invoke => {
            let arguments = match value {
                Some(Value::Array(items)) => items.clone(),
                Some(other) => vec![other.clone()],
                None => Vec::new(),
            };
            let arguments = arguments
                .into_iter()
                .map(serde_json::from_value::<ReadingValue>)
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| CommandError::InvalidArguments(e.to_string()))?;
            Ok(RequestAction::Call(arguments))
        }
    }
}

/// Everything a worker task needs, cheap to clone.
#[derive(Clone)]
struct WorkerContext {
    transport: Arc<dyn Transport>,
    transactions: Arc<TransactionTable>,
    cache: Arc<ResultCache>,
    errors: ErrorAdapter,
    permits: Arc<Semaphore>,
    transport_timeout: Duration,
}

struct Job {
    correlation: Correlation,
    device: String,
    operation: Operation,
    request: ProtocolRequest,
}

impl WorkerContext {
    async fn run(self, job: Job) {
        let Job {
            correlation,
            device,
            operation,
            request,
        } = job;

        let context = ErrorContext::new()
            .with_endpoint(request.endpoint.clone())
            .with_node(request.node_id.clone())
            .with_object(operation.object.clone())
            .with_correlation(correlation);

        // Saturated workers wait here; the op is still completed either way
        let _permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                self.errors.report(
                    StatusCode::BadInternalError,
                    context.with_cause("worker pool closed"),
                );
                return;
            }
        };

        let sent = tokio::time::timeout(self.transport_timeout, self.transport.send(request)).await;
        match sent {
            Ok(Ok(response)) if response.status.is_good() => {
                let value = response.value.unwrap_or(ReadingValue::Null);
                let mut reading = Reading::new(&device, &operation.object, value);
                if let Some(timestamp) = response.source_timestamp {
                    reading = reading.with_origin(timestamp);
                }

                // Cache first so the value is visible once the caller returns
                if operation.kind.is_cacheable() && !reading.value.is_null() {
                    self.cache
                        .put(&device, operation.cache_key(), vec![reading.clone()]);
                }

                if let Err(e) = self.transactions.complete(
                    correlation.transaction_id,
                    correlation.op_id,
                    vec![reading],
                ) {
                    tracing::debug!(
                        correlation = %correlation,
                        error = %e,
                        "Late completion ignored"
                    );
                }
            }
            Ok(Ok(response)) => self.errors.report(
                response.status,
                context.with_cause("server returned a bad status"),
            ),
            Ok(Err(e)) => self
                .errors
                .report(e.status_code(), context.with_cause(e.to_string())),
            Err(_) => self.errors.report(
                StatusCode::BadTimeout,
                context.with_cause(format!(
                    "no response within {}ms",
                    self.transport_timeout.as_millis()
                )),
            ),
        }
    }
}

/// Reaps a transaction whose outcome was never handed back: the command
/// failed part way, or the caller dropped the `execute` future.
struct TransactionGuard {
    transactions: Arc<TransactionTable>,
    tx: TransactionId,
    deadline: Duration,
    armed: bool,
}

impl TransactionGuard {
    fn new(transactions: Arc<TransactionTable>, tx: TransactionId, deadline: Duration) -> Self {
        Self {
            transactions,
            tx,
            deadline,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TransactionGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let transactions = self.transactions.clone();
        let (tx, deadline) = (self.tx, self.deadline);
        match tokio::runtime::Handle::try_current() {
            // Launched workers may still complete; wait for them before removal
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = transactions.await_finished(tx, deadline).await {
                        tracing::debug!(transaction_id = %tx, error = %e, "Abandoned transaction already gone");
                    }
                    transactions.remove(tx);
                });
            }
            Err(_) => {
                transactions.remove(tx);
            }
        }
    }
}

/// The command coordinator.
pub struct CommandCoordinator {
    config: CoordinatorConfig,
    resolver: Arc<dyn ProfileResolver>,
    workers: WorkerContext,
}

impl CommandCoordinator {
    pub fn new(
        config: CoordinatorConfig,
        resolver: Arc<dyn ProfileResolver>,
        transport: Arc<dyn Transport>,
        transactions: Arc<TransactionTable>,
        cache: Arc<ResultCache>,
        errors: ErrorAdapter,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_operations.max(1)));
        Self {
            workers: WorkerContext {
                transport,
                transactions,
                cache,
                errors,
                permits,
                transport_timeout: config.transport_timeout(),
            },
            config,
            resolver,
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.workers.cache
    }

    pub fn transactions(&self) -> &Arc<TransactionTable> {
        &self.workers.transactions
    }

    /// Execute `command` on `device`.
    ///
    /// No arguments means `get`; anything else is a `set` with the given
    /// values. Transport failures do not fail the call: they are listed in
    /// [`CommandResponse::failures`].
    pub async fn execute(
        &self,
        device: &str,
        command: &str,
        arguments: Option<&Value>,
        options: ExecuteOptions,
    ) -> Result<CommandResponse> {
        let verb = CommandVerb::from_arguments(arguments);
        let deadline = options
            .deadline
            .unwrap_or_else(|| self.config.command_timeout());

        let config = self.resolver.resolve_device(device).await?;
        if config.is_locked() {
            return Err(CommandError::Locked(device.to_string()));
        }
        let operations = self.resolver.resolve_operations(device, command, verb).await?;
        let elements = parse_arguments(verb, arguments)?;

        let tx = self.workers.transactions.begin();
        let guard = TransactionGuard::new(self.workers.transactions.clone(), tx, deadline);
        tracing::debug!(
            transaction_id = %tx,
            device,
            command,
            verb = %verb,
            immediate = options.immediate,
            "Executing command"
        );

        let mut cached = Vec::new();
        let mut issued = 0usize;

        for planned in plan(&operations, elements) {
            let object = match &planned.operation {
                Some(_) => self.resolver.resolve_object(device, &planned.object).await,
                None => None,
            };
            let (Some(operation), Some(object)) = (planned.operation, object) else {
                // Nothing will ever answer for this object: close it out
                // before failing so the transaction cannot dangle.
                let op = self.workers.transactions.new_op_id(tx)?;
                self.workers.transactions.complete(tx, op, Vec::new())?;
                return Err(CommandError::NotFoundObject {
                    device: device.to_string(),
                    object: planned.object,
                });
            };

            let live = options.immediate
                || verb == CommandVerb::Set
                || !self.workers.cache.contains(device, operation.cache_key());
            if !live {
                if let Some(entry) = self.workers.cache.get(device, operation.cache_key()) {
                    tracing::trace!(transaction_id = %tx, object = %operation.object, "Served from cache");
                    cached.extend(entry.readings);
                    continue;
                }
            }

            let action = request_action(&operation, &object, planned.value.as_ref())?;

            let op = self.workers.transactions.new_op_id(tx)?;
            let correlation = Correlation::new(tx, op);
            let request = ProtocolRequest::new(&object.endpoint, &object.node_id, action)
                .with_correlation(correlation);

            tokio::spawn(self.workers.clone().run(Job {
                correlation,
                device: device.to_string(),
                operation,
                request,
            }));
            issued += 1;
        }

        let forced = self.workers.transactions.await_finished(tx, deadline).await?;
        let outcome = self.workers.transactions.take_outcome(tx)?;
        guard.disarm();

        tracing::debug!(
            transaction_id = %tx,
            issued,
            cached = cached.len(),
            failures = outcome.failures.len(),
            forced,
            "Command finished"
        );

        cached.extend(outcome.readings);
        Ok(CommandResponse {
            transaction_id: tx,
            device_name: device.to_string(),
            command: command.to_string(),
            verb,
            readings: cached,
            failures: outcome.failures,
            issued,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ops() -> Vec<Operation> {
        vec![
            Operation::new("climate", "setpoint", OperationKind::Write),
            Operation::new("climate", "mode", OperationKind::Write).with_default_value("auto"),
        ]
    }

    #[test]
    fn test_parse_get_is_default_element() {
        let elements = parse_arguments(CommandVerb::Get, None).unwrap();
        assert_eq!(elements.len(), 1);
        assert!(elements[0].object.is_none());
    }

    #[test]
    fn test_parse_set_object_and_array() {
        let args = json!({"setpoint": 22.5});
        let elements = parse_arguments(CommandVerb::Set, Some(&args)).unwrap();
        assert_eq!(elements[0].object.as_deref(), Some("setpoint"));
        assert_eq!(elements[0].value, Some(json!(22.5)));

        let args = json!([{"object": "setpoint", "value": 22.5}, {"object": "mode", "value": "eco"}]);
        let elements = parse_arguments(CommandVerb::Set, Some(&args)).unwrap();
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[1].object.as_deref(), Some("mode"));
    }

    #[test]
    fn test_parse_set_rejects_bad_shapes() {
        for args in [json!(5), json!("x"), json!({}), json!([]), json!([{"value": 1}])] {
            assert!(matches!(
                parse_arguments(CommandVerb::Set, Some(&args)),
                Err(CommandError::InvalidArguments(_))
            ));
        }
    }

    #[test]
    fn test_plan_adds_defaulted_operations() {
        let args = json!({"setpoint": 22.5});
        let elements = parse_arguments(CommandVerb::Set, Some(&args)).unwrap();
        let planned = plan(&ops(), elements);

        let objects: Vec<&str> = planned.iter().map(|p| p.object.as_str()).collect();
        assert_eq!(objects, vec!["setpoint", "mode"]);
        assert!(planned[1].value.is_none());
    }

    #[test]
    fn test_plan_keeps_unknown_object() {
        let args = json!({"humidity": 40});
        let elements = parse_arguments(CommandVerb::Set, Some(&args)).unwrap();
        let planned = plan(&ops(), elements);
        assert_eq!(planned[0].object, "humidity");
        assert!(planned[0].operation.is_none());
    }
}
