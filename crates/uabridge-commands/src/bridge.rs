//! Explicit wiring of the command engine.
//!
//! Every component is built once here and shared as an `Arc` handle; there
//! are no process-wide singletons.

use std::sync::Arc;

use serde_json::Value;

use uabridge_core::{MonitoredDataBus, MonitoredDataReceiver};
use uabridge_devices::{ProfileResolver, Transport};

use crate::cache::ResultCache;
use crate::coordinator::{CommandCoordinator, CommandResponse, CoordinatorConfig, ExecuteOptions};
use crate::dispatcher::{DispatchQueue, Dispatcher, DispatcherConfig, DispatcherStats};
use crate::error::Result;
use crate::error_adapter::ErrorAdapter;
use crate::router::CorrelationRouter;
use crate::transaction::TransactionTable;

/// A running command engine.
pub struct Bridge {
    dispatcher: Dispatcher,
    coordinator: CommandCoordinator,
    monitored: MonitoredDataBus,
}

impl Bridge {
    /// Build all components and start the dispatcher.
    pub async fn start(
        dispatcher_config: DispatcherConfig,
        coordinator_config: CoordinatorConfig,
        resolver: Arc<dyn ProfileResolver>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let dispatcher = Dispatcher::new(dispatcher_config);
        let queue = dispatcher.queue_handle();
        let transactions = Arc::new(TransactionTable::new());
        let cache = Arc::new(ResultCache::new());
        let monitored = MonitoredDataBus::new();

        let router = CorrelationRouter::new(
            transactions.clone(),
            cache.clone(),
            resolver.clone(),
            transport.clone(),
            queue.clone(),
            monitored.clone(),
            coordinator_config.transport_timeout(),
        );
        dispatcher.start(Arc::new(router)).await?;

        let errors = ErrorAdapter::with_default_endpoint(queue, transport.endpoint());
        let coordinator = CommandCoordinator::new(
            coordinator_config,
            resolver,
            transport,
            transactions,
            cache,
            errors,
        );

        Ok(Self {
            dispatcher,
            coordinator,
            monitored,
        })
    }

    pub async fn execute(
        &self,
        device: &str,
        command: &str,
        arguments: Option<&Value>,
        options: ExecuteOptions,
    ) -> Result<CommandResponse> {
        self.coordinator
            .execute(device, command, arguments, options)
            .await
    }

    pub fn coordinator(&self) -> &CommandCoordinator {
        &self.coordinator
    }

    /// Ingress for the transport's inbound path.
    pub fn queue(&self) -> DispatchQueue {
        self.dispatcher.queue_handle()
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        self.coordinator.cache()
    }

    pub fn transactions(&self) -> &Arc<TransactionTable> {
        self.coordinator.transactions()
    }

    pub fn subscribe_monitored(&self) -> MonitoredDataReceiver {
        self.monitored.subscribe()
    }

    pub fn dispatcher_stats(&self) -> DispatcherStats {
        self.dispatcher.stats()
    }

    /// Stop the dispatcher. Returns the number of discarded messages.
    pub async fn shutdown(&self) -> Result<usize> {
        Ok(self.dispatcher.terminate().await?)
    }
}
