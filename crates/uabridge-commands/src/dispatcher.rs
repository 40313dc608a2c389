//! Single-consumer message dispatcher.
//!
//! Producers push [`DispatchMessage`]s onto an unbounded queue through a
//! cloneable [`DispatchQueue`] and never block. One background task drains
//! the queue and routes each message by kind to a [`MessageHandler`]. A
//! handler that fails, panics or overruns its time budget costs only that
//! message; the loop carries on with the next one.
//!
//! The queue has no backpressure: a burst of inbound reports can never stall
//! the transport, at the price of unbounded memory growth if the consumer
//! falls behind for good.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use uabridge_devices::ProtocolRequest;

use crate::error::DispatchError;
use crate::message::{DispatchMessage, ErrorNotice, InboundResponse, MonitoredReport};

/// Handlers the dispatcher routes to, one per message family.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Outbound request(s) to hand to the transport.
    async fn handle_outbound(&self, requests: Vec<ProtocolRequest>) -> Result<(), DispatchError>;

    /// Solicited response; `browse` is set for browse results.
    async fn handle_response(
        &self,
        response: InboundResponse,
        browse: bool,
    ) -> Result<(), DispatchError>;

    /// Unsolicited monitored data.
    async fn handle_report(&self, report: MonitoredReport) -> Result<(), DispatchError>;

    /// Failure notice from the error adapter.
    async fn handle_error(&self, notice: ErrorNotice) -> Result<(), DispatchError>;
}

/// Dispatcher configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Longest a single handler call may run before it is abandoned
    pub handler_timeout_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            handler_timeout_ms: 30_000,
        }
    }
}

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatcherState {
    Stopped,
    Running,
}

/// Counter snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherStats {
    /// Messages accepted by the queue
    pub enqueued: u64,
    /// Messages a handler processed successfully
    pub dispatched: u64,
    /// Messages whose handler failed, panicked or timed out
    pub failed: u64,
    /// Messages discarded by `terminate`
    pub dropped: u64,
}

impl DispatcherStats {
    /// Messages accepted but not yet consumed.
    pub fn pending(&self) -> u64 {
        self.enqueued
            .saturating_sub(self.dispatched + self.failed + self.dropped)
    }
}

#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    dispatched: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> DispatcherStats {
        DispatcherStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Producer side of the dispatch queue.
#[derive(Clone)]
pub struct DispatchQueue {
    tx: mpsc::UnboundedSender<DispatchMessage>,
    counters: Arc<Counters>,
}

impl DispatchQueue {
    /// Push a message. Never blocks; fails only once the dispatcher is gone.
    pub fn enqueue(&self, message: DispatchMessage) -> Result<(), DispatchError> {
        self.tx
            .send(message)
            .map_err(|_| DispatchError::QueueClosed)?;
        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

type Receiver = mpsc::UnboundedReceiver<DispatchMessage>;

struct Worker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<Receiver>,
}

/// The dispatcher.
pub struct Dispatcher {
    config: DispatcherConfig,
    queue: DispatchQueue,
    counters: Arc<Counters>,
    /// Receiver parked here while stopped
    parked: parking_lot::Mutex<Option<Receiver>>,
    worker: Mutex<Option<Worker>>,
    state: Arc<parking_lot::RwLock<DispatcherState>>,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());

        Self {
            config,
            queue: DispatchQueue {
                tx,
                counters: counters.clone(),
            },
            counters,
            parked: parking_lot::Mutex::new(Some(rx)),
            worker: Mutex::new(None),
            state: Arc::new(parking_lot::RwLock::new(DispatcherState::Stopped)),
        }
    }

    /// Cloneable producer handle.
    pub fn queue_handle(&self) -> DispatchQueue {
        self.queue.clone()
    }

    pub fn state(&self) -> DispatcherState {
        *self.state.read()
    }

    pub fn is_running(&self) -> bool {
        self.state() == DispatcherState::Running
    }

    pub fn stats(&self) -> DispatcherStats {
        self.counters.snapshot()
    }

    /// Start consuming the queue with `handler`. Messages enqueued while the
    /// dispatcher was stopped are delivered first.
    pub async fn start(&self, handler: Arc<dyn MessageHandler>) -> Result<(), DispatchError> {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            return Err(DispatchError::AlreadyRunning);
        }

        let rx = self
            .parked
            .lock()
            .take()
            .ok_or(DispatchError::AlreadyRunning)?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handler_timeout = Duration::from_millis(self.config.handler_timeout_ms);
        let counters = self.counters.clone();

        let handle = tokio::spawn(run_loop(rx, shutdown_rx, handler, handler_timeout, counters));

        *worker = Some(Worker { shutdown, handle });
        *self.state.write() = DispatcherState::Running;
        tracing::info!("Dispatcher started");
        Ok(())
    }

    /// Stop the consumer. The message being handled finishes; everything
    /// still queued is discarded. Returns the number of discarded messages.
    pub async fn terminate(&self) -> Result<usize, DispatchError> {
        let Some(worker) = self.worker.lock().await.take() else {
            return Err(DispatchError::NotRunning);
        };

        worker.shutdown.send_replace(true);
        let mut rx = match worker.handle.await {
            Ok(rx) => rx,
            Err(e) => {
                // The loop itself never panics; a join error means it was
                // aborted, and the receiver is lost with it.
                *self.state.write() = DispatcherState::Stopped;
                tracing::error!(error = %e, "Dispatcher task ended abnormally");
                return Err(DispatchError::Handler(e.to_string()));
            }
        };

        let mut drained = 0usize;
        while rx.try_recv().is_ok() {
            drained += 1;
        }
        self.counters
            .dropped
            .fetch_add(drained as u64, Ordering::Relaxed);

        *self.parked.lock() = Some(rx);
        *self.state.write() = DispatcherState::Stopped;
        tracing::info!(drained, "Dispatcher terminated");
        Ok(drained)
    }
}

async fn run_loop(
    mut rx: Receiver,
    mut shutdown: watch::Receiver<bool>,
    handler: Arc<dyn MessageHandler>,
    handler_timeout: Duration,
    counters: Arc<Counters>,
) -> Receiver {
    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            message = rx.recv() => {
                let Some(message) = message else { break };
                dispatch_one(handler.as_ref(), message, handler_timeout, &counters).await;
            }
        }
    }
    rx
}

async fn dispatch_one(
    handler: &dyn MessageHandler,
    message: DispatchMessage,
    handler_timeout: Duration,
    counters: &Counters,
) {
    let kind = message.kind();
    let correlation = message.correlation();
    let routed = AssertUnwindSafe(route(handler, message)).catch_unwind();

    let error = match tokio::time::timeout(handler_timeout, routed).await {
        Ok(Ok(Ok(()))) => {
            counters.dispatched.fetch_add(1, Ordering::Relaxed);
            return;
        }
        Ok(Ok(Err(e))) => e,
        Ok(Err(panic)) => {
            DispatchError::Handler(format!("handler panicked: {}", panic_message(&*panic)))
        }
        Err(_) => DispatchError::HandlerTimeout(handler_timeout.as_millis() as u64),
    };

    counters.failed.fetch_add(1, Ordering::Relaxed);
    match correlation {
        Some(correlation) => tracing::warn!(
            kind = %kind,
            correlation = %correlation,
            error = %error,
            "Dispatch failed"
        ),
        None => tracing::warn!(kind = %kind, error = %error, "Dispatch failed"),
    }
}

async fn route(handler: &dyn MessageHandler, message: DispatchMessage) -> Result<(), DispatchError> {
    match message {
        DispatchMessage::OutboundRequest(request) => handler.handle_outbound(vec![request]).await,
        DispatchMessage::OutboundRequests(requests) => handler.handle_outbound(requests).await,
        DispatchMessage::InboundResponse(response) => handler.handle_response(response, false).await,
        DispatchMessage::InboundBrowseResponse(response) => {
            handler.handle_response(response, true).await
        }
        DispatchMessage::InboundReport(report) => handler.handle_report(report).await,
        DispatchMessage::InboundError(notice) => handler.handle_error(notice).await,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
