//! In-memory transport that simulates an OPC-UA server.
//!
//! Used by the CLI when no real transport is linked in, and by tests to
//! exercise latency, failures and servers that never answer.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use uabridge_core::ReadingValue;

use crate::transport::{
    ProtocolRequest, ProtocolResponse, RequestAction, StatusCode, Transport, TransportError,
};

/// Initial value of one simulated node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedNode {
    /// Endpoint serving the node; the transport endpoint when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub node_id: String,
    pub value: ReadingValue,
}

/// Simulation settings, usually loaded from the `[simulation]` config section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Latency applied to every request
    pub latency_ms: u64,
    /// Per-node latency overrides
    pub node_latency_ms: HashMap<String, u64>,
    /// Initial node values
    pub nodes: Vec<SimulatedNode>,
    /// Nodes whose requests fail with a communication error
    pub failing_nodes: Vec<String>,
    /// Nodes whose requests never get an answer
    pub silent_nodes: Vec<String>,
}

type NodeKey = (String, String);

/// Simulated transport.
pub struct SimulatedTransport {
    endpoint: String,
    nodes: Arc<RwLock<HashMap<NodeKey, ReadingValue>>>,
    failing: Arc<RwLock<HashSet<String>>>,
    silent: Arc<RwLock<HashSet<String>>>,
    latency: Duration,
    node_latency: HashMap<String, Duration>,
    requests: AtomicU64,
}

impl SimulatedTransport {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            nodes: Arc::new(RwLock::new(HashMap::new())),
            failing: Arc::new(RwLock::new(HashSet::new())),
            silent: Arc::new(RwLock::new(HashSet::new())),
            latency: Duration::ZERO,
            node_latency: HashMap::new(),
            requests: AtomicU64::new(0),
        }
    }

    /// Build a transport from configuration.
    pub fn from_config(endpoint: impl Into<String>, config: &SimulationConfig) -> Self {
        let endpoint = endpoint.into();

        let nodes = config
            .nodes
            .iter()
            .map(|node| {
                let node_endpoint = node.endpoint.clone().unwrap_or_else(|| endpoint.clone());
                ((node_endpoint, node.node_id.clone()), node.value.clone())
            })
            .collect();

        Self {
            nodes: Arc::new(RwLock::new(nodes)),
            failing: Arc::new(RwLock::new(config.failing_nodes.iter().cloned().collect())),
            silent: Arc::new(RwLock::new(config.silent_nodes.iter().cloned().collect())),
            latency: Duration::from_millis(config.latency_ms),
            node_latency: config
                .node_latency_ms
                .iter()
                .map(|(node, ms)| (node.clone(), Duration::from_millis(*ms)))
                .collect(),
            requests: AtomicU64::new(0),
            endpoint,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_node_latency(mut self, node_id: impl Into<String>, latency: Duration) -> Self {
        self.node_latency.insert(node_id.into(), latency);
        self
    }

    /// Set a node value on a specific endpoint.
    pub async fn set_value(
        &self,
        endpoint: impl Into<String>,
        node_id: impl Into<String>,
        value: impl Into<ReadingValue>,
    ) {
        self.nodes
            .write()
            .await
            .insert((endpoint.into(), node_id.into()), value.into());
    }

    pub async fn value(&self, endpoint: &str, node_id: &str) -> Option<ReadingValue> {
        self.nodes
            .read()
            .await
            .get(&(endpoint.to_string(), node_id.to_string()))
            .cloned()
    }

    /// Make every request for `node_id` fail.
    pub async fn fail_node(&self, node_id: impl Into<String>) {
        self.failing.write().await.insert(node_id.into());
    }

    /// Make every request for `node_id` hang forever.
    pub async fn silence_node(&self, node_id: impl Into<String>) {
        self.silent.write().await.insert(node_id.into());
    }

    pub async fn heal_node(&self, node_id: &str) {
        self.failing.write().await.remove(node_id);
        self.silent.write().await.remove(node_id);
    }

    /// Number of requests received so far.
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }

    fn latency_for(&self, node_id: &str) -> Duration {
        self.node_latency
            .get(node_id)
            .copied()
            .unwrap_or(self.latency)
    }

    async fn handle(&self, request: ProtocolRequest) -> Result<ProtocolResponse, TransportError> {
        let key = (request.endpoint.clone(), request.node_id.clone());
        let now = chrono::Utc::now().timestamp_millis();

        match request.action {
            RequestAction::Read | RequestAction::Subscribe => {
                let value = self.nodes.read().await.get(&key).cloned();
                match value {
                    Some(value) => Ok(ProtocolResponse::good(
                        request.endpoint,
                        request.node_id,
                        Some(value),
                    )
                    .with_source_timestamp(now)),
                    None => Err(unknown_node(&request.node_id)),
                }
            }
            RequestAction::Write(value) => {
                let mut nodes = self.nodes.write().await;
                match nodes.get_mut(&key) {
                    Some(slot) => {
                        *slot = value.clone();
                        Ok(ProtocolResponse::good(request.endpoint, request.node_id, Some(value))
                            .with_source_timestamp(now))
                    }
                    None => Err(unknown_node(&request.node_id)),
                }
            }
            RequestAction::Call(_) => {
                if !self.nodes.read().await.contains_key(&key) {
                    return Err(unknown_node(&request.node_id));
                }
                Ok(ProtocolResponse::good(request.endpoint, request.node_id, Some(ReadingValue::Null)))
            }
            RequestAction::Browse => {
                let references = {
                    let nodes = self.nodes.read().await;
                    let mut refs: Vec<String> = nodes
                        .keys()
                        .filter(|(endpoint, _)| *endpoint == request.endpoint)
                        .map(|(_, node)| node.clone())
                        .collect();
                    refs.sort();
                    refs
                };
                let mut response = ProtocolResponse::good(request.endpoint, request.node_id, None);
                response.references = references;
                Ok(response)
            }
        }
    }
}

fn unknown_node(node_id: &str) -> TransportError {
    TransportError::Status {
        status: StatusCode::BadNodeIdUnknown,
        message: format!("node '{}' does not exist", node_id),
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send(&self, request: ProtocolRequest) -> Result<ProtocolResponse, TransportError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(
            endpoint = %request.endpoint,
            node_id = %request.node_id,
            action = ?request.action,
            "Simulated request"
        );

        let latency = self.latency_for(&request.node_id);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if self.silent.read().await.contains(&request.node_id) {
            return futures::future::pending().await;
        }

        if self.failing.read().await.contains(&request.node_id) {
            return Err(TransportError::Communication(format!(
                "simulated failure for node '{}'",
                request.node_id
            )));
        }

        self.handle(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EP: &str = "opc.tcp://sim:4840";

    #[tokio::test]
    async fn test_read_and_write() {
        let transport = SimulatedTransport::new(EP);
        transport.set_value(EP, "ns=2;s=Setpoint", 20.0).await;

        let response = transport
            .send(ProtocolRequest::new(
                EP,
                "ns=2;s=Setpoint",
                RequestAction::Write(ReadingValue::Float(22.5)),
            ))
            .await
            .unwrap();
        assert!(response.status.is_good());

        let response = transport
            .send(ProtocolRequest::new(EP, "ns=2;s=Setpoint", RequestAction::Read))
            .await
            .unwrap();
        assert_eq!(response.value, Some(ReadingValue::Float(22.5)));
        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test]
    async fn test_unknown_node() {
        let transport = SimulatedTransport::new(EP);
        let err = transport
            .send(ProtocolRequest::new(EP, "ns=2;s=Missing", RequestAction::Read))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BadNodeIdUnknown);
    }

    #[tokio::test]
    async fn test_failing_node() {
        let transport = SimulatedTransport::new(EP);
        transport.set_value(EP, "ns=2;s=Temperature", 21.5).await;
        transport.fail_node("ns=2;s=Temperature").await;

        let err = transport
            .send(ProtocolRequest::new(EP, "ns=2;s=Temperature", RequestAction::Read))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Communication(_)));

        transport.heal_node("ns=2;s=Temperature").await;
        assert!(transport
            .send(ProtocolRequest::new(EP, "ns=2;s=Temperature", RequestAction::Read))
            .await
            .is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_node_never_answers() {
        let transport = SimulatedTransport::new(EP);
        transport.set_value(EP, "ns=2;s=Temperature", 21.5).await;
        transport.silence_node("ns=2;s=Temperature").await;

        let result = tokio::time::timeout(
            Duration::from_secs(60),
            transport.send(ProtocolRequest::new(EP, "ns=2;s=Temperature", RequestAction::Read)),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_from_config_defaults_endpoint() {
        let config = SimulationConfig {
            nodes: vec![SimulatedNode {
                endpoint: None,
                node_id: "ns=2;s=Temperature".to_string(),
                value: ReadingValue::Float(21.5),
            }],
            ..Default::default()
        };
        let transport = SimulatedTransport::from_config(EP, &config);
        assert_eq!(
            transport.value(EP, "ns=2;s=Temperature").await,
            Some(ReadingValue::Float(21.5))
        );
    }
}
