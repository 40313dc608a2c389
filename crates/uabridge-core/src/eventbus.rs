//! Broadcast bus for monitored (unsolicited) device data.
//!
//! Subscription reports arrive without a caller waiting for them. After the
//! dispatcher has folded a report into the result cache it publishes it here
//! so any number of consumers (northbound forwarding, tests, the CLI watch
//! mode) can observe it.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::config::defaults;
use crate::model::Reading;

/// One monitored data notification, already mapped to a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredData {
    /// Device the report belongs to
    pub device_name: String,
    /// Endpoint that produced the report
    pub endpoint: String,
    /// Protocol node the report was raised for
    pub node_id: String,
    /// Readings carried by the report
    pub readings: Vec<Reading>,
}

/// Monitored data bus.
///
/// Slow subscribers may lag; lagged notifications are skipped rather than
/// stalling the dispatcher.
#[derive(Clone)]
pub struct MonitoredDataBus {
    tx: broadcast::Sender<MonitoredData>,
}

impl MonitoredDataBus {
    pub fn new() -> Self {
        Self::with_capacity(defaults::MONITORED_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish a notification. Returns `true` if at least one subscriber got it.
    pub fn publish(&self, data: MonitoredData) -> bool {
        self.tx.send(data).is_ok()
    }

    pub fn subscribe(&self) -> MonitoredDataReceiver {
        MonitoredDataReceiver {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for MonitoredDataBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of the [`MonitoredDataBus`].
pub struct MonitoredDataReceiver {
    rx: broadcast::Receiver<MonitoredData>,
}

impl MonitoredDataReceiver {
    /// Receive the next notification, `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<MonitoredData> {
        loop {
            match self.rx.recv().await {
                Ok(data) => return Some(data),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Monitored data receiver lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<MonitoredData> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(device: &str) -> MonitoredData {
        MonitoredData {
            device_name: device.to_string(),
            endpoint: defaults::ENDPOINT.to_string(),
            node_id: "ns=2;s=Temperature".to_string(),
            readings: vec![Reading::new(device, "temp", 21.5)],
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = MonitoredDataBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        assert!(!bus.publish(sample("D1")));
    }

    #[tokio::test]
    async fn test_subscriber_receives() {
        let bus = MonitoredDataBus::new();
        let mut rx = bus.subscribe();

        assert!(bus.publish(sample("D1")));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.device_name, "D1");
        assert_eq!(received.readings.len(), 1);
    }

    #[test]
    fn test_try_recv_empty() {
        let bus = MonitoredDataBus::new();
        let mut rx = bus.subscribe();
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn test_lagged_receiver_skips_to_oldest_retained() {
        let bus = MonitoredDataBus::with_capacity(2);
        let mut rx = bus.subscribe();
        for device in ["D1", "D2", "D3"] {
            bus.publish(sample(device));
        }

        let received = tokio_test::block_on(rx.recv()).unwrap();
        assert_eq!(received.device_name, "D2");
    }
}
