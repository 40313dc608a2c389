//! Tests for messages travelling through the dispatcher into CorrelationRouter

use std::sync::Arc;
use std::time::Duration;

use uabridge_commands::{
    Bridge, CoordinatorConfig, DispatchMessage, DispatcherConfig, ErrorNotice, FailureKind,
    InboundResponse, MonitoredReport,
};
use uabridge_core::{Correlation, ReadingValue, ValueType};
use uabridge_devices::{
    CommandDefinition, DeviceConfig, DeviceProfile, ObjectDefinition, ProfileRegistry,
    ProtocolRequest, ProtocolResponse, RequestAction, ResourceOperation, SimulatedTransport,
    StatusCode,
};

const EP: &str = "opc.tcp://plc-1:4840";

async fn bridge() -> Bridge {
    let registry = Arc::new(ProfileRegistry::new());
    registry
        .register_profile(
            DeviceProfile::new("sensor")
                .with_object(ObjectDefinition::new("temp", "ns=2;s=Temperature", ValueType::Float))
                .with_command(
                    CommandDefinition::new("temp").with_get(ResourceOperation::new("temp")),
                ),
        )
        .await
        .unwrap();
    registry
        .register_device(DeviceConfig::new("D1", "sensor", EP))
        .await
        .unwrap();

    let transport = Arc::new(SimulatedTransport::new(EP));
    transport.set_value(EP, "ns=2;s=Temperature", 21.5).await;
    transport.set_value(EP, "ns=2;s=Pressure", 1013i64).await;

    Bridge::start(
        DispatcherConfig::default(),
        CoordinatorConfig::default(),
        registry,
        transport,
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn test_report_updates_cache_and_publishes() {
    let bridge = bridge().await;
    let mut monitored = bridge.subscribe_monitored();

    bridge
        .queue()
        .enqueue(DispatchMessage::InboundReport(MonitoredReport::new(
            EP,
            "ns=2;s=Temperature",
            30.0,
        )))
        .unwrap();

    let data = tokio::time::timeout(Duration::from_secs(5), monitored.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(data.device_name, "D1");
    assert_eq!(data.readings[0].resource_name, "temp");
    assert_eq!(data.readings[0].value, ReadingValue::Float(30.0));

    let entry = bridge.cache().get("D1", "temp").unwrap();
    assert_eq!(entry.readings[0].value, ReadingValue::Float(30.0));

    // the report now serves non-immediate reads
    let response = bridge
        .execute("D1", "temp", None, Default::default())
        .await
        .unwrap();
    assert_eq!(response.issued, 0);
    assert_eq!(response.readings[0].value, ReadingValue::Float(30.0));
}

#[tokio::test]
async fn test_null_report_is_published_but_not_cached() {
    let bridge = bridge().await;
    let mut monitored = bridge.subscribe_monitored();

    bridge
        .queue()
        .enqueue(DispatchMessage::InboundReport(MonitoredReport::new(
            EP,
            "ns=2;s=Temperature",
            ReadingValue::Null,
        )))
        .unwrap();

    let data = tokio::time::timeout(Duration::from_secs(5), monitored.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(data.readings[0].value, ReadingValue::Null);
    assert!(!bridge.cache().contains("D1", "temp"));
}

#[tokio::test]
async fn test_unknown_report_counts_as_failure() {
    let bridge = bridge().await;
    let queue = bridge.queue();

    queue
        .enqueue(DispatchMessage::InboundReport(MonitoredReport::new(
            "opc.tcp://elsewhere:4840",
            "ns=9;s=Nope",
            1i64,
        )))
        .unwrap();
    queue
        .enqueue(DispatchMessage::InboundReport(MonitoredReport::new(
            EP,
            "ns=2;s=Temperature",
            25.0,
        )))
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while bridge.dispatcher_stats().pending() > 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    let stats = bridge.dispatcher_stats();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.dispatched, 1);
    assert!(bridge.cache().contains("D1", "temp"));
}

#[tokio::test]
async fn test_outbound_request_round_trip() {
    let bridge = bridge().await;
    let transactions = bridge.transactions();
    let tx = transactions.begin();
    let op = transactions.new_op_id(tx).unwrap();

    let request = ProtocolRequest::new(EP, "ns=2;s=Temperature", RequestAction::Read)
        .with_correlation(Correlation::new(tx, op));
    bridge
        .queue()
        .enqueue(DispatchMessage::OutboundRequest(request))
        .unwrap();

    transactions
        .await_finished(tx, Duration::from_secs(5))
        .await
        .unwrap();
    let outcome = transactions.take_outcome(tx).unwrap();
    assert_eq!(outcome.readings.len(), 1);
    assert_eq!(outcome.readings[0].device_name, "D1");
    assert_eq!(outcome.readings[0].value, ReadingValue::Float(21.5));
}

#[tokio::test]
async fn test_outbound_batch_with_browse_and_failure() {
    let bridge = bridge().await;
    let transactions = bridge.transactions();
    let tx = transactions.begin();
    let browse = transactions.new_op_id(tx).unwrap();
    let missing = transactions.new_op_id(tx).unwrap();

    bridge
        .queue()
        .enqueue(DispatchMessage::OutboundRequests(vec![
            ProtocolRequest::new(EP, "i=85", RequestAction::Browse)
                .with_correlation(Correlation::new(tx, browse)),
            ProtocolRequest::new(EP, "ns=2;s=Missing", RequestAction::Read)
                .with_correlation(Correlation::new(tx, missing)),
        ]))
        .unwrap();

    transactions
        .await_finished(tx, Duration::from_secs(5))
        .await
        .unwrap();
    let outcome = transactions.take_outcome(tx).unwrap();

    let mut references: Vec<String> = outcome
        .readings
        .iter()
        .filter_map(|r| r.value.as_str().map(str::to_string))
        .collect();
    references.sort();
    assert_eq!(references, vec!["ns=2;s=Pressure", "ns=2;s=Temperature"]);

    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].op_id, missing);
    assert_eq!(outcome.failures[0].status, StatusCode::BadNodeIdUnknown);
    assert_eq!(outcome.failures[0].kind, FailureKind::TransportError);
}

#[tokio::test]
async fn test_inbound_response_and_error_complete_transaction() {
    let bridge = bridge().await;
    let transactions = bridge.transactions();
    let tx = transactions.begin();
    let ok = transactions.new_op_id(tx).unwrap();
    let failed = transactions.new_op_id(tx).unwrap();
    let queue = bridge.queue();

    queue
        .enqueue(DispatchMessage::InboundResponse(InboundResponse::new(
            ProtocolResponse::good(EP, "ns=2;s=Temperature", Some(ReadingValue::Float(19.0))),
            Some(Correlation::new(tx, ok)),
        )))
        .unwrap();
    queue
        .enqueue(DispatchMessage::InboundError(ErrorNotice {
            status: StatusCode::BadNotReadable,
            endpoint: EP.to_string(),
            node_id: Some("ns=2;s=Temperature".to_string()),
            object: Some("temp".to_string()),
            correlation: Some(Correlation::new(tx, failed)),
            cause: Some("access denied".to_string()),
            timestamp: 0,
        }))
        .unwrap();

    transactions
        .await_finished(tx, Duration::from_secs(5))
        .await
        .unwrap();
    let outcome = transactions.take_outcome(tx).unwrap();
    assert_eq!(outcome.readings[0].value, ReadingValue::Float(19.0));
    assert_eq!(outcome.failures[0].object.as_deref(), Some("temp"));
    assert!(outcome.failures[0].message.contains("access denied"));
}

#[tokio::test]
async fn test_shutdown_stops_dispatcher() {
    let bridge = bridge().await;
    assert_eq!(bridge.shutdown().await, Ok(0));

    // messages are accepted but not consumed while stopped
    bridge
        .queue()
        .enqueue(DispatchMessage::InboundReport(MonitoredReport::new(
            EP,
            "ns=2;s=Temperature",
            1.0,
        )))
        .unwrap();
    tokio::task::yield_now().await;
    assert_eq!(bridge.dispatcher_stats().pending(), 1);
    assert!(!bridge.cache().contains("D1", "temp"));
}
