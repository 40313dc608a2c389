//! Device registry and simulated transport walkthrough.
//!
//! 1. Register a profile and two devices
//! 2. Resolve a command into operations and bind its objects
//! 3. Read and write the bound nodes through the simulated transport

use std::sync::Arc;

use uabridge_core::{CommandVerb, ReadingValue, ValueType};
use uabridge_devices::{
    CommandDefinition, DeviceConfig, DeviceProfile, ObjectDefinition, ProfileRegistry,
    ProfileResolver, ProtocolRequest, RequestAction, ResourceOperation, SimulatedTransport,
    Transport,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== uabridge device demo ===\n");

    let registry = Arc::new(ProfileRegistry::new());
    registry
        .register_profile(
            DeviceProfile::new("thermostat")
                .with_description("Room thermostat")
                .with_object(
                    ObjectDefinition::new("temp", "ns=2;s=Temperature", ValueType::Float)
                        .with_units("degC"),
                )
                .with_object(
                    ObjectDefinition::new("setpoint", "ns=2;s=Setpoint", ValueType::Float)
                        .writable(),
                )
                .with_command(
                    CommandDefinition::new("climate")
                        .with_get(ResourceOperation::new("temp"))
                        .with_get(ResourceOperation::new("setpoint"))
                        .with_set(ResourceOperation::new("setpoint")),
                ),
        )
        .await?;

    for (name, endpoint) in [("lobby", "opc.tcp://plc-1:4840"), ("office", "opc.tcp://plc-2:4840")] {
        registry
            .register_device(DeviceConfig::new(name, "thermostat", endpoint))
            .await?;
    }
    println!("Registered {} device(s)\n", registry.device_count().await);

    let transport = SimulatedTransport::new("opc.tcp://plc-1:4840");
    transport.set_value("opc.tcp://plc-1:4840", "ns=2;s=Temperature", 21.5).await;
    transport.set_value("opc.tcp://plc-1:4840", "ns=2;s=Setpoint", 20.0).await;

    println!("--- get climate on lobby ---");
    for operation in registry
        .resolve_operations("lobby", "climate", CommandVerb::Get)
        .await?
    {
        let Some(object) = registry.resolve_object("lobby", &operation.object).await else {
            continue;
        };
        let response = transport
            .send(ProtocolRequest::new(&object.endpoint, &object.node_id, RequestAction::Read))
            .await?;
        println!(
            "  {:<10} {:<24} {:?}",
            operation.object, object.node_id, response.value
        );
    }

    println!("\n--- set setpoint on lobby ---");
    let object = registry
        .resolve_object("lobby", "setpoint")
        .await
        .ok_or("setpoint not bound")?;
    transport
        .send(ProtocolRequest::new(
            &object.endpoint,
            &object.node_id,
            RequestAction::Write(ReadingValue::Float(22.5)),
        ))
        .await?;
    println!(
        "  setpoint is now {:?}",
        transport.value(&object.endpoint, &object.node_id).await
    );

    println!("\n--- office has no simulated nodes ---");
    let object = registry
        .resolve_object("office", "temp")
        .await
        .ok_or("temp not bound")?;
    match transport
        .send(ProtocolRequest::new(&object.endpoint, &object.node_id, RequestAction::Read))
        .await
    {
        Ok(response) => println!("  unexpected value {:?}", response.value),
        Err(e) => println!("  read failed: {} ({})", e, e.status_code()),
    }

    Ok(())
}
