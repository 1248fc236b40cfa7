//! Vigil HAL Host Demo
//!
//! Registers a few sensors on the in-memory host, changes them, forwards each
//! change as an action to a registered instance and runs an exit-delay style
//! timer.

use std::time::Duration;
use vigil_hal::{
    ActionSink, InstanceRegistry, MemoryHost, SensorHost, SensorInfo, SensorValue, TimerControl,
    TokioTimer,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("vigil_hal=debug")
        .init();

    println!("=== Vigil HAL Host Demo ===\n");

    let (host, mut changes) = MemoryHost::new();
    host.register(
        SensorInfo::new(101, "Front Door Lock").with_location("Hallway", "Ground Floor"),
        SensorValue::Bool(false),
    );
    host.register(
        SensorInfo::new(201, "Cellar Temperature").with_location("Cellar", "Basement").with_unit("°C"),
        SensorValue::Number(12.5),
    );
    for id in host.sensor_ids() {
        host.subscribe(id)?;
    }

    let registry = InstanceRegistry::new();
    let mut inbox = registry.register(7, &[vigil_hal::action::RECEIVE_PAYLOAD]);

    println!("--- Sensor changes ---");
    host.set_value(101, SensorValue::parse_literal("on"))?;
    host.set_value(201, SensorValue::parse_literal("13.25"))?;

    for _ in 0..2 {
        let Some(change) = changes.recv().await else {
            break;
        };
        let info = host.describe(change.sensor_id).unwrap_or_default();
        println!(
            "  {} / {} / {} -> {} (truthy: {})",
            info.grandparent_name,
            info.parent_name,
            info.name,
            host.format_value(change.sensor_id)?,
            change.value.is_truthy()
        );

        let payload = serde_json::json!({
            "variable_id": change.sensor_id,
            "value_raw": change.value.to_json(),
        });
        registry.invoke_action(7, vigil_hal::action::RECEIVE_PAYLOAD, &payload.to_string())?;
    }

    println!("\n--- Instance inbox ---");
    while let Ok(call) = inbox.try_recv() {
        println!("  {}: {}", call.action, call.payload);
    }

    println!("\n--- Timer ---");
    let (mut timer, mut expired) = TokioTimer::new();
    timer.start(Duration::from_millis(200));
    println!("  Started, running: {}", timer.is_running());
    if let Some(fired) = expired.recv().await {
        println!("  Expired (generation {}), current: {}", fired.generation, timer.is_current(&fired));
        timer.stop();
    }

    println!("\nDemo complete.");
    Ok(())
}
