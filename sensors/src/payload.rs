//! Alarm payload sent to downstream consumers

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use vigil_hal::{InstanceId, SensorId};

static EVENT_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Sensor that caused a class to match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerDetails {
    pub variable_id: SensorId,
    pub value_raw: serde_json::Value,
    /// Name of the class the sensor matched in
    pub tag: String,
    pub class_id: String,
    pub var_name: String,
    pub parent_name: String,
    pub grandparent_name: String,
    pub value_human: String,
    pub smart_label: String,
}

/// Enriched alarm event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmPayload {
    pub event_id: String,
    pub timestamp: i64,
    pub source_id: InstanceId,
    pub source_name: String,
    pub primary_class: String,
    pub primary_group: String,
    pub active_classes: Vec<String>,
    pub active_groups: Vec<String>,
    pub is_maintenance: bool,
    pub trigger_details: Option<TriggerDetails>,
}

impl AlarmPayload {
    /// Payload announcing that no group is active any more
    pub fn reset(source_id: InstanceId, source_name: &str, timestamp: i64, is_maintenance: bool) -> Self {
        Self {
            event_id: next_event_id(timestamp),
            timestamp,
            source_id,
            source_name: source_name.to_string(),
            primary_class: String::new(),
            primary_group: String::new(),
            active_classes: Vec::new(),
            active_groups: Vec::new(),
            is_maintenance,
            trigger_details: None,
        }
    }

    pub fn is_reset(&self) -> bool {
        self.active_groups.is_empty()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Event id unique within the process: `evt_<unix-seconds>_<sequence>`
pub fn next_event_id(timestamp: i64) -> String {
    let seq = EVENT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("evt_{}_{}", timestamp, seq)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_payload_wire_shape() {
        let payload = AlarmPayload::reset(10, "Ground Floor", 1_700_000_000, false);
        let json: serde_json::Value = serde_json::from_str(&payload.to_json().unwrap()).unwrap();

        assert_eq!(json["source_id"], 10);
        assert_eq!(json["active_groups"], serde_json::json!([]));
        assert_eq!(json["active_classes"], serde_json::json!([]));
        assert!(json["trigger_details"].is_null());
        assert!(json["event_id"].as_str().unwrap().starts_with("evt_1700000000_"));
        assert!(payload.is_reset());
    }

    #[test]
    fn event_ids_are_unique() {
        assert_ne!(next_event_id(5), next_event_id(5));
    }
}
