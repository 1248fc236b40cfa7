//! Inbound payload decoding
//!
//! Consumers accept the engine's alarm payload plus two extensions: an
//! `event_type` (default `ALARM`) and, for `BEDROOM_SYNC` events, a
//! `bedrooms` list that replaces the presence map. Every field is optional.

use crate::bitmask::source_key;
use crate::{ArmingError, Result};
use serde::{Deserialize, Deserializer, Serialize};

pub const EVENT_ALARM: &str = "ALARM";
pub const EVENT_BEDROOM_SYNC: &str = "BEDROOM_SYNC";

/// Occupancy of one room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomPresence {
    #[serde(default, alias = "Name", alias = "name")]
    pub room: String,
    #[serde(default, alias = "SwitchState", deserialize_with = "truthy")]
    pub occupied: bool,
}

impl RoomPresence {
    pub fn new(room: &str, occupied: bool) -> Self {
        Self {
            room: room.to_string(),
            occupied,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct InboundTrigger {
    #[serde(default, deserialize_with = "optional_key")]
    pub variable_id: Option<String>,
    #[serde(default)]
    pub value_raw: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InboundPayload {
    #[serde(default = "default_event_type")]
    pub event_type: String,
    #[serde(default)]
    pub source_name: Option<String>,
    /// `Some(empty)` means no group is active any more
    #[serde(default)]
    pub active_groups: Option<Vec<String>>,
    #[serde(default)]
    pub trigger_details: Option<InboundTrigger>,
    #[serde(default)]
    pub bedrooms: Option<Vec<RoomPresence>>,
}

fn default_event_type() -> String {
    EVENT_ALARM.to_string()
}

impl InboundPayload {
    /// Decode a raw payload; anything that is not a non-empty JSON object fails
    pub fn decode(raw: &str) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| ArmingError::Decode(e.to_string()))?;

        match &value {
            serde_json::Value::Object(map) if !map.is_empty() => {}
            _ => return Err(ArmingError::Decode("expected a non-empty object".to_string())),
        }

        serde_json::from_value(value).map_err(|e| ArmingError::Decode(e.to_string()))
    }

    pub fn is_bedroom_sync(&self) -> bool {
        self.event_type == EVENT_BEDROOM_SYNC
    }

    /// Whether the payload announces that no group is active
    pub fn is_global_reset(&self) -> bool {
        matches!(&self.active_groups, Some(groups) if groups.is_empty())
    }

    pub fn source(&self) -> &str {
        self.source_name.as_deref().unwrap_or("Unknown Source")
    }
}

/// Truthiness of a raw JSON value
///
/// Any non-empty text counts as active except `0`, `false` and `off`, so a
/// text sensor reporting `open` stays active.
pub fn json_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        serde_json::Value::String(s) => {
            let text = s.trim();
            !(text.is_empty()
                || text == "0"
                || text.eq_ignore_ascii_case("false")
                || text.eq_ignore_ascii_case("off"))
        }
        serde_json::Value::Null => false,
        serde_json::Value::Array(items) => !items.is_empty(),
        serde_json::Value::Object(map) => !map.is_empty(),
    }
}

fn truthy<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(json_truthy(&value))
}

fn optional_key<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<String>, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(value) => source_key(value).map(Some).map_err(<D::Error as serde::de::Error>::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_payload_decodes() {
        let raw = r#"{
            "event_id": "evt_1_0", "timestamp": 1, "source_id": 42, "source_name": "Main House",
            "primary_class": "Doors", "primary_group": "Perimeter",
            "active_classes": ["Doors"], "active_groups": ["Perimeter"], "is_maintenance": false,
            "trigger_details": {"variable_id": 101, "value_raw": true, "tag": "Doors"}
        }"#;
        let payload = InboundPayload::decode(raw).unwrap();

        assert_eq!(payload.event_type, EVENT_ALARM);
        assert_eq!(payload.source(), "Main House");
        assert!(!payload.is_global_reset());
        let trigger = payload.trigger_details.unwrap();
        assert_eq!(trigger.variable_id.as_deref(), Some("101"));
        assert!(json_truthy(&trigger.value_raw));
    }

    #[test]
    fn reset_and_bedroom_sync_shapes() {
        let reset = InboundPayload::decode(r#"{"active_groups": [], "trigger_details": null}"#).unwrap();
        assert!(reset.is_global_reset());
        assert!(reset.trigger_details.is_none());

        let sync = InboundPayload::decode(
            r#"{"event_type": "BEDROOM_SYNC", "bedrooms": [{"Name": "Master", "SwitchState": true}, {"room": "Guest", "occupied": 0}]}"#,
        )
        .unwrap();
        assert!(sync.is_bedroom_sync());
        assert_eq!(
            sync.bedrooms.unwrap(),
            vec![RoomPresence::new("Master", true), RoomPresence::new("Guest", false)]
        );
    }

    #[test]
    fn malformed_payloads_fail() {
        assert!(InboundPayload::decode("not json").is_err());
        assert!(InboundPayload::decode("[1, 2]").is_err());
        assert!(InboundPayload::decode("{}").is_err());
        assert!(InboundPayload::decode(r#"{"active_groups": "Perimeter"}"#).is_err());
    }

    #[test]
    fn truthiness_of_raw_values() {
        use serde_json::json;
        assert!(json_truthy(&json!("on")));
        assert!(json_truthy(&json!(1)));
        assert!(!json_truthy(&json!("0")));
        assert!(!json_truthy(&json!(0.0)));
        assert!(!json_truthy(&json!(null)));
        assert!(json_truthy(&json!("open")));
        assert!(json_truthy(&json!("Tilted")));
        assert!(!json_truthy(&json!("")));
        assert!(!json_truthy(&json!("  ")));
        assert!(!json_truthy(&json!("OFF")));
        assert!(!json_truthy(&json!("false")));
    }
}
