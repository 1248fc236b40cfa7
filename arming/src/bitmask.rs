//! Sensor roles and the decision bitmask
//!
//! | bit | meaning                                  |
//! |-----|------------------------------------------|
//! | 0   | primary lock active                      |
//! | 1   | primary contact active                   |
//! | 2   | secondary lock active                    |
//! | 3   | secondary contact active                 |
//! | 4   | presence (role active or room occupied)  |
//! | 5   | exit-delay timer running                 |
//! | 6   | system currently armed                   |

use crate::inbound::RoomPresence;
use crate::state::SystemState;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bit {
    PrimaryLock,
    PrimaryContact,
    SecondaryLock,
    SecondaryContact,
    Presence,
    DelayTimer,
    Armed,
}

impl Bit {
    pub const ALL: [Bit; 7] = [
        Bit::PrimaryLock,
        Bit::PrimaryContact,
        Bit::SecondaryLock,
        Bit::SecondaryContact,
        Bit::Presence,
        Bit::DelayTimer,
        Bit::Armed,
    ];

    pub fn index(self) -> u8 {
        match self {
            Bit::PrimaryLock => 0,
            Bit::PrimaryContact => 1,
            Bit::SecondaryLock => 2,
            Bit::SecondaryContact => 3,
            Bit::Presence => 4,
            Bit::DelayTimer => 5,
            Bit::Armed => 6,
        }
    }

    pub fn mask(self) -> u8 {
        1 << self.index()
    }

    pub fn label(self) -> &'static str {
        match self {
            Bit::PrimaryLock => "Primary Lock",
            Bit::PrimaryContact => "Primary Contact",
            Bit::SecondaryLock => "Secondary Lock",
            Bit::SecondaryContact => "Secondary Contact",
            Bit::Presence => "Presence Detected",
            Bit::DelayTimer => "Delay Timer Active",
            Bit::Armed => "System Currently Armed",
        }
    }
}

/// Logical role of a sensor on the arming side
///
/// Parsed leniently; unknown names are kept as [`SensorRole::Other`] and
/// contribute no bit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SensorRole {
    PrimaryLock,
    PrimaryContact,
    SecondaryLock,
    SecondaryContact,
    Presence,
    Other(String),
}

impl SensorRole {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().replace('_', " ").as_str() {
            "lock" | "primary lock" | "front door lock" => SensorRole::PrimaryLock,
            "contact" | "primary contact" | "front door contact" => SensorRole::PrimaryContact,
            "secondary lock" | "basement door lock" | "back door lock" => SensorRole::SecondaryLock,
            "secondary contact" | "basement door contact" | "back door contact" => {
                SensorRole::SecondaryContact
            }
            "presence" | "presence detected" => SensorRole::Presence,
            _ => SensorRole::Other(raw.to_string()),
        }
    }

    pub fn bit(&self) -> Option<Bit> {
        match self {
            SensorRole::PrimaryLock => Some(Bit::PrimaryLock),
            SensorRole::PrimaryContact => Some(Bit::PrimaryContact),
            SensorRole::SecondaryLock => Some(Bit::SecondaryLock),
            SensorRole::SecondaryContact => Some(Bit::SecondaryContact),
            SensorRole::Presence => Some(Bit::Presence),
            SensorRole::Other(_) => None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            SensorRole::PrimaryLock => "Primary Lock",
            SensorRole::PrimaryContact => "Primary Contact",
            SensorRole::SecondaryLock => "Secondary Lock",
            SensorRole::SecondaryContact => "Secondary Contact",
            SensorRole::Presence => "Presence",
            SensorRole::Other(raw) => raw,
        }
    }
}

impl From<String> for SensorRole {
    fn from(raw: String) -> Self {
        SensorRole::parse(&raw)
    }
}

impl From<SensorRole> for String {
    fn from(role: SensorRole) -> Self {
        role.name().to_string()
    }
}

impl fmt::Display for SensorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Sensor id (as sent in `trigger_details.variable_id`) bound to a role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorMapping {
    #[serde(alias = "SourceKey", deserialize_with = "source_key")]
    pub source_key: String,
    #[serde(alias = "LogicalRole")]
    pub role: SensorRole,
}

impl SensorMapping {
    pub fn new(source_key: impl ToString, role: SensorRole) -> Self {
        Self {
            source_key: source_key.to_string(),
            role,
        }
    }
}

/// Sensor keys arrive as numbers or strings
pub(crate) fn source_key<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Key {
        Int(i64),
        Text(String),
    }

    Ok(match Key::deserialize(deserializer)? {
        Key::Int(n) => n.to_string(),
        Key::Text(s) => s.trim().to_string(),
    })
}

/// Decision table key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bitmask(u8);

impl Bitmask {
    /// Upper bound (exclusive) of masks that can be computed
    pub const LIMIT: u8 = 1 << 7;

    pub fn from_bits(bits: u8) -> Self {
        Self(bits & (Self::LIMIT - 1))
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_set(self, bit: Bit) -> bool {
        self.0 & bit.mask() != 0
    }

    pub fn set(&mut self, bit: Bit) {
        self.0 |= bit.mask();
    }

    /// Fold the machine inputs into a mask
    pub fn compute(
        mapping: &[SensorMapping],
        active: &[String],
        presence: &[RoomPresence],
        timer_running: bool,
        state: SystemState,
    ) -> Self {
        let mut mask = Bitmask::default();

        for item in mapping {
            if !active.contains(&item.source_key) {
                continue;
            }
            if let Some(bit) = item.role.bit() {
                mask.set(bit);
            }
        }

        if presence.iter().any(|room| room.occupied) {
            mask.set(Bit::Presence);
        }
        if timer_running {
            mask.set(Bit::DelayTimer);
        }
        if state.is_armed() {
            mask.set(Bit::Armed);
        }

        mask
    }

    /// One `(bit, on)` row per bit, lowest first
    pub fn rows(self) -> Vec<(Bit, bool)> {
        Bit::ALL.into_iter().map(|bit| (bit, self.is_set(bit))).collect()
    }
}

impl fmt::Display for Bitmask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:07b})", self.0, self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn role_aliases() {
        assert_eq!(SensorRole::parse("Lock"), SensorRole::PrimaryLock);
        assert_eq!(SensorRole::parse("Front Door Contact"), SensorRole::PrimaryContact);
        assert_eq!(SensorRole::parse("basement_door_lock"), SensorRole::SecondaryLock);
        assert_eq!(SensorRole::parse("Garage"), SensorRole::Other("Garage".to_string()));
        assert_eq!(SensorRole::parse("Garage").bit(), None);
    }

    #[test]
    fn mapped_active_sensors_set_their_bits() {
        let mapping = vec![
            SensorMapping::new(101, SensorRole::PrimaryLock),
            SensorMapping::new(102, SensorRole::PrimaryContact),
            SensorMapping::new(103, SensorRole::Other("Garage".into())),
        ];

        let mask = Bitmask::compute(&mapping, &keys(&["101", "102", "103", "999"]), &[], false, SystemState::Disarmed);
        assert_eq!(mask.bits(), 3);
    }

    #[test]
    fn presence_timer_and_armed_bits() {
        let rooms = vec![
            RoomPresence::new("Master", false),
            RoomPresence::new("Guest", true),
        ];
        let mask = Bitmask::compute(&[], &[], &rooms, true, SystemState::Intent);
        assert!(mask.is_set(Bit::Presence));
        assert!(mask.is_set(Bit::DelayTimer));
        assert!(mask.is_set(Bit::Armed));
        assert_eq!(mask.bits(), 16 + 32 + 64);
    }

    #[test]
    fn mapping_accepts_numeric_and_text_keys() {
        let mapping: Vec<SensorMapping> = serde_json::from_str(
            r#"[{"SourceKey": 101, "LogicalRole": "Lock"}, {"source_key": " 102 ", "role": "Contact"}]"#,
        )
        .unwrap();
        assert_eq!(mapping[0].source_key, "101");
        assert_eq!(mapping[1].source_key, "102");
        assert_eq!(mapping[1].role, SensorRole::PrimaryContact);
    }
}
