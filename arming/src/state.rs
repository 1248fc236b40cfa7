//! Arming states

use crate::ArmingError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// System arming state, persisted and exchanged as its integer id
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum SystemState {
    #[default]
    Disarmed,
    Intent,
    ExitDelay,
    ArmedExternal,
    ArmedInternal,
    AlarmTriggered,
    Night,
}

impl SystemState {
    pub const ALL: [SystemState; 7] = [
        SystemState::Disarmed,
        SystemState::Intent,
        SystemState::ExitDelay,
        SystemState::ArmedExternal,
        SystemState::ArmedInternal,
        SystemState::AlarmTriggered,
        SystemState::Night,
    ];

    pub fn id(self) -> i64 {
        match self {
            SystemState::Disarmed => 0,
            SystemState::Intent => 1,
            SystemState::ExitDelay => 2,
            SystemState::ArmedExternal => 3,
            SystemState::ArmedInternal => 4,
            SystemState::AlarmTriggered => 5,
            SystemState::Night => 6,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SystemState::Disarmed => "Disarmed",
            SystemState::Intent => "Intent",
            SystemState::ExitDelay => "Exit Delay",
            SystemState::ArmedExternal => "Armed (External)",
            SystemState::ArmedInternal => "Armed (Internal)",
            SystemState::AlarmTriggered => "Alarm Triggered",
            SystemState::Night => "Night",
        }
    }

    /// Any state other than Disarmed feeds the armed bit
    pub fn is_armed(self) -> bool {
        self != SystemState::Disarmed
    }
}

impl TryFrom<i64> for SystemState {
    type Error = ArmingError;

    fn try_from(id: i64) -> Result<Self, Self::Error> {
        SystemState::ALL
            .into_iter()
            .find(|state| state.id() == id)
            .ok_or(ArmingError::UnknownState(id))
    }
}

impl From<SystemState> for i64 {
    fn from(state: SystemState) -> Self {
        state.id()
    }
}

impl fmt::Display for SystemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip_and_unknown_ids_fail() {
        for state in SystemState::ALL {
            assert_eq!(SystemState::try_from(state.id()).unwrap(), state);
        }
        assert!(matches!(SystemState::try_from(7), Err(ArmingError::UnknownState(7))));
        assert!(SystemState::try_from(-1).is_err());
    }

    #[test]
    fn serialized_as_integer() {
        assert_eq!(serde_json::to_string(&SystemState::Night).unwrap(), "6");
        let state: SystemState = serde_json::from_str("2").unwrap();
        assert_eq!(state, SystemState::ExitDelay);
    }
}
