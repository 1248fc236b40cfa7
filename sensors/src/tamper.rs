//! Sabotage / tamper monitoring
//!
//! Independent of the alarm status: any tripped tamper rule raises the
//! sabotage flag, but it never gates dispatch.

use serde::{Deserialize, Serialize};
use vigil_hal::{SensorHost, SensorId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TamperRule {
    #[serde(alias = "VariableID", alias = "variable_id")]
    pub sensor_id: SensorId,
    /// Trip on a false value instead of a true one
    #[serde(default, alias = "Invert")]
    pub invert: bool,
}

impl TamperRule {
    pub fn new(sensor_id: SensorId, invert: bool) -> Self {
        Self { sensor_id, invert }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TamperOutcome {
    pub active: bool,
    pub tripped: Vec<SensorId>,
}

pub fn evaluate(rules: &[TamperRule], host: &dyn SensorHost) -> TamperOutcome {
    let tripped: Vec<SensorId> = rules
        .iter()
        .filter(|rule| match host.read_value(rule.sensor_id) {
            Ok(value) => value.is_truthy() != rule.invert,
            Err(e) => {
                tracing::debug!(sensor = rule.sensor_id, "Tamper sensor unavailable: {}", e);
                false
            }
        })
        .map(|rule| rule.sensor_id)
        .collect();

    TamperOutcome {
        active: !tripped.is_empty(),
        tripped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_hal::{MemoryHost, SensorInfo, SensorValue};

    #[test]
    fn inverted_rules_trip_on_false() {
        let (host, _rx) = MemoryHost::new();
        host.register(SensorInfo::new(1, "Case switch"), SensorValue::Bool(false));
        host.register(SensorInfo::new(2, "Siren line"), SensorValue::Bool(true));

        let normal = [TamperRule::new(1, false), TamperRule::new(2, true)];
        assert_eq!(evaluate(&normal, &host), TamperOutcome::default());

        let inverted = [TamperRule::new(1, true)];
        let outcome = evaluate(&inverted, &host);
        assert!(outcome.active);
        assert_eq!(outcome.tripped, vec![1]);
    }

    #[test]
    fn unreadable_sensor_is_not_tripped() {
        let (host, _rx) = MemoryHost::new();
        assert!(!evaluate(&[TamperRule::new(5, true)], &host).active);
    }
}
