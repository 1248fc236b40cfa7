//! Arming instance configuration

use crate::bitmask::{Bitmask, SensorMapping, SensorRole};
use crate::decision::{Decision, DecisionTable};
use crate::state::SystemState;
use crate::{ArmingError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use vigil_hal::InstanceId;

/// What to do when the table marks the current bitmask as illogical
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IllogicalPolicy {
    /// No state change, no timer control
    #[default]
    KeepCurrent,
    /// Treat as Disarmed, timer control proceeds
    ForceDisarmed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmingConfig {
    /// Instance id payloads are addressed to
    #[serde(default = "default_instance_id")]
    pub instance_id: InstanceId,

    #[serde(default = "default_name")]
    pub name: String,

    #[serde(default, alias = "GroupMapping")]
    pub mapping: Vec<SensorMapping>,

    #[serde(default, alias = "DecisionMap")]
    pub decision_table: DecisionTable,

    /// Exit delay in minutes
    #[serde(default = "default_delay_minutes", alias = "ArmingDelayDuration")]
    pub arming_delay_minutes: u64,

    /// State that runs the exit-delay timer
    #[serde(default = "default_exit_delay_state")]
    pub exit_delay_state: SystemState,

    #[serde(default)]
    pub on_illogical: IllogicalPolicy,

    /// Use the built-in matrix while the table is empty
    #[serde(default)]
    pub fallback_matrix: bool,
}

fn default_instance_id() -> InstanceId { 100 }
fn default_name() -> String { "Property State".to_string() }
fn default_delay_minutes() -> u64 { 1 }
fn default_exit_delay_state() -> SystemState { SystemState::ExitDelay }

impl Default for ArmingConfig {
    fn default() -> Self {
        Self {
            instance_id: default_instance_id(),
            name: default_name(),
            mapping: Vec::new(),
            decision_table: DecisionTable::default(),
            arming_delay_minutes: default_delay_minutes(),
            exit_delay_state: default_exit_delay_state(),
            on_illogical: IllogicalPolicy::default(),
            fallback_matrix: false,
        }
    }
}

impl ArmingConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).map_err(|e| ArmingError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the machine cannot run
    pub fn validate(&self) -> Result<()> {
        if self.arming_delay_minutes == 0 {
            return Err(ArmingError::InvalidConfig(
                "arming_delay_minutes must be at least 1".to_string(),
            ));
        }

        let mut roles: HashMap<&str, &SensorRole> = HashMap::new();
        for item in &self.mapping {
            if item.source_key.is_empty() {
                return Err(ArmingError::InvalidConfig("mapping with empty source key".to_string()));
            }
            if let Some(previous) = roles.insert(&item.source_key, &item.role) {
                if *previous != item.role {
                    return Err(ArmingError::InvalidConfig(format!(
                        "sensor {} mapped to both '{}' and '{}'",
                        item.source_key, previous, item.role
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn exit_delay(&self) -> Duration {
        Duration::from_secs(self.arming_delay_minutes.saturating_mul(60))
    }

    pub fn role_of(&self, source_key: &str) -> Option<&SensorRole> {
        self.mapping
            .iter()
            .find(|m| m.source_key == source_key)
            .map(|m| &m.role)
    }

    /// Table decision for a bitmask, honouring the fallback matrix
    pub fn decide(&self, mask: Bitmask) -> Decision {
        if self.decision_table.is_empty() && self.fallback_matrix {
            return DecisionTable::fallback(mask);
        }
        self.decision_table.lookup(mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_toml() {
        let config = ArmingConfig::from_toml_str(
            r#"
instance_id = 7
name = "House"
on_illogical = "force_disarmed"

[[mapping]]
source_key = 101
role = "Lock"

[[mapping]]
source_key = "102"
role = "Contact"

[decision_table]
"3" = 1
"#,
        )
        .unwrap();

        assert_eq!(config.instance_id, 7);
        assert_eq!(config.exit_delay(), Duration::from_secs(60));
        assert_eq!(config.exit_delay_state, SystemState::ExitDelay);
        assert_eq!(config.on_illogical, IllogicalPolicy::ForceDisarmed);
        assert_eq!(config.role_of("101"), Some(&SensorRole::PrimaryLock));
        assert_eq!(config.decide(Bitmask::from_bits(3)), Decision::Target(SystemState::Intent));
    }

    #[test]
    fn empty_table_uses_fallback_only_when_enabled() {
        let mut config = ArmingConfig::default();
        assert_eq!(config.decide(Bitmask::from_bits(0)), Decision::Target(SystemState::Disarmed));

        config.fallback_matrix = true;
        assert_eq!(config.decide(Bitmask::from_bits(0)), Decision::Target(SystemState::Intent));
        assert_eq!(config.decide(Bitmask::from_bits(70)), Decision::Target(SystemState::Disarmed));
    }

    #[test]
    fn conflicting_mapping_is_rejected() {
        let config = ArmingConfig {
            mapping: vec![
                SensorMapping::new(5, SensorRole::PrimaryLock),
                SensorMapping::new(5, SensorRole::Presence),
            ],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ArmingError::InvalidConfig(_))));

        let zero_delay = ArmingConfig {
            arming_delay_minutes: 0,
            ..Default::default()
        };
        assert!(zero_delay.validate().is_err());
    }
}
