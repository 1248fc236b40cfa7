//! Arming state machine
//!
//! ```text
//!              payload / timer expiry
//!                       │
//!                       ▼
//!   active set + presence + timer + armed ─► Bitmask ─► Decision
//!                                                          │
//!          ┌────────────── Illogical, keep_current ────────┤
//!          ▼                                               ▼
//!      no change                          commit target, drive exit-delay timer
//! ```
//!
//! Every input goes through [`ArmingStateMachine::evaluate`]; the timer is
//! only started when the target is the exit-delay state and only cancelled
//! when it is not. An illogical combination under
//! [`IllogicalPolicy::KeepCurrent`] touches neither the state nor the timer.

use crate::bitmask::{Bit, Bitmask};
use crate::config::{ArmingConfig, IllogicalPolicy};
use crate::decision::Decision;
use crate::inbound::{json_truthy, InboundPayload, RoomPresence};
use crate::state::SystemState;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use vigil_hal::{Clock, InstanceId, TimerControl};

/// Raw text of the most recent payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastPayload {
    pub raw: String,
    /// Unix seconds
    pub received_at: i64,
}

/// What an evaluation did to the exit-delay timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    None,
    Started(Duration),
    Cancelled,
}

/// Result of one evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub bitmask: Bitmask,
    pub decision: Decision,
    /// `(from, to)` when the state changed
    pub transition: Option<(SystemState, SystemState)>,
    pub timer: TimerAction,
}

/// Externally visible state of one instance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub instance_id: InstanceId,
    pub state_id: i64,
    pub state: String,
    pub presence: Vec<RoomPresence>,
    pub active_sensors: Vec<String>,
    pub is_delay_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisRow {
    pub bit: u8,
    pub label: &'static str,
    pub on: bool,
}

/// Breakdown of how the current inputs map to a decision
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Analysis {
    pub bitmask: Bitmask,
    pub rows: Vec<AnalysisRow>,
    /// Active sensors without a role
    pub unmapped: Vec<String>,
    pub decision: Decision,
    /// State the machine ends up in for this decision
    pub resulting: SystemState,
}

impl Analysis {
    /// Analyse a bitmask without a running machine
    pub fn explain(config: &ArmingConfig, bitmask: Bitmask, current: SystemState) -> Self {
        let decision = config.decide(bitmask);
        let resulting = match decision {
            Decision::Target(state) => state,
            Decision::Illogical => match config.on_illogical {
                IllogicalPolicy::KeepCurrent => current,
                IllogicalPolicy::ForceDisarmed => SystemState::Disarmed,
            },
        };

        Self {
            bitmask,
            rows: bitmask
                .rows()
                .into_iter()
                .map(|(bit, on)| AnalysisRow {
                    bit: bit.index(),
                    label: bit.label(),
                    on,
                })
                .collect(),
            unmapped: Vec::new(),
            decision,
            resulting,
        }
    }
}

impl fmt::Display for Analysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Bitmask: {}", self.bitmask)?;
        for row in &self.rows {
            writeln!(f, "  [{}] {:<24} {}", row.bit, row.label, if row.on { "ON" } else { "off" })?;
        }
        if !self.unmapped.is_empty() {
            writeln!(f, "Unmapped active sensors: {}", self.unmapped.join(", "))?;
        }
        writeln!(f, "Decision: {}", self.decision)?;
        write!(f, "Resulting state: {} ({})", self.resulting, self.resulting.id())
    }
}

/// Bitmask-driven arming state machine for one instance
pub struct ArmingStateMachine<T: TimerControl> {
    config: ArmingConfig,
    timer: T,
    state: SystemState,
    active: Vec<String>,
    presence: Vec<RoomPresence>,
    last_payload: Option<LastPayload>,
    clock: Arc<dyn Clock>,
}

impl<T: TimerControl> ArmingStateMachine<T> {
    pub fn new(config: ArmingConfig, timer: T, clock: Arc<dyn Clock>) -> Self {
        tracing::info!(
            instance = config.instance_id,
            mappings = config.mapping.len(),
            table_entries = config.decision_table.len(),
            "Arming instance '{}' ready",
            config.name
        );

        Self {
            config,
            timer,
            state: SystemState::Disarmed,
            active: Vec::new(),
            presence: Vec::new(),
            last_payload: None,
            clock,
        }
    }

    pub fn config(&self) -> &ArmingConfig {
        &self.config
    }

    pub fn state(&self) -> SystemState {
        self.state
    }

    pub fn timer(&self) -> &T {
        &self.timer
    }

    pub fn active_sensors(&self) -> &[String] {
        &self.active
    }

    pub fn presence(&self) -> &[RoomPresence] {
        &self.presence
    }

    pub fn last_payload(&self) -> Option<&LastPayload> {
        self.last_payload.as_ref()
    }

    /// Apply one raw payload; `None` when it could not be decoded
    pub fn receive_payload(&mut self, raw: &str) -> Option<Evaluation> {
        let payload = match InboundPayload::decode(raw) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::debug!(instance = self.config.instance_id, "Payload dropped: {}", e);
                return None;
            }
        };

        self.last_payload = Some(LastPayload {
            raw: raw.to_string(),
            received_at: self.clock.now(),
        });

        if payload.is_bedroom_sync() {
            self.presence = payload.bedrooms.unwrap_or_default();
            tracing::info!(
                instance = self.config.instance_id,
                rooms = self.presence.len(),
                occupied = self.presence.iter().filter(|r| r.occupied).count(),
                "Presence map synchronised"
            );
            return Some(self.evaluate());
        }

        if payload.is_global_reset() {
            tracing::info!(
                instance = self.config.instance_id,
                "Global reset from {}, clearing {} active sensor(s)",
                payload.source(),
                self.active.len()
            );
            self.active.clear();
        }

        if let Some(trigger) = &payload.trigger_details {
            if let Some(key) = &trigger.variable_id {
                self.apply_trigger(key, json_truthy(&trigger.value_raw));
            }
        }

        Some(self.evaluate())
    }

    fn apply_trigger(&mut self, key: &str, active: bool) {
        if active {
            if !self.active.iter().any(|k| k == key) {
                self.active.push(key.to_string());
            }
        } else {
            self.active.retain(|k| k != key);
        }

        match self.config.role_of(key) {
            Some(role) => tracing::debug!(
                instance = self.config.instance_id,
                sensor = key,
                active,
                "Sensor mapped to role '{}'",
                role
            ),
            None => tracing::warn!(
                instance = self.config.instance_id,
                sensor = key,
                "Sensor is not mapped to any role, contributes no bit"
            ),
        }
    }

    pub fn bitmask(&self) -> Bitmask {
        Bitmask::compute(
            &self.config.mapping,
            &self.active,
            &self.presence,
            self.timer.is_running(),
            self.state,
        )
    }

    /// Recompute the bitmask, commit the decided state and drive the timer
    pub fn evaluate(&mut self) -> Evaluation {
        let bitmask = self.bitmask();
        let decision = self.config.decide(bitmask);

        let target = match decision {
            Decision::Target(state) => state,
            Decision::Illogical => match self.config.on_illogical {
                IllogicalPolicy::KeepCurrent => {
                    tracing::warn!(
                        instance = self.config.instance_id,
                        "Illogical sensor combination {}, staying {}",
                        bitmask,
                        self.state
                    );
                    return Evaluation {
                        bitmask,
                        decision,
                        transition: None,
                        timer: TimerAction::None,
                    };
                }
                IllogicalPolicy::ForceDisarmed => {
                    tracing::warn!(
                        instance = self.config.instance_id,
                        "Illogical sensor combination {}, forcing Disarmed",
                        bitmask
                    );
                    SystemState::Disarmed
                }
            },
        };

        let transition = if target != self.state {
            let from = self.state;
            self.state = target;
            tracing::info!(
                instance = self.config.instance_id,
                "State change: {} -> {} (bitmask {})",
                from,
                target,
                bitmask
            );
            Some((from, target))
        } else {
            None
        };

        let timer = if target == self.config.exit_delay_state {
            let delay = self.config.exit_delay();
            if self.timer.start(delay) {
                tracing::info!(instance = self.config.instance_id, "Exit delay started ({}s)", delay.as_secs());
                TimerAction::Started(delay)
            } else {
                TimerAction::None
            }
        } else if self.timer.stop() {
            tracing::info!(instance = self.config.instance_id, "Exit delay cancelled");
            TimerAction::Cancelled
        } else {
            TimerAction::None
        };

        tracing::debug!(
            instance = self.config.instance_id,
            bitmask = bitmask.bits(),
            decision = decision.id(),
            state = self.state.id(),
            "Evaluated"
        );

        Evaluation {
            bitmask,
            decision,
            transition,
            timer,
        }
    }

    /// Exit delay elapsed
    pub fn handle_timer(&mut self) -> Evaluation {
        self.timer.stop();
        tracing::info!(instance = self.config.instance_id, "Exit delay elapsed, re-evaluating");
        self.evaluate()
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            instance_id: self.config.instance_id,
            state_id: self.state.id(),
            state: self.state.name().to_string(),
            presence: self.presence.clone(),
            active_sensors: self.active.clone(),
            is_delay_active: self.timer.is_running(),
        }
    }

    pub fn analysis(&self) -> Analysis {
        let mut analysis = Analysis::explain(&self.config, self.bitmask(), self.state);
        analysis.unmapped = self
            .active
            .iter()
            .filter(|key| self.config.role_of(key).and_then(|r| r.bit()).is_none())
            .cloned()
            .collect();
        analysis
    }

    /// Whether the presence bit would be set by room occupancy alone
    pub fn rooms_occupied(&self) -> bool {
        let rooms_only = Bitmask::compute(&[], &[], &self.presence, false, SystemState::Disarmed);
        rooms_only.is_set(Bit::Presence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmask::{SensorMapping, SensorRole};
    use crate::decision::DecisionTable;
    use vigil_hal::{ManualClock, ManualTimer};

    fn config(table: &[(u8, i64)]) -> ArmingConfig {
        let mut decision_table = DecisionTable::new();
        for &(bits, id) in table {
            let decision = if id < 0 {
                Decision::Illogical
            } else {
                Decision::Target(SystemState::try_from(id).unwrap())
            };
            decision_table = decision_table.with(bits, decision);
        }

        ArmingConfig {
            instance_id: 100,
            mapping: vec![
                SensorMapping::new(101, SensorRole::PrimaryLock),
                SensorMapping::new(102, SensorRole::PrimaryContact),
            ],
            decision_table,
            ..Default::default()
        }
    }

    fn machine(config: ArmingConfig) -> ArmingStateMachine<ManualTimer> {
        ArmingStateMachine::new(config, ManualTimer::new(), Arc::new(ManualClock::new(1_000)))
    }

    fn trigger(id: u32, value: bool) -> String {
        format!(
            r#"{{"source_name": "Main House", "active_groups": ["Perimeter"], "trigger_details": {{"variable_id": {}, "value_raw": {}}}}}"#,
            id, value
        )
    }

    #[test]
    fn lock_and_contact_reach_intent() {
        let mut m = machine(config(&[(3, 1)]));

        let first = m.receive_payload(&trigger(101, true)).unwrap();
        assert_eq!(first.bitmask.bits(), 1);
        assert_eq!(m.state(), SystemState::Disarmed);

        let second = m.receive_payload(&trigger(102, true)).unwrap();
        assert_eq!(second.bitmask.bits(), 3);
        assert_eq!(second.transition, Some((SystemState::Disarmed, SystemState::Intent)));
        assert_eq!(m.state(), SystemState::Intent);
        assert_eq!(m.active_sensors(), &["101".to_string(), "102".to_string()]);
    }

    #[test]
    fn empty_table_keeps_everything_disarmed() {
        let mut m = machine(ArmingConfig::default());
        let eval = m.evaluate();
        assert_eq!(eval.bitmask.bits(), 0);
        assert_eq!(eval.decision, Decision::Target(SystemState::Disarmed));
        assert_eq!(m.state(), SystemState::Disarmed);
    }

    #[test]
    fn illogical_keeps_current_state() {
        let mut m = machine(config(&[(3, 1), (67, -1)]));
        m.receive_payload(&trigger(101, true));
        m.receive_payload(&trigger(102, true));
        assert_eq!(m.state(), SystemState::Intent);

        // armed bit now set: 3 + 64
        let eval = m.receive_payload(r#"{"event_type": "BEDROOM_SYNC", "bedrooms": []}"#).unwrap();
        assert_eq!(eval.bitmask.bits(), 67);
        assert_eq!(eval.decision, Decision::Illogical);
        assert_eq!(eval.transition, None);
        assert_eq!(m.state(), SystemState::Intent);
    }

    #[test]
    fn illogical_forces_disarmed_when_configured() {
        let mut cfg = config(&[(3, 1), (67, -1)]);
        cfg.on_illogical = IllogicalPolicy::ForceDisarmed;
        let mut m = machine(cfg);
        m.receive_payload(&trigger(101, true));
        m.receive_payload(&trigger(102, true));

        let eval = m.evaluate();
        assert_eq!(eval.transition, Some((SystemState::Intent, SystemState::Disarmed)));
        assert_eq!(m.state(), SystemState::Disarmed);
    }

    #[test]
    fn illogical_keep_current_leaves_timer_alone() {
        let mut m = machine(config(&[(3, 2), (99, -1)]));
        m.receive_payload(&trigger(101, true));
        m.receive_payload(&trigger(102, true));
        assert!(m.timer().is_running());

        let eval = m.evaluate();
        assert_eq!(eval.timer, TimerAction::None);
        assert!(m.timer().is_running());
        assert_eq!(m.state(), SystemState::ExitDelay);
    }

    #[test]
    fn exit_delay_starts_once_and_cancels_on_leave() {
        let mut m = machine(config(&[(3, 2), (99, 2)]));
        m.receive_payload(&trigger(101, true));

        let entered = m.receive_payload(&trigger(102, true)).unwrap();
        assert_eq!(entered.timer, TimerAction::Started(Duration::from_secs(60)));
        assert!(m.snapshot().is_delay_active);

        // 3 + timer + armed
        let again = m.evaluate();
        assert_eq!(again.bitmask.bits(), 99);
        assert_eq!(again.timer, TimerAction::None);
        assert_eq!(m.timer().starts().len(), 1);

        let left = m.receive_payload(&trigger(102, false)).unwrap();
        assert_eq!(left.bitmask.bits(), 97);
        assert_eq!(left.timer, TimerAction::Cancelled);
        assert_eq!(m.state(), SystemState::Disarmed);
        assert_eq!(m.timer().stops(), 1);
    }

    #[test]
    fn timer_expiry_re_evaluates_without_timer_bit() {
        let mut cfg = config(&[(3, 2), (99, 2), (67, 3)]);
        cfg.arming_delay_minutes = 2;
        let mut m = machine(cfg);
        m.receive_payload(&trigger(101, true));
        let entered = m.receive_payload(&trigger(102, true)).unwrap();
        assert_eq!(entered.timer, TimerAction::Started(Duration::from_secs(120)));

        let eval = m.handle_timer();
        assert_eq!(eval.bitmask.bits(), 67);
        assert_eq!(eval.transition, Some((SystemState::ExitDelay, SystemState::ArmedExternal)));
        assert!(!m.timer().is_running());
    }

    #[test]
    fn bedroom_sync_replaces_presence() {
        let mut m = machine(config(&[(16, 6)]));
        let eval = m
            .receive_payload(
                r#"{"event_type": "BEDROOM_SYNC", "bedrooms": [{"Name": "Master", "SwitchState": true}, {"Name": "Guest", "SwitchState": false}]}"#,
            )
            .unwrap();

        assert_eq!(eval.bitmask.bits(), 16);
        assert_eq!(m.state(), SystemState::Night);
        assert!(m.rooms_occupied());
        assert_eq!(m.presence().len(), 2);

        m.receive_payload(r#"{"event_type": "BEDROOM_SYNC", "bedrooms": []}"#);
        assert!(m.presence().is_empty());
        assert!(!m.rooms_occupied());
    }

    #[test]
    fn global_reset_clears_active_sensors() {
        let mut m = machine(config(&[(3, 1)]));
        m.receive_payload(&trigger(101, true));
        m.receive_payload(&trigger(102, true));
        assert_eq!(m.state(), SystemState::Intent);

        let eval = m
            .receive_payload(r#"{"source_name": "Main House", "active_groups": [], "trigger_details": null}"#)
            .unwrap();
        assert!(m.active_sensors().is_empty());
        assert_eq!(eval.bitmask.bits(), 64);
        assert_eq!(m.state(), SystemState::Disarmed);
    }

    #[test]
    fn undecodable_payload_changes_nothing() {
        let mut m = machine(config(&[(0, 1)]));
        assert!(m.receive_payload("not json").is_none());
        assert_eq!(m.state(), SystemState::Disarmed);
        assert!(m.last_payload().is_none());

        let good = trigger(101, true);
        m.receive_payload(&good).unwrap();
        assert!(m.receive_payload("{broken").is_none());
        assert_eq!(m.last_payload().unwrap().raw, good);
        assert_eq!(m.last_payload().unwrap().received_at, 1_000);
    }

    #[test]
    fn text_trigger_values_follow_truthiness() {
        let mut m = machine(config(&[(1, 1)]));
        let text = |value: &str| {
            format!(
                r#"{{"active_groups": ["Perimeter"], "trigger_details": {{"variable_id": 101, "value_raw": "{}"}}}}"#,
                value
            )
        };

        let eval = m.receive_payload(&text("open")).unwrap();
        assert_eq!(m.active_sensors(), &["101".to_string()]);
        assert_eq!(eval.bitmask.bits(), 1);
        assert_eq!(m.state(), SystemState::Intent);

        m.receive_payload(&text("0")).unwrap();
        assert!(m.active_sensors().is_empty());

        m.receive_payload(&text("Tilted")).unwrap();
        assert_eq!(m.active_sensors(), &["101".to_string()]);

        m.receive_payload(&text("")).unwrap();
        assert!(m.active_sensors().is_empty());
        assert_eq!(m.state(), SystemState::Disarmed);
    }

    #[test]
    fn analysis_lists_unmapped_sensors() {
        let mut m = machine(config(&[(1, -1)]));
        m.receive_payload(&trigger(101, true));
        m.receive_payload(&trigger(555, true));

        let analysis = m.analysis();
        assert_eq!(analysis.bitmask.bits(), 1);
        assert_eq!(analysis.unmapped, vec!["555".to_string()]);
        assert_eq!(analysis.decision, Decision::Illogical);
        assert_eq!(analysis.resulting, SystemState::Disarmed);
        assert!(analysis.rows[0].on);
        assert!(!analysis.rows[1].on);
        assert!(analysis.to_string().contains("Primary Lock"));
    }
}
