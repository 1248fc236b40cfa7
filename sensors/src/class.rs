//! Alarm classes
//!
//! A class bundles sensor rules and decides whether it is active using one
//! of three logic modes:
//!
//! - `or`: at least one rule matches
//! - `and`: every rule matches (and there is at least one rule)
//! - `count`: at least `threshold` qualifying events inside `time_window`
//!   seconds, where an event is a change of a sensor of this class that
//!   currently matches its rule

use crate::payload::TriggerDetails;
use crate::rule::SensorRule;
use crate::window::EventBuffer;
use serde::{Deserialize, Serialize};
use vigil_hal::{SensorHost, SensorId, SensorInfo, SensorValue};

/// Suffix appended to the trigger label when a class fires through COUNT
pub const COUNT_LABEL_SUFFIX: &str = " (Count)";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicMode {
    #[default]
    #[serde(alias = "OR")]
    Or,
    #[serde(alias = "AND")]
    And,
    #[serde(alias = "COUNT")]
    Count,
}

/// How the trigger label of a class is built
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelMode {
    #[default]
    SensorName,
    ParentLocation,
    FormattedValue,
}

/// Alarm class definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmClass {
    #[serde(alias = "ClassID")]
    pub id: String,
    #[serde(alias = "Name")]
    pub name: String,
    #[serde(default, alias = "LogicMode")]
    pub logic: LogicMode,
    #[serde(default = "default_threshold", alias = "TriggerThreshold")]
    pub threshold: u32,
    /// Seconds
    #[serde(default = "default_time_window", alias = "TimeWindow")]
    pub time_window: u64,
    #[serde(default, alias = "LabelMode")]
    pub label_mode: LabelMode,
}

fn default_threshold() -> u32 { 1 }
fn default_time_window() -> u64 { 10 }

impl AlarmClass {
    pub fn new(id: &str, name: &str, logic: LogicMode) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            logic,
            threshold: default_threshold(),
            time_window: default_time_window(),
            label_mode: LabelMode::default(),
        }
    }

    pub fn with_count(mut self, threshold: u32, time_window: u64) -> Self {
        self.logic = LogicMode::Count;
        self.threshold = threshold;
        self.time_window = time_window;
        self
    }

    pub fn with_label_mode(mut self, mode: LabelMode) -> Self {
        self.label_mode = mode;
        self
    }
}

/// Result of evaluating one class in a pass
#[derive(Debug, Clone, PartialEq)]
pub struct ClassOutcome {
    pub class_id: String,
    pub active: bool,
    /// Details of the matching sensor, only set while active
    pub trigger: Option<TriggerDetails>,
    pub matches: usize,
    pub total: usize,
    /// Buffered events after the pass (COUNT classes only)
    pub buffered: Option<usize>,
}

/// Evaluate a class against the current sensor values.
///
/// `trigger` is the sensor whose change caused this pass, if any. For COUNT
/// classes `buffer` is pruned and possibly appended; other modes leave it
/// untouched.
pub fn evaluate(
    class: &AlarmClass,
    rules: &[&SensorRule],
    host: &dyn SensorHost,
    trigger: Option<SensorId>,
    now: i64,
    buffer: &mut EventBuffer,
) -> ClassOutcome {
    let mut matches = 0;
    let mut trigger_matches = false;
    let mut chosen: Option<(&SensorRule, SensorValue)> = None;

    for &rule in rules {
        let current = match host.read_value(rule.sensor_id) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(
                    class = %class.id,
                    sensor = rule.sensor_id,
                    "Rule skipped, sensor unavailable: {}", e
                );
                continue;
            }
        };

        if !rule.matches(&current) {
            continue;
        }
        matches += 1;

        let is_trigger = trigger == Some(rule.sensor_id);
        let replace = match &chosen {
            None => true,
            Some((picked, _)) => is_trigger && trigger != Some(picked.sensor_id),
        };
        if is_trigger {
            trigger_matches = true;
        }
        if replace {
            chosen = Some((rule, current));
        }
    }

    let total = rules.len();
    let (active, buffered) = match class.logic {
        LogicMode::Or => (matches > 0, None),
        LogicMode::And => (total > 0 && matches == total, None),
        LogicMode::Count => {
            buffer.prune(now, class.time_window);
            if trigger_matches {
                buffer.record(now);
            }
            (buffer.reaches(class.threshold.max(1)), Some(buffer.len()))
        }
    };

    let trigger = match (&chosen, active) {
        (Some((rule, value)), true) => Some(trigger_details(
            class,
            rule,
            value,
            host,
            class.logic == LogicMode::Count,
        )),
        _ => None,
    };

    ClassOutcome {
        class_id: class.id.clone(),
        active,
        trigger,
        matches,
        total,
        buffered,
    }
}

fn trigger_details(
    class: &AlarmClass,
    rule: &SensorRule,
    value: &SensorValue,
    host: &dyn SensorHost,
    counted: bool,
) -> TriggerDetails {
    let info = host
        .describe(rule.sensor_id)
        .unwrap_or_else(|| SensorInfo::new(rule.sensor_id, &format!("Sensor {}", rule.sensor_id)));
    let value_human = host
        .format_value(rule.sensor_id)
        .unwrap_or_else(|_| value.to_string());

    let mut smart_label = match class.label_mode {
        LabelMode::SensorName => info.name.clone(),
        LabelMode::ParentLocation if !info.parent_name.is_empty() => info.parent_name.clone(),
        LabelMode::ParentLocation => info.name.clone(),
        LabelMode::FormattedValue => value_human.clone(),
    };
    if counted {
        smart_label.push_str(COUNT_LABEL_SUFFIX);
    }

    TriggerDetails {
        variable_id: rule.sensor_id,
        value_raw: value.to_json(),
        tag: class.name.clone(),
        class_id: class.id.clone(),
        var_name: info.name,
        parent_name: info.parent_name,
        grandparent_name: info.grandparent_name,
        value_human,
        smart_label,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::Operator;
    use vigil_hal::MemoryHost;

    fn host_with(sensors: &[(SensorId, &str, SensorValue)]) -> MemoryHost {
        let (host, _rx) = MemoryHost::new();
        for (id, name, value) in sensors {
            host.register(
                SensorInfo::new(*id, name).with_location("Hallway", "Ground Floor"),
                value.clone(),
            );
        }
        host
    }

    fn is_true(id: SensorId, class: &str) -> SensorRule {
        SensorRule::new(id, Operator::Eq, SensorValue::Bool(true), class)
    }

    #[test]
    fn or_needs_one_match() {
        let host = host_with(&[(1, "Door", true.into()), (2, "Window", false.into())]);
        let class = AlarmClass::new("c", "Intrusion", LogicMode::Or);
        let (r1, r2) = (is_true(1, "c"), is_true(2, "c"));
        let mut buffer = EventBuffer::new();

        let outcome = evaluate(&class, &[&r1, &r2], &host, None, 0, &mut buffer);
        assert!(outcome.active);
        assert_eq!(outcome.matches, 1);
        assert_eq!(outcome.trigger.unwrap().variable_id, 1);
    }

    #[test]
    fn and_needs_all_and_at_least_one_rule() {
        let host = host_with(&[(1, "Door", true.into()), (2, "Window", false.into())]);
        let class = AlarmClass::new("c", "Intrusion", LogicMode::And);
        let (r1, r2) = (is_true(1, "c"), is_true(2, "c"));
        let mut buffer = EventBuffer::new();

        assert!(!evaluate(&class, &[&r1, &r2], &host, None, 0, &mut buffer).active);
        host.set_value(2, true.into()).unwrap();
        assert!(evaluate(&class, &[&r1, &r2], &host, None, 0, &mut buffer).active);
        assert!(!evaluate(&class, &[], &host, None, 0, &mut buffer).active);
    }

    #[test]
    fn triggering_sensor_wins_the_trigger_details() {
        let host = host_with(&[(1, "Door", true.into()), (2, "Window", true.into())]);
        let class = AlarmClass::new("c", "Intrusion", LogicMode::Or);
        let (r1, r2) = (is_true(1, "c"), is_true(2, "c"));
        let mut buffer = EventBuffer::new();

        let outcome = evaluate(&class, &[&r1, &r2], &host, Some(2), 0, &mut buffer);
        assert_eq!(outcome.trigger.unwrap().variable_id, 2);
    }

    #[test]
    fn count_within_window_activates() {
        let host = host_with(&[(1, "Motion", true.into())]);
        let class = AlarmClass::new("c", "Motion", LogicMode::Or).with_count(2, 10);
        let rule = is_true(1, "c");
        let mut buffer = EventBuffer::new();

        assert!(!evaluate(&class, &[&rule], &host, Some(1), 100, &mut buffer).active);
        let outcome = evaluate(&class, &[&rule], &host, Some(1), 108, &mut buffer);
        assert!(outcome.active);
        assert_eq!(outcome.buffered, Some(2));
        assert_eq!(outcome.trigger.unwrap().smart_label, "Motion (Count)");
    }

    #[test]
    fn count_spaced_beyond_window_never_activates() {
        let host = host_with(&[(1, "Motion", true.into())]);
        let class = AlarmClass::new("c", "Motion", LogicMode::Count).with_count(2, 10);
        let rule = is_true(1, "c");
        let mut buffer = EventBuffer::new();

        assert!(!evaluate(&class, &[&rule], &host, Some(1), 100, &mut buffer).active);
        assert!(!evaluate(&class, &[&rule], &host, Some(1), 111, &mut buffer).active);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn count_ignores_foreign_and_non_matching_triggers() {
        let host = host_with(&[(1, "Motion", false.into()), (9, "Other", true.into())]);
        let class = AlarmClass::new("c", "Motion", LogicMode::Count).with_count(1, 10);
        let rule = is_true(1, "c");
        let mut buffer = EventBuffer::new();

        assert!(!evaluate(&class, &[&rule], &host, Some(9), 0, &mut buffer).active);
        assert!(!evaluate(&class, &[&rule], &host, Some(1), 1, &mut buffer).active);
        assert!(!evaluate(&class, &[&rule], &host, None, 2, &mut buffer).active);
        assert!(buffer.is_empty());
    }

    #[test]
    fn label_modes_only_change_the_label() {
        let host = host_with(&[(1, "Door", true.into())]);
        let rule = is_true(1, "c");
        let mut buffer = EventBuffer::new();

        let labels: Vec<String> = [LabelMode::SensorName, LabelMode::ParentLocation, LabelMode::FormattedValue]
            .into_iter()
            .map(|mode| {
                let class = AlarmClass::new("c", "Intrusion", LogicMode::Or).with_label_mode(mode);
                let outcome = evaluate(&class, &[&rule], &host, None, 0, &mut buffer);
                assert!(outcome.active);
                outcome.trigger.unwrap().smart_label
            })
            .collect();

        assert_eq!(labels, vec!["Door", "Hallway", "On"]);
    }

    #[test]
    fn missing_sensor_counts_as_non_matching() {
        let host = host_with(&[(1, "Door", true.into())]);
        let class = AlarmClass::new("c", "Intrusion", LogicMode::And);
        let (r1, r2) = (is_true(1, "c"), is_true(404, "c"));
        let mut buffer = EventBuffer::new();

        let outcome = evaluate(&class, &[&r1, &r2], &host, None, 0, &mut buffer);
        assert!(!outcome.active);
        assert_eq!(outcome.matches, 1);
        assert_eq!(outcome.total, 2);
    }
}
