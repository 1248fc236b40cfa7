//! Engine configuration
//!
//! [`EngineConfig`] is the serialized form. List entries are decoded one at
//! a time, so a malformed entry is dropped on load without taking the rest
//! of the file with it. [`EngineConfig::compile`] turns the result into an
//! immutable [`EngineSnapshot`], skipping (and reporting) entries that
//! reference things that do not exist.

use crate::class::{AlarmClass, LogicMode};
use crate::dispatch::{DispatchRoute, DispatchTarget, RoutingTable};
use crate::group::{AlarmGroup, GroupMember, GroupSpec};
use crate::rule::{Operator, SensorRule};
use crate::tamper::TamperRule;
use crate::{EngineError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use vigil_hal::{InstanceId, SensorId};

/// Serialized engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawEngineConfig")]
pub struct EngineConfig {
    /// Id of this engine, sent as `source_id`
    #[serde(default = "default_instance_id")]
    pub instance_id: InstanceId,

    /// Name of this engine, sent as `source_name`
    #[serde(default = "default_name")]
    pub name: String,

    /// Flag payloads as maintenance traffic
    #[serde(default, alias = "MaintenanceMode")]
    pub maintenance_mode: bool,

    #[serde(default, alias = "AlarmClassList")]
    pub classes: Vec<AlarmClass>,

    #[serde(default, alias = "SensorList")]
    pub sensors: Vec<SensorRule>,

    #[serde(default, alias = "TamperList")]
    pub tamper: Vec<TamperRule>,

    #[serde(default, alias = "GroupList")]
    pub groups: Vec<AlarmGroup>,

    #[serde(default, alias = "GroupMembers")]
    pub group_members: Vec<GroupMember>,

    #[serde(default, alias = "DispatchTargets")]
    pub targets: Vec<DispatchTarget>,

    #[serde(default, alias = "GroupDispatch")]
    pub routes: Vec<DispatchRoute>,

    /// Entries dropped while decoding
    #[serde(skip)]
    pub load_issues: Vec<ConfigIssue>,
}

/// On-disk shape with every list entry left undecoded
#[derive(Deserialize)]
struct RawEngineConfig {
    #[serde(default = "default_instance_id")]
    instance_id: InstanceId,
    #[serde(default = "default_name")]
    name: String,
    #[serde(default, alias = "MaintenanceMode")]
    maintenance_mode: bool,
    #[serde(default, alias = "AlarmClassList")]
    classes: Vec<serde_json::Value>,
    #[serde(default, alias = "SensorList")]
    sensors: Vec<serde_json::Value>,
    #[serde(default, alias = "TamperList")]
    tamper: Vec<serde_json::Value>,
    #[serde(default, alias = "GroupList")]
    groups: Vec<serde_json::Value>,
    #[serde(default, alias = "GroupMembers")]
    group_members: Vec<serde_json::Value>,
    #[serde(default, alias = "DispatchTargets")]
    targets: Vec<serde_json::Value>,
    #[serde(default, alias = "GroupDispatch")]
    routes: Vec<serde_json::Value>,
}

impl From<RawEngineConfig> for EngineConfig {
    fn from(raw: RawEngineConfig) -> Self {
        let mut issues = Issues(Vec::new());
        Self {
            instance_id: raw.instance_id,
            name: raw.name,
            maintenance_mode: raw.maintenance_mode,
            classes: decode_entries("classes", raw.classes, &mut issues),
            sensors: decode_entries("sensors", raw.sensors, &mut issues),
            tamper: decode_entries("tamper", raw.tamper, &mut issues),
            groups: decode_entries("groups", raw.groups, &mut issues),
            group_members: decode_entries("group_members", raw.group_members, &mut issues),
            targets: decode_entries("targets", raw.targets, &mut issues),
            routes: decode_entries("routes", raw.routes, &mut issues),
            load_issues: issues.0,
        }
    }
}

fn decode_entries<T: DeserializeOwned>(
    section: &'static str,
    raw: Vec<serde_json::Value>,
    issues: &mut Issues,
) -> Vec<T> {
    let mut entries = Vec::with_capacity(raw.len());
    for (index, value) in raw.into_iter().enumerate() {
        match serde_json::from_value(value) {
            Ok(entry) => entries.push(entry),
            Err(e) => issues.skip(section, index, e.to_string()),
        }
    }
    entries
}

fn default_instance_id() -> InstanceId { 1 }
fn default_name() -> String { "Sensor Group".to_string() }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            instance_id: default_instance_id(),
            name: default_name(),
            maintenance_mode: false,
            classes: Vec::new(),
            sensors: Vec::new(),
            tamper: Vec::new(),
            groups: Vec::new(),
            group_members: Vec::new(),
            targets: Vec::new(),
            routes: Vec::new(),
            load_issues: Vec::new(),
        }
    }
}

/// Problem found while compiling a configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    pub section: &'static str,
    pub index: usize,
    pub message: String,
    /// Whether the entry was dropped (otherwise it was kept, possibly adjusted)
    pub skipped: bool,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}]: {}{}",
            self.section,
            self.index,
            self.message,
            if self.skipped { " (skipped)" } else { "" }
        )
    }
}

struct Issues(Vec<ConfigIssue>);

impl Issues {
    fn skip(&mut self, section: &'static str, index: usize, message: String) {
        tracing::warn!("Config {}[{}] skipped: {}", section, index, message);
        self.0.push(ConfigIssue { section, index, message, skipped: true });
    }

    fn adjust(&mut self, section: &'static str, index: usize, message: String) {
        tracing::warn!("Config {}[{}]: {}", section, index, message);
        self.0.push(ConfigIssue { section, index, message, skipped: false });
    }
}

impl EngineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| EngineError::InvalidConfig(e.to_string()))
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| EngineError::InvalidConfig(e.to_string()))
    }

    /// Validate and resolve into a snapshot, reporting load issues first
    pub fn compile(&self) -> (EngineSnapshot, Vec<ConfigIssue>) {
        let mut issues = Issues(self.load_issues.clone());

        let classes = self.compile_classes(&mut issues);
        let class_ids: HashSet<&str> = classes.iter().map(|c| c.id.as_str()).collect();

        let mut rules = Vec::new();
        for (i, rule) in self.sensors.iter().enumerate() {
            if !class_ids.contains(rule.class_id.as_str()) {
                issues.skip("sensors", i, format!("unknown class '{}'", rule.class_id));
                continue;
            }
            if let Operator::Unknown(raw) = &rule.operator {
                issues.adjust("sensors", i, format!("unknown operator '{}', rule never matches", raw));
            }
            rules.push(rule.clone());
        }

        let groups = self.compile_groups(&class_ids, &mut issues);
        let group_names: HashSet<&str> = groups.iter().map(|g| g.group.name.as_str()).collect();

        let mut targets: Vec<DispatchTarget> = Vec::new();
        for (i, target) in self.targets.iter().enumerate() {
            if targets.iter().any(|t| t.instance_id == target.instance_id) {
                issues.skip("targets", i, format!("duplicate instance {}", target.instance_id));
                continue;
            }
            targets.push(target.clone());
        }

        let mut routes: Vec<DispatchRoute> = Vec::new();
        for (i, route) in self.routes.iter().enumerate() {
            if !group_names.contains(route.group.as_str()) {
                issues.skip("routes", i, format!("unknown group '{}'", route.group));
                continue;
            }
            if !targets.iter().any(|t| t.instance_id == route.instance_id) {
                issues.skip("routes", i, format!("unknown target {}", route.instance_id));
                continue;
            }
            if routes.contains(route) {
                issues.skip("routes", i, "duplicate route".to_string());
                continue;
            }
            routes.push(route.clone());
        }

        let snapshot = EngineSnapshot {
            instance_id: self.instance_id,
            name: self.name.clone(),
            maintenance_mode: self.maintenance_mode,
            classes,
            rules,
            tamper: self.tamper.clone(),
            groups,
            routing: RoutingTable::new(targets, routes),
        };

        (snapshot, issues.0)
    }

    fn compile_classes(&self, issues: &mut Issues) -> Vec<AlarmClass> {
        let mut classes: Vec<AlarmClass> = Vec::new();

        for (i, class) in self.classes.iter().enumerate() {
            if class.id.trim().is_empty() {
                issues.skip("classes", i, "empty class id".to_string());
                continue;
            }
            if classes.iter().any(|c| c.id == class.id) {
                issues.skip("classes", i, format!("duplicate class id '{}'", class.id));
                continue;
            }

            let mut class = class.clone();
            if class.name.trim().is_empty() {
                class.name = class.id.clone();
            }
            if class.logic == LogicMode::Count && class.threshold == 0 {
                issues.adjust("classes", i, "COUNT threshold 0 raised to 1".to_string());
                class.threshold = 1;
            }
            classes.push(class);
        }

        classes
    }

    fn compile_groups(&self, class_ids: &HashSet<&str>, issues: &mut Issues) -> Vec<GroupSpec> {
        let mut groups: Vec<GroupSpec> = Vec::new();

        for (i, group) in self.groups.iter().enumerate() {
            if group.name.trim().is_empty() {
                issues.skip("groups", i, "empty group name".to_string());
                continue;
            }
            if groups.iter().any(|g| g.group.name == group.name) {
                issues.skip("groups", i, format!("duplicate group '{}'", group.name));
                continue;
            }
            groups.push(GroupSpec {
                group: group.clone(),
                members: Vec::new(),
            });
        }

        for (i, member) in self.group_members.iter().enumerate() {
            if !class_ids.contains(member.class_id.as_str()) {
                issues.skip("group_members", i, format!("unknown class '{}'", member.class_id));
                continue;
            }
            let Some(spec) = groups.iter_mut().find(|g| g.group.name == member.group) else {
                issues.skip("group_members", i, format!("unknown group '{}'", member.group));
                continue;
            };
            if spec.members.contains(&member.class_id) {
                issues.skip("group_members", i, "duplicate membership".to_string());
                continue;
            }
            spec.members.push(member.class_id.clone());
        }

        groups
    }
}

/// Immutable, validated configuration used by one evaluation pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineSnapshot {
    pub instance_id: InstanceId,
    pub name: String,
    pub maintenance_mode: bool,
    pub classes: Vec<AlarmClass>,
    rules: Vec<SensorRule>,
    pub tamper: Vec<TamperRule>,
    pub groups: Vec<GroupSpec>,
    pub routing: RoutingTable,
}

impl EngineSnapshot {
    pub fn rules(&self) -> &[SensorRule] {
        &self.rules
    }

    pub fn rules_for(&self, class_id: &str) -> Vec<&SensorRule> {
        self.rules.iter().filter(|r| r.class_id == class_id).collect()
    }

    pub fn class(&self, id: &str) -> Option<&AlarmClass> {
        self.classes.iter().find(|c| c.id == id)
    }

    /// Every sensor referenced by a rule or a tamper rule
    pub fn watched_sensors(&self) -> BTreeSet<SensorId> {
        self.rules
            .iter()
            .map(|r| r.sensor_id)
            .chain(self.tamper.iter().map(|t| t.sensor_id))
            .collect()
    }

    /// Whether the class is a member of any of the given groups
    pub fn is_member_of_any(&self, class_id: &str, groups: &[String]) -> bool {
        self.groups
            .iter()
            .filter(|g| groups.contains(&g.group.name))
            .any(|g| g.members.iter().any(|m| m == class_id))
    }
}
