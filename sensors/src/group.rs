//! Alarm groups
//!
//! Groups fan in the active flags of their member classes. The overall alarm
//! status is the OR across all groups.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupLogic {
    #[default]
    #[serde(alias = "OR")]
    Or,
    #[serde(alias = "AND")]
    And,
}

/// Alarm group definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmGroup {
    #[serde(alias = "GroupID")]
    pub id: String,
    #[serde(alias = "GroupName", alias = "Name")]
    pub name: String,
    #[serde(default, alias = "GroupLogic", alias = "Logic")]
    pub logic: GroupLogic,
}

impl AlarmGroup {
    pub fn new(id: &str, name: &str, logic: GroupLogic) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            logic,
        }
    }
}

/// Membership of a class in a group (by group name)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMember {
    #[serde(alias = "GroupName")]
    pub group: String,
    #[serde(alias = "ClassID")]
    pub class_id: String,
}

impl GroupMember {
    pub fn new(group: &str, class_id: &str) -> Self {
        Self {
            group: group.to_string(),
            class_id: class_id.to_string(),
        }
    }
}

/// Group with its resolved member class ids
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSpec {
    pub group: AlarmGroup,
    pub members: Vec<String>,
}

impl GroupSpec {
    /// Whether this group is active for the given class states.
    ///
    /// A group without members is never active.
    pub fn is_active(&self, class_active: &HashMap<String, bool>) -> bool {
        if self.members.is_empty() {
            return false;
        }

        let active = self
            .members
            .iter()
            .filter(|id| class_active.get(id.as_str()).copied().unwrap_or(false))
            .count();

        match self.group.logic {
            GroupLogic::Or => active > 0,
            GroupLogic::And => active == self.members.len(),
        }
    }
}

/// Result of the group tier for one pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupOutcome {
    pub overall_active: bool,
    /// Names of active groups in configuration order
    pub active_groups: Vec<String>,
    pub per_group: BTreeMap<String, bool>,
}

impl GroupOutcome {
    pub fn primary_group(&self) -> Option<&str> {
        self.active_groups.first().map(String::as_str)
    }
}

pub fn evaluate(groups: &[GroupSpec], class_active: &HashMap<String, bool>) -> GroupOutcome {
    let mut outcome = GroupOutcome::default();

    for spec in groups {
        let active = spec.is_active(class_active);
        if active {
            outcome.active_groups.push(spec.group.name.clone());
        }
        outcome.per_group.insert(spec.group.name.clone(), active);
    }

    outcome.overall_active = !outcome.active_groups.is_empty();
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, logic: GroupLogic, members: &[&str]) -> GroupSpec {
        GroupSpec {
            group: AlarmGroup::new(name, name, logic),
            members: members.iter().map(|m| m.to_string()).collect(),
        }
    }

    fn states(pairs: &[(&str, bool)]) -> HashMap<String, bool> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn and_group_needs_every_member() {
        let groups = [spec("Perimeter", GroupLogic::And, &["doors", "windows"])];

        let both = evaluate(&groups, &states(&[("doors", true), ("windows", true)]));
        assert!(both.overall_active);
        assert_eq!(both.primary_group(), Some("Perimeter"));

        let one = evaluate(&groups, &states(&[("doors", true), ("windows", false)]));
        assert!(!one.overall_active);
        assert_eq!(one.per_group["Perimeter"], false);
    }

    #[test]
    fn empty_groups_are_never_active() {
        let groups = [spec("Empty", GroupLogic::And, &[]), spec("EmptyOr", GroupLogic::Or, &[])];
        assert!(!evaluate(&groups, &HashMap::new()).overall_active);
    }

    #[test]
    fn any_active_group_raises_overall_status() {
        // the second group alone must drive the status, not only the first
        let groups = [
            spec("Perimeter", GroupLogic::Or, &["doors"]),
            spec("Interior", GroupLogic::Or, &["motion"]),
        ];
        let outcome = evaluate(&groups, &states(&[("doors", false), ("motion", true)]));
        assert!(outcome.overall_active);
        assert_eq!(outcome.active_groups, vec!["Interior".to_string()]);
    }

    #[test]
    fn unknown_members_count_as_inactive() {
        let groups = [spec("Perimeter", GroupLogic::Or, &["ghost"])];
        assert!(!evaluate(&groups, &states(&[("doors", true)])).overall_active);
    }
}
