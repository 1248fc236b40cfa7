//! Edge-triggered payload dispatch
//!
//! ```text
//!            alarm pass                 inactive pass
//!   Idle ───────────────► Alarmed ─────────────────────► Idle
//!                          │   ▲      (one reset payload
//!                          └───┘       to every routed target)
//!                       alarm pass
//!                  (payload re-delivered)
//! ```
//!
//! Delivery is fire-and-forget through [`ActionSink`]. A failing target is
//! logged and skipped; there are no retries, the reset on the falling edge is
//! what lets consumers recover from a missed payload.

use crate::payload::AlarmPayload;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use vigil_hal::{ActionSink, InstanceId};

/// Action invoked on consumers
pub const RECEIVE_ACTION: &str = vigil_hal::action::RECEIVE_PAYLOAD;

/// Downstream consumer endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchTarget {
    #[serde(alias = "InstanceID")]
    pub instance_id: InstanceId,
    #[serde(default, alias = "Name")]
    pub name: String,
}

impl DispatchTarget {
    pub fn new(instance_id: InstanceId, name: &str) -> Self {
        Self {
            instance_id,
            name: name.to_string(),
        }
    }
}

/// Binding of a group (by name) to a target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchRoute {
    #[serde(alias = "GroupName")]
    pub group: String,
    #[serde(alias = "InstanceID")]
    pub instance_id: InstanceId,
}

impl DispatchRoute {
    pub fn new(group: &str, instance_id: InstanceId) -> Self {
        Self {
            group: group.to_string(),
            instance_id,
        }
    }
}

/// Validated targets and routes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoutingTable {
    targets: Vec<DispatchTarget>,
    routes: Vec<DispatchRoute>,
}

impl RoutingTable {
    pub fn new(targets: Vec<DispatchTarget>, routes: Vec<DispatchRoute>) -> Self {
        Self { targets, routes }
    }

    pub fn target(&self, id: InstanceId) -> Option<&DispatchTarget> {
        self.targets.iter().find(|t| t.instance_id == id)
    }

    pub fn targets(&self) -> &[DispatchTarget] {
        &self.targets
    }

    pub fn routes(&self) -> &[DispatchRoute] {
        &self.routes
    }

    /// Targets bound to any of the given groups, each at most once
    pub fn targets_for(&self, groups: &[String]) -> Vec<&DispatchTarget> {
        self.select(|route| groups.iter().any(|g| *g == route.group))
    }

    /// Every target bound to any configured group
    pub fn routed_targets(&self) -> Vec<&DispatchTarget> {
        self.select(|_| true)
    }

    fn select(&self, mut wanted: impl FnMut(&DispatchRoute) -> bool) -> Vec<&DispatchTarget> {
        let mut seen = HashSet::new();
        self.routes
            .iter()
            .filter(|route| wanted(*route))
            .filter(|route| seen.insert(route.instance_id))
            .filter_map(|route| self.target(route.instance_id))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RouterState {
    #[default]
    Idle,
    Alarmed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchKind {
    Alarm,
    Reset,
    /// Inactive pass without an edge, nothing sent
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    pub target: InstanceId,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub kind: DispatchKind,
    pub delivered: Vec<InstanceId>,
    pub failed: Vec<DeliveryFailure>,
}

impl DispatchReport {
    fn new(kind: DispatchKind) -> Self {
        Self {
            kind,
            delivered: Vec::new(),
            failed: Vec::new(),
        }
    }

    /// Report of a pass that sent nothing
    pub fn skipped() -> Self {
        Self::new(DispatchKind::Skipped)
    }

    /// Error listing the failed targets, if any
    pub fn into_result(self) -> crate::Result<Vec<InstanceId>> {
        if self.failed.is_empty() {
            return Ok(self.delivered);
        }
        let failed: Vec<String> = self
            .failed
            .iter()
            .map(|f| format!("{}: {}", f.target, f.error))
            .collect();
        Err(crate::EngineError::Dispatch(failed.join("; ")))
    }
}

/// Dispatch state for one engine
#[derive(Debug, Default)]
pub struct DispatchRouter {
    state: RouterState,
}

impl DispatchRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RouterState {
        self.state
    }

    pub fn is_alarmed(&self) -> bool {
        self.state == RouterState::Alarmed
    }

    /// Send an alarm payload to the targets of its active groups
    pub fn deliver_alarm(
        &mut self,
        table: &RoutingTable,
        payload: &AlarmPayload,
        sink: &dyn ActionSink,
    ) -> DispatchReport {
        let targets = table.targets_for(&payload.active_groups);
        if targets.is_empty() {
            tracing::debug!(groups = ?payload.active_groups, "No dispatch targets bound to active groups");
        }

        let report = deliver(DispatchKind::Alarm, &targets, payload, sink);
        self.state = RouterState::Alarmed;
        report
    }

    /// Send a reset payload to all routed targets, only on the falling edge
    pub fn deliver_reset(
        &mut self,
        table: &RoutingTable,
        payload: &AlarmPayload,
        sink: &dyn ActionSink,
    ) -> DispatchReport {
        if !self.is_alarmed() {
            return DispatchReport::skipped();
        }

        let targets = table.routed_targets();
        tracing::info!("Alarm cleared, sending reset to {} target(s)", targets.len());

        let report = deliver(DispatchKind::Reset, &targets, payload, sink);
        self.state = RouterState::Idle;
        report
    }

    /// Forget the alarmed state without sending anything
    pub fn clear(&mut self) {
        self.state = RouterState::Idle;
    }
}

fn deliver(
    kind: DispatchKind,
    targets: &[&DispatchTarget],
    payload: &AlarmPayload,
    sink: &dyn ActionSink,
) -> DispatchReport {
    let mut report = DispatchReport::new(kind);

    let json = match payload.to_json() {
        Ok(json) => json,
        Err(e) => {
            tracing::error!("Failed to encode payload {}: {}", payload.event_id, e);
            report.failed = targets
                .iter()
                .map(|t| DeliveryFailure {
                    target: t.instance_id,
                    error: e.to_string(),
                })
                .collect();
            return report;
        }
    };

    for target in targets {
        match sink.invoke_action(target.instance_id, RECEIVE_ACTION, &json) {
            Ok(()) => {
                tracing::debug!(
                    instance = target.instance_id,
                    event = %payload.event_id,
                    "Payload delivered to {}", target.name
                );
                report.delivered.push(target.instance_id);
            }
            Err(e) => {
                tracing::warn!(
                    instance = target.instance_id,
                    "Delivery to {} failed: {}", target.name, e
                );
                report.failed.push(DeliveryFailure {
                    target: target.instance_id,
                    error: e.to_string(),
                });
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use vigil_hal::HalError;

    #[derive(Default)]
    struct RecordingSink {
        calls: Mutex<Vec<(InstanceId, String)>>,
        broken: Vec<InstanceId>,
    }

    impl ActionSink for RecordingSink {
        fn invoke_action(&self, target: InstanceId, action: &str, payload: &str) -> Result<(), HalError> {
            assert_eq!(action, RECEIVE_ACTION);
            if self.broken.contains(&target) {
                return Err(HalError::InstanceNotFound(target));
            }
            self.calls.lock().unwrap().push((target, payload.to_string()));
            Ok(())
        }
    }

    fn table() -> RoutingTable {
        RoutingTable::new(
            vec![
                DispatchTarget::new(1, "House"),
                DispatchTarget::new(2, "Garage"),
                DispatchTarget::new(3, "Siren"),
            ],
            vec![
                DispatchRoute::new("Perimeter", 1),
                DispatchRoute::new("Interior", 1),
                DispatchRoute::new("Interior", 2),
                DispatchRoute::new("Fire", 3),
            ],
        )
    }

    fn alarm(groups: &[&str]) -> AlarmPayload {
        let mut payload = AlarmPayload::reset(99, "Engine", 0, false);
        payload.active_groups = groups.iter().map(|g| g.to_string()).collect();
        payload
    }

    #[test]
    fn targets_are_deduplicated_across_groups() {
        let table = table();
        let ids: Vec<InstanceId> = table
            .targets_for(&["Perimeter".to_string(), "Interior".to_string()])
            .iter()
            .map(|t| t.instance_id)
            .collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn one_reset_per_falling_edge() {
        let table = table();
        let sink = RecordingSink::default();
        let mut router = DispatchRouter::new();
        let reset = AlarmPayload::reset(99, "Engine", 0, false);

        assert_eq!(router.deliver_reset(&table, &reset, &sink).kind, DispatchKind::Skipped);

        router.deliver_alarm(&table, &alarm(&["Perimeter"]), &sink);
        router.deliver_alarm(&table, &alarm(&["Perimeter"]), &sink);
        assert_eq!(sink.calls.lock().unwrap().len(), 2);

        let report = router.deliver_reset(&table, &reset, &sink);
        assert_eq!(report.kind, DispatchKind::Reset);
        assert_eq!(report.delivered, vec![1, 2, 3]);

        let again = router.deliver_reset(&table, &reset, &sink);
        assert_eq!(again.kind, DispatchKind::Skipped);
        assert_eq!(sink.calls.lock().unwrap().len(), 5);
    }

    #[test]
    fn failing_target_does_not_stop_others() {
        let table = table();
        let sink = RecordingSink {
            broken: vec![1],
            ..Default::default()
        };
        let mut router = DispatchRouter::new();

        let report = router.deliver_alarm(&table, &alarm(&["Interior"]), &sink);
        assert_eq!(report.delivered, vec![2]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].target, 1);
        assert!(router.is_alarmed());
        assert!(report.into_result().is_err());
    }
}
