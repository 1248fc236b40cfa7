//! Alarm engine
//!
//! Runs one evaluation pass per sensor change:
//!
//! ```text
//! change ─► classes ─► groups ─► payload ─► DispatchRouter ─► targets
//!              │
//!              └─ COUNT buffers       tamper ─► sabotage flag
//! ```
//!
//! Mutable pass state (COUNT buffers, router state, status flags) lives behind
//! one mutex, so passes are serialised. The configuration is an immutable
//! snapshot that [`AlarmEngine::reload`] swaps while holding that mutex, so a
//! pass always sees exactly one configuration.

use crate::class::{self, ClassOutcome, LogicMode};
use crate::config::{ConfigIssue, EngineConfig, EngineSnapshot};
use crate::dispatch::{DispatchReport, DispatchRouter, RouterState};
use crate::group::{self, GroupOutcome};
use crate::payload::{next_event_id, AlarmPayload};
use crate::tamper::{self, TamperOutcome};
use crate::window::EventBuffer;
use crate::{EngineError, EngineObserver, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::mpsc;
use vigil_hal::{ActionSink, Clock, HalError, SensorChange, SensorHost, SensorId};

#[derive(Default)]
struct EngineState {
    snapshot: Arc<EngineSnapshot>,
    buffers: HashMap<String, EventBuffer>,
    router: DispatchRouter,
    status: bool,
    sabotage: bool,
    last_payload: Option<AlarmPayload>,
    passes: u64,
}

/// Everything one pass computed
#[derive(Debug, Clone)]
pub struct PassOutcome {
    pub timestamp: i64,
    pub trigger: Option<SensorId>,
    /// Overall alarm status (any group active)
    pub status: bool,
    pub classes: Vec<ClassOutcome>,
    pub groups: GroupOutcome,
    pub tamper: TamperOutcome,
    /// Payload dispatched in this pass (alarm or reset)
    pub payload: Option<AlarmPayload>,
    pub dispatch: DispatchReport,
}

impl PassOutcome {
    pub fn class(&self, id: &str) -> Option<&ClassOutcome> {
        self.classes.iter().find(|c| c.class_id == id)
    }
}

/// Sensor → class → group aggregation engine
pub struct AlarmEngine {
    state: Mutex<EngineState>,
    host: Arc<dyn SensorHost>,
    sink: Arc<dyn ActionSink>,
    clock: Arc<dyn Clock>,
    observers: RwLock<Vec<Arc<dyn EngineObserver>>>,
}

impl AlarmEngine {
    /// Create engine and subscribe to every sensor the configuration watches.
    ///
    /// Invalid entries are skipped and logged; see [`EngineConfig::compile`].
    pub fn new(
        config: &EngineConfig,
        host: Arc<dyn SensorHost>,
        sink: Arc<dyn ActionSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (snapshot, issues) = config.compile();
        if !issues.is_empty() {
            tracing::warn!("Engine '{}' loaded with {} configuration issue(s)", snapshot.name, issues.len());
        }

        let engine = Self {
            state: Mutex::new(EngineState::default()),
            host,
            sink,
            clock,
            observers: RwLock::new(Vec::new()),
        };

        engine.watch_all(snapshot.watched_sensors());
        tracing::info!(
            "Engine '{}' ({}) ready: {} classes, {} groups, {} targets",
            snapshot.name,
            snapshot.instance_id,
            snapshot.classes.len(),
            snapshot.groups.len(),
            snapshot.routing.targets().len()
        );

        engine.lock().snapshot = Arc::new(snapshot);
        engine
    }

    pub fn add_observer(&self, observer: Arc<dyn EngineObserver>) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    /// Configuration used by the next pass
    pub fn snapshot(&self) -> Arc<EngineSnapshot> {
        self.lock().snapshot.clone()
    }

    pub fn status(&self) -> bool {
        self.lock().status
    }

    pub fn sabotage(&self) -> bool {
        self.lock().sabotage
    }

    pub fn router_state(&self) -> RouterState {
        self.lock().router.state()
    }

    /// Last dispatched payload (alarm or reset)
    pub fn last_payload(&self) -> Option<AlarmPayload> {
        self.lock().last_payload.clone()
    }

    /// Events currently held in a COUNT class buffer
    pub fn buffered(&self, class_id: &str) -> usize {
        self.lock().buffers.get(class_id).map(EventBuffer::len).unwrap_or(0)
    }

    pub fn passes(&self) -> u64 {
        self.lock().passes
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe to one sensor
    pub fn watch(&self, id: SensorId) -> Result<()> {
        self.host.subscribe(id).map_err(|e| match e {
            HalError::SensorNotFound(id) => EngineError::SensorUnavailable(id),
            other => EngineError::Hal(other),
        })
    }

    fn watch_all(&self, ids: impl IntoIterator<Item = SensorId>) {
        for id in ids {
            if let Err(e) = self.watch(id) {
                tracing::warn!("Cannot watch sensor {}: {}", id, e);
            }
        }
    }

    /// Evaluate a sensor change
    pub fn process_change(&self, change: &SensorChange) -> PassOutcome {
        tracing::debug!(sensor = change.sensor_id, value = %change.value, "Sensor change");
        self.evaluate(Some(change.sensor_id))
    }

    /// Run one full pass. `trigger` is the sensor whose change caused it.
    pub fn evaluate(&self, trigger: Option<SensorId>) -> PassOutcome {
        let host = self.host.as_ref();
        let mut state = self.lock();
        let snapshot = state.snapshot.clone();
        let now = self.clock.now();
        state.passes += 1;

        let mut classes = Vec::with_capacity(snapshot.classes.len());
        let mut class_active = HashMap::with_capacity(snapshot.classes.len());
        for class in &snapshot.classes {
            let rules = snapshot.rules_for(&class.id);
            let outcome = if class.logic == LogicMode::Count {
                let buffer = state.buffers.entry(class.id.clone()).or_default();
                class::evaluate(class, &rules, host, trigger, now, buffer)
            } else {
                class::evaluate(class, &rules, host, trigger, now, &mut EventBuffer::new())
            };
            class_active.insert(class.id.clone(), outcome.active);
            classes.push(outcome);
        }

        let groups = group::evaluate(&snapshot.groups, &class_active);
        let tamper = tamper::evaluate(&snapshot.tamper, host);

        let (payload, dispatch) = if groups.overall_active {
            let payload = build_payload(&snapshot, &classes, &groups, now);
            let report = state.router.deliver_alarm(&snapshot.routing, &payload, self.sink.as_ref());
            (Some(payload), report)
        } else if state.router.is_alarmed() {
            let payload = AlarmPayload::reset(
                snapshot.instance_id,
                &snapshot.name,
                now,
                snapshot.maintenance_mode,
            );
            let report = state.router.deliver_reset(&snapshot.routing, &payload, self.sink.as_ref());
            (Some(payload), report)
        } else {
            (None, DispatchReport::skipped())
        };

        let status_changed = state.status != groups.overall_active;
        let sabotage_changed = state.sabotage != tamper.active;
        state.status = groups.overall_active;
        state.sabotage = tamper.active;
        if let Some(payload) = &payload {
            state.last_payload = Some(payload.clone());
        }
        drop(state);

        tracing::debug!(
            trigger = ?trigger,
            status = groups.overall_active,
            sabotage = tamper.active,
            "Pass done: {} class(es) active, groups {:?}",
            class_active.values().filter(|active| **active).count(),
            groups.active_groups
        );

        let outcome = PassOutcome {
            timestamp: now,
            trigger,
            status: groups.overall_active,
            classes,
            groups,
            tamper,
            payload,
            dispatch,
        };

        self.notify(&outcome, status_changed, sabotage_changed);
        outcome
    }

    fn notify(&self, outcome: &PassOutcome, status_changed: bool, sabotage_changed: bool) {
        let observers = self.observers.read().unwrap_or_else(PoisonError::into_inner);
        for observer in observers.iter() {
            if status_changed {
                observer.on_status_changed(outcome.status);
            }
            if sabotage_changed {
                observer.on_sabotage_changed(outcome.tamper.active, &outcome.tamper.tripped);
            }
            if let Some(payload) = &outcome.payload {
                observer.on_payload(payload, &outcome.dispatch);
            }
        }
    }

    /// Swap in a new configuration and re-evaluate.
    ///
    /// COUNT buffers of classes that are still COUNT classes survive, all
    /// others are dropped. Subscriptions follow the new watched sensor set.
    pub fn reload(&self, config: &EngineConfig) -> Vec<ConfigIssue> {
        let (next, issues) = config.compile();
        let next = Arc::new(next);

        let previous = {
            let mut state = self.lock();
            let previous = std::mem::replace(&mut state.snapshot, next.clone());
            state.buffers.retain(|id, _| {
                next.class(id)
                    .map(|c| c.logic == LogicMode::Count)
                    .unwrap_or(false)
            });
            previous
        };

        let before = previous.watched_sensors();
        let after = next.watched_sensors();
        for id in before.difference(&after) {
            self.host.unsubscribe(*id);
        }
        self.watch_all(after.difference(&before).copied());

        tracing::info!(
            "Engine '{}' reloaded: {} classes, {} groups, {} issue(s)",
            next.name,
            next.classes.len(),
            next.groups.len(),
            issues.len()
        );

        self.evaluate(None);
        issues
    }

    /// Consume sensor changes until the channel closes
    pub async fn run(self: Arc<Self>, mut changes: mpsc::Receiver<SensorChange>) {
        tracing::info!("Engine '{}' listening for sensor changes", self.snapshot().name);

        while let Some(change) = changes.recv().await {
            self.process_change(&change);
        }

        tracing::info!("Sensor change channel closed, engine stopped");
    }
}

/// First active class with trigger details, preferring members of active groups
fn pick_primary<'a>(
    snapshot: &EngineSnapshot,
    classes: &'a [ClassOutcome],
    active_groups: &[String],
) -> Option<&'a ClassOutcome> {
    let grouped = |c: &ClassOutcome| snapshot.is_member_of_any(&c.class_id, active_groups);

    classes
        .iter()
        .filter(|c| c.active && c.trigger.is_some())
        .find(|&c| grouped(c))
        .or_else(|| classes.iter().find(|c| c.active && c.trigger.is_some()))
        .or_else(|| classes.iter().find(|&c| c.active && grouped(c)))
}

fn build_payload(
    snapshot: &EngineSnapshot,
    classes: &[ClassOutcome],
    groups: &GroupOutcome,
    now: i64,
) -> AlarmPayload {
    let class_name = |id: &str| {
        snapshot
            .class(id)
            .map(|c| c.name.clone())
            .unwrap_or_else(|| id.to_string())
    };

    let primary = pick_primary(snapshot, classes, &groups.active_groups);

    AlarmPayload {
        event_id: next_event_id(now),
        timestamp: now,
        source_id: snapshot.instance_id,
        source_name: snapshot.name.clone(),
        primary_class: primary.map(|c| class_name(&c.class_id)).unwrap_or_default(),
        primary_group: groups.primary_group().unwrap_or_default().to_string(),
        active_classes: classes
            .iter()
            .filter(|c| c.active)
            .map(|c| class_name(&c.class_id))
            .collect(),
        active_groups: groups.active_groups.clone(),
        is_maintenance: snapshot.maintenance_mode,
        trigger_details: primary.and_then(|c| c.trigger.clone()),
    }
}
