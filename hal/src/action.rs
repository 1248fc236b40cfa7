//! One-way action invocation between instances
//!
//! Every registered instance gets a bounded inbox. Invocation uses
//! `try_send`, so a slow or stuck consumer never stalls the caller: a full
//! inbox is reported as [`HalError::InstanceBusy`].

use crate::{ActionSink, HalError, InstanceId};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tokio::sync::mpsc;

const DEFAULT_INBOX_CAPACITY: usize = 64;

/// Action through which alarm payloads are handed to consumers
pub const RECEIVE_PAYLOAD: &str = "ReceivePayload";

/// Action delivered to an instance inbox
#[derive(Debug, Clone, PartialEq)]
pub struct ActionCall {
    pub action: String,
    pub payload: String,
}

struct Inbox {
    accepted: Vec<String>,
    tx: mpsc::Sender<ActionCall>,
}

/// Registry of instances reachable through [`ActionSink`]
pub struct InstanceRegistry {
    inboxes: RwLock<HashMap<InstanceId, Inbox>>,
    capacity: usize,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_INBOX_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inboxes: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Register an instance accepting the given actions, returns its inbox
    pub fn register(&self, id: InstanceId, actions: &[&str]) -> mpsc::Receiver<ActionCall> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let inbox = Inbox {
            accepted: actions.iter().map(|a| a.to_string()).collect(),
            tx,
        };

        let mut inboxes = self.inboxes.write().unwrap_or_else(PoisonError::into_inner);
        if inboxes.insert(id, inbox).is_some() {
            tracing::warn!("Instance {} re-registered, previous inbox dropped", id);
        }
        rx
    }

    pub fn unregister(&self, id: InstanceId) -> bool {
        let mut inboxes = self.inboxes.write().unwrap_or_else(PoisonError::into_inner);
        inboxes.remove(&id).is_some()
    }

    pub fn contains(&self, id: InstanceId) -> bool {
        let inboxes = self.inboxes.read().unwrap_or_else(PoisonError::into_inner);
        inboxes.contains_key(&id)
    }
}

impl Default for InstanceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionSink for InstanceRegistry {
    fn invoke_action(&self, target: InstanceId, action: &str, payload: &str) -> Result<(), HalError> {
        let inboxes = self.inboxes.read().unwrap_or_else(PoisonError::into_inner);
        let inbox = inboxes.get(&target).ok_or(HalError::InstanceNotFound(target))?;

        if !inbox.accepted.iter().any(|a| a == action) {
            return Err(HalError::UnsupportedAction {
                target,
                action: action.to_string(),
            });
        }

        let call = ActionCall {
            action: action.to_string(),
            payload: payload.to_string(),
        };

        inbox.tx.try_send(call).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => HalError::InstanceBusy(target),
            mpsc::error::TrySendError::Closed(_) => HalError::InstanceClosed(target),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivers_to_registered_instance() {
        let registry = InstanceRegistry::new();
        let mut rx = registry.register(7, &["ReceivePayload"]);

        registry.invoke_action(7, "ReceivePayload", "{}").unwrap();

        let call = rx.try_recv().unwrap();
        assert_eq!(call.action, "ReceivePayload");
        assert_eq!(call.payload, "{}");
    }

    #[test]
    fn rejects_unknown_targets_and_actions() {
        let registry = InstanceRegistry::new();
        let _rx = registry.register(7, &["ReceivePayload"]);

        assert!(matches!(
            registry.invoke_action(8, "ReceivePayload", "{}"),
            Err(HalError::InstanceNotFound(8))
        ));
        assert!(matches!(
            registry.invoke_action(7, "Reboot", "{}"),
            Err(HalError::UnsupportedAction { target: 7, .. })
        ));
    }

    #[test]
    fn full_inbox_does_not_block() {
        let registry = InstanceRegistry::with_capacity(1);
        let _rx = registry.register(1, &["ReceivePayload"]);

        registry.invoke_action(1, "ReceivePayload", "a").unwrap();
        assert!(matches!(
            registry.invoke_action(1, "ReceivePayload", "b"),
            Err(HalError::InstanceBusy(1))
        ));
    }

    #[test]
    fn dropped_inbox_reports_closed() {
        let registry = InstanceRegistry::new();
        drop(registry.register(1, &["ReceivePayload"]));
        assert!(matches!(
            registry.invoke_action(1, "ReceivePayload", "a"),
            Err(HalError::InstanceClosed(1))
        ));
    }
}
