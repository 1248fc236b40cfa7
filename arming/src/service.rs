//! Arming instance as an actor task
//!
//! One task owns the machine and consumes both action calls and exit-delay
//! expirations, so the active set and presence map have a single writer. The
//! latest [`StateSnapshot`] is published on a watch channel after each input.

use crate::config::ArmingConfig;
use crate::machine::{ArmingStateMachine, Evaluation, StateSnapshot};
use crate::{ArmingError, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use vigil_hal::action::RECEIVE_PAYLOAD;
use vigil_hal::{ActionCall, Clock, InstanceRegistry, TimerExpired, TokioTimer};

pub struct ArmingService {
    machine: ArmingStateMachine<TokioTimer>,
    inbox: mpsc::Receiver<ActionCall>,
    expired: mpsc::UnboundedReceiver<TimerExpired>,
    snapshot_tx: watch::Sender<StateSnapshot>,
}

impl ArmingService {
    pub fn new(
        config: ArmingConfig,
        inbox: mpsc::Receiver<ActionCall>,
        clock: Arc<dyn Clock>,
    ) -> (Self, watch::Receiver<StateSnapshot>) {
        let (timer, expired) = TokioTimer::new();
        let machine = ArmingStateMachine::new(config, timer, clock);
        let (snapshot_tx, snapshot_rx) = watch::channel(machine.snapshot());

        (Self {
            machine,
            inbox,
            expired,
            snapshot_tx,
        }, snapshot_rx)
    }

    /// Register the instance on the registry and build its service
    pub fn register(
        config: ArmingConfig,
        registry: &InstanceRegistry,
        clock: Arc<dyn Clock>,
    ) -> (Self, watch::Receiver<StateSnapshot>) {
        let inbox = registry.register(config.instance_id, &[RECEIVE_PAYLOAD]);
        Self::new(config, inbox, clock)
    }

    pub fn machine(&self) -> &ArmingStateMachine<TokioTimer> {
        &self.machine
    }

    /// Dispatch one action call to the machine
    pub fn handle_call(&mut self, call: &ActionCall) -> Result<Option<Evaluation>> {
        if call.action != RECEIVE_PAYLOAD {
            return Err(ArmingError::UnsupportedAction(call.action.clone()));
        }
        let evaluation = self.machine.receive_payload(&call.payload);
        self.publish();
        Ok(evaluation)
    }

    fn handle_expiry(&mut self, expired: TimerExpired) {
        if !self.machine.timer().is_current(&expired) {
            tracing::debug!(
                instance = self.machine.config().instance_id,
                generation = expired.generation,
                "Ignoring stale timer expiry"
            );
            return;
        }
        self.machine.handle_timer();
        self.publish();
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.machine.snapshot());
    }

    /// Run until the inbox closes
    pub async fn run(mut self) {
        let instance = self.machine.config().instance_id;
        tracing::info!(instance, "Arming service '{}' running", self.machine.config().name);

        loop {
            tokio::select! {
                call = self.inbox.recv() => {
                    let Some(call) = call else {
                        break;
                    };
                    if let Err(e) = self.handle_call(&call) {
                        tracing::warn!(instance, "Action rejected: {}", e);
                    }
                }
                Some(expired) = self.expired.recv() => {
                    self.handle_expiry(expired);
                }
            }
        }

        tracing::info!(instance, "Inbox closed, arming service stopped");
    }
}
