//! Vigil Alarm Aggregation Engine
//!
//! Turns sensor changes into alarm events through two tiers:
//! sensor rules are bundled into classes (OR / AND / time-windowed COUNT),
//! classes are bundled into groups (OR / AND). When any group is active an
//! enriched [`AlarmPayload`] is delivered to the consumers bound to the active
//! groups; when the last group clears, one reset payload goes out.
//!
//! A tamper list is evaluated alongside and published as a separate
//! sabotage flag.

pub mod class;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod group;
pub mod journal;
pub mod payload;
pub mod rule;
pub mod tamper;
pub mod window;

pub use config::{ConfigIssue, EngineConfig, EngineSnapshot};
pub use dispatch::{DispatchReport, DispatchRouter, RoutingTable};
pub use engine::{AlarmEngine, PassOutcome};
pub use journal::{EventJournal, JournalSession};
pub use payload::{AlarmPayload, TriggerDetails};

use vigil_hal::{HalError, SensorId};

/// Engine-wide observer
///
/// Observers are called after a pass has completed, outside the engine lock.
pub trait EngineObserver: Send + Sync {
    /// Called for every payload that was dispatched (alarm or reset)
    fn on_payload(&self, payload: &AlarmPayload, report: &DispatchReport);

    /// Called when the overall alarm status flips
    fn on_status_changed(&self, active: bool);

    /// Called when the sabotage flag flips
    fn on_sabotage_changed(&self, active: bool, tripped: &[SensorId]) {
        let _ = (active, tripped);
    }
}

/// Simple logging observer
pub struct LoggingObserver;

impl EngineObserver for LoggingObserver {
    fn on_payload(&self, payload: &AlarmPayload, report: &DispatchReport) {
        if payload.is_reset() {
            tracing::info!(
                event = %payload.event_id,
                "Reset sent to {} target(s)", report.delivered.len()
            );
            return;
        }

        let label = payload
            .trigger_details
            .as_ref()
            .map(|t| t.smart_label.as_str())
            .unwrap_or("-");
        tracing::info!(
            event = %payload.event_id,
            group = %payload.primary_group,
            "Alarm: {} / {} ({}), {} delivered, {} failed",
            payload.primary_group,
            payload.primary_class,
            label,
            report.delivered.len(),
            report.failed.len()
        );
    }

    fn on_status_changed(&self, active: bool) {
        if active {
            tracing::warn!("Alarm status raised");
        } else {
            tracing::info!("Alarm status cleared");
        }
    }

    fn on_sabotage_changed(&self, active: bool, tripped: &[SensorId]) {
        if active {
            tracing::warn!("Sabotage detected on sensors {:?}", tripped);
        } else {
            tracing::info!("Sabotage cleared");
        }
    }
}

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("HAL error: {0}")]
    Hal(#[from] HalError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Sensor unavailable: {0}")]
    SensorUnavailable(SensorId),

    #[error("Dispatch error: {0}")]
    Dispatch(String),

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Journal error: {0}")]
    Journal(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
