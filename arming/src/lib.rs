//! Vigil Arming State Machine
//!
//! Consumes alarm payloads, keeps the set of active sensors and the presence
//! map, folds them into a 7-bit mask and looks the mask up in a sparse
//! decision table to get the target [`SystemState`]. One designated state
//! (the exit delay) runs a single-shot timer; its expiry re-evaluates.
//!
//! ```text
//! payload ─► active set / presence ─► Bitmask ─► DecisionTable ─► SystemState
//!                                        ▲                            │
//!                                        └──── timer bit, armed bit ◄─┘
//! ```

pub mod bitmask;
pub mod config;
pub mod decision;
pub mod inbound;
pub mod machine;
pub mod service;
pub mod state;

pub use bitmask::{Bit, Bitmask, SensorMapping, SensorRole};
pub use config::{ArmingConfig, IllogicalPolicy};
pub use decision::{Decision, DecisionTable};
pub use inbound::{InboundPayload, RoomPresence};
pub use machine::{Analysis, AnalysisRow, ArmingStateMachine, Evaluation, LastPayload, StateSnapshot, TimerAction};
pub use service::ArmingService;
pub use state::SystemState;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum ArmingError {
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Unknown state id: {0}")]
    UnknownState(i64),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unsupported action: {0}")]
    UnsupportedAction(String),
}

pub type Result<T> = std::result::Result<T, ArmingError>;
