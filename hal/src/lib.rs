//! Vigil Host Abstraction Layer
//!
//! The primitives the alarm pipeline consumes from its hosting platform:
//! reading and subscribing to sensor variables, invoking actions on other
//! instances, a wall clock and a cancellable single-shot timer.
//!
//! # Modules
//!
//! - [`value`] - typed sensor values (bool / number / text)
//! - [`memory`] - in-memory sensor host with change notifications
//! - [`action`] - instance registry for one-way action invocation
//! - [`clock`] - wall clock abstraction
//! - [`timer`] - single-shot cancellable timers
//!
//! # Example
//!
//! ```rust,no_run
//! use vigil_hal::{MemoryHost, SensorHost, SensorInfo, SensorValue};
//!
//! #[tokio::main]
//! async fn main() {
//!     let (host, mut changes) = MemoryHost::new();
//!     host.register(SensorInfo::new(101, "Front Door Lock"), SensorValue::Bool(false));
//!     host.subscribe(101).unwrap();
//!
//!     host.set_value(101, SensorValue::Bool(true)).unwrap();
//!     while let Some(change) = changes.recv().await {
//!         println!("{} -> {}", change.sensor_id, change.value);
//!     }
//! }
//! ```

use serde::{Deserialize, Serialize};

pub mod action;
pub mod clock;
pub mod memory;
pub mod timer;
pub mod value;

// Re-exports for convenience
pub use action::{ActionCall, InstanceRegistry};
pub use clock::{Clock, ManualClock, SystemClock};
pub use memory::MemoryHost;
pub use timer::{ManualTimer, TimerControl, TimerExpired, TokioTimer};
pub use value::SensorValue;

/// Host variable identifier
pub type SensorId = u32;

/// Host instance identifier (a component that accepts actions)
pub type InstanceId = u32;

/// Read access to the host's sensor variables
pub trait SensorHost: Send + Sync {
    /// Current value of a sensor
    fn read_value(&self, id: SensorId) -> Result<SensorValue, HalError>;

    /// Naming metadata for a sensor
    fn describe(&self, id: SensorId) -> Option<SensorInfo>;

    /// Human formatted value (unit, profile text)
    fn format_value(&self, id: SensorId) -> Result<String, HalError> {
        self.read_value(id).map(|v| v.to_string())
    }

    /// Deliver changes of this sensor on the host's change channel
    fn subscribe(&self, id: SensorId) -> Result<(), HalError>;

    /// Stop delivering changes of this sensor
    fn unsubscribe(&self, id: SensorId);
}

/// One-way action invocation on another instance
pub trait ActionSink: Send + Sync {
    /// Fire-and-forget: returns once the call is queued, never waits for the target
    fn invoke_action(&self, target: InstanceId, action: &str, payload: &str) -> Result<(), HalError>;
}

/// Naming metadata of a sensor variable
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorInfo {
    pub id: SensorId,
    pub name: String,
    /// Enclosing object, usually the device or room
    #[serde(default)]
    pub parent_name: String,
    /// Object above the parent, usually the floor or area
    #[serde(default)]
    pub grandparent_name: String,
    /// Optional unit suffix used for formatted values
    #[serde(default)]
    pub unit: Option<String>,
}

impl SensorInfo {
    pub fn new(id: SensorId, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_location(mut self, parent: &str, grandparent: &str) -> Self {
        self.parent_name = parent.to_string();
        self.grandparent_name = grandparent.to_string();
        self
    }

    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }
}

/// Change notification for a subscribed sensor
#[derive(Debug, Clone, PartialEq)]
pub struct SensorChange {
    pub sensor_id: SensorId,
    pub value: SensorValue,
    /// Unix seconds
    pub timestamp: i64,
}

/// HAL Error types
#[derive(Debug, thiserror::Error)]
pub enum HalError {
    #[error("Sensor not found: {0}")]
    SensorNotFound(SensorId),

    #[error("Instance not found: {0}")]
    InstanceNotFound(InstanceId),

    #[error("Instance {target} does not accept action '{action}'")]
    UnsupportedAction { target: InstanceId, action: String },

    #[error("Instance busy: {0}")]
    InstanceBusy(InstanceId),

    #[error("Instance closed: {0}")]
    InstanceClosed(InstanceId),

    #[error("Timeout")]
    Timeout,

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
