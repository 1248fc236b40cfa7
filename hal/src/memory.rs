//! In-memory sensor host
//!
//! Holds sensor values and metadata, and pushes [`SensorChange`]s for
//! subscribed sensors onto a bounded channel. Used by the daemon (fed from
//! stdin) and by tests.

use crate::{HalError, SensorChange, SensorHost, SensorId, SensorInfo, SensorValue};
use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};
use tokio::sync::mpsc;

const CHANGE_CHANNEL_CAPACITY: usize = 1000;

struct SensorSlot {
    info: SensorInfo,
    value: SensorValue,
}

/// Sensor host backed by a map
pub struct MemoryHost {
    sensors: RwLock<HashMap<SensorId, SensorSlot>>,
    subscribed: RwLock<HashSet<SensorId>>,
    change_tx: mpsc::Sender<SensorChange>,
}

impl MemoryHost {
    /// Create new host and the receiver for its change notifications
    ///
    /// There is no `Default`: the host is useless without its receiver.
    #[allow(clippy::new_without_default)]
    pub fn new() -> (Self, mpsc::Receiver<SensorChange>) {
        let (tx, rx) = mpsc::channel(CHANGE_CHANNEL_CAPACITY);

        (Self {
            sensors: RwLock::new(HashMap::new()),
            subscribed: RwLock::new(HashSet::new()),
            change_tx: tx,
        }, rx)
    }

    /// Register (or replace) a sensor
    pub fn register(&self, info: SensorInfo, initial: SensorValue) {
        let mut sensors = self.sensors.write().unwrap_or_else(PoisonError::into_inner);
        sensors.insert(info.id, SensorSlot { info, value: initial });
    }

    /// Remove a sensor; rules referencing it stop matching
    pub fn remove(&self, id: SensorId) -> bool {
        let mut sensors = self.sensors.write().unwrap_or_else(PoisonError::into_inner);
        sensors.remove(&id).is_some()
    }

    /// Update a sensor value and notify if subscribed
    pub fn set_value(&self, id: SensorId, value: SensorValue) -> Result<(), HalError> {
        {
            let mut sensors = self.sensors.write().unwrap_or_else(PoisonError::into_inner);
            let slot = sensors.get_mut(&id).ok_or(HalError::SensorNotFound(id))?;
            slot.value = value.clone();
        }

        if !self.is_subscribed(id) {
            return Ok(());
        }

        let change = SensorChange {
            sensor_id: id,
            value,
            timestamp: chrono::Utc::now().timestamp(),
        };

        match self.change_tx.try_send(change) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Change channel full, dropping change of sensor {}", id);
                Err(HalError::Timeout)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Change channel closed, sensor {} updated silently", id);
                Ok(())
            }
        }
    }

    pub fn is_subscribed(&self, id: SensorId) -> bool {
        self.subscribed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&id)
    }

    /// Ids of all registered sensors
    pub fn sensor_ids(&self) -> Vec<SensorId> {
        let sensors = self.sensors.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<SensorId> = sensors.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl SensorHost for MemoryHost {
    fn read_value(&self, id: SensorId) -> Result<SensorValue, HalError> {
        let sensors = self.sensors.read().unwrap_or_else(PoisonError::into_inner);
        sensors
            .get(&id)
            .map(|slot| slot.value.clone())
            .ok_or(HalError::SensorNotFound(id))
    }

    fn describe(&self, id: SensorId) -> Option<SensorInfo> {
        let sensors = self.sensors.read().unwrap_or_else(PoisonError::into_inner);
        sensors.get(&id).map(|slot| slot.info.clone())
    }

    fn format_value(&self, id: SensorId) -> Result<String, HalError> {
        let sensors = self.sensors.read().unwrap_or_else(PoisonError::into_inner);
        let slot = sensors.get(&id).ok_or(HalError::SensorNotFound(id))?;

        let text = match (&slot.value, &slot.info.unit) {
            (SensorValue::Bool(true), _) => "On".to_string(),
            (SensorValue::Bool(false), _) => "Off".to_string(),
            (value, Some(unit)) => format!("{} {}", value, unit),
            (value, None) => value.to_string(),
        };
        Ok(text)
    }

    fn subscribe(&self, id: SensorId) -> Result<(), HalError> {
        if self.describe(id).is_none() {
            return Err(HalError::SensorNotFound(id));
        }
        self.subscribed
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id);
        Ok(())
    }

    fn unsubscribe(&self, id: SensorId) {
        self.subscribed
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribed_changes_are_delivered() {
        let (host, mut rx) = MemoryHost::new();
        host.register(SensorInfo::new(1, "Door"), SensorValue::Bool(false));
        host.register(SensorInfo::new(2, "Window"), SensorValue::Bool(false));
        host.subscribe(1).unwrap();

        host.set_value(2, SensorValue::Bool(true)).unwrap();
        host.set_value(1, SensorValue::Bool(true)).unwrap();

        let change = rx.recv().await.unwrap();
        assert_eq!(change.sensor_id, 1);
        assert_eq!(change.value, SensorValue::Bool(true));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn unknown_sensors_error() {
        let (host, _rx) = MemoryHost::new();
        assert!(matches!(host.read_value(9), Err(HalError::SensorNotFound(9))));
        assert!(host.subscribe(9).is_err());
        assert!(host.set_value(9, SensorValue::Bool(true)).is_err());
    }

    #[test]
    fn formatted_values_use_units() {
        let (host, _rx) = MemoryHost::new();
        host.register(SensorInfo::new(3, "Temp").with_unit("°C"), SensorValue::Number(21.5));
        host.register(SensorInfo::new(4, "Contact"), SensorValue::Bool(true));
        assert_eq!(host.format_value(3).unwrap(), "21.5 °C");
        assert_eq!(host.format_value(4).unwrap(), "On");
    }
}
