//! Sparse decision table
//!
//! Maps a [`Bitmask`] to the target state. Absent keys mean Disarmed, `-1`
//! marks an illogical combination. The persisted form is an object with
//! decimal-string keys (`{"3": 1}`); a plain list is read as a dense table
//! indexed by bitmask.

use crate::bitmask::Bitmask;
use crate::state::SystemState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Table value marking an illogical combination
pub const ILLOGICAL: i64 = -1;

/// Built-in matrix for a disarmed system (bitmasks 0..64)
const FALLBACK_MATRIX: [i8; 64] = [
    1, -1, 1, 1, 1, -1, 1, 3, 0, -1, 0, 0, 0, -1, 0, 0, // 0-15
    -1, -1, -1, 0, 1, 1, 1, 2, -1, -1, -1, -1, -1, -1, -1, 2, // 16-31
    0, -1, 0, 0, -1, -1, 0, 3, -1, -1, -1, -1, -1, -1, -1, 6, // 32-47
    -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, // 48-63
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Decision {
    Target(SystemState),
    Illogical,
}

impl Decision {
    fn from_id(id: i64) -> Option<Self> {
        if id == ILLOGICAL {
            return Some(Decision::Illogical);
        }
        SystemState::try_from(id).ok().map(Decision::Target)
    }

    pub fn id(self) -> i64 {
        match self {
            Decision::Target(state) => state.id(),
            Decision::Illogical => ILLOGICAL,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Target(state) => write!(f, "{} ({})", state.name(), state.id()),
            Decision::Illogical => f.write_str("Illogical (-1)"),
        }
    }
}

/// Accepted persisted shapes of a [`DecisionTable`]
#[doc(hidden)]
#[derive(Deserialize)]
#[serde(untagged)]
pub enum RawTable {
    Map(BTreeMap<String, i64>),
    List(Vec<i64>),
}

/// Decision table keyed by bitmask
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawTable", into = "BTreeMap<String, i64>")]
pub struct DecisionTable {
    entries: BTreeMap<Bitmask, Decision>,
}

impl DecisionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, mask: Bitmask, decision: Decision) {
        self.entries.insert(mask, decision);
    }

    pub fn with(mut self, bits: u8, decision: Decision) -> Self {
        self.insert(Bitmask::from_bits(bits), decision);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Configured entry, if any
    pub fn get(&self, mask: Bitmask) -> Option<Decision> {
        self.entries.get(&mask).copied()
    }

    /// Lookup with the absent-key default
    pub fn lookup(&self, mask: Bitmask) -> Decision {
        self.get(mask).unwrap_or(Decision::Target(SystemState::Disarmed))
    }

    /// Lookup in the built-in matrix; masks with the armed bit map to Disarmed
    pub fn fallback(mask: Bitmask) -> Decision {
        FALLBACK_MATRIX
            .get(mask.bits() as usize)
            .and_then(|&id| Decision::from_id(id as i64))
            .unwrap_or(Decision::Target(SystemState::Disarmed))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Bitmask, Decision)> + '_ {
        self.entries.iter().map(|(mask, decision)| (*mask, *decision))
    }

    fn push_raw(&mut self, key: &str, id: i64) {
        let mask = match key.trim().parse::<u8>() {
            Ok(bits) if bits < Bitmask::LIMIT => Bitmask::from_bits(bits),
            _ => {
                tracing::warn!("Decision table key '{}' is not a bitmask, entry ignored", key);
                return;
            }
        };

        match Decision::from_id(id) {
            Some(decision) => self.insert(mask, decision),
            None => tracing::warn!("Decision table entry {} -> {}: unknown state, entry ignored", key, id),
        }
    }
}

impl From<RawTable> for DecisionTable {
    fn from(raw: RawTable) -> Self {
        let mut table = DecisionTable::new();
        match raw {
            RawTable::Map(map) => {
                for (key, id) in map {
                    table.push_raw(&key, id);
                }
            }
            RawTable::List(list) => {
                for (index, id) in list.into_iter().enumerate() {
                    table.push_raw(&index.to_string(), id);
                }
            }
        }
        table
    }
}

impl From<DecisionTable> for BTreeMap<String, i64> {
    fn from(table: DecisionTable) -> Self {
        table
            .entries
            .into_iter()
            .map(|(mask, decision)| (mask.bits().to_string(), decision.id()))
            .collect()
    }
}
