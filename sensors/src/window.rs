//! Sliding window counter for COUNT classes

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Timestamps (unix seconds) of qualifying events, oldest first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBuffer {
    timestamps: VecDeque<i64>,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop entries older than `now - window_secs`
    pub fn prune(&mut self, now: i64, window_secs: u64) {
        let window = i64::try_from(window_secs).unwrap_or(i64::MAX);
        let cutoff = now.saturating_sub(window);
        while let Some(&oldest) = self.timestamps.front() {
            if oldest >= cutoff {
                break;
            }
            self.timestamps.pop_front();
        }
    }

    pub fn record(&mut self, now: i64) {
        // keep the buffer ordered even if the clock steps back
        if let Some(&last) = self.timestamps.back() {
            if now < last {
                let pos = self.timestamps.partition_point(|&t| t <= now);
                self.timestamps.insert(pos, now);
                return;
            }
        }
        self.timestamps.push_back(now);
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Whether the buffer holds at least `threshold` events
    pub fn reaches(&self, threshold: u32) -> bool {
        self.timestamps.len() >= threshold as usize
    }

    pub fn clear(&mut self) {
        self.timestamps.clear();
    }

    pub fn timestamps(&self) -> impl Iterator<Item = i64> + '_ {
        self.timestamps.iter().copied()
    }
}
