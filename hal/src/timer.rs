//! Single-shot cancellable timers
//!
//! Starting a running timer and stopping an idle one are both no-ops. A timer
//! stays "running" after its deadline until the owner handles the expiry and
//! calls [`TimerControl::stop`], mirroring hosts where the interval remains
//! set until the timer callback clears it.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Control surface of a single-shot timer
pub trait TimerControl: Send {
    /// Arm the timer, returns `false` if it was already running
    fn start(&mut self, duration: Duration) -> bool;

    /// Cancel the timer, returns `false` if it was not running
    fn stop(&mut self) -> bool;

    fn is_running(&self) -> bool;

    /// Configured duration of the current run
    fn interval(&self) -> Option<Duration>;
}

/// Expiry notification from a [`TokioTimer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerExpired {
    pub generation: u64,
}

/// Timer backed by a tokio task
///
/// Expiries are sent on the channel returned by [`TokioTimer::new`]. Each run
/// carries a generation number so an expiry that raced with a cancel can be
/// told apart from the current run.
pub struct TokioTimer {
    expired_tx: mpsc::UnboundedSender<TimerExpired>,
    task: Option<JoinHandle<()>>,
    interval: Option<Duration>,
    started_at: Option<Instant>,
    generation: u64,
}

impl TokioTimer {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerExpired>) {
        let (tx, rx) = mpsc::unbounded_channel();

        (Self {
            expired_tx: tx,
            task: None,
            interval: None,
            started_at: None,
            generation: 0,
        }, rx)
    }

    /// Whether an expiry belongs to the run currently armed
    pub fn is_current(&self, expired: &TimerExpired) -> bool {
        self.is_running() && expired.generation == self.generation
    }

    /// Time left before the current run expires
    pub fn remaining(&self) -> Option<Duration> {
        let started = self.started_at?;
        let interval = self.interval?;
        Some(interval.saturating_sub(started.elapsed()))
    }
}

impl TimerControl for TokioTimer {
    fn start(&mut self, duration: Duration) -> bool {
        if self.is_running() {
            return false;
        }

        self.generation += 1;
        let generation = self.generation;
        let tx = self.expired_tx.clone();

        self.task = Some(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if tx.send(TimerExpired { generation }).is_err() {
                tracing::debug!("Timer owner gone before expiry");
            }
        }));
        self.interval = Some(duration);
        self.started_at = Some(Instant::now());

        true
    }

    fn stop(&mut self) -> bool {
        if !self.is_running() {
            return false;
        }

        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.interval = None;
        self.started_at = None;

        true
    }

    fn is_running(&self) -> bool {
        self.interval.is_some()
    }

    fn interval(&self) -> Option<Duration> {
        self.interval
    }
}

impl Drop for TokioTimer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Timer that never fires on its own, for tests and synchronous embedding
#[derive(Debug, Default, Clone)]
pub struct ManualTimer {
    interval: Option<Duration>,
    starts: Vec<Duration>,
    stops: usize,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Durations of every accepted start, oldest first
    pub fn starts(&self) -> &[Duration] {
        &self.starts
    }

    /// Number of stops that cancelled a running timer
    pub fn stops(&self) -> usize {
        self.stops
    }
}

impl TimerControl for ManualTimer {
    fn start(&mut self, duration: Duration) -> bool {
        if self.interval.is_some() {
            return false;
        }
        self.interval = Some(duration);
        self.starts.push(duration);
        true
    }

    fn stop(&mut self) -> bool {
        if self.interval.take().is_some() {
            self.stops += 1;
            true
        } else {
            false
        }
    }

    fn is_running(&self) -> bool {
        self.interval.is_some()
    }

    fn interval(&self) -> Option<Duration> {
        self.interval
    }
}
