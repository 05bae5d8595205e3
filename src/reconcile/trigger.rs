use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};

/// Decides when the next reconciliation cycle starts
#[async_trait]
pub trait Trigger: Send {
    /// Wait for the next cycle. `false` means no cycle will ever come again.
    async fn fire(&mut self) -> bool;
}

/// Shortest period an [`IntervalTrigger`] accepts
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Fixed-period trigger. The first cycle starts after one full period.
pub struct IntervalTrigger {
    interval: Interval,
}

impl IntervalTrigger {
    /// Periods below [`MIN_PERIOD`] are raised to it.
    pub fn new(period: Duration) -> Self {
        let period = period.max(MIN_PERIOD);
        let start = tokio::time::Instant::now() + period;
        let mut interval = tokio::time::interval_at(start, period);
        // A slow cycle must not be followed by a burst of catch-up cycles
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }
}

#[async_trait]
impl Trigger for IntervalTrigger {
    async fn fire(&mut self) -> bool {
        self.interval.tick().await;
        true
    }
}

/// Manual trigger: each message starts a cycle, closing the sender ends the loop
#[async_trait]
impl Trigger for mpsc::Receiver<()> {
    async fn fire(&mut self) -> bool {
        self.recv().await.is_some()
    }
}
