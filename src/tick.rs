//! Tick driver: the engine's clock and its periodic maintenance timer.

use crate::engine::ProtocolEngine;

use kcp_core::Timestamp;
use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Millisecond clock starting at session start.
///
/// Built on `tokio::time::Instant` so paused-time tests see virtual time.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    start: Instant,
}

impl Clock {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Milliseconds since start, wrapping at `u32::MAX` like the wire timestamps.
    pub fn now_ms(&self) -> Timestamp {
        self.start.elapsed().as_millis() as Timestamp
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::start()
    }
}

/// Drives `update` + `flush` on the engine.
pub struct TickDriver {
    clock: Clock,
    interval: Interval,
}

impl TickDriver {
    /// Start a driver whose first periodic tick is one `period` from now.
    ///
    /// Missed ticks are skipped rather than burst, so a stalled pump does not
    /// replay a backlog of maintenance passes.
    pub fn new(period: Duration) -> Self {
        let clock = Clock::start();
        let mut interval = tokio::time::interval_at(clock.start + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { clock, interval }
    }

    /// Wait for the next periodic tick. Cancel safe.
    pub async fn tick(&mut self) {
        self.interval.tick().await;
    }

    pub fn now_ms(&self) -> Timestamp {
        self.clock.now_ms()
    }

    /// One maintenance pass at the current time.
    pub fn maintain<E: ProtocolEngine + ?Sized>(&self, engine: &mut E) {
        engine.update(self.clock.now_ms());
        engine.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_clock_follows_tokio_time() {
        let clock = Clock::start();
        assert_eq!(clock.now_ms(), 0);

        tokio::time::advance(Duration::from_millis(250)).await;
        assert_eq!(clock.now_ms(), 250);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_waits_one_period() {
        let mut driver = TickDriver::new(Duration::from_millis(100));
        driver.tick().await;
        assert_eq!(driver.now_ms(), 100);
        driver.tick().await;
        assert_eq!(driver.now_ms(), 200);
    }
}
