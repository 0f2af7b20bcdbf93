// ABOUTME: Injectable poll cadence for every loop in the control-plane
// ABOUTME: IntervalTicker sleeps on wall clock, ManualTicker makes tests instant

use async_trait::async_trait;
use std::time::Duration;

/// One tick of a polling loop. All cross-agent visibility is polling-based,
/// so every consumer loop takes a ticker instead of sleeping directly; tests
/// inject [`ManualTicker`] and never wait on wall clock.
#[async_trait]
pub trait Ticker: Send {
    async fn tick(&mut self);
}

/// Production ticker backed by `tokio::time::interval`.
pub struct IntervalTicker {
    interval: tokio::time::Interval,
}

impl IntervalTicker {
    pub fn every(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        Self { interval }
    }
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) {
        self.interval.tick().await;
    }
}

/// Test ticker: returns immediately and counts invocations.
#[derive(Default)]
pub struct ManualTicker {
    ticks: u64,
}

impl ManualTicker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

#[async_trait]
impl Ticker for ManualTicker {
    async fn tick(&mut self) {
        self.ticks += 1;
    }
}
