//! Telemetry publisher.
//!
//! Fans the cycle's bus snapshot, safety state, and throttle level out to
//! subscribers over a bounded broadcast channel. Publishing never blocks the
//! control loop: a slow subscriber lags and loses the oldest events instead
//! of stalling safety evaluation.

use crate::bus::{BusSnapshot, MetricSample};
use crate::governor::ThrottleLevel;
use crate::interlock::{SafetyState, StopTrigger};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub const TELEMETRY_CHANNEL_CAPACITY: usize = 256;

/// One structured telemetry event, emitted at cycle cadence (or the
/// configured slower divider).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub cycle_id: u64,
    pub timestamp_ms: u64,
    pub samples: Vec<MetricSample>,
    pub safety_state: SafetyState,
    pub throttle_level: ThrottleLevel,
    pub active_stop: Option<StopTrigger>,
    pub overruns: u64,
}

impl TelemetryEvent {
    pub fn from_cycle(
        cycle_id: u64,
        snapshot: &BusSnapshot,
        safety_state: SafetyState,
        throttle_level: ThrottleLevel,
        active_stop: Option<StopTrigger>,
        overruns: u64,
    ) -> Self {
        Self {
            cycle_id,
            timestamp_ms: snapshot.taken_at_ms,
            samples: snapshot.samples().copied().collect(),
            safety_state,
            throttle_level,
            active_stop,
            overruns,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct PublisherStats {
    pub events_emitted: u64,
    /// Cycles where the cadence divider suppressed the event.
    pub events_suppressed: u64,
    pub subscribers: usize,
}

#[derive(Debug)]
pub struct TelemetryPublisher {
    tx: broadcast::Sender<TelemetryEvent>,
    divider: u32,
    stats: PublisherStats,
}

impl TelemetryPublisher {
    pub fn new(divider: u32) -> Self {
        let (tx, _) = broadcast::channel(TELEMETRY_CHANNEL_CAPACITY);
        Self {
            tx,
            divider: divider.max(1),
            stats: PublisherStats::default(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryEvent> {
        self.tx.subscribe()
    }

    /// Clone of the underlying sender, for handing out subscriptions after
    /// the publisher has moved into the control loop.
    pub fn sender(&self) -> broadcast::Sender<TelemetryEvent> {
        self.tx.clone()
    }

    /// Cadence gate: every `divider`-th cycle publishes; forced events
    /// (stop transitions) always pass.
    pub fn should_publish(&self, cycle_id: u64, forced: bool) -> bool {
        forced || cycle_id % u64::from(self.divider) == 0
    }

    /// Best-effort, non-blocking emit. With no subscribers the event is
    /// simply dropped.
    pub fn publish(&mut self, cycle_id: u64, forced: bool, event: TelemetryEvent) {
        if !self.should_publish(cycle_id, forced) {
            self.stats.events_suppressed += 1;
            return;
        }
        self.stats.subscribers = self.tx.receiver_count();
        if self.tx.send(event).is_ok() {
            self.stats.events_emitted += 1;
        }
    }

    pub fn stats(&self) -> &PublisherStats {
        &self.stats
    }
}
