use super::{PollFuture, PollResult, SubsystemAdapter, SubsystemId};
use crate::bus::MetricSample;
use std::time::Duration;

const AMBIENT_TEMP_C: f32 = 30.0;
const UNDERRUN_LATENCY_PENALTY_MS: f32 = 4.0;

/// Simulated audio pipeline adapter. Best-effort: a stall here degrades the
/// show, not safety, so its slice is the first to shrink under throttle.
#[derive(Debug)]
pub struct AudioAdapter {
    temp_c: f32,
    buffer_fill: f32,
    underruns: u32,
    fault_latched: bool,
    poll_delay: Duration,
    last_poll_ms: u64,
}

impl AudioAdapter {
    pub fn new() -> Self {
        Self {
            temp_c: AMBIENT_TEMP_C + 4.0,
            buffer_fill: 0.9,
            underruns: 0,
            fault_latched: false,
            poll_delay: Duration::ZERO,
            last_poll_ms: 0,
        }
    }

    pub fn set_poll_delay(&mut self, delay: Duration) {
        self.poll_delay = delay;
    }

    pub fn underruns(&self) -> u32 {
        self.underruns
    }

    fn step(&mut self, now_ms: u64) {
        let dt_s = (now_ms.saturating_sub(self.last_poll_ms)) as f32 / 1000.0;
        self.last_poll_ms = now_ms;

        // Playback drains the ring buffer; the decode thread refills it.
        // Slight net drain plus a periodic refill keeps fill oscillating in
        // a believable band.
        self.buffer_fill -= 0.15 * dt_s;
        if self.buffer_fill < 0.3 {
            self.buffer_fill = 0.85;
        }
        if self.buffer_fill <= 0.0 {
            self.buffer_fill = 0.0;
            self.underruns += 1;
        }
        self.temp_c += (AMBIENT_TEMP_C + 6.0 - self.temp_c) * (0.05 * dt_s).min(1.0);
    }
}

impl Default for AudioAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl SubsystemAdapter for AudioAdapter {
    fn subsystem(&self) -> SubsystemId {
        SubsystemId::Audio
    }

    fn poll(&mut self, now_ms: u64) -> PollFuture<'_> {
        self.step(now_ms);
        let delay = self.poll_delay;
        let fault = self.fault_latched || self.buffer_fill == 0.0;
        let latency_ms = 1.2
            + if self.buffer_fill < 0.2 {
                UNDERRUN_LATENCY_PENALTY_MS
            } else {
                0.0
            };
        let temp_c = self.temp_c;
        let buffer_fill = self.buffer_fill;
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            PollResult {
                sample: MetricSample {
                    subsystem: SubsystemId::Audio,
                    timestamp_ms: now_ms,
                    temperature_c: temp_c,
                    cpu_percent: (8.0 + (1.0 - buffer_fill) * 20.0) as u8,
                    memory_percent: 40,
                    latency_ms,
                    fault,
                },
                fault,
            }
        })
    }

    fn inject_fault(&mut self) {
        self.fault_latched = true;
    }

    fn clear_faults(&mut self) {
        self.fault_latched = false;
    }
}
