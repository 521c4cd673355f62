use super::{PollFuture, PollResult, SubsystemAdapter, SubsystemId};
use crate::bus::MetricSample;
use std::time::Duration;

const AMBIENT_TEMP_C: f32 = 32.0;
const INFERENCE_HEAT_C: f32 = 18.0;

/// Simulated vision pipeline adapter. The heaviest CPU consumer on the rig;
/// its inference stage is also the most likely to stall, which is exactly
/// what the watchdog scenario exercises.
#[derive(Debug)]
pub struct VisionAdapter {
    temp_c: f32,
    inference_load: f32,
    frames_processed: u64,
    fault_latched: bool,
    poll_delay: Duration,
    last_poll_ms: u64,
}

impl VisionAdapter {
    pub fn new() -> Self {
        Self {
            temp_c: AMBIENT_TEMP_C + 8.0,
            inference_load: 0.6,
            frames_processed: 0,
            fault_latched: false,
            poll_delay: Duration::ZERO,
            last_poll_ms: 0,
        }
    }

    /// Artificial poll latency; a long delay models a hung inference stage.
    pub fn set_poll_delay(&mut self, delay: Duration) {
        self.poll_delay = delay;
    }

    pub fn set_inference_load(&mut self, load: f32) {
        self.inference_load = load.clamp(0.0, 1.0);
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    fn step(&mut self, now_ms: u64) {
        let dt_s = (now_ms.saturating_sub(self.last_poll_ms)) as f32 / 1000.0;
        self.last_poll_ms = now_ms;
        self.frames_processed += 1;
        let target = AMBIENT_TEMP_C + self.inference_load * INFERENCE_HEAT_C;
        self.temp_c += (target - self.temp_c) * (0.06 * dt_s).min(1.0);
    }
}

impl Default for VisionAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl SubsystemAdapter for VisionAdapter {
    fn subsystem(&self) -> SubsystemId {
        SubsystemId::Vision
    }

    fn poll(&mut self, now_ms: u64) -> PollFuture<'_> {
        self.step(now_ms);
        let delay = self.poll_delay;
        let fault = self.fault_latched;
        let temp_c = self.temp_c;
        let load = self.inference_load;
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            PollResult {
                sample: MetricSample {
                    subsystem: SubsystemId::Vision,
                    timestamp_ms: now_ms,
                    temperature_c: temp_c,
                    cpu_percent: (30.0 + load * 55.0) as u8,
                    memory_percent: 52,
                    latency_ms: 2.0 + load * 6.0,
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
