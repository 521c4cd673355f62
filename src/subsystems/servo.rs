use super::{ActuatorCommand, ActuatorSink, PollFuture, PollResult, SinkError, SubsystemAdapter, SubsystemId};
use crate::bus::MetricSample;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const SERVO_CHANNELS: u8 = 12;
const AMBIENT_TEMP_C: f32 = 28.0;
const HEAT_PER_DUTY_C: f32 = 35.0;
const COOLING_RATE: f32 = 0.08;
/// Torque floor commanded during safe-hold, as a fraction of nominal drive.
const SAFE_HOLD_TORQUE: f32 = 0.05;

#[derive(Debug)]
struct RailState {
    positions: [f32; SERVO_CHANNELS as usize],
    /// Aggregate drive duty over all channels, 0.0..=1.0.
    duty: f32,
    torque_fraction: f32,
    safe_hold_active: bool,
    commands_accepted: u64,
    safe_holds: u64,
}

/// Simulated servo drive rail: the actuator-capable side of the servo
/// subsystem. Shared between the coordinator (command sink) and the servo
/// health adapter (its drive duty feeds the thermal model).
#[derive(Debug)]
pub struct ServoRail {
    state: Mutex<RailState>,
}

impl ServoRail {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RailState {
                positions: [0.0; SERVO_CHANNELS as usize],
                duty: 0.1,
                torque_fraction: 1.0,
                safe_hold_active: false,
                commands_accepted: 0,
                safe_holds: 0,
            }),
        })
    }

    pub fn duty(&self) -> f32 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).duty
    }

    pub fn safe_hold_active(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .safe_hold_active
    }

    pub fn safe_hold_count(&self) -> u64 {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .safe_holds
    }

    pub fn commands_accepted(&self) -> u64 {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .commands_accepted
    }
}

impl ActuatorSink for ServoRail {
    fn subsystem(&self) -> SubsystemId {
        SubsystemId::Servo
    }

    fn send(&self, command: ActuatorCommand) -> Result<(), SinkError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match command {
            ActuatorCommand::Position { channel, target } => {
                if channel >= SERVO_CHANNELS {
                    return Err(SinkError::BadChannel(channel));
                }
                state.positions[channel as usize] = target.clamp(-1.0, 1.0);
                state.duty = (state.duty + 0.15).min(1.0);
            }
            ActuatorCommand::Sweep { rate } => {
                state.duty = rate.abs().clamp(0.0, 1.0);
            }
            ActuatorCommand::SafeHold => {
                drop(state);
                self.send_safe_hold();
                return Ok(());
            }
        }
        state.safe_hold_active = false;
        state.torque_fraction = 1.0;
        state.commands_accepted += 1;
        Ok(())
    }

    /// Idempotent: repeated safe-holds keep the same posture and torque
    /// floor, output never increases.
    fn send_safe_hold(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.torque_fraction = state.torque_fraction.min(SAFE_HOLD_TORQUE);
        state.duty = state.duty.min(SAFE_HOLD_TORQUE);
        state.safe_hold_active = true;
        state.safe_holds += 1;
    }
}

/// Health reporter for the servo rail. Temperature follows drive duty with
/// first-order cooling toward ambient, in the style of a winding-temperature
/// estimate.
#[derive(Debug)]
pub struct ServoAdapter {
    rail: Arc<ServoRail>,
    temp_c: f32,
    fault_latched: bool,
    poll_delay: Duration,
    thermal_offset_c: f32,
    last_poll_ms: u64,
}

impl ServoAdapter {
    pub fn new(rail: Arc<ServoRail>) -> Self {
        Self {
            rail,
            temp_c: AMBIENT_TEMP_C + 10.0,
            fault_latched: false,
            poll_delay: Duration::ZERO,
            thermal_offset_c: 0.0,
            last_poll_ms: 0,
        }
    }

    /// Artificial poll latency, for exercising slice abandonment.
    pub fn set_poll_delay(&mut self, delay: Duration) {
        self.poll_delay = delay;
    }

    /// Additive forcing on the simulated winding temperature, for driving
    /// the governor through its thresholds.
    pub fn set_thermal_offset(&mut self, offset_c: f32) {
        self.thermal_offset_c = offset_c;
    }

    fn step_thermal(&mut self, now_ms: u64) {
        let dt_s = (now_ms.saturating_sub(self.last_poll_ms)) as f32 / 1000.0;
        self.last_poll_ms = now_ms;
        let target = AMBIENT_TEMP_C + self.rail.duty() * HEAT_PER_DUTY_C + self.thermal_offset_c;
        self.temp_c += (target - self.temp_c) * (COOLING_RATE * dt_s).min(1.0);
    }
}

impl SubsystemAdapter for ServoAdapter {
    fn subsystem(&self) -> SubsystemId {
        SubsystemId::Servo
    }

    fn poll(&mut self, now_ms: u64) -> PollFuture<'_> {
        self.step_thermal(now_ms);
        let delay = self.poll_delay;
        let duty = self.rail.duty();
        let temp_c = self.temp_c;
        let fault = self.fault_latched;
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            PollResult {
                sample: MetricSample {
                    subsystem: SubsystemId::Servo,
                    timestamp_ms: now_ms,
                    temperature_c: temp_c,
                    cpu_percent: (10.0 + duty * 30.0) as u8,
                    memory_percent: 18,
                    latency_ms: 0.4 + duty * 0.8,
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_hold_is_idempotent_and_never_raises_output() {
        let rail = ServoRail::new();
        rail.send(ActuatorCommand::Sweep { rate: 0.8 }).unwrap();
        assert!(rail.duty() > 0.5);

        rail.send_safe_hold();
        let duty_after_first = rail.duty();
        rail.send_safe_hold();
        rail.send_safe_hold();
        assert!(rail.duty() <= duty_after_first);
        assert!(rail.safe_hold_active());
        assert_eq!(rail.safe_hold_count(), 3);
    }

    #[test]
    fn bad_channel_is_rejected() {
        let rail = ServoRail::new();
        let err = rail
            .send(ActuatorCommand::Position {
                channel: SERVO_CHANNELS,
                target: 0.5,
            })
            .unwrap_err();
        assert!(matches!(err, SinkError::BadChannel(_)));
    }

    #[tokio::test]
    async fn poll_reflects_latched_fault() {
        let rail = ServoRail::new();
        let mut adapter = ServoAdapter::new(Arc::clone(&rail));
        adapter.inject_fault();
        let poll = adapter.poll(100).await;
        assert!(poll.fault);
        assert!(poll.sample.fault);

        adapter.clear_faults();
        let poll = adapter.poll(200).await;
        assert!(!poll.fault);
    }

    #[tokio::test]
    async fn thermal_offset_drives_temperature_up() {
        let rail = ServoRail::new();
        let mut adapter = ServoAdapter::new(rail);
        adapter.set_thermal_offset(60.0);
        let mut last = 0.0f32;
        for t in 1..=50u64 {
            last = adapter.poll(t * 1000).await.sample.temperature_c;
        }
        assert!(last > 70.0, "temperature {last} should approach the forced target");
    }
}
