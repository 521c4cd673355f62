pub mod audio;
pub mod servo;
pub mod vision;

pub use audio::AudioAdapter;
pub use servo::{ServoAdapter, ServoRail};
pub use vision::VisionAdapter;

use crate::bus::MetricSample;
use crate::interlock::{SafetyState, SafetyStateCell};
use core::future::Future;
use core::pin::Pin;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const SUBSYSTEM_COUNT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubsystemId {
    Servo,
    Audio,
    Vision,
}

impl SubsystemId {
    /// Scheduling order: safety-relevant subsystems come first so the
    /// interlock always evaluates against fresh servo samples.
    pub const ALL: [SubsystemId; SUBSYSTEM_COUNT] =
        [SubsystemId::Servo, SubsystemId::Audio, SubsystemId::Vision];

    pub fn index(self) -> usize {
        match self {
            SubsystemId::Servo => 0,
            SubsystemId::Audio => 1,
            SubsystemId::Vision => 2,
        }
    }

    /// Safety-relevant subsystems trigger an emergency stop on watchdog
    /// timeout; best-effort ones only contribute fault evidence.
    pub fn is_safety_relevant(self) -> bool {
        matches!(self, SubsystemId::Servo)
    }

    pub fn name(self) -> &'static str {
        match self {
            SubsystemId::Servo => "servo",
            SubsystemId::Audio => "audio",
            SubsystemId::Vision => "vision",
        }
    }
}

impl core::fmt::Display for SubsystemId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of one health poll: the sample plus the adapter's own fault flag.
#[derive(Debug, Clone, Copy)]
pub struct PollResult {
    pub sample: MetricSample,
    pub fault: bool,
}

pub type PollFuture<'a> = Pin<Box<dyn Future<Output = PollResult> + Send + 'a>>;

/// Health reporter boundary to a hardware adapter.
///
/// `poll` must normally resolve well within the subsystem's slice; the
/// scheduler abandons it at slice expiry, so a hung adapter costs one slice,
/// never the cycle. The returned future is dropped on abandonment.
pub trait SubsystemAdapter: Send {
    fn subsystem(&self) -> SubsystemId;

    fn poll(&mut self, now_ms: u64) -> PollFuture<'_>;

    /// Latch a fault in the adapter; it stays set until cleared.
    fn inject_fault(&mut self);

    fn clear_faults(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ActuatorCommand {
    /// Joint position target, normalized to [-1.0, 1.0].
    Position { channel: u8, target: f32 },
    /// Velocity-limited sweep across all channels.
    Sweep { rate: f32 },
    /// Hold current posture with drive torque ramped to the safe floor.
    SafeHold,
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("actuator command gated: safety state is {0:?}")]
    Gated(SafetyState),
    #[error("actuator channel {0} out of range")]
    BadChannel(u8),
    #[error("actuator bus unreachable")]
    BusUnreachable,
}

/// Command sink boundary to actuator-capable hardware.
///
/// `send_safe_hold` is idempotent and never increases actuator output; it is
/// the only command the interlock issues on entering an emergency stop.
pub trait ActuatorSink: Send + Sync {
    fn subsystem(&self) -> SubsystemId;

    fn send(&self, command: ActuatorCommand) -> Result<(), SinkError>;

    fn send_safe_hold(&self);
}

/// Gate in front of an actuator sink.
///
/// Motion commands are refused while the safety state reads EmergencyStop,
/// so no code path can move the rig during a stop; safe-hold always passes.
pub struct GatedActuator<S: ActuatorSink> {
    inner: S,
    safety: SafetyStateCell,
}

impl<S: ActuatorSink> GatedActuator<S> {
    pub fn new(inner: S, safety: SafetyStateCell) -> Self {
        Self { inner, safety }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: ActuatorSink> ActuatorSink for GatedActuator<S> {
    fn subsystem(&self) -> SubsystemId {
        self.inner.subsystem()
    }

    fn send(&self, command: ActuatorCommand) -> Result<(), SinkError> {
        if command == ActuatorCommand::SafeHold {
            self.inner.send_safe_hold();
            return Ok(());
        }
        let state = self.safety.get();
        if state == SafetyState::EmergencyStop {
            return Err(SinkError::Gated(state));
        }
        self.inner.send(command)
    }

    fn send_safe_hold(&self) {
        self.inner.send_safe_hold();
    }
}

impl<S: ActuatorSink + ?Sized> ActuatorSink for Arc<S> {
    fn subsystem(&self) -> SubsystemId {
        (**self).subsystem()
    }

    fn send(&self, command: ActuatorCommand) -> Result<(), SinkError> {
        (**self).send(command)
    }

    fn send_safe_hold(&self) {
        (**self).send_safe_hold()
    }
}

pub type SharedSink = Arc<dyn ActuatorSink>;
