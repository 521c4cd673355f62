//! Safety interlock.
//!
//! The one authoritative safety state machine. It consumes the governor's
//! throttle level, per-subsystem fault evidence, and explicit stop triggers,
//! and owns the only write path to the process-wide safety state. External
//! readers see whole-value snapshots through [`SafetyStateCell`]; evaluation
//! is synchronous, allocation-free, and never suspends.

use crate::governor::ThrottleLevel;
use crate::subsystems::{SubsystemId, SUBSYSTEM_COUNT};
use heapless::Vec;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

const MAX_STOP_RECORDS: usize = 16;
const MAX_PENDING_TRIGGERS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum SafetyState {
    Normal = 0,
    Warning = 1,
    Throttled = 2,
    EmergencyStop = 3,
    Recovering = 4,
}

impl SafetyState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => SafetyState::Warning,
            2 => SafetyState::Throttled,
            3 => SafetyState::EmergencyStop,
            4 => SafetyState::Recovering,
            _ => SafetyState::Normal,
        }
    }
}

/// Lock-free read handle to the safety state.
///
/// Written only by the interlock; everyone else reads an atomic whole-value
/// snapshot. Clones share the same cell.
#[derive(Debug, Clone)]
pub struct SafetyStateCell(Arc<AtomicU8>);

impl SafetyStateCell {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(SafetyState::Normal as u8)))
    }

    pub fn get(&self) -> SafetyState {
        SafetyState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: SafetyState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Latched manual-stop request from the operator control surface.
///
/// Set from any thread the moment a stop command arrives; the scheduler
/// peeks it between slices to abandon the rest of the cycle, and the
/// coordinator consumes it at the next interlock evaluation.
#[derive(Debug, Clone, Default)]
pub struct ManualStopFlag(Arc<std::sync::atomic::AtomicBool>);

impl ManualStopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Consume the request, returning whether it was raised.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

/// Cause of an emergency stop.
///
/// `WatchdogTimeout(None)` means the control loop itself missed its deadline
/// past the escalation threshold; `Some(id)` names the silent subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopTrigger {
    ManualStop,
    ThermalCritical,
    SubsystemFault(SubsystemId),
    WatchdogTimeout(Option<SubsystemId>),
}

/// Audit entry: a stop trigger and when it fired.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StopRecord {
    pub trigger: StopTrigger,
    pub timestamp_ms: u64,
}

/// Everything the interlock looks at for one cycle. All fields are drawn
/// from the same bus snapshot; the coordinator never mixes cycles.
#[derive(Debug, Clone, Default)]
pub struct InterlockInputs {
    pub now_ms: u64,
    pub throttle: ThrottleLevel,
    /// Hottest fresh temperature this cycle, if any subsystem reported one.
    pub hottest_temp_c: Option<f32>,
    /// Per-subsystem fault evidence: adapter fault flags plus best-effort
    /// watchdog timeouts.
    pub fault_flags: [bool; SUBSYSTEM_COUNT],
    /// Externally raised stop triggers (manual stop, safety-relevant
    /// watchdog, overrun escalation).
    pub stop_triggers: Vec<StopTrigger, MAX_PENDING_TRIGGERS>,
    pub reset_requested: bool,
}

/// Outcome of one interlock evaluation.
#[derive(Debug, Clone, Copy)]
pub struct SafetyDecision {
    pub state: SafetyState,
    /// True exactly when this evaluation entered EmergencyStop; the caller
    /// must issue safe-hold to every actuator sink before running any slice.
    pub entered_stop: bool,
    pub active_trigger: Option<StopTrigger>,
}

#[derive(Debug)]
pub struct SafetyInterlock {
    state: SafetyState,
    cell: SafetyStateCell,

    debounce_ms: u64,
    critical_hold_ms: u64,
    temp_critical_c: f32,
    temp_clear_c: f32,

    /// First cycle at which the current run of fault evidence was seen.
    fault_since_ms: Option<u64>,
    /// First cycle of the current run of critical-temperature readings.
    critical_since_ms: Option<u64>,
    /// The current critical episode has already fired its stop; cleared when
    /// the temperature drops back under the critical threshold.
    thermal_stop_fired: bool,

    active_trigger: Option<StopTrigger>,
    stop_log: Vec<StopRecord, MAX_STOP_RECORDS>,
    stop_entry_count: u32,
}

impl SafetyInterlock {
    pub fn new(config: &crate::config::CoordinatorConfig) -> Self {
        Self {
            state: SafetyState::Normal,
            cell: SafetyStateCell::new(),
            debounce_ms: config.debounce_ms,
            critical_hold_ms: config.critical_hold_ms,
            temp_critical_c: config.temp_critical_rise_c,
            // Recovery requires the temperature back under the warn falling
            // threshold, the stricter of the two bands.
            temp_clear_c: config.temp_warn_fall_c,
            fault_since_ms: None,
            critical_since_ms: None,
            thermal_stop_fired: false,
            active_trigger: None,
            stop_log: Vec::new(),
            stop_entry_count: 0,
        }
    }

    pub fn state(&self) -> SafetyState {
        self.state
    }

    /// Read handle for components outside the interlock. They never write.
    pub fn state_cell(&self) -> SafetyStateCell {
        self.cell.clone()
    }

    pub fn active_trigger(&self) -> Option<StopTrigger> {
        self.active_trigger
    }

    pub fn stop_log(&self) -> &[StopRecord] {
        &self.stop_log
    }

    pub fn stop_entry_count(&self) -> u32 {
        self.stop_entry_count
    }

    pub fn evaluate(&mut self, inputs: &InterlockInputs) -> SafetyDecision {
        let now_ms = inputs.now_ms;
        let any_fault = inputs.fault_flags.iter().any(|&f| f);

        // Debounce bookkeeping: remember when the current run of fault
        // evidence started, reset when it clears.
        if any_fault {
            self.fault_since_ms.get_or_insert(now_ms);
        } else {
            self.fault_since_ms = None;
        }
        // The hold clock runs on the temperature itself, not the throttle
        // level: the governor's cool-down pins the level at Critical long
        // after a brief spike has passed.
        let temp_critical = inputs
            .hottest_temp_c
            .map_or(false, |t| t >= self.temp_critical_c);
        if temp_critical {
            self.critical_since_ms.get_or_insert(now_ms);
        } else {
            self.critical_since_ms = None;
            self.thermal_stop_fired = false;
        }

        // Collect stop triggers for this cycle. ThermalCritical is raised
        // here once the temperature has stayed critical past the hold time.
        let mut triggers: Vec<StopTrigger, MAX_PENDING_TRIGGERS> = Vec::new();
        for trigger in &inputs.stop_triggers {
            let _ = triggers.push(*trigger);
        }
        if let Some(since) = self.critical_since_ms {
            // One audited stop per critical episode, however long it lasts.
            if !self.thermal_stop_fired && now_ms.saturating_sub(since) >= self.critical_hold_ms {
                let _ = triggers.push(StopTrigger::ThermalCritical);
                self.thermal_stop_fired = true;
            }
        }

        let mut entered_stop = false;

        if !triggers.is_empty() {
            for trigger in &triggers {
                self.record_stop(*trigger, now_ms);
            }
            if self.state != SafetyState::EmergencyStop {
                // Unconditional from any state.
                self.transition(SafetyState::EmergencyStop, now_ms);
                self.active_trigger = Some(triggers[0]);
                self.stop_entry_count = self.stop_entry_count.saturating_add(1);
                entered_stop = true;
            }
            return self.decision(entered_stop);
        }

        match self.state {
            SafetyState::EmergencyStop => {
                let temp_clear = inputs
                    .hottest_temp_c
                    .map_or(false, |t| t < self.temp_clear_c);
                if inputs.reset_requested && !any_fault && temp_clear {
                    self.transition(SafetyState::Recovering, now_ms);
                }
                // Reset with faults present or temperature still high is
                // ignored; the operator must retry once conditions clear.
            }
            SafetyState::Recovering => {
                if any_fault {
                    // No partial trust during recovery.
                    let faulted = first_faulted(&inputs.fault_flags);
                    let trigger = StopTrigger::SubsystemFault(faulted);
                    self.record_stop(trigger, now_ms);
                    self.transition(SafetyState::EmergencyStop, now_ms);
                    self.active_trigger = Some(trigger);
                    self.stop_entry_count = self.stop_entry_count.saturating_add(1);
                    entered_stop = true;
                } else {
                    // One full clean cycle completed.
                    self.active_trigger = None;
                    self.transition(SafetyState::Normal, now_ms);
                }
            }
            SafetyState::Normal | SafetyState::Warning | SafetyState::Throttled => {
                self.evaluate_graded(inputs, any_fault, now_ms);
            }
        }

        self.decision(entered_stop)
    }

    /// Escalation/de-escalation across Normal/Warning/Throttled. Escalation
    /// cascades within one call so an over-critical reading reaches
    /// Throttled in the same cycle it is observed.
    fn evaluate_graded(&mut self, inputs: &InterlockInputs, any_fault: bool, now_ms: u64) {
        if self.state == SafetyState::Normal
            && (any_fault || inputs.throttle >= ThrottleLevel::Reduced)
        {
            self.transition(SafetyState::Warning, now_ms);
        }

        if self.state == SafetyState::Warning {
            let debounced_fault = self
                .fault_since_ms
                .map_or(false, |since| now_ms.saturating_sub(since) >= self.debounce_ms);
            if inputs.throttle == ThrottleLevel::Critical || debounced_fault {
                self.transition(SafetyState::Throttled, now_ms);
            } else if !any_fault && inputs.throttle == ThrottleLevel::Normal {
                self.transition(SafetyState::Normal, now_ms);
            }
        } else if self.state == SafetyState::Throttled
            && !any_fault
            && inputs.throttle == ThrottleLevel::Normal
        {
            // De-escalate one level per cycle; the governor's cool-down
            // keeps us here while it still reports Critical.
            self.transition(SafetyState::Warning, now_ms);
        }
    }

    fn transition(&mut self, next: SafetyState, now_ms: u64) {
        if next == self.state {
            return;
        }
        if next == SafetyState::EmergencyStop {
            warn!(
                from = ?self.state,
                at_ms = now_ms,
                "entering emergency stop"
            );
        } else {
            info!(from = ?self.state, to = ?next, at_ms = now_ms, "safety transition");
        }
        self.state = next;
        self.cell.set(next);
    }

    fn record_stop(&mut self, trigger: StopTrigger, timestamp_ms: u64) {
        if self.stop_log.is_full() {
            self.stop_log.remove(0);
        }
        let _ = self.stop_log.push(StopRecord {
            trigger,
            timestamp_ms,
        });
    }

    fn decision(&self, entered_stop: bool) -> SafetyDecision {
        SafetyDecision {
            state: self.state,
            entered_stop,
            active_trigger: self.active_trigger,
        }
    }
}

fn first_faulted(flags: &[bool; SUBSYSTEM_COUNT]) -> SubsystemId {
    for id in SubsystemId::ALL {
        if flags[id.index()] {
            return id;
        }
    }
    // Callers only reach this with at least one flag set.
    SubsystemId::Servo
}
