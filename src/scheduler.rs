//! Subsystem slice scheduler.
//!
//! Each control cycle grants every subsystem a bounded slice for its poll
//! step, safety-relevant subsystems first. A step that outlives its slice is
//! abandoned (future dropped, bus slot marked stale) and the cycle moves on;
//! one hung adapter can never stall the loop. Total cycle time is bounded by
//! a hard deadline, and repeated overruns escalate to the interlock.

use crate::bus::SampleBus;
use crate::config::CoordinatorConfig;
use crate::interlock::ManualStopFlag;
use crate::subsystems::{SubsystemAdapter, SubsystemId, SUBSYSTEM_COUNT};
use heapless::Vec;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// One subsystem's time budget for one cycle. Created fresh each cycle.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleSlot {
    pub subsystem: SubsystemId,
    pub allotted: Duration,
    pub deadline: Instant,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct SchedulerStats {
    pub cycles_run: u64,
    pub slices_abandoned: u64,
    pub overruns: u64,
    pub consecutive_overruns: u32,
}

/// What happened to each subsystem in one cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub cycle_id: u64,
    pub completed: Vec<SubsystemId, SUBSYSTEM_COUNT>,
    pub abandoned: Vec<SubsystemId, SUBSYSTEM_COUNT>,
    /// Slices that never ran: cancelled on a stop-entry cycle or by a
    /// mid-cycle manual stop.
    pub skipped: Vec<SubsystemId, SUBSYSTEM_COUNT>,
    /// A manual stop was observed between slices and the cycle was cut
    /// short.
    pub interrupted: bool,
    pub overrun: bool,
    /// Consecutive overruns crossed the escalation threshold this cycle.
    pub overrun_escalation: bool,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub struct CycleScheduler {
    base_slices: [Duration; SUBSYSTEM_COUNT],
    servo_min_slice: Duration,
    cycle_deadline: Duration,
    overrun_threshold: u32,
    stats: SchedulerStats,
}

impl CycleScheduler {
    pub fn new(config: &CoordinatorConfig) -> Self {
        let mut base_slices = [Duration::ZERO; SUBSYSTEM_COUNT];
        for id in SubsystemId::ALL {
            base_slices[id.index()] = Duration::from_millis(config.budget(id).slice_ms);
        }
        Self {
            base_slices,
            servo_min_slice: Duration::from_millis(config.servo_min_slice_ms),
            cycle_deadline: Duration::from_millis(config.cycle_deadline_ms),
            overrun_threshold: config.overrun_escalation_threshold,
            stats: SchedulerStats::default(),
        }
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    /// Slice for one subsystem under the current power budget. Best-effort
    /// slices shrink first; the safety-relevant slice has a hard floor.
    fn scaled_slice(&self, id: SubsystemId, power_budget: f32) -> Duration {
        let base = self.base_slices[id.index()];
        if id.is_safety_relevant() {
            base.max(self.servo_min_slice)
        } else {
            base.mul_f32(power_budget.clamp(0.0, 1.0))
        }
    }

    /// Plan the cycle's slots against the hard deadline. Whatever time is
    /// left clamps each slot, but the safety-relevant floor is kept.
    pub fn plan(&self, power_budget: f32, cycle_start: Instant) -> Vec<ScheduleSlot, SUBSYSTEM_COUNT> {
        let hard_deadline = cycle_start + self.cycle_deadline;
        let mut slots = Vec::new();
        let mut cursor = cycle_start;
        for id in SubsystemId::ALL {
            let mut allotted = self.scaled_slice(id, power_budget);
            let remaining = hard_deadline.saturating_duration_since(cursor);
            if !id.is_safety_relevant() {
                allotted = allotted.min(remaining);
            } else {
                allotted = allotted.min(remaining).max(self.servo_min_slice);
            }
            let _ = slots.push(ScheduleSlot {
                subsystem: id,
                allotted,
                deadline: cursor + allotted,
            });
            cursor += allotted;
        }
        slots
    }

    /// Run one control cycle's poll slices.
    ///
    /// `cancel_best_effort` is raised on the cycle that enters a stop: the
    /// in-flight best-effort work for that cycle is cancelled, but polling
    /// resumes on the next cycle so the interlock keeps fresh evidence for
    /// recovery. A raised manual-stop flag abandons all remaining slices
    /// immediately.
    #[allow(clippy::too_many_arguments)]
    pub async fn run_cycle(
        &mut self,
        cycle_id: u64,
        now_ms: u64,
        power_budget: f32,
        cancel_best_effort: bool,
        stop_flag: &ManualStopFlag,
        adapters: &mut [Box<dyn SubsystemAdapter>],
        bus: &SampleBus,
    ) -> CycleReport {
        let cycle_start = Instant::now();
        let slots = self.plan(power_budget, cycle_start);
        let mut report = CycleReport {
            cycle_id,
            ..CycleReport::default()
        };

        for slot in &slots {
            if stop_flag.is_raised() {
                report.interrupted = true;
                let _ = report.skipped.push(slot.subsystem);
                continue;
            }
            if cancel_best_effort && !slot.subsystem.is_safety_relevant() {
                let _ = report.skipped.push(slot.subsystem);
                continue;
            }
            if slot.allotted.is_zero() {
                bus.mark_stale(slot.subsystem);
                let _ = report.abandoned.push(slot.subsystem);
                self.stats.slices_abandoned += 1;
                continue;
            }

            let Some(adapter) = adapters
                .iter_mut()
                .find(|a| a.subsystem() == slot.subsystem)
            else {
                continue;
            };

            match tokio::time::timeout(slot.allotted, adapter.poll(now_ms)).await {
                Ok(poll) => {
                    let mut sample = poll.sample;
                    sample.fault = sample.fault || poll.fault;
                    bus.publish(sample);
                    let _ = report.completed.push(slot.subsystem);
                }
                Err(_elapsed) => {
                    // Step abandoned for this cycle; the dropped future is
                    // the cancellation.
                    bus.mark_stale(slot.subsystem);
                    let _ = report.abandoned.push(slot.subsystem);
                    self.stats.slices_abandoned += 1;
                    debug!(subsystem = %slot.subsystem, slice_ms = slot.allotted.as_millis() as u64,
                           "slice expired, sample marked stale");
                }
            }
        }

        report.elapsed = cycle_start.elapsed();
        report.overrun = report.elapsed > self.cycle_deadline;
        self.stats.cycles_run += 1;
        if report.overrun {
            self.stats.overruns += 1;
            self.stats.consecutive_overruns += 1;
            warn!(
                cycle_id,
                elapsed_ms = report.elapsed.as_millis() as u64,
                consecutive = self.stats.consecutive_overruns,
                "cycle overrun"
            );
            if self.stats.consecutive_overruns == self.overrun_threshold {
                report.overrun_escalation = true;
            }
        } else {
            self.stats.consecutive_overruns = 0;
        }

        report
    }
}
