//! Control-loop driver.
//!
//! One fixed-period loop ties the pieces together: drain operator commands,
//! snapshot the bus, scan for watchdog timeouts, run the governor and the
//! interlock against that one snapshot, issue safe-hold on a stop entry
//! before any slice runs, then execute the cycle's slices and publish
//! telemetry. Everything below the interlock is absorbed into the safety
//! state machine; the loop itself never fails on a subsystem fault.

use crate::bus::SampleBus;
use crate::config::{ConfigError, CoordinatorConfig};
use crate::governor::{ThermalGovernor, ThrottleLevel};
use crate::interlock::{
    InterlockInputs, ManualStopFlag, SafetyInterlock, SafetyState, SafetyStateCell, StopTrigger,
};
use crate::scheduler::{CycleReport, CycleScheduler};
use crate::subsystems::{
    ActuatorCommand, ActuatorSink, GatedActuator, SharedSink, SubsystemAdapter, SubsystemId,
};
use crate::telemetry::{TelemetryEvent, TelemetryPublisher};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{error, info};

const COMMAND_QUEUE_DEPTH: usize = 32;
/// Bounded drain per cycle so a command flood cannot stretch the loop.
const MAX_COMMANDS_PER_CYCLE: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Operator control surface. Stop and reset are the only externally
/// triggerable safety transitions; actuation requests go through the gated
/// sinks and are refused during an emergency stop.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum OperatorCommand {
    ManualStop,
    ResetFromStop,
    Actuate(ActuatorCommand),
}

/// What one cycle did, for callers driving the loop directly (tests, the
/// daemon's status line).
#[derive(Debug, Clone)]
pub struct CycleSummary {
    pub cycle_id: u64,
    pub now_ms: u64,
    pub safety_state: SafetyState,
    pub throttle: ThrottleLevel,
    pub entered_stop: bool,
    pub report: CycleReport,
}

/// Cheap clonable handle for the server side: command queue, stop flag, and
/// read-only state/telemetry access.
#[derive(Clone)]
pub struct CoordinatorHandle {
    pub commands: mpsc::Sender<OperatorCommand>,
    pub stop_flag: ManualStopFlag,
    pub safety: SafetyStateCell,
    pub telemetry: broadcast::Sender<TelemetryEvent>,
}

impl CoordinatorHandle {
    /// Latch the stop immediately (so a mid-cycle stop cuts the remaining
    /// slices) and queue it for the interlock.
    pub async fn manual_stop(&self) {
        self.stop_flag.raise();
        let _ = self.commands.send(OperatorCommand::ManualStop).await;
    }

    pub async fn reset_from_stop(&self) {
        let _ = self.commands.send(OperatorCommand::ResetFromStop).await;
    }
}

pub struct Coordinator {
    config: CoordinatorConfig,
    bus: Arc<SampleBus>,
    governor: ThermalGovernor,
    interlock: SafetyInterlock,
    scheduler: CycleScheduler,
    publisher: TelemetryPublisher,
    adapters: Vec<Box<dyn SubsystemAdapter>>,
    sinks: Vec<GatedActuator<SharedSink>>,

    commands_rx: mpsc::Receiver<OperatorCommand>,
    stop_flag: ManualStopFlag,

    epoch: Instant,
    cycle_id: u64,
    last_published_state: SafetyState,
    pending_overrun_escalation: bool,
}

impl Coordinator {
    pub fn new(
        config: CoordinatorConfig,
        adapters: Vec<Box<dyn SubsystemAdapter>>,
        sinks: Vec<SharedSink>,
    ) -> Result<(Self, CoordinatorHandle), CoordinatorError> {
        config.validate()?;

        let interlock = SafetyInterlock::new(&config);
        let safety = interlock.state_cell();
        let sinks = sinks
            .into_iter()
            .map(|sink| GatedActuator::new(sink, safety.clone()))
            .collect();
        let publisher = TelemetryPublisher::new(config.telemetry_divider);
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let stop_flag = ManualStopFlag::new();

        let handle = CoordinatorHandle {
            commands: commands_tx,
            stop_flag: stop_flag.clone(),
            safety,
            telemetry: publisher.sender(),
        };

        let coordinator = Self {
            governor: ThermalGovernor::new(&config),
            scheduler: CycleScheduler::new(&config),
            interlock,
            publisher,
            bus: Arc::new(SampleBus::new()),
            adapters,
            sinks,
            commands_rx,
            stop_flag,
            epoch: Instant::now(),
            cycle_id: 0,
            last_published_state: SafetyState::Normal,
            pending_overrun_escalation: false,
            config,
        };
        Ok((coordinator, handle))
    }

    pub fn bus(&self) -> Arc<SampleBus> {
        Arc::clone(&self.bus)
    }

    pub fn safety_state(&self) -> SafetyState {
        self.interlock.state()
    }

    pub fn stop_log(&self) -> &[crate::interlock::StopRecord] {
        self.interlock.stop_log()
    }

    pub fn scheduler_stats(&self) -> &crate::scheduler::SchedulerStats {
        self.scheduler.stats()
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Drive cycles at the configured period until `shutdown` flips.
    /// Missed ticks are skipped, never bunched: a late cycle must not be
    /// followed by a burst of catch-up cycles.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.cycle_period_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(
            period_ms = self.config.cycle_period_ms,
            "control loop started"
        );
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_cycle().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(cycles = self.cycle_id, "control loop stopped");
    }

    pub async fn run_cycle(&mut self) -> CycleSummary {
        self.cycle_id += 1;
        let cycle_id = self.cycle_id;
        let now_ms = self.now_ms();

        // Operator commands first: a stop raised since the last cycle must
        // be in effect before any slice runs.
        let mut manual_stop = self.stop_flag.take();
        let mut reset_requested = false;
        for _ in 0..MAX_COMMANDS_PER_CYCLE {
            match self.commands_rx.try_recv() {
                Ok(OperatorCommand::ManualStop) => manual_stop = true,
                Ok(OperatorCommand::ResetFromStop) => reset_requested = true,
                Ok(OperatorCommand::Actuate(command)) => self.apply_actuation(command),
                Err(_) => break,
            }
        }

        // One snapshot per cycle; every decision below reads it, so the
        // interlock never mixes old and new samples.
        let snapshot = self.bus.snapshot(now_ms);

        let mut inputs = InterlockInputs {
            now_ms,
            reset_requested,
            ..InterlockInputs::default()
        };

        // Watchdog scan. A silent safety-relevant subsystem is a stop
        // trigger; a silent best-effort one is fault evidence feeding the
        // debounced Warning path.
        for id in SubsystemId::ALL {
            let bound = self.config.staleness_bound_ms(id);
            let age = snapshot.age_ms(id).unwrap_or(now_ms);
            if age > bound {
                if id.is_safety_relevant() {
                    let _ = inputs
                        .stop_triggers
                        .push(StopTrigger::WatchdogTimeout(Some(id)));
                } else {
                    inputs.fault_flags[id.index()] = true;
                }
            } else if let Some(sample) = snapshot.sample(id) {
                if sample.fault && snapshot.is_fresh(id, bound) {
                    inputs.fault_flags[id.index()] = true;
                }
            }
        }

        if manual_stop {
            let _ = inputs.stop_triggers.push(StopTrigger::ManualStop);
        }
        if std::mem::take(&mut self.pending_overrun_escalation) {
            let _ = inputs.stop_triggers.push(StopTrigger::WatchdogTimeout(None));
        }

        inputs.throttle = self.governor.evaluate(&snapshot, now_ms);
        inputs.hottest_temp_c = self.governor.hottest(&snapshot);

        let decision = self.interlock.evaluate(&inputs);

        if decision.entered_stop {
            // Highest-priority operation of the cycle: every actuator goes
            // to safe-hold before any slice is considered.
            self.command_safe_hold();
        }

        // Best-effort slices are cancelled only on the stop-entry cycle;
        // while the stop persists they keep polling so their samples stay
        // fresh and the reset gate can clear.
        let report = self
            .scheduler
            .run_cycle(
                cycle_id,
                now_ms,
                self.governor.power_budget(),
                decision.entered_stop,
                &self.stop_flag,
                &mut self.adapters,
                &self.bus,
            )
            .await;
        self.pending_overrun_escalation = report.overrun_escalation;

        let forced = decision.entered_stop || decision.state != self.last_published_state;
        self.last_published_state = decision.state;
        let event = TelemetryEvent::from_cycle(
            cycle_id,
            &snapshot,
            decision.state,
            inputs.throttle,
            decision.active_trigger,
            self.scheduler.stats().overruns,
        );
        self.publisher.publish(cycle_id, forced, event);

        CycleSummary {
            cycle_id,
            now_ms,
            safety_state: decision.state,
            throttle: inputs.throttle,
            entered_stop: decision.entered_stop,
            report,
        }
    }

    fn command_safe_hold(&self) {
        for sink in &self.sinks {
            sink.send_safe_hold();
        }
    }

    fn apply_actuation(&self, command: ActuatorCommand) {
        for sink in &self.sinks {
            if let Err(e) = sink.send(command) {
                // Refused commands are logged, never fatal: the gate doing
                // its job during a stop lands here.
                error!(sink = %sink.subsystem(), error = %e, "actuation refused");
            }
        }
    }

    /// Direct access for tests and the daemon's fault-injection endpoint.
    pub fn adapters_mut(&mut self) -> &mut [Box<dyn SubsystemAdapter>] {
        &mut self.adapters
    }
}
