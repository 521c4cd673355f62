use rigbus::config::CoordinatorConfig;
use rigbus::coordinator::{Coordinator, CoordinatorHandle, OperatorCommand};
use rigbus::interlock::{SafetyState, StopTrigger};
use rigbus::subsystems::{
    ActuatorCommand, AudioAdapter, ServoAdapter, ServoRail, SharedSink, SubsystemAdapter,
    SubsystemId, VisionAdapter,
};
use std::sync::Arc;
use std::time::Duration;

fn rig(config: CoordinatorConfig) -> (Coordinator, CoordinatorHandle, Arc<ServoRail>) {
    rig_with(config, |_, _, _| {})
}

/// Build a coordinator over the simulated subsystems, letting the test
/// shape the adapters before they are boxed.
fn rig_with(
    config: CoordinatorConfig,
    shape: impl FnOnce(&mut ServoAdapter, &mut AudioAdapter, &mut VisionAdapter),
) -> (Coordinator, CoordinatorHandle, Arc<ServoRail>) {
    let rail = ServoRail::new();
    let mut servo = ServoAdapter::new(Arc::clone(&rail));
    let mut audio = AudioAdapter::new();
    let mut vision = VisionAdapter::new();
    shape(&mut servo, &mut audio, &mut vision);
    let adapters: Vec<Box<dyn SubsystemAdapter>> =
        vec![Box::new(servo), Box::new(audio), Box::new(vision)];
    let sinks: Vec<SharedSink> = vec![Arc::clone(&rail) as SharedSink];
    let (coordinator, handle) = Coordinator::new(config, adapters, sinks).unwrap();
    (coordinator, handle, rail)
}

#[tokio::test]
async fn healthy_rig_stays_normal() {
    let (mut coordinator, _handle, _rail) = rig(CoordinatorConfig::default());
    for _ in 0..3 {
        let summary = coordinator.run_cycle().await;
        assert_eq!(summary.safety_state, SafetyState::Normal);
        assert_eq!(summary.report.completed.len(), 3);
        assert!(!summary.entered_stop);
    }
}

#[tokio::test]
async fn manual_stop_holds_servos_before_remaining_slices() {
    let (mut coordinator, handle, rail) = rig(CoordinatorConfig::default());
    coordinator.run_cycle().await;
    assert!(!rail.safe_hold_active());

    handle.manual_stop().await;
    let summary = coordinator.run_cycle().await;

    assert!(summary.entered_stop);
    assert_eq!(summary.safety_state, SafetyState::EmergencyStop);
    assert!(rail.safe_hold_active());
    // Safety-relevant polling continues through the stop; best-effort
    // slices are cut.
    assert!(summary.report.completed.contains(&SubsystemId::Servo));
    assert!(summary.report.skipped.contains(&SubsystemId::Audio));
    assert!(summary.report.skipped.contains(&SubsystemId::Vision));
    assert!(coordinator
        .stop_log()
        .iter()
        .any(|r| r.trigger == StopTrigger::ManualStop));
}

#[tokio::test]
async fn reset_succeeds_after_a_sustained_stop() {
    let (mut coordinator, handle, _rail) = rig(CoordinatorConfig::default());
    coordinator.run_cycle().await;
    handle.manual_stop().await;
    let summary = coordinator.run_cycle().await;
    assert!(summary.entered_stop);

    // Hold the stop well past every watchdog bound, pacing cycles at the
    // configured period. Best-effort polling resumes after the entry cycle,
    // so no subsystem goes stale while the stop is latched.
    for _ in 0..8 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let summary = coordinator.run_cycle().await;
        assert_eq!(summary.safety_state, SafetyState::EmergencyStop);
        assert!(summary.report.completed.contains(&SubsystemId::Audio));
        assert!(summary.report.completed.contains(&SubsystemId::Vision));
    }

    handle.reset_from_stop().await;
    let summary = coordinator.run_cycle().await;
    assert_eq!(summary.safety_state, SafetyState::Recovering);
    let summary = coordinator.run_cycle().await;
    assert_eq!(summary.safety_state, SafetyState::Normal);
}

#[tokio::test]
async fn motion_commands_are_refused_during_stop() {
    let (mut coordinator, handle, rail) = rig(CoordinatorConfig::default());
    coordinator.run_cycle().await;
    handle.manual_stop().await;
    coordinator.run_cycle().await;

    let accepted_before = rail.commands_accepted();
    handle
        .commands
        .send(OperatorCommand::Actuate(ActuatorCommand::Position {
            channel: 2,
            target: 0.7,
        }))
        .await
        .unwrap();
    coordinator.run_cycle().await;
    assert_eq!(rail.commands_accepted(), accepted_before);
}

#[tokio::test]
async fn recovery_requires_reset_and_a_clean_cycle() {
    let (mut coordinator, handle, rail) = rig(CoordinatorConfig::default());
    coordinator.run_cycle().await;
    handle.manual_stop().await;
    coordinator.run_cycle().await;
    assert_eq!(coordinator.safety_state(), SafetyState::EmergencyStop);

    // Without a reset the stop is latched however healthy the rig looks.
    let summary = coordinator.run_cycle().await;
    assert_eq!(summary.safety_state, SafetyState::EmergencyStop);

    handle.reset_from_stop().await;
    let summary = coordinator.run_cycle().await;
    assert_eq!(summary.safety_state, SafetyState::Recovering);

    let summary = coordinator.run_cycle().await;
    assert_eq!(summary.safety_state, SafetyState::Normal);

    // Motion flows again once recovered.
    let accepted_before = rail.commands_accepted();
    handle
        .commands
        .send(OperatorCommand::Actuate(ActuatorCommand::Position {
            channel: 0,
            target: -0.4,
        }))
        .await
        .unwrap();
    coordinator.run_cycle().await;
    assert_eq!(rail.commands_accepted(), accepted_before + 1);
}

#[tokio::test]
async fn hung_servo_triggers_watchdog_stop() {
    let (mut coordinator, _handle, _rail) = rig_with(CoordinatorConfig::default(), |servo, _, _| {
        servo.set_poll_delay(Duration::from_millis(50));
    });

    let mut stopped = false;
    for _ in 0..10 {
        let summary = coordinator.run_cycle().await;
        if summary.safety_state == SafetyState::EmergencyStop {
            stopped = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(stopped, "silent servo must escalate to an emergency stop");
    assert!(coordinator
        .stop_log()
        .iter()
        .any(|r| r.trigger == StopTrigger::WatchdogTimeout(Some(SubsystemId::Servo))));
}

#[tokio::test]
async fn hung_vision_degrades_without_stopping() {
    let (mut coordinator, _handle, _rail) = rig_with(CoordinatorConfig::default(), |_, _, vision| {
        vision.set_poll_delay(Duration::from_millis(50));
    });

    let mut last_state = SafetyState::Normal;
    for _ in 0..6 {
        let summary = coordinator.run_cycle().await;
        assert_ne!(summary.safety_state, SafetyState::EmergencyStop);
        assert!(summary.report.completed.contains(&SubsystemId::Servo));
        assert!(summary.report.completed.contains(&SubsystemId::Audio));
        last_state = summary.safety_state;
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    // Silence from a best-effort subsystem is fault evidence, not a stop.
    assert!(matches!(
        last_state,
        SafetyState::Warning | SafetyState::Throttled
    ));
}

#[tokio::test]
async fn latched_fault_throttles_with_zero_debounce() {
    let mut config = CoordinatorConfig::default();
    config.debounce_ms = 0;
    let (mut coordinator, _handle, _rail) = rig(config);

    coordinator.adapters_mut()[SubsystemId::Servo.index()].inject_fault();
    // First cycle publishes the faulted sample; the next evaluates it.
    coordinator.run_cycle().await;
    let summary = coordinator.run_cycle().await;
    assert_eq!(summary.safety_state, SafetyState::Throttled);

    coordinator.adapters_mut()[SubsystemId::Servo.index()].clear_faults();
    coordinator.run_cycle().await;
    let summary = coordinator.run_cycle().await;
    assert_eq!(summary.safety_state, SafetyState::Warning);
}

#[tokio::test]
async fn repeated_overruns_escalate_to_stop() {
    let mut config = CoordinatorConfig::default();
    config.cycle_deadline_ms = 1;
    config.overrun_escalation_threshold = 3;
    let (mut coordinator, _handle, _rail) = rig_with(config, |servo, _, _| {
        // Completes inside its slice but guarantees every cycle misses the
        // 1ms deadline.
        servo.set_poll_delay(Duration::from_millis(2));
    });

    let mut stopped = false;
    for _ in 0..6 {
        let summary = coordinator.run_cycle().await;
        if summary.safety_state == SafetyState::EmergencyStop {
            stopped = true;
            break;
        }
    }
    assert!(stopped, "persistent overruns must escalate");
    assert!(coordinator
        .stop_log()
        .iter()
        .any(|r| r.trigger == StopTrigger::WatchdogTimeout(None)));
}
