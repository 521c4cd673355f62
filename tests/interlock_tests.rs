use rigbus::bus::{MetricSample, SampleBus};
use rigbus::config::CoordinatorConfig;
use rigbus::governor::{ThermalGovernor, ThrottleLevel};
use rigbus::interlock::{InterlockInputs, SafetyInterlock, SafetyState, StopTrigger};
use rigbus::subsystems::SubsystemId;

fn inputs(now_ms: u64, throttle: ThrottleLevel, temp_c: f32) -> InterlockInputs {
    InterlockInputs {
        now_ms,
        throttle,
        hottest_temp_c: Some(temp_c),
        ..InterlockInputs::default()
    }
}

#[test]
fn critical_reading_reaches_throttled_in_one_cycle() {
    let mut interlock = SafetyInterlock::new(&CoordinatorConfig::default());
    assert_eq!(interlock.state(), SafetyState::Normal);

    // One over-critical observation escalates through Warning within the
    // same evaluation.
    let decision = interlock.evaluate(&inputs(0, ThrottleLevel::Critical, 86.0));
    assert_eq!(decision.state, SafetyState::Throttled);
}

#[test]
fn sustained_critical_fires_thermal_stop() {
    let config = CoordinatorConfig::default();
    let mut interlock = SafetyInterlock::new(&config);

    interlock.evaluate(&inputs(0, ThrottleLevel::Critical, 86.0));
    // Still inside the hold window.
    let decision = interlock.evaluate(&inputs(100, ThrottleLevel::Critical, 86.0));
    assert_eq!(decision.state, SafetyState::Throttled);

    let decision = interlock.evaluate(&inputs(
        config.critical_hold_ms + 10,
        ThrottleLevel::Critical,
        86.0,
    ));
    assert_eq!(decision.state, SafetyState::EmergencyStop);
    assert!(decision.entered_stop);
    assert!(interlock
        .stop_log()
        .iter()
        .any(|r| r.trigger == StopTrigger::ThermalCritical));
}

#[test]
fn thermal_stop_is_audited_once_per_episode() {
    let config = CoordinatorConfig::default();
    let mut interlock = SafetyInterlock::new(&config);

    interlock.evaluate(&inputs(0, ThrottleLevel::Critical, 86.0));
    interlock.evaluate(&inputs(
        config.critical_hold_ms + 10,
        ThrottleLevel::Critical,
        86.0,
    ));
    assert_eq!(interlock.state(), SafetyState::EmergencyStop);

    // The temperature stays critical for many more cycles; the log keeps a
    // single entry for the episode instead of one per cycle.
    for i in 1..40u64 {
        interlock.evaluate(&inputs(
            config.critical_hold_ms + 10 + i * 20,
            ThrottleLevel::Critical,
            86.0,
        ));
    }
    let thermal_records = |interlock: &SafetyInterlock| {
        interlock
            .stop_log()
            .iter()
            .filter(|r| r.trigger == StopTrigger::ThermalCritical)
            .count()
    };
    assert_eq!(thermal_records(&interlock), 1);

    // Cooling below the critical threshold ends the episode even while the
    // stop stays latched; a later sustained spike is its own record.
    let cooled_at = config.critical_hold_ms + 2000;
    interlock.evaluate(&inputs(cooled_at, ThrottleLevel::Critical, 60.0));
    interlock.evaluate(&inputs(cooled_at + 20, ThrottleLevel::Critical, 86.0));
    interlock.evaluate(&inputs(
        cooled_at + 20 + config.critical_hold_ms + 10,
        ThrottleLevel::Critical,
        86.0,
    ));
    assert_eq!(thermal_records(&interlock), 2);
}

#[test]
fn reset_is_refused_until_conditions_clear() {
    let mut interlock = SafetyInterlock::new(&CoordinatorConfig::default());
    let mut stop = inputs(0, ThrottleLevel::Normal, 40.0);
    stop.stop_triggers.push(StopTrigger::ManualStop).unwrap();
    interlock.evaluate(&stop);
    assert_eq!(interlock.state(), SafetyState::EmergencyStop);

    // Reset with a fault still present: ignored.
    let mut dirty = inputs(100, ThrottleLevel::Normal, 40.0);
    dirty.reset_requested = true;
    dirty.fault_flags[SubsystemId::Audio.index()] = true;
    assert_eq!(
        interlock.evaluate(&dirty).state,
        SafetyState::EmergencyStop
    );

    // Reset with the rig still hot: ignored.
    let mut hot = inputs(200, ThrottleLevel::Normal, 70.0);
    hot.reset_requested = true;
    assert_eq!(interlock.evaluate(&hot).state, SafetyState::EmergencyStop);

    // Clean reset: one recovering cycle, then Normal.
    let mut clean = inputs(300, ThrottleLevel::Normal, 40.0);
    clean.reset_requested = true;
    assert_eq!(interlock.evaluate(&clean).state, SafetyState::Recovering);
    let decision = interlock.evaluate(&inputs(320, ThrottleLevel::Normal, 40.0));
    assert_eq!(decision.state, SafetyState::Normal);
    assert_eq!(decision.active_trigger, None);
}

#[test]
fn fault_during_recovery_reenters_stop() {
    let mut interlock = SafetyInterlock::new(&CoordinatorConfig::default());
    let mut stop = inputs(0, ThrottleLevel::Normal, 40.0);
    stop.stop_triggers.push(StopTrigger::ManualStop).unwrap();
    interlock.evaluate(&stop);

    let mut clean = inputs(100, ThrottleLevel::Normal, 40.0);
    clean.reset_requested = true;
    assert_eq!(interlock.evaluate(&clean).state, SafetyState::Recovering);

    let mut faulted = inputs(120, ThrottleLevel::Normal, 40.0);
    faulted.fault_flags[SubsystemId::Vision.index()] = true;
    let decision = interlock.evaluate(&faulted);
    assert_eq!(decision.state, SafetyState::EmergencyStop);
    assert!(decision.entered_stop);
    assert_eq!(
        decision.active_trigger,
        Some(StopTrigger::SubsystemFault(SubsystemId::Vision))
    );
    assert_eq!(interlock.stop_entry_count(), 2);
}

#[test]
fn transient_fault_is_debounced() {
    let config = CoordinatorConfig::default();
    let mut interlock = SafetyInterlock::new(&config);

    let mut faulted = inputs(0, ThrottleLevel::Normal, 40.0);
    faulted.fault_flags[SubsystemId::Audio.index()] = true;
    // Fault evidence lifts Normal to Warning at once...
    assert_eq!(interlock.evaluate(&faulted).state, SafetyState::Warning);

    // ...but Throttled waits for the debounce window.
    faulted.now_ms = config.debounce_ms / 2;
    assert_eq!(interlock.evaluate(&faulted).state, SafetyState::Warning);

    // Evidence clears before the window elapses: back to Normal, and the
    // debounce clock restarts.
    assert_eq!(
        interlock
            .evaluate(&inputs(config.debounce_ms, ThrottleLevel::Normal, 40.0))
            .state,
        SafetyState::Normal
    );

    faulted.now_ms = config.debounce_ms + 20;
    assert_eq!(interlock.evaluate(&faulted).state, SafetyState::Warning);
    faulted.now_ms = 2 * config.debounce_ms + 30;
    assert_eq!(interlock.evaluate(&faulted).state, SafetyState::Throttled);
}

#[test]
fn warming_rig_escalates_then_holds_through_cooldown() {
    // Tight thermal envelope: critical band at 70/65, warn band just below.
    let mut config = CoordinatorConfig::default();
    config.temp_warn_rise_c = 65.0;
    config.temp_warn_fall_c = 62.0;
    config.temp_critical_rise_c = 70.0;
    config.temp_critical_fall_c = 65.0;
    config.validate().unwrap();
    let mut gov = ThermalGovernor::new(&config);
    let mut interlock = SafetyInterlock::new(&config);
    let bus = SampleBus::new();

    let mut publish_and_evaluate = |now_ms: u64, temp_c: f32| {
        bus.publish(MetricSample {
            subsystem: SubsystemId::Servo,
            timestamp_ms: now_ms,
            temperature_c: temp_c,
            cpu_percent: 30,
            memory_percent: 25,
            latency_ms: 0.8,
            fault: false,
        });
        let snap = bus.snapshot(now_ms);
        let throttle = gov.evaluate(&snap, now_ms);
        let evaluation = InterlockInputs {
            now_ms,
            throttle,
            hottest_temp_c: gov.hottest(&snap),
            ..InterlockInputs::default()
        };
        interlock.evaluate(&evaluation).state
    };

    // Five cycles from 60 to 72 degrees: Warning once the warn threshold
    // is crossed, Throttled in the same cycle the critical threshold is.
    assert_eq!(publish_and_evaluate(0, 60.0), SafetyState::Normal);
    assert_eq!(publish_and_evaluate(20, 63.0), SafetyState::Normal);
    assert_eq!(publish_and_evaluate(40, 66.0), SafetyState::Warning);
    assert_eq!(publish_and_evaluate(60, 69.0), SafetyState::Warning);
    assert_eq!(publish_and_evaluate(80, 72.0), SafetyState::Throttled);

    // An immediate drop to 66 does not release Throttled: the governor's
    // cool-down holds the level, while the temperature-based hold clock
    // resets so no thermal stop fires.
    for i in 0..10u64 {
        assert_eq!(
            publish_and_evaluate(100 + i * 20, 66.0),
            SafetyState::Throttled
        );
    }

    // Once the cool-down elapses and the rig is genuinely cool, the state
    // steps back down one level per cycle.
    assert_eq!(publish_and_evaluate(6000, 55.0), SafetyState::Warning);
    assert_eq!(publish_and_evaluate(6020, 55.0), SafetyState::Normal);
}
