use rigbus::bus::{MetricSample, SampleBus};
use rigbus::config::CoordinatorConfig;
use rigbus::governor::{ThermalGovernor, ThrottleLevel};
use rigbus::subsystems::SubsystemId;

fn sample(id: SubsystemId, timestamp_ms: u64, temperature_c: f32) -> MetricSample {
    MetricSample {
        subsystem: id,
        timestamp_ms,
        temperature_c,
        cpu_percent: 25,
        memory_percent: 30,
        latency_ms: 1.0,
        fault: false,
    }
}

#[test]
fn hottest_picks_maximum_across_fresh_subsystems() {
    let gov = ThermalGovernor::new(&CoordinatorConfig::default());
    let bus = SampleBus::new();
    bus.publish(sample(SubsystemId::Servo, 100, 44.0));
    bus.publish(sample(SubsystemId::Audio, 100, 39.0));
    bus.publish(sample(SubsystemId::Vision, 100, 58.0));

    let snap = bus.snapshot(110);
    assert_eq!(gov.hottest(&snap), Some(58.0));
}

#[test]
fn oscillation_inside_hysteresis_band_holds_level() {
    let mut gov = ThermalGovernor::new(&CoordinatorConfig::default());
    let bus = SampleBus::new();

    bus.publish(sample(SubsystemId::Servo, 0, 71.0));
    assert_eq!(gov.evaluate(&bus.snapshot(0), 0), ThrottleLevel::Reduced);

    // Bounce between the falling (65) and rising (70) thresholds; the
    // level must not change once inside the band.
    for (i, temp) in [66.0, 69.0, 66.5, 69.5, 67.0].iter().enumerate() {
        let t = 20 * (i as u64 + 1);
        bus.publish(sample(SubsystemId::Servo, t, *temp));
        assert_eq!(gov.evaluate(&bus.snapshot(t), t), ThrottleLevel::Reduced);
    }
}

#[test]
fn silent_subsystem_does_not_pin_level_high() {
    let mut gov = ThermalGovernor::new(&CoordinatorConfig::default());
    let bus = SampleBus::new();

    bus.publish(sample(SubsystemId::Servo, 0, 72.0));
    assert_eq!(gov.evaluate(&bus.snapshot(0), 0), ThrottleLevel::Reduced);

    // Servo goes silent; a fresh cool audio sample is now the only
    // evidence and the level may fall.
    bus.publish(sample(SubsystemId::Audio, 1000, 40.0));
    assert_eq!(
        gov.evaluate(&bus.snapshot(1010), 1010),
        ThrottleLevel::Normal
    );
}

#[test]
fn empty_bus_holds_current_level() {
    let mut gov = ThermalGovernor::new(&CoordinatorConfig::default());
    let bus = SampleBus::new();

    bus.publish(sample(SubsystemId::Servo, 0, 72.0));
    gov.evaluate(&bus.snapshot(0), 0);

    // All samples aged out: no fresh evidence, level is held and the
    // watchdog path is responsible for the silence.
    assert_eq!(
        gov.evaluate(&bus.snapshot(100_000), 100_000),
        ThrottleLevel::Reduced
    );
}

#[test]
fn custom_thresholds_are_honored() {
    let mut config = CoordinatorConfig::default();
    config.temp_warn_rise_c = 50.0;
    config.temp_warn_fall_c = 45.0;
    config.temp_critical_rise_c = 60.0;
    config.temp_critical_fall_c = 55.0;
    config.validate().unwrap();

    let mut gov = ThermalGovernor::new(&config);
    let bus = SampleBus::new();
    bus.publish(sample(SubsystemId::Servo, 0, 51.0));
    assert_eq!(gov.evaluate(&bus.snapshot(0), 0), ThrottleLevel::Reduced);
    bus.publish(sample(SubsystemId::Servo, 20, 61.0));
    assert_eq!(gov.evaluate(&bus.snapshot(20), 20), ThrottleLevel::Critical);
}
