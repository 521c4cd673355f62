//! Thermal/power governor.
//!
//! Consumes the cycle's bus snapshot and produces a throttle level with
//! hysteresis (distinct rising/falling thresholds) plus a sticky cool-down
//! on Critical, so noisy readings cannot flap the level. The level maps to a
//! power-budget fraction the scheduler applies to best-effort slices.

use crate::bus::BusSnapshot;
use crate::config::CoordinatorConfig;
use crate::subsystems::SubsystemId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ThrottleLevel {
    #[default]
    Normal,
    Reduced,
    Critical,
}

#[derive(Debug)]
pub struct ThermalGovernor {
    warn_rise_c: f32,
    warn_fall_c: f32,
    critical_rise_c: f32,
    critical_fall_c: f32,
    cooldown_ms: u64,
    reduced_budget: f32,
    critical_budget: f32,
    staleness_bounds_ms: [u64; crate::subsystems::SUBSYSTEM_COUNT],

    level: ThrottleLevel,
    /// Critical may not fall before this instant, however low the reading.
    cooldown_until_ms: u64,
}

impl ThermalGovernor {
    pub fn new(config: &CoordinatorConfig) -> Self {
        let mut staleness_bounds_ms = [0u64; crate::subsystems::SUBSYSTEM_COUNT];
        for id in SubsystemId::ALL {
            staleness_bounds_ms[id.index()] = config.staleness_bound_ms(id);
        }
        Self {
            warn_rise_c: config.temp_warn_rise_c,
            warn_fall_c: config.temp_warn_fall_c,
            critical_rise_c: config.temp_critical_rise_c,
            critical_fall_c: config.temp_critical_fall_c,
            cooldown_ms: config.cooldown_ms,
            reduced_budget: config.reduced_budget,
            critical_budget: config.critical_budget,
            staleness_bounds_ms,
            level: ThrottleLevel::Normal,
            cooldown_until_ms: 0,
        }
    }

    /// Hottest fresh temperature reading in the snapshot. Stale samples are
    /// excluded here; they feed the interlock's watchdog accounting instead.
    pub fn hottest(&self, snapshot: &BusSnapshot) -> Option<f32> {
        let mut hottest: Option<f32> = None;
        for id in SubsystemId::ALL {
            if !snapshot.is_fresh(id, self.staleness_bounds_ms[id.index()]) {
                continue;
            }
            if let Some(sample) = snapshot.sample(id) {
                hottest = Some(match hottest {
                    Some(t) => t.max(sample.temperature_c),
                    None => sample.temperature_c,
                });
            }
        }
        hottest
    }

    pub fn evaluate(&mut self, snapshot: &BusSnapshot, now_ms: u64) -> ThrottleLevel {
        let Some(temp) = self.hottest(snapshot) else {
            // No fresh evidence: hold the current level, the watchdog covers
            // the silent subsystems.
            return self.level;
        };

        if temp >= self.critical_rise_c {
            self.level = ThrottleLevel::Critical;
            // Re-arm the cool-down on every over-threshold reading.
            self.cooldown_until_ms = now_ms.saturating_add(self.cooldown_ms);
            return self.level;
        }

        match self.level {
            ThrottleLevel::Critical => {
                if now_ms >= self.cooldown_until_ms && temp < self.critical_fall_c {
                    self.level = if temp < self.warn_fall_c {
                        ThrottleLevel::Normal
                    } else {
                        ThrottleLevel::Reduced
                    };
                }
            }
            ThrottleLevel::Reduced => {
                if temp < self.warn_fall_c {
                    self.level = ThrottleLevel::Normal;
                }
            }
            ThrottleLevel::Normal => {
                if temp >= self.warn_rise_c {
                    self.level = ThrottleLevel::Reduced;
                }
            }
        }
        self.level
    }

    pub fn level(&self) -> ThrottleLevel {
        self.level
    }

    /// Fraction of the nominal slice budget granted to best-effort
    /// subsystems at the current level.
    pub fn power_budget(&self) -> f32 {
        match self.level {
            ThrottleLevel::Normal => 1.0,
            ThrottleLevel::Reduced => self.reduced_budget,
            ThrottleLevel::Critical => self.critical_budget,
        }
    }
}
