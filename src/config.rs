//! Coordinator configuration.
//!
//! Every value that affects safety behavior — cycle period, slice budgets,
//! thermal thresholds, debounce and watchdog windows — is supplied here
//! rather than buried in code paths. Defaults are documented in one place
//! and can be overridden from a JSON file.

use crate::subsystems::SubsystemId;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

/// Per-subsystem slice budget and reporter cadence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SubsystemBudget {
    /// Slice granted to this subsystem's poll step each cycle.
    pub slice_ms: u64,
    /// Expected interval between samples; the watchdog bound is this times
    /// `watchdog_multiplier`.
    pub expected_period_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Fixed control-cycle period.
    #[serde(default = "default_cycle_period_ms")]
    pub cycle_period_ms: u64,
    /// Hard deadline for one cycle, slices included. Exceeding it is an
    /// overrun even after abandoning slow subsystems.
    #[serde(default = "default_cycle_deadline_ms")]
    pub cycle_deadline_ms: u64,

    #[serde(default = "default_servo_budget")]
    pub servo: SubsystemBudget,
    #[serde(default = "default_audio_budget")]
    pub audio: SubsystemBudget,
    #[serde(default = "default_vision_budget")]
    pub vision: SubsystemBudget,
    /// Floor below which the servo slice is never scaled, whatever the
    /// power budget says.
    #[serde(default = "default_servo_min_slice_ms")]
    pub servo_min_slice_ms: u64,

    /// Hysteresis band for the warn level: rises at `temp_warn_rise_c`,
    /// falls only below `temp_warn_fall_c`.
    #[serde(default = "default_temp_warn_rise_c")]
    pub temp_warn_rise_c: f32,
    #[serde(default = "default_temp_warn_fall_c")]
    pub temp_warn_fall_c: f32,
    #[serde(default = "default_temp_critical_rise_c")]
    pub temp_critical_rise_c: f32,
    #[serde(default = "default_temp_critical_fall_c")]
    pub temp_critical_fall_c: f32,
    /// Minimum time the governor holds Critical after entering it, even if
    /// the temperature dips back under the falling threshold.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    /// Temperature sustained at or above the critical rising threshold for
    /// this long fires the ThermalCritical stop.
    #[serde(default = "default_critical_hold_ms")]
    pub critical_hold_ms: u64,

    /// Slice-budget fraction applied to best-effort subsystems at Reduced.
    #[serde(default = "default_reduced_budget")]
    pub reduced_budget: f32,
    /// Slice-budget fraction applied to best-effort subsystems at Critical.
    #[serde(default = "default_critical_budget")]
    pub critical_budget: f32,

    /// A subsystem is watchdog-timed-out after
    /// `watchdog_multiplier * expected_period_ms` without a fresh sample.
    #[serde(default = "default_watchdog_multiplier")]
    pub watchdog_multiplier: u32,
    /// Fault evidence must persist this long before Warning escalates to
    /// Throttled; suppresses single transient reads.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Consecutive cycle overruns at which the interlock receives a stop
    /// trigger.
    #[serde(default = "default_overrun_escalation_threshold")]
    pub overrun_escalation_threshold: u32,

    /// Publish telemetry every N-th cycle; stop events always publish.
    #[serde(default = "default_telemetry_divider")]
    pub telemetry_divider: u32,

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_cycle_period_ms() -> u64 {
    20
}
fn default_cycle_deadline_ms() -> u64 {
    18
}
fn default_servo_budget() -> SubsystemBudget {
    SubsystemBudget {
        slice_ms: 5,
        expected_period_ms: 20,
    }
}
fn default_audio_budget() -> SubsystemBudget {
    SubsystemBudget {
        slice_ms: 4,
        expected_period_ms: 20,
    }
}
fn default_vision_budget() -> SubsystemBudget {
    SubsystemBudget {
        slice_ms: 6,
        expected_period_ms: 20,
    }
}
fn default_servo_min_slice_ms() -> u64 {
    3
}
fn default_temp_warn_rise_c() -> f32 {
    70.0
}
fn default_temp_warn_fall_c() -> f32 {
    65.0
}
fn default_temp_critical_rise_c() -> f32 {
    85.0
}
fn default_temp_critical_fall_c() -> f32 {
    78.0
}
fn default_cooldown_ms() -> u64 {
    5000
}
fn default_critical_hold_ms() -> u64 {
    250
}
fn default_reduced_budget() -> f32 {
    0.6
}
fn default_critical_budget() -> f32 {
    0.3
}
fn default_watchdog_multiplier() -> u32 {
    2
}
fn default_debounce_ms() -> u64 {
    150
}
fn default_overrun_escalation_threshold() -> u32 {
    3
}
fn default_telemetry_divider() -> u32 {
    5
}
fn default_bind_addr() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    7030
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            cycle_period_ms: default_cycle_period_ms(),
            cycle_deadline_ms: default_cycle_deadline_ms(),
            servo: default_servo_budget(),
            audio: default_audio_budget(),
            vision: default_vision_budget(),
            servo_min_slice_ms: default_servo_min_slice_ms(),
            temp_warn_rise_c: default_temp_warn_rise_c(),
            temp_warn_fall_c: default_temp_warn_fall_c(),
            temp_critical_rise_c: default_temp_critical_rise_c(),
            temp_critical_fall_c: default_temp_critical_fall_c(),
            cooldown_ms: default_cooldown_ms(),
            critical_hold_ms: default_critical_hold_ms(),
            reduced_budget: default_reduced_budget(),
            critical_budget: default_critical_budget(),
            watchdog_multiplier: default_watchdog_multiplier(),
            debounce_ms: default_debounce_ms(),
            overrun_escalation_threshold: default_overrun_escalation_threshold(),
            telemetry_divider: default_telemetry_divider(),
            bind_addr: default_bind_addr(),
            port: default_port(),
        }
    }
}

impl CoordinatorConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cycle_period_ms == 0 {
            return Err(ConfigError::Invalid("cycle_period_ms must be non-zero"));
        }
        if self.cycle_deadline_ms == 0 || self.cycle_deadline_ms > self.cycle_period_ms {
            return Err(ConfigError::Invalid(
                "cycle_deadline_ms must be non-zero and no longer than the cycle period",
            ));
        }
        if self.temp_warn_rise_c <= self.temp_warn_fall_c {
            return Err(ConfigError::Invalid(
                "warn hysteresis band inverted: rise must be above fall",
            ));
        }
        if self.temp_critical_rise_c <= self.temp_critical_fall_c {
            return Err(ConfigError::Invalid(
                "critical hysteresis band inverted: rise must be above fall",
            ));
        }
        if self.temp_critical_rise_c <= self.temp_warn_rise_c {
            return Err(ConfigError::Invalid(
                "critical rise threshold must be above warn rise threshold",
            ));
        }
        for fraction in [self.reduced_budget, self.critical_budget] {
            if !(fraction > 0.0 && fraction <= 1.0) {
                return Err(ConfigError::Invalid(
                    "budget fractions must be within (0, 1]",
                ));
            }
        }
        if self.watchdog_multiplier == 0 {
            return Err(ConfigError::Invalid("watchdog_multiplier must be non-zero"));
        }
        if self.overrun_escalation_threshold == 0 {
            return Err(ConfigError::Invalid(
                "overrun_escalation_threshold must be non-zero",
            ));
        }
        for budget in [&self.servo, &self.audio, &self.vision] {
            if budget.slice_ms == 0 || budget.expected_period_ms == 0 {
                return Err(ConfigError::Invalid(
                    "subsystem slice and expected period must be non-zero",
                ));
            }
        }
        if self.servo_min_slice_ms > self.servo.slice_ms {
            return Err(ConfigError::Invalid(
                "servo_min_slice_ms cannot exceed the servo slice",
            ));
        }
        Ok(())
    }

    pub fn budget(&self, id: SubsystemId) -> &SubsystemBudget {
        match id {
            SubsystemId::Servo => &self.servo,
            SubsystemId::Audio => &self.audio,
            SubsystemId::Vision => &self.vision,
        }
    }

    /// Watchdog staleness bound for one subsystem.
    pub fn staleness_bound_ms(&self, id: SubsystemId) -> u64 {
        self.budget(id).expected_period_ms * u64::from(self.watchdog_multiplier)
    }
}
