//! # Animatronic Rig Safety Coordinator
//!
//! Real-time coordination core for an animatronic platform with servo,
//! audio, and vision subsystems: health sampling, thermal governing, a
//! safety interlock state machine, bounded per-cycle scheduling, and live
//! telemetry.
//!
//! ## Features
//!
//! - **Metric sample bus**: lock-per-slot store of the latest health sample
//!   per subsystem, torn-read free
//! - **Thermal/power governor**: hysteresis thresholds with a sticky
//!   cool-down, producing a power budget for the scheduler
//! - **Safety interlock**: Normal/Warning/Throttled/EmergencyStop/Recovering
//!   state machine with debounced faults and an audited stop log
//! - **Slice scheduler**: bounded time slice per subsystem per cycle; a hung
//!   adapter loses its slice, never the loop
//! - **Telemetry**: non-blocking broadcast fan-out with drop-oldest
//!   semantics under backpressure
//!
//! ## Quick Start
//!
//! ```no_run
//! use rigbus::config::CoordinatorConfig;
//! use rigbus::coordinator::Coordinator;
//! use rigbus::subsystems::{
//!     AudioAdapter, ServoAdapter, ServoRail, SharedSink, SubsystemAdapter, VisionAdapter,
//! };
//!
//! # async fn demo() {
//! let rail = ServoRail::new();
//! let adapters: Vec<Box<dyn SubsystemAdapter>> = vec![
//!     Box::new(ServoAdapter::new(rail.clone())),
//!     Box::new(AudioAdapter::new()),
//!     Box::new(VisionAdapter::new()),
//! ];
//! let sinks: Vec<SharedSink> = vec![rail];
//! let (mut coordinator, handle) =
//!     Coordinator::new(CoordinatorConfig::default(), adapters, sinks).unwrap();
//!
//! let summary = coordinator.run_cycle().await;
//! println!("cycle {} safety={:?}", summary.cycle_id, summary.safety_state);
//! # let _ = handle;
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`bus`] - metric sample bus and snapshots
//! - [`governor`] - thermal/power throttle levels
//! - [`interlock`] - the authoritative safety state machine
//! - [`scheduler`] - per-cycle slice allocation and deadlines
//! - [`telemetry`] - outbound event stream
//! - [`coordinator`] - the control-loop driver and operator surface
//! - [`subsystems`] - adapter/sink traits and simulated hardware

#![deny(warnings)]
#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod bus;
pub mod config;
pub mod coordinator;
pub mod governor;
pub mod interlock;
pub mod scheduler;
pub mod subsystems;
pub mod telemetry;

// Re-export main public types for convenience
pub use bus::{MetricSample, SampleBus};
pub use config::CoordinatorConfig;
pub use coordinator::{Coordinator, CoordinatorHandle, OperatorCommand};
pub use governor::ThrottleLevel;
pub use interlock::{SafetyState, StopTrigger};
pub use telemetry::TelemetryEvent;
