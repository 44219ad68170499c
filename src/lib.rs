//! # MSM-PM: Core Count and Thermal Governor
//!
//! Power management for a multi-core application processor, written as a
//! heap-free `no_std` library that runs on the SoC's power-management
//! microcontroller or inside a host simulation.
//!
//! ## Overview
//!
//! Two independent closed loops:
//!
//! - **Core count controller**: keeps just enough cores online for the
//!   scheduler's run-queue load, with a one-core hysteresis band and drift
//!   detection against other agents plugging cores behind its back
//! - **Thermal throttle controller**: caps every core's frequency from a
//!   ladder of temperature tiers, with a release margin per tier
//!
//! Each loop is a periodic sampler feeding a decision function feeding an
//! idempotent actuator. Neither knows about the other.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │               Platform (init, IRQs, sleep)             │
//! ├────────────────────────────────────────────────────────┤
//! │                  Governor (kernel.rs)                  │
//! │  start() · poll() · suspend() · resume() · toggles     │
//! ├───────────────────────────┬────────────────────────────┤
//! │  Core Count Controller    │  Thermal Throttle          │
//! │  hotplug.rs · history.rs  │  thermal.rs · trigger.rs   │
//! │  ─ sample_and_decide()    │  ─ select_frequency()      │
//! │  ─ actuate()              │  ─ apply_ceiling()         │
//! │  ─ verify_cores()         │  ─ disable()               │
//! ├───────────────────────────┴────────────────────────────┤
//! │  PeriodicTask (scheduler.rs) · Shared (sync.rs)        │
//! │  Tunables (config.rs) · Stats (stats.rs)               │
//! ├────────────────────────────────────────────────────────┤
//! │  Ports (arch/): RunQueueStats · CpuHotplug ·           │
//! │  TempSensor · FreqLimits · TripSensor                  │
//! │  sim.rs (host) · cortex_m4.rs (SysTick, run loop)      │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Memory Model
//!
//! - **No heap** in controller state: fixed arrays sized by `MAX_CORES`,
//!   `HISTORY_SIZE` and `MAX_TIERS`
//! - **Tunables**: atomics with `const fn new()`, writable from any context
//! - **Shared access**: `critical_section::Mutex` via [`sync::Shared`]
//!
//! ## Logging
//!
//! All diagnostics go through `tracing` with structured `cpu`, `sensor`,
//! `temp` and `ceiling` fields. The platform installs the subscriber.

#![no_std]

pub mod arch;
pub mod config;
pub mod error;
pub mod history;
pub mod hotplug;
pub mod kernel;
pub mod scheduler;
pub mod stats;
pub mod sync;
pub mod thermal;
pub mod trigger;

pub use error::{HalError, TunableError};
pub use hotplug::CoreCountController;
pub use kernel::Governor;
pub use thermal::{Ceiling, ThermalController};
pub use trigger::{PollTrigger, TripTrigger, WakeTrigger};
