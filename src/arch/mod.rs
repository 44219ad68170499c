//! # Port Layer
//!
//! Hardware boundary for both controllers. The controllers only ever talk
//! to the SoC through these traits; a port implements them for a concrete
//! platform.
//!
//! - [`sim`]: in-memory port with fault injection, used on the host
//! - `cortex_m4`: SysTick time base and run loop for the PM microcontroller
//!
//! Every call is expected to return promptly. Ports report refusals as
//! [`HalError`]; controllers never retry within a tick.

pub mod sim;

#[cfg(target_arch = "arm")]
pub mod cortex_m4;

use crate::error::HalError;
use crate::thermal::Ceiling;

/// Scheduler run-queue statistic feeding the hotplug controller.
pub trait RunQueueStats {
    /// Average number of runnable threads in `FSHIFT` fixed point.
    fn sample_runnable_threads(&mut self) -> Result<u32, HalError>;
}

/// Core online/offline control.
pub trait CpuHotplug {
    fn set_core_online(&mut self, core: usize, online: bool) -> Result<(), HalError>;

    /// Live online state as the hardware currently reports it.
    fn is_core_online(&self, core: usize) -> bool;

    /// Highest frequency the core's current policy allows, in kHz.
    fn policy_max_frequency(&self, core: usize) -> Result<u32, HalError>;

    /// Drive `core` to `khz`.
    fn set_core_max_frequency(&mut self, core: usize, khz: u32) -> Result<(), HalError>;
}

/// Temperature sensor (TSENS).
pub trait TempSensor {
    /// Current reading in whole degrees Celsius.
    fn read_temperature(&mut self, sensor: u32) -> Result<i32, HalError>;
}

/// Per-core frequency ceiling control.
pub trait FreqLimits {
    /// Number of cores that carry a ceiling, online or not.
    fn possible_cores(&self) -> usize;

    fn set_frequency_ceiling(&mut self, core: usize, ceiling: Ceiling) -> Result<(), HalError>;

    /// Re-evaluate the core's frequency policy against its limits.
    fn apply_policy_update(&mut self, core: usize) -> Result<(), HalError>;

    /// Force the core to a frequency at or below `khz` now, without waiting
    /// for the governor's next sample.
    fn drive_frequency(&mut self, core: usize, khz: u32) -> Result<(), HalError>;
}

/// Hardware temperature watchpoints for the event-driven thermal variant.
pub trait TripSensor {
    /// Fire an interrupt when the reading rises to `high` or falls to
    /// `low`. `None` leaves that side unarmed.
    fn arm_temperature_trip(&mut self, sensor: u32, high: Option<i32>, low: Option<i32>) -> Result<(), HalError>;

    fn disarm_temperature_trip(&mut self, sensor: u32);
}
