//! # Simulated Port
//!
//! In-memory implementation of every port trait. Used by the unit and
//! integration tests and for host-side simulation of the control loops.
//!
//! Each device records how often it was called so tests can assert on
//! idempotence, and exposes fault-injection switches for the error paths.

use crate::arch::{CpuHotplug, FreqLimits, RunQueueStats, TempSensor, TripSensor};
use crate::config::{FIXED_1, MAX_CORES};
use crate::error::HalError;
use crate::hotplug::CoreMask;
use crate::thermal::Ceiling;

/// Default policy maximum reported by [`SimCpus`].
pub const SIM_POLICY_MAX_KHZ: u32 = 1_512_000;

// ---------------------------------------------------------------------------
// CPUs
// ---------------------------------------------------------------------------

/// Simulated application cores plus the scheduler's run-queue statistic.
#[derive(Debug, Clone)]
pub struct SimCpus {
    /// Live online state per core.
    pub online: [bool; MAX_CORES],
    /// Value returned by the next `sample_runnable_threads`.
    pub runnable: u32,
    /// Make `sample_runnable_threads` fail.
    pub fail_sample: bool,
    /// Cores that refuse to come online.
    pub refuse_online: CoreMask,
    /// Cores that refuse to go offline.
    pub refuse_offline: CoreMask,
    /// Cores that refuse a new maximum frequency.
    pub refuse_frequency: CoreMask,
    /// Frequency each core was last driven to after a bring-up.
    pub driven_khz: [Option<u32>; MAX_CORES],
    pub policy_max_khz: u32,
    /// Successful plus refused `set_core_online` calls.
    pub hotplug_calls: u32,
    pub frequency_calls: u32,
}

impl SimCpus {
    /// Only the primary core online.
    pub fn new() -> Self {
        let mut online = [false; MAX_CORES];
        online[0] = true;
        Self {
            online,
            runnable: 0,
            fail_sample: false,
            refuse_online: 0,
            refuse_offline: 0,
            refuse_frequency: 0,
            driven_khz: [None; MAX_CORES],
            policy_max_khz: SIM_POLICY_MAX_KHZ,
            hotplug_calls: 0,
            frequency_calls: 0,
        }
    }

    /// Set the run-queue statistic in whole threads plus a fraction
    /// expressed in 1/`FIXED_1` units.
    pub fn set_load(&mut self, threads: u32, fraction: u32) {
        self.runnable = threads * FIXED_1 + fraction;
    }

    /// Flip a core behind the controller's back.
    pub fn force_external(&mut self, core: usize, online: bool) {
        self.online[core] = online;
    }

    pub fn online_count(&self) -> usize {
        self.online.iter().filter(|&&on| on).count()
    }

    pub fn online_mask(&self) -> CoreMask {
        self.online
            .iter()
            .enumerate()
            .filter(|(_, &on)| on)
            .fold(0, |mask, (i, _)| mask | (1 << i))
    }

    /// Total hardware calls so far.
    pub fn calls(&self) -> u32 {
        self.hotplug_calls + self.frequency_calls
    }
}

impl Default for SimCpus {
    fn default() -> Self {
        Self::new()
    }
}

impl RunQueueStats for SimCpus {
    fn sample_runnable_threads(&mut self) -> Result<u32, HalError> {
        if self.fail_sample {
            return Err(HalError::MetricUnavailable);
        }
        Ok(self.runnable)
    }
}

impl CpuHotplug for SimCpus {
    fn set_core_online(&mut self, core: usize, online: bool) -> Result<(), HalError> {
        self.hotplug_calls += 1;
        let refused = if online { self.refuse_online } else { self.refuse_offline };
        if refused & (1 << core) != 0 {
            return Err(HalError::HotplugRejected { core, online });
        }
        self.online[core] = online;
        if !online {
            self.driven_khz[core] = None;
        }
        Ok(())
    }

    fn is_core_online(&self, core: usize) -> bool {
        self.online[core]
    }

    fn policy_max_frequency(&self, core: usize) -> Result<u32, HalError> {
        if !self.online[core] {
            return Err(HalError::NoPolicy { core });
        }
        Ok(self.policy_max_khz)
    }

    fn set_core_max_frequency(&mut self, core: usize, khz: u32) -> Result<(), HalError> {
        self.frequency_calls += 1;
        if self.refuse_frequency & (1 << core) != 0 {
            return Err(HalError::FrequencyRejected { core, khz });
        }
        self.driven_khz[core] = Some(khz);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Thermal
// ---------------------------------------------------------------------------

/// Simulated TSENS sensor and per-core cpufreq limits.
#[derive(Debug, Clone)]
pub struct SimThermal {
    pub temp: i32,
    pub fail_read: bool,
    pub cores: usize,
    pub ceilings: [Ceiling; MAX_CORES],
    /// Frequency each core was last forced to.
    pub driven_khz: [Option<u32>; MAX_CORES],
    pub policy_updates: [u32; MAX_CORES],
    /// Cores whose ceiling update is refused.
    pub refuse_ceiling: CoreMask,
    pub ceiling_calls: u32,
    pub reads: u32,
}

impl SimThermal {
    pub fn new(temp: i32) -> Self {
        Self {
            temp,
            fail_read: false,
            cores: MAX_CORES,
            ceilings: [Ceiling::NoLimit; MAX_CORES],
            driven_khz: [None; MAX_CORES],
            policy_updates: [0; MAX_CORES],
            refuse_ceiling: 0,
            ceiling_calls: 0,
            reads: 0,
        }
    }
}

impl Default for SimThermal {
    fn default() -> Self {
        Self::new(30)
    }
}

impl TempSensor for SimThermal {
    fn read_temperature(&mut self, sensor: u32) -> Result<i32, HalError> {
        self.reads += 1;
        if self.fail_read {
            return Err(HalError::SensorRead { sensor });
        }
        Ok(self.temp)
    }
}

impl FreqLimits for SimThermal {
    fn possible_cores(&self) -> usize {
        self.cores.min(MAX_CORES)
    }

    fn set_frequency_ceiling(&mut self, core: usize, ceiling: Ceiling) -> Result<(), HalError> {
        self.ceiling_calls += 1;
        if self.refuse_ceiling & (1 << core) != 0 {
            return Err(HalError::CeilingRejected { core });
        }
        self.ceilings[core] = ceiling;
        Ok(())
    }

    fn apply_policy_update(&mut self, core: usize) -> Result<(), HalError> {
        self.policy_updates[core] += 1;
        Ok(())
    }

    fn drive_frequency(&mut self, core: usize, khz: u32) -> Result<(), HalError> {
        self.driven_khz[core] = Some(khz);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Trip points
// ---------------------------------------------------------------------------

/// Simulated TSENS watchpoint block.
#[derive(Debug, Clone, Default)]
pub struct SimTrip {
    /// Currently programmed `(high, low)` window, if armed.
    pub armed: Option<(Option<i32>, Option<i32>)>,
    pub fail_arm: bool,
    pub arm_calls: u32,
}

impl SimTrip {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a reading of `temp` would fire the programmed window.
    pub fn fires_at(&self, temp: i32) -> bool {
        match self.armed {
            Some((high, low)) => high.is_some_and(|h| temp >= h) || low.is_some_and(|l| temp <= l),
            None => false,
        }
    }
}

impl TripSensor for SimTrip {
    fn arm_temperature_trip(&mut self, sensor: u32, high: Option<i32>, low: Option<i32>) -> Result<(), HalError> {
        self.arm_calls += 1;
        if self.fail_arm {
            self.armed = None;
            return Err(HalError::TripProgramming { sensor });
        }
        self.armed = Some((high, low));
        Ok(())
    }

    fn disarm_temperature_trip(&mut self, _sensor: u32) {
        self.armed = None;
    }
}
