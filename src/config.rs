//! # MSM-PM Configuration
//!
//! Compile-time limits plus the runtime tunables for both controllers.
//!
//! Limits are fixed at compile time so every controller buffer can be a
//! plain array. Tunables are lock-free atomics read with `Relaxed`
//! ordering once per tick: a writer racing a tick is seen on the next one,
//! which is all the controllers need. Out-of-range values are clamped on
//! read, never rejected mid-tick.

use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};

use crate::error::TunableError;
use crate::thermal::{Tier, TierTable};

// ---------------------------------------------------------------------------
// Platform limits
// ---------------------------------------------------------------------------

/// Number of application cores on the SoC. Core 0 is the primary and is
/// never taken offline by the hotplug controller.
pub const MAX_CORES: usize = 4;

/// Depth of the run-queue load history ring.
pub const HISTORY_SIZE: usize = 10;

/// Fixed-point shift for load samples. `FIXED_1` is one runnable thread.
pub const FSHIFT: u32 = 11;

/// One runnable thread in fixed point.
pub const FIXED_1: u32 = 1 << FSHIFT;

/// Maximum number of thermal tiers the ladder can hold.
pub const MAX_TIERS: usize = 8;

/// SysTick frequency in Hz for the Cortex-M4 port. One tick = 1 ms.
pub const TICK_HZ: u32 = 1000;

/// Core clock of the power-management MCU (16 MHz HSI).
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;

// ---------------------------------------------------------------------------
// Hotplug defaults
// ---------------------------------------------------------------------------

/// Default hotplug sampling period.
pub const DEF_SAMPLING_MS: u32 = 10;

/// Default delay between drift detection and forced reconciliation.
pub const DEF_VERIFY_MS: u32 = 1000;

/// Delay before the first hotplug tick after boot. Turning cores off
/// before platform PM has settled is not safe.
pub const STARTUP_DELAY_MS: u32 = 5000;

/// Delay before the first hotplug tick after resume.
pub const RESUME_DELAY_MS: u32 = 1;

// ---------------------------------------------------------------------------
// Thermal defaults
// ---------------------------------------------------------------------------

/// Default thermal polling period.
pub const DEF_POLL_MS: u32 = 1000;

/// Timed re-evaluation under trip-point wake, so tunable changes are
/// picked up even when no watchpoint fires.
pub const DEF_TRIP_BACKSTOP_MS: u32 = 10_000;

/// Readings at or above this temperature are logged at info level.
pub const DEF_WATCH_TEMP_C: i32 = 50;

/// Degrees below a tier's threshold before the tier is released.
pub const DEF_HYSTERESIS_C: i32 = 5;

/// Default TSENS sensor.
pub const DEF_SENSOR_ID: u32 = 0;

/// Default throttle ladder: `(threshold °C, ceiling kHz)`.
pub const DEF_TIERS: [(i32, u32); 3] = [(60, 1_350_000), (70, 918_000), (80, 384_000)];

const fn def_threshold(i: usize) -> i32 {
    if i < DEF_TIERS.len() {
        DEF_TIERS[i].0
    } else {
        0
    }
}

const fn def_ceiling(i: usize) -> u32 {
    if i < DEF_TIERS.len() {
        DEF_TIERS[i].1
    } else {
        0
    }
}

// ---------------------------------------------------------------------------
// Hotplug tunables
// ---------------------------------------------------------------------------

/// Runtime knobs for the core count controller.
#[derive(Debug)]
pub struct HotplugTunables {
    active: AtomicBool,
    min_cores: AtomicU32,
    max_cores: AtomicU32,
    sampling_ms: AtomicU32,
    verify_ms: AtomicU32,
    reset_stats: AtomicBool,
}

impl HotplugTunables {
    pub const fn new() -> Self {
        Self {
            active: AtomicBool::new(true),
            min_cores: AtomicU32::new(1),
            max_cores: AtomicU32::new(MAX_CORES as u32),
            sampling_ms: AtomicU32::new(DEF_SAMPLING_MS),
            verify_ms: AtomicU32::new(DEF_VERIFY_MS),
            reset_stats: AtomicBool::new(false),
        }
    }

    pub fn active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }

    pub fn set_min_cores(&self, cores: u32) {
        self.min_cores.store(cores, Ordering::Relaxed);
    }

    pub fn set_max_cores(&self, cores: u32) {
        self.max_cores.store(cores, Ordering::Relaxed);
    }

    /// Effective `(min, max)` core bounds.
    ///
    /// `max` is clamped to `[1, MAX_CORES]` first, then `min` to `[1, max]`,
    /// so a writer setting `min > max` gets `min == max` rather than an
    /// empty range.
    pub fn core_bounds(&self) -> (usize, usize) {
        let max = (self.max_cores.load(Ordering::Relaxed) as usize).clamp(1, MAX_CORES);
        let min = (self.min_cores.load(Ordering::Relaxed) as usize).clamp(1, max);
        (min, max)
    }

    pub fn sampling_ms(&self) -> u32 {
        self.sampling_ms.load(Ordering::Relaxed).max(1)
    }

    pub fn set_sampling_ms(&self, ms: u32) {
        self.sampling_ms.store(ms, Ordering::Relaxed);
    }

    pub fn verify_ms(&self) -> u32 {
        self.verify_ms.load(Ordering::Relaxed)
    }

    pub fn set_verify_ms(&self, ms: u32) {
        self.verify_ms.store(ms, Ordering::Relaxed);
    }

    /// Ask the controller to clear its statistics on the next tick.
    pub fn request_stats_reset(&self) {
        self.reset_stats.store(true, Ordering::Relaxed);
    }

    /// Consume a pending stats reset request.
    pub fn take_stats_reset(&self) -> bool {
        self.reset_stats.swap(false, Ordering::Relaxed)
    }
}

impl Default for HotplugTunables {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Thermal tunables
// ---------------------------------------------------------------------------

/// Runtime knobs for the thermal throttle controller.
///
/// Tier slots beyond `tier_count` are ignored. Slots are written
/// individually, so a reader may observe a half-updated ladder for one
/// tick; [`ThermalTunables::tier_table`] sanitizes whatever it sees.
#[derive(Debug)]
pub struct ThermalTunables {
    enabled: AtomicBool,
    poll_ms: AtomicU32,
    watch_temp: AtomicI32,
    hysteresis: AtomicI32,
    sensor_id: AtomicU32,
    tier_count: AtomicU32,
    thresholds: [AtomicI32; MAX_TIERS],
    ceilings: [AtomicU32; MAX_TIERS],
}

impl ThermalTunables {
    pub const fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            poll_ms: AtomicU32::new(DEF_POLL_MS),
            watch_temp: AtomicI32::new(DEF_WATCH_TEMP_C),
            hysteresis: AtomicI32::new(DEF_HYSTERESIS_C),
            sensor_id: AtomicU32::new(DEF_SENSOR_ID),
            tier_count: AtomicU32::new(DEF_TIERS.len() as u32),
            thresholds: [
                AtomicI32::new(def_threshold(0)),
                AtomicI32::new(def_threshold(1)),
                AtomicI32::new(def_threshold(2)),
                AtomicI32::new(def_threshold(3)),
                AtomicI32::new(def_threshold(4)),
                AtomicI32::new(def_threshold(5)),
                AtomicI32::new(def_threshold(6)),
                AtomicI32::new(def_threshold(7)),
            ],
            ceilings: [
                AtomicU32::new(def_ceiling(0)),
                AtomicU32::new(def_ceiling(1)),
                AtomicU32::new(def_ceiling(2)),
                AtomicU32::new(def_ceiling(3)),
                AtomicU32::new(def_ceiling(4)),
                AtomicU32::new(def_ceiling(5)),
                AtomicU32::new(def_ceiling(6)),
                AtomicU32::new(def_ceiling(7)),
            ],
        }
    }

    /// Build tunables holding `tiers` (extra entries beyond `MAX_TIERS`
    /// are rejected).
    pub fn with_tiers(tiers: &[(i32, u32)]) -> Result<Self, TunableError> {
        let tunables = Self::new();
        tunables.set_tiers(tiers)?;
        Ok(tunables)
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn poll_ms(&self) -> u32 {
        self.poll_ms.load(Ordering::Relaxed).max(1)
    }

    pub fn set_poll_ms(&self, ms: u32) {
        self.poll_ms.store(ms, Ordering::Relaxed);
    }

    pub fn watch_temp(&self) -> i32 {
        self.watch_temp.load(Ordering::Relaxed)
    }

    pub fn set_watch_temp(&self, temp: i32) {
        self.watch_temp.store(temp, Ordering::Relaxed);
    }

    /// Hysteresis margin, at least 1 °C so `release_temp < threshold`
    /// always holds.
    pub fn hysteresis(&self) -> i32 {
        self.hysteresis.load(Ordering::Relaxed).max(1)
    }

    pub fn set_hysteresis(&self, degrees: i32) {
        self.hysteresis.store(degrees, Ordering::Relaxed);
    }

    pub fn sensor_id(&self) -> u32 {
        self.sensor_id.load(Ordering::Relaxed)
    }

    pub fn set_sensor_id(&self, sensor: u32) {
        self.sensor_id.store(sensor, Ordering::Relaxed);
    }

    /// Overwrite a single tier slot.
    pub fn set_tier(&self, index: usize, threshold: i32, ceiling_khz: u32) -> Result<(), TunableError> {
        if index >= MAX_TIERS {
            return Err(TunableError::TierOutOfRange { index, max: MAX_TIERS });
        }
        self.thresholds[index].store(threshold, Ordering::Relaxed);
        self.ceilings[index].store(ceiling_khz, Ordering::Relaxed);
        Ok(())
    }

    pub fn set_tier_count(&self, count: usize) -> Result<(), TunableError> {
        if count > MAX_TIERS {
            return Err(TunableError::TooManyTiers { count, max: MAX_TIERS });
        }
        self.tier_count.store(count as u32, Ordering::Relaxed);
        Ok(())
    }

    /// Replace the whole ladder.
    pub fn set_tiers(&self, tiers: &[(i32, u32)]) -> Result<(), TunableError> {
        if tiers.len() > MAX_TIERS {
            return Err(TunableError::TooManyTiers { count: tiers.len(), max: MAX_TIERS });
        }
        for (i, &(threshold, ceiling)) in tiers.iter().enumerate() {
            self.set_tier(i, threshold, ceiling)?;
        }
        self.set_tier_count(tiers.len())
    }

    /// Snapshot the configured ladder into a sanitized [`TierTable`].
    pub fn tier_table(&self) -> TierTable {
        let count = (self.tier_count.load(Ordering::Relaxed) as usize).min(MAX_TIERS);
        let mut raw = [Tier { threshold: 0, ceiling_khz: 0 }; MAX_TIERS];
        for (i, slot) in raw.iter_mut().enumerate().take(count) {
            *slot = Tier {
                threshold: self.thresholds[i].load(Ordering::Relaxed),
                ceiling_khz: self.ceilings[i].load(Ordering::Relaxed),
            };
        }
        TierTable::from_tiers(&raw[..count])
    }
}

impl Default for ThermalTunables {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_bounds_defaults() {
        let t = HotplugTunables::new();
        assert_eq!(t.core_bounds(), (1, MAX_CORES));
    }

    #[test]
    fn test_core_bounds_min_above_max_is_clamped() {
        let t = HotplugTunables::new();
        t.set_min_cores(4);
        t.set_max_cores(2);
        assert_eq!(t.core_bounds(), (2, 2), "min must collapse onto max");
    }

    #[test]
    fn test_core_bounds_zero_and_oversized() {
        let t = HotplugTunables::new();
        t.set_min_cores(0);
        t.set_max_cores(99);
        assert_eq!(t.core_bounds(), (1, MAX_CORES));
        t.set_max_cores(0);
        assert_eq!(t.core_bounds(), (1, 1), "at least the primary core stays up");
    }

    #[test]
    fn test_sampling_interval_never_zero() {
        let t = HotplugTunables::new();
        t.set_sampling_ms(0);
        assert_eq!(t.sampling_ms(), 1);
    }

    #[test]
    fn test_stats_reset_is_consumed_once() {
        let t = HotplugTunables::new();
        assert!(!t.take_stats_reset());
        t.request_stats_reset();
        assert!(t.take_stats_reset());
        assert!(!t.take_stats_reset());
    }

    #[test]
    fn test_default_tier_table() {
        let t = ThermalTunables::new();
        let table = t.tier_table();
        assert_eq!(table.len(), DEF_TIERS.len());
        for (i, &(threshold, ceiling)) in DEF_TIERS.iter().enumerate() {
            let tier = table.get(i).unwrap();
            assert_eq!((tier.threshold, tier.ceiling_khz), (threshold, ceiling));
        }
    }

    #[test]
    fn test_set_tier_out_of_range() {
        let t = ThermalTunables::new();
        assert_eq!(
            t.set_tier(MAX_TIERS, 90, 300_000),
            Err(TunableError::TierOutOfRange { index: MAX_TIERS, max: MAX_TIERS })
        );
    }

    #[test]
    fn test_with_tiers_replaces_ladder() {
        let t = ThermalTunables::with_tiers(&[(50, 1_512_000), (90, 384_000)]).unwrap();
        let table = t.tier_table();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(1).unwrap().threshold, 90);
    }

    #[test]
    fn test_hysteresis_floor() {
        let t = ThermalTunables::new();
        t.set_hysteresis(0);
        assert_eq!(t.hysteresis(), 1);
        t.set_hysteresis(-3);
        assert_eq!(t.hysteresis(), 1);
    }
}
