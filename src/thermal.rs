//! # Thermal Throttle Controller
//!
//! Samples a temperature sensor and caps the frequency of every core
//! according to a ladder of tiers. Each tier pairs an entry threshold with
//! a ceiling; hotter tiers carry lower ceilings.
//!
//! ## Tier Selection
//!
//! ```text
//!   temp ▲
//!        │  ── thr[3] ─────────  enter tier 3
//!        │  ── thr[2] ─────────  enter tier 2
//!        │       ...
//!        │  ── thr[i] ─────────  enter tier i
//!        │  ── thr[i] - hyst ──  release_temp: leave tier i
//!        │  ── thr[0] ─────────  enter tier 0
//!        └──────────────────────
//! ```
//!
//! A tier is entered at its threshold and left only once the reading
//! drops to its release temperature. On release, the ladder is rescanned
//! once so a reading still above a lower threshold lands in that tier
//! instead of running unthrottled for a period.
//!
//! While a tier is held, only hotter tiers can be entered. Cooler tiers
//! become reachable again only after the release, so a ladder with steps
//! closer together than the hysteresis never steps the ceiling back up
//! inside the band.

use core::fmt;

use tracing::{debug, info, warn};

use crate::arch::{FreqLimits, TempSensor};
use crate::config::{ThermalTunables, MAX_TIERS};
use crate::error::HalError;
use crate::stats::ThermalStats;
use crate::trigger::{PollTrigger, TripWindow, WakeTrigger};

/// Frequency limit applied to every core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ceiling {
    NoLimit,
    Khz(u32),
}

impl Ceiling {
    pub fn khz(self) -> Option<u32> {
        match self {
            Ceiling::NoLimit => None,
            Ceiling::Khz(khz) => Some(khz),
        }
    }

    pub fn is_limited(self) -> bool {
        matches!(self, Ceiling::Khz(_))
    }
}

impl fmt::Display for Ceiling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ceiling::NoLimit => f.write_str("none"),
            Ceiling::Khz(khz) => write!(f, "{} kHz", khz),
        }
    }
}

/// One step of the throttle ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tier {
    /// Entry temperature, °C.
    pub threshold: i32,
    pub ceiling_khz: u32,
}

impl Tier {
    pub const fn new(threshold: i32, ceiling_khz: u32) -> Self {
        Self { threshold, ceiling_khz }
    }
}

// ---------------------------------------------------------------------------
// Tier table
// ---------------------------------------------------------------------------

/// Ladder with strictly increasing thresholds and non-increasing ceilings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierTable {
    tiers: [Tier; MAX_TIERS],
    len: usize,
}

impl TierTable {
    pub const fn empty() -> Self {
        Self {
            tiers: [Tier::new(0, 0); MAX_TIERS],
            len: 0,
        }
    }

    /// Build a table from raw tiers, in order.
    ///
    /// A tier whose threshold does not exceed the previous kept one is
    /// dropped. A ceiling above the previous kept ceiling is lowered to
    /// match. Anything past `MAX_TIERS` is ignored.
    pub fn from_tiers(raw: &[Tier]) -> Self {
        let mut table = Self::empty();
        for &tier in raw.iter().take(MAX_TIERS) {
            let tier = match table.last() {
                Some(prev) if tier.threshold <= prev.threshold => continue,
                Some(prev) => Tier::new(tier.threshold, tier.ceiling_khz.min(prev.ceiling_khz)),
                None => tier,
            };
            table.tiers[table.len] = tier;
            table.len += 1;
        }
        table
    }

    pub fn from_pairs(pairs: &[(i32, u32)]) -> Self {
        let mut raw = [Tier::new(0, 0); MAX_TIERS];
        let count = pairs.len().min(MAX_TIERS);
        for (slot, &(threshold, ceiling)) in raw.iter_mut().zip(pairs) {
            *slot = Tier::new(threshold, ceiling);
        }
        Self::from_tiers(&raw[..count])
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, index: usize) -> Option<&Tier> {
        self.as_slice().get(index)
    }

    pub fn last(&self) -> Option<&Tier> {
        self.as_slice().last()
    }

    pub fn as_slice(&self) -> &[Tier] {
        &self.tiers[..self.len]
    }

    pub fn iter(&self) -> core::slice::Iter<'_, Tier> {
        self.as_slice().iter()
    }
}

impl Default for TierTable {
    fn default() -> Self {
        Self::empty()
    }
}

// ---------------------------------------------------------------------------
// Throttle state
// ---------------------------------------------------------------------------

/// Hysteresis state of the throttle ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThermalState {
    /// Most recent successful reading.
    pub current_temp: Option<i32>,
    /// Ceiling currently enforced on every core.
    pub limited_max_freq: Ceiling,
    /// Reading at or below which the active tier is released.
    pub release_temp: Option<i32>,
    pub active_tier: Option<usize>,
}

impl ThermalState {
    pub const fn new() -> Self {
        Self {
            current_temp: None,
            limited_max_freq: Ceiling::NoLimit,
            release_temp: None,
            active_tier: None,
        }
    }

    /// Clear tier and release tracking. The enforced ceiling is left to
    /// the caller.
    pub fn release(&mut self) {
        self.active_tier = None;
        self.release_temp = None;
    }

    /// Pick the ceiling for `temp` and update the tier state.
    pub fn select_frequency(&mut self, temp: i32, table: &TierTable, hysteresis: i32) -> Ceiling {
        let held = self
            .active_tier
            .and_then(|i| table.get(i).map(|tier| (i, tier.ceiling_khz)))
            .filter(|_| self.release_temp.is_some_and(|release| temp > release));

        if let Some((index, ceiling_khz)) = held {
            return self
                .enter_tier(temp, table, index + 1, hysteresis)
                .unwrap_or(Ceiling::Khz(ceiling_khz));
        }

        self.release();
        self.enter_tier(temp, table, 0, hysteresis).unwrap_or(Ceiling::NoLimit)
    }

    /// Scan tiers `from..` top-down for the first one at or below `temp`.
    fn enter_tier(&mut self, temp: i32, table: &TierTable, from: usize, hysteresis: i32) -> Option<Ceiling> {
        let (index, tier) = table
            .iter()
            .enumerate()
            .skip(from)
            .rev()
            .find(|(_, tier)| temp >= tier.threshold)?;

        self.active_tier = Some(index);
        self.release_temp = Some(tier.threshold.saturating_sub(hysteresis));
        Some(Ceiling::Khz(tier.ceiling_khz))
    }

    /// Temperatures at which the tier decision can next change: the entry
    /// threshold of the next hotter tier and the current release point.
    pub fn trip_window(&self, table: &TierTable) -> TripWindow {
        let next = self.active_tier.map_or(0, |i| i + 1);
        TripWindow {
            high: table.get(next).map(|tier| tier.threshold),
            low: self.release_temp,
        }
    }
}

impl Default for ThermalState {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Temperature-driven frequency ceiling controller.
///
/// `W` decides when the next tick happens: [`PollTrigger`] for fixed-period
/// polling, [`crate::trigger::TripTrigger`] for sensor watchpoints.
pub struct ThermalController<'t, H, W = PollTrigger> {
    hal: H,
    trigger: W,
    tunables: &'t ThermalTunables,
    state: ThermalState,
    stats: ThermalStats,
}

impl<'t, H, W> ThermalController<'t, H, W>
where
    H: TempSensor + FreqLimits,
    W: WakeTrigger,
{
    pub fn new(hal: H, trigger: W, tunables: &'t ThermalTunables) -> Self {
        Self {
            hal,
            trigger,
            tunables,
            state: ThermalState::new(),
            stats: ThermalStats::new(),
        }
    }

    pub fn hal(&self) -> &H {
        &self.hal
    }

    pub fn hal_mut(&mut self) -> &mut H {
        &mut self.hal
    }

    pub fn trigger(&self) -> &W {
        &self.trigger
    }

    pub fn trigger_mut(&mut self) -> &mut W {
        &mut self.trigger
    }

    pub fn tunables(&self) -> &'t ThermalTunables {
        self.tunables
    }

    pub fn state(&self) -> &ThermalState {
        &self.state
    }

    pub fn stats(&self) -> &ThermalStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut ThermalStats {
        &mut self.stats
    }

    /// Read, select, apply. Returns the delay until the next timed tick, or
    /// `None` if only a hardware trip will wake the controller.
    ///
    /// A failed read keeps every bit of state and retries after one
    /// polling period.
    pub fn tick(&mut self) -> Option<u32> {
        let sensor = self.tunables.sensor_id();
        let poll_ms = self.tunables.poll_ms();

        let temp = match self.hal.read_temperature(sensor) {
            Ok(temp) => temp,
            Err(err) => {
                warn!(sensor, %err, "unable to read temperature");
                self.stats.record_sensor_error();
                return Some(poll_ms);
            }
        };

        let table = self.tunables.tier_table();
        self.evaluate(temp, &table);
        self.trigger.rearm(sensor, self.state.trip_window(&table), poll_ms)
    }

    /// Run tier selection for `temp` and enforce the result.
    pub fn evaluate(&mut self, temp: i32, table: &TierTable) -> Ceiling {
        let sensor = self.tunables.sensor_id();
        let previous = self.state.active_tier;
        self.state.current_temp = Some(temp);

        let ceiling = self.state.select_frequency(temp, table, self.tunables.hysteresis());
        if temp >= self.tunables.watch_temp() {
            info!(sensor, temp, %ceiling, "temperature reading");
        } else {
            debug!(sensor, temp, %ceiling, "temperature reading");
        }

        self.stats.record_tick(previous, self.state.active_tier);
        self.apply_ceiling(ceiling, temp);
        ceiling
    }

    /// Push `ceiling` to every possible core. No-op if it is already the
    /// enforced ceiling. Returns the number of cores that failed.
    pub fn apply_ceiling(&mut self, ceiling: Ceiling, temp: i32) -> usize {
        if ceiling == self.state.limited_max_freq {
            return 0;
        }

        self.state.limited_max_freq = ceiling;
        self.stats.record_ceiling_change();
        info!(temp, %ceiling, "limiting max frequency");
        self.write_ceiling(ceiling)
    }

    /// Stop throttling: disarm the trigger, lift any ceiling, and forget the
    /// tier state.
    pub fn disable(&mut self) {
        self.trigger.disarm(self.tunables.sensor_id());
        if self.state.limited_max_freq.is_limited() {
            self.state.limited_max_freq = Ceiling::NoLimit;
            self.stats.record_ceiling_change();
            self.write_ceiling(Ceiling::NoLimit);
            info!("thermal limits released");
        }
        self.state.release();
    }

    fn write_ceiling(&mut self, ceiling: Ceiling) -> usize {
        let mut failures = 0;
        for core in 0..self.hal.possible_cores() {
            if let Err(err) = self.update_core(core, ceiling) {
                warn!(cpu = core, %ceiling, %err, "unable to limit frequency");
                failures += 1;
            }
        }
        failures
    }

    fn update_core(&mut self, core: usize, ceiling: Ceiling) -> Result<(), HalError> {
        self.hal.set_frequency_ceiling(core, ceiling)?;
        self.hal.apply_policy_update(core)?;
        if let Ceiling::Khz(khz) = ceiling {
            self.hal.drive_frequency(core, khz)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
