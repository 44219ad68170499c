//! # Diagnostic Counters
//!
//! Read-only observability for both controllers. Nothing here feeds back
//! into a decision; counters saturate rather than wrap.

use crate::config::{MAX_CORES, MAX_TIERS};

/// Hotplug activity counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HotplugStats {
    /// Ticks spent wanting `i + 1` cores.
    pub time_cores_running: [u32; MAX_CORES],
    /// Successful bring-ups per core.
    pub times_core_up: [u32; MAX_CORES],
    /// Successful unplugs per core.
    pub times_core_down: [u32; MAX_CORES],
    pub drift_detected: u32,
    pub verify_passes: u32,
}

impl HotplugStats {
    pub const fn new() -> Self {
        Self {
            time_cores_running: [0; MAX_CORES],
            times_core_up: [0; MAX_CORES],
            times_core_down: [0; MAX_CORES],
            drift_detected: 0,
            verify_passes: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub(crate) fn record_desired(&mut self, cores: usize) {
        if let Some(slot) = cores.checked_sub(1).and_then(|i| self.time_cores_running.get_mut(i)) {
            *slot = slot.saturating_add(1);
        }
    }

    pub(crate) fn record_up(&mut self, core: usize) {
        self.times_core_up[core] = self.times_core_up[core].saturating_add(1);
    }

    pub(crate) fn record_down(&mut self, core: usize) {
        self.times_core_down[core] = self.times_core_down[core].saturating_add(1);
    }
}

impl Default for HotplugStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Thermal activity counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThermalStats {
    /// Slot 0 is unthrottled; slot `i + 1` is tier `i`.
    pub ticks_in_state: [u32; MAX_TIERS + 1],
    pub tier_transitions: u32,
    pub ceiling_changes: u32,
    pub sensor_errors: u32,
}

impl ThermalStats {
    pub const fn new() -> Self {
        Self {
            ticks_in_state: [0; MAX_TIERS + 1],
            tier_transitions: 0,
            ceiling_changes: 0,
            sensor_errors: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub(crate) fn record_tick(&mut self, previous: Option<usize>, current: Option<usize>) {
        let slot = current.map_or(0, |tier| tier + 1);
        self.ticks_in_state[slot] = self.ticks_in_state[slot].saturating_add(1);
        if previous != current {
            self.tier_transitions = self.tier_transitions.saturating_add(1);
        }
    }

    pub(crate) fn record_ceiling_change(&mut self) {
        self.ceiling_changes = self.ceiling_changes.saturating_add(1);
    }

    pub(crate) fn record_sensor_error(&mut self) {
        self.sensor_errors = self.sensor_errors.saturating_add(1);
    }

    /// Ticks spent in tier `tier`, or unthrottled for `None`.
    pub fn ticks_in(&self, tier: Option<usize>) -> u32 {
        self.ticks_in_state[tier.map_or(0, |t| t + 1)]
    }
}

impl Default for ThermalStats {
    fn default() -> Self {
        Self::new()
    }
}
