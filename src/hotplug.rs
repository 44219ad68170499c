//! # Core Count Controller
//!
//! Load-driven hotplug. Every tick samples the run-queue statistic,
//! smooths it through a [`LoadHistory`], derives how many cores the load
//! needs, and brings cores online or offline to match.
//!
//! ## Decision
//!
//! With `k` cores commanded online and `avg` the smoothed load (fixed
//! point, `FIXED_1` = one runnable thread):
//!
//! | Condition              | Candidate                  |
//! |------------------------|----------------------------|
//! | `avg >= k + 0.5`       | `avg` rounded half-up      |
//! | `avg <= k - 0.5`       | `avg` rounded half-down    |
//! | otherwise              | `k`                        |
//!
//! The candidate is clamped to the `[min_cores, max_cores]` tunables. The
//! one-core-wide band around `k` keeps a single noisy sample from toggling
//! a core on every tick.
//!
//! ## State Machine
//!
//! ```text
//!   ┌────────┐  live state != commanded   ┌────────────────┐
//!   │ Normal │ ─────────────────────────► │ VerifyPending  │
//!   └────────┘                            │  (countdown)   │
//!        ▲        countdown expires:      └────────────────┘
//!        └──────── verify_cores() ───────────────┘
//! ```
//!
//! Another agent may plug or unplug cores behind the controller's back.
//! Actuating against that drifted baseline could fight it, so the
//! controller stops actuating, waits `verify_ms`, then forces every core
//! to the desired state in one reconciliation pass.

use tracing::{debug, warn};

use crate::arch::{CpuHotplug, RunQueueStats};
use crate::config::{HotplugTunables, FIXED_1, FSHIFT, HISTORY_SIZE, MAX_CORES};
use crate::error::HalError;
use crate::history::LoadHistory;
use crate::stats::HotplugStats;

/// Bit `i` set means core `i`.
pub type CoreMask = u32;

/// Mask of cores `0..count`.
#[inline]
pub const fn prefix_mask(count: usize) -> CoreMask {
    if count >= CoreMask::BITS as usize {
        CoreMask::MAX
    } else {
        (1 << count) - 1
    }
}

/// Smoothed load at which `online` cores grow.
#[inline]
pub const fn up_threshold(online: usize) -> u32 {
    online as u32 * FIXED_1 + FIXED_1 / 2
}

/// Smoothed load at which `online` cores shrink.
#[inline]
pub const fn down_threshold(online: usize) -> u32 {
    (online as u32 * FIXED_1).saturating_sub(FIXED_1 / 2)
}

/// Core count wanted for smoothed load `avg` with `online` cores up.
pub fn target_cores(avg: u32, online: usize, min: usize, max: usize) -> usize {
    let half = FIXED_1 / 2;
    let candidate = if avg >= up_threshold(online) {
        (avg.saturating_add(half) >> FSHIFT) as usize
    } else if online > 0 && avg <= down_threshold(online) {
        (avg.saturating_add(half - 1) >> FSHIFT) as usize
    } else {
        online
    };
    candidate.clamp(min, max)
}

// ---------------------------------------------------------------------------
// Core set state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlugMode {
    /// Actuate on every tick.
    Normal,
    /// Drift seen; actuation suspended for `countdown` more ticks.
    VerifyPending { countdown: u32 },
}

/// What the controller wants and what it believes it has commanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreSetState {
    desired: usize,
    commanded: CoreMask,
    mode: PlugMode,
}

impl CoreSetState {
    pub const fn new(commanded: CoreMask) -> Self {
        let online = commanded.count_ones() as usize;
        Self {
            desired: if online == 0 { 1 } else { online },
            commanded,
            mode: PlugMode::Normal,
        }
    }

    pub fn desired_count(&self) -> usize {
        self.desired
    }

    /// Cores the controller last commanded online. May differ from the
    /// hardware if something else changed it.
    pub fn actual_count(&self) -> usize {
        self.commanded.count_ones() as usize
    }

    pub fn commanded(&self) -> CoreMask {
        self.commanded
    }

    pub fn is_commanded_online(&self, core: usize) -> bool {
        self.commanded & (1 << core) != 0
    }

    pub fn mode(&self) -> PlugMode {
        self.mode
    }

    pub fn verify_pending(&self) -> bool {
        matches!(self.mode, PlugMode::VerifyPending { .. })
    }

    pub fn verify_countdown(&self) -> Option<u32> {
        match self.mode {
            PlugMode::VerifyPending { countdown } => Some(countdown),
            PlugMode::Normal => None,
        }
    }
}

/// Result of one [`CoreCountController::actuate`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actuation {
    /// Already at the target; no hardware calls made.
    Unchanged,
    /// Hotplug calls issued; `changed` of them succeeded.
    Applied { changed: usize },
    /// `core` disagreed with the commanded state; nothing was touched.
    Drift { core: usize },
}

/// Result of one controller tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlugOutcome {
    /// `active` tunable is off.
    Inactive,
    /// Run-queue sample failed; state untouched.
    SampleFailed,
    Actuated(Actuation),
    /// Still waiting out drift; `remaining` ticks to go.
    VerifyCountdown { remaining: u32 },
    /// Forced reconciliation ran; `changed` cores were switched.
    Verified { changed: usize },
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Load-driven core count controller over a hotplug port `H`.
pub struct CoreCountController<'t, H, const N: usize = HISTORY_SIZE> {
    hal: H,
    tunables: &'t HotplugTunables,
    history: LoadHistory<N>,
    cores: CoreSetState,
    stats: HotplugStats,
    needs_bootstrap: bool,
}

impl<'t, H, const N: usize> CoreCountController<'t, H, N>
where
    H: RunQueueStats + CpuHotplug,
{
    /// Take ownership of the port. The commanded set starts from whatever
    /// the hardware reports so nothing looks like drift before the first
    /// tick normalizes it.
    pub fn new(hal: H, tunables: &'t HotplugTunables) -> Self {
        let live = live_mask(&hal);
        Self {
            hal,
            tunables,
            history: LoadHistory::new(),
            cores: CoreSetState::new(live),
            stats: HotplugStats::new(),
            needs_bootstrap: true,
        }
    }

    // -- accessors ----------------------------------------------------------

    pub fn hal(&self) -> &H {
        &self.hal
    }

    pub fn hal_mut(&mut self) -> &mut H {
        &mut self.hal
    }

    pub fn into_hal(self) -> H {
        self.hal
    }

    pub fn tunables(&self) -> &'t HotplugTunables {
        self.tunables
    }

    pub fn state(&self) -> &CoreSetState {
        &self.cores
    }

    pub fn history(&self) -> &LoadHistory<N> {
        &self.history
    }

    pub fn stats(&self) -> &HotplugStats {
        &self.stats
    }

    /// Smoothed load (`nr_avg`), fixed point.
    pub fn load_average(&self) -> u32 {
        self.history.average()
    }

    pub fn online_count(&self) -> usize {
        self.cores.actual_count()
    }

    // -- tick ---------------------------------------------------------------

    /// One sample → decide → actuate cycle.
    pub fn tick(&mut self) -> PlugOutcome {
        if self.tunables.take_stats_reset() {
            self.stats.reset();
        }
        if self.needs_bootstrap {
            self.bootstrap();
        }
        if !self.tunables.active() {
            return PlugOutcome::Inactive;
        }

        let desired = match self.sample_and_decide() {
            Ok(desired) => desired,
            Err(err) => {
                warn!(%err, "run-queue sample failed, keeping current cores");
                return PlugOutcome::SampleFailed;
            }
        };
        self.stats.record_desired(desired);

        match self.cores.mode {
            PlugMode::VerifyPending { countdown } if countdown > 1 => {
                let remaining = countdown - 1;
                self.cores.mode = PlugMode::VerifyPending { countdown: remaining };
                PlugOutcome::VerifyCountdown { remaining }
            }
            PlugMode::VerifyPending { .. } => PlugOutcome::Verified {
                changed: self.verify_cores(desired),
            },
            PlugMode::Normal => PlugOutcome::Actuated(self.actuate(desired)),
        }
    }

    /// Feed one run-queue sample into the history and derive the desired
    /// core count.
    pub fn sample_and_decide(&mut self) -> Result<usize, HalError> {
        let sample = self.hal.sample_runnable_threads()?;
        let avg = self.history.push(sample);
        let (min, max) = self.tunables.core_bounds();
        let desired = target_cores(avg, self.cores.actual_count(), min, max);
        self.cores.desired = desired;
        Ok(desired)
    }

    /// Bring the commanded set to cores `0..desired`.
    ///
    /// Refuses to touch anything if the hardware has drifted from the
    /// commanded set; the controller then waits for a verify pass.
    pub fn actuate(&mut self, desired: usize) -> Actuation {
        let desired = desired.clamp(1, MAX_CORES);
        let target = prefix_mask(desired);
        if self.cores.commanded == target {
            return Actuation::Unchanged;
        }

        if let Some(core) = self.find_drift() {
            let countdown = self.verify_countdown();
            warn!(cpu = core, countdown, "core state changed externally, deferring to verify");
            self.cores.mode = PlugMode::VerifyPending { countdown };
            self.stats.drift_detected = self.stats.drift_detected.saturating_add(1);
            return Actuation::Drift { core };
        }

        let mut changed = 0;

        for core in 0..MAX_CORES {
            let bit = 1 << core;
            if target & bit == 0 || self.cores.commanded & bit != 0 {
                continue;
            }
            debug!(cpu = core, want = desired, "starting core");
            match self.hal.set_core_online(core, true) {
                Ok(()) => {
                    self.cores.commanded |= bit;
                    self.stats.record_up(core);
                    self.reapply_max_frequency(core);
                    changed += 1;
                }
                Err(err) => warn!(cpu = core, %err, "failed to bring core online"),
            }
        }

        for core in (0..MAX_CORES).rev() {
            let bit = 1 << core;
            if target & bit != 0 || self.cores.commanded & bit == 0 {
                continue;
            }
            debug!(cpu = core, want = desired, "unplugging core");
            match self.hal.set_core_online(core, false) {
                Ok(()) => {
                    self.cores.commanded &= !bit;
                    self.stats.record_down(core);
                    changed += 1;
                }
                Err(err) => warn!(cpu = core, %err, "failed to take core offline"),
            }
        }

        Actuation::Applied { changed }
    }

    /// Force every core to `core < desired`, ignoring drift tracking, and
    /// rebuild the commanded set from the result. Returns the number of
    /// cores switched.
    pub fn verify_cores(&mut self, desired: usize) -> usize {
        let desired = desired.clamp(1, MAX_CORES);
        let mut commanded = 0;
        let mut changed = 0;

        for core in 0..MAX_CORES {
            let want = core < desired;
            let mut online = self.hal.is_core_online(core);
            if online != want {
                match self.hal.set_core_online(core, want) {
                    Ok(()) => {
                        online = want;
                        changed += 1;
                        if want {
                            self.stats.record_up(core);
                            self.reapply_max_frequency(core);
                        } else {
                            self.stats.record_down(core);
                        }
                    }
                    Err(err) => warn!(cpu = core, want, %err, "verify could not switch core"),
                }
            }
            if online {
                commanded |= 1 << core;
            }
        }

        debug!(desired, changed, "verified core state");
        self.cores.commanded = commanded;
        self.cores.desired = desired;
        self.cores.mode = PlugMode::Normal;
        self.stats.verify_passes = self.stats.verify_passes.saturating_add(1);
        changed
    }

    // -- lifecycle ----------------------------------------------------------

    /// Put the cores in a known state: primary up, everything else down.
    /// Runs automatically on the first tick.
    pub fn bootstrap(&mut self) {
        if !self.hal.is_core_online(0) {
            debug!("bringing cpu0 online");
            if let Err(err) = self.hal.set_core_online(0, true) {
                warn!(%err, "failed to bring primary core online");
            }
        }
        self.unplug_secondaries();
        self.needs_bootstrap = false;
    }

    /// Screen-off: drop to the primary core only.
    pub fn suspend(&mut self) {
        self.unplug_secondaries();
    }

    /// Screen-on: bias the history so a second core comes up as soon as
    /// there is any real load, and force a verify on the next tick.
    pub fn resume(&mut self) {
        self.history.fill(up_threshold(1) - 1);
        self.cores.mode = PlugMode::VerifyPending { countdown: 1 };
    }

    // -- helpers ------------------------------------------------------------

    fn find_drift(&self) -> Option<usize> {
        (0..MAX_CORES)
            .rev()
            .find(|&core| self.hal.is_core_online(core) != self.cores.is_commanded_online(core))
    }

    fn verify_countdown(&self) -> u32 {
        self.tunables
            .verify_ms()
            .div_ceil(self.tunables.sampling_ms())
            .max(1)
    }

    /// A freshly onlined core must not sit at a stale frequency.
    fn reapply_max_frequency(&mut self, core: usize) {
        let result = self
            .hal
            .policy_max_frequency(core)
            .and_then(|khz| self.hal.set_core_max_frequency(core, khz));
        if let Err(err) = result {
            warn!(cpu = core, %err, "failed to target policy maximum");
        }
    }

    fn unplug_secondaries(&mut self) {
        for core in 1..MAX_CORES {
            if !self.hal.is_core_online(core) {
                continue;
            }
            debug!(cpu = core, "unplugging core");
            match self.hal.set_core_online(core, false) {
                Ok(()) => self.stats.record_down(core),
                Err(err) => warn!(cpu = core, %err, "failed to take core offline"),
            }
        }
        self.cores = CoreSetState::new(live_mask(&self.hal));
        self.cores.desired = 1;
    }
}

fn live_mask<H: CpuHotplug>(hal: &H) -> CoreMask {
    (0..MAX_CORES)
        .filter(|&core| hal.is_core_online(core))
        .fold(0, |mask, core| mask | (1 << core))
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::sim::{SimCpus, SIM_POLICY_MAX_KHZ};

    const F: u32 = FIXED_1;

    fn booted(tunables: &HotplugTunables) -> CoreCountController<'_, SimCpus> {
        let mut ctl = CoreCountController::new(SimCpus::new(), tunables);
        ctl.bootstrap();
        ctl
    }

    /// Feed `sample` until the history is saturated with it.
    fn settle<const N: usize>(ctl: &mut CoreCountController<'_, SimCpus, N>, threads: u32, fraction: u32) {
        ctl.hal_mut().set_load(threads, fraction);
        for _ in 0..N {
            ctl.tick();
        }
    }

    // -- decision -----------------------------------------------------------

    #[test]
    fn test_hysteresis_band_holds_count() {
        // k = 2: band is (1.5, 2.5).
        assert_eq!(target_cores(3 * F / 2 + 1, 2, 1, 4), 2);
        assert_eq!(target_cores(2 * F, 2, 1, 4), 2);
        assert_eq!(target_cores(5 * F / 2 - 1, 2, 1, 4), 2);
    }

    #[test]
    fn test_up_threshold_is_inclusive() {
        assert_eq!(target_cores(5 * F / 2, 2, 1, 4), 3, "2.5 with two cores grows to three");
    }

    #[test]
    fn test_down_threshold_is_inclusive() {
        assert_eq!(target_cores(3 * F / 2, 2, 1, 4), 1, "1.5 with two cores shrinks to one");
    }

    #[test]
    fn test_large_jump_skips_counts() {
        assert_eq!(target_cores(4 * F, 1, 1, 4), 4);
        assert_eq!(target_cores(0, 4, 1, 4), 1);
    }

    #[test]
    fn test_candidate_clamped_to_bounds() {
        assert_eq!(target_cores(4 * F, 1, 1, 2), 2);
        assert_eq!(target_cores(0, 3, 2, 4), 2);
    }

    #[test]
    fn test_history_of_five_averaging_two_and_a_half() {
        let tunables = HotplugTunables::new();
        let mut ctl: CoreCountController<'_, SimCpus, 5> = CoreCountController::new(SimCpus::new(), &tunables);
        ctl.bootstrap();

        // Two cores up and a saturated 2.0 history.
        ctl.verify_cores(2);
        ctl.hal_mut().set_load(2, 0);
        let mut desired = 0;
        for _ in 0..5 {
            desired = ctl.sample_and_decide().unwrap();
        }
        assert_eq!(desired, 2, "2.0 sits inside the two-core band");

        // Five samples of 2.5 → average exactly 2.5.
        ctl.hal_mut().set_load(2, F / 2);
        for _ in 0..5 {
            desired = ctl.sample_and_decide().unwrap();
        }
        assert_eq!(ctl.load_average(), 5 * F / 2);
        assert_eq!(desired, 3);
    }

    // -- actuation ----------------------------------------------------------

    #[test]
    fn test_actuate_is_idempotent() {
        let tunables = HotplugTunables::new();
        let mut ctl = booted(&tunables);

        assert_eq!(ctl.actuate(3), Actuation::Applied { changed: 2 });
        let calls = ctl.hal().calls();

        assert_eq!(ctl.actuate(3), Actuation::Unchanged);
        assert_eq!(ctl.hal().calls(), calls, "second actuate must not touch hardware");
    }

    #[test]
    fn test_online_ascending_offline_descending() {
        let tunables = HotplugTunables::new();
        let mut ctl = booted(&tunables);

        ctl.actuate(4);
        assert_eq!(ctl.hal().online_mask(), 0b1111);
        assert_eq!(ctl.state().actual_count(), 4);

        ctl.actuate(2);
        assert_eq!(ctl.hal().online_mask(), 0b0011);
        assert_eq!(ctl.stats().times_core_down[3], 1);
        assert_eq!(ctl.stats().times_core_down[2], 1);
    }

    #[test]
    fn test_onlined_core_gets_policy_max() {
        let tunables = HotplugTunables::new();
        let mut ctl = booted(&tunables);

        ctl.actuate(2);
        assert_eq!(ctl.hal().driven_khz[1], Some(SIM_POLICY_MAX_KHZ));
    }

    #[test]
    fn test_drift_enters_verify_without_actuating() {
        let tunables = HotplugTunables::new();
        tunables.set_sampling_ms(10);
        tunables.set_verify_ms(95);
        let mut ctl = booted(&tunables);
        ctl.actuate(2);

        // Someone else unplugs cpu1.
        ctl.hal_mut().force_external(1, false);
        let calls = ctl.hal().calls();

        assert_eq!(ctl.actuate(3), Actuation::Drift { core: 1 });
        assert_eq!(ctl.hal().calls(), calls, "no partial actuation against a drifted baseline");
        assert_eq!(ctl.state().verify_countdown(), Some(10), "ceil(95 / 10)");
        assert_eq!(ctl.stats().drift_detected, 1);
    }

    #[test]
    fn test_drift_scan_reports_highest_core() {
        let tunables = HotplugTunables::new();
        let mut ctl = booted(&tunables);
        ctl.hal_mut().force_external(2, true);
        ctl.hal_mut().force_external(3, true);
        assert_eq!(ctl.actuate(2), Actuation::Drift { core: 3 });
    }

    #[test]
    fn test_verify_countdown_then_reconcile() {
        let tunables = HotplugTunables::new();
        tunables.set_sampling_ms(10);
        tunables.set_verify_ms(30);
        let mut ctl = booted(&tunables);

        ctl.hal_mut().force_external(3, true);
        assert_eq!(ctl.actuate(2), Actuation::Drift { core: 3 });
        assert_eq!(ctl.state().verify_countdown(), Some(3));

        assert_eq!(ctl.tick(), PlugOutcome::VerifyCountdown { remaining: 2 });
        assert_eq!(ctl.tick(), PlugOutcome::VerifyCountdown { remaining: 1 });

        // Idle load: reconcile down to the primary only.
        assert_eq!(ctl.tick(), PlugOutcome::Verified { changed: 1 });
        assert!(!ctl.state().verify_pending());
        assert_eq!(ctl.state().commanded(), ctl.hal().online_mask());
        assert_eq!(ctl.stats().verify_passes, 1);
    }

    #[test]
    fn test_verify_forces_exact_state() {
        let tunables = HotplugTunables::new();
        let mut ctl = booted(&tunables);
        ctl.hal_mut().force_external(2, true);
        ctl.hal_mut().force_external(3, true);

        assert_eq!(ctl.verify_cores(2), 3, "cpu1 up, cpu2 and cpu3 down");
        assert_eq!(ctl.hal().online_mask(), 0b0011);
        assert_eq!(ctl.state().commanded(), 0b0011);
    }

    #[test]
    fn test_refused_bring_up_keeps_going() {
        let tunables = HotplugTunables::new();
        let mut ctl = booted(&tunables);
        ctl.hal_mut().refuse_online = 1 << 2;

        assert_eq!(ctl.actuate(4), Actuation::Applied { changed: 2 });
        assert_eq!(ctl.state().commanded(), 0b1011, "only succeeded cores are commanded");
        assert!(!ctl.state().verify_pending(), "a refusal is not drift");

        // Next tick retries the hole once hardware cooperates.
        ctl.hal_mut().refuse_online = 0;
        assert_eq!(ctl.actuate(4), Actuation::Applied { changed: 1 });
        assert_eq!(ctl.hal().online_mask(), 0b1111);
    }

    #[test]
    fn test_sample_failure_retains_state() {
        let tunables = HotplugTunables::new();
        let mut ctl = booted(&tunables);
        settle(&mut ctl, 2, 0);
        let before = *ctl.state();
        let sum = ctl.history().sum();

        ctl.hal_mut().fail_sample = true;
        assert_eq!(ctl.tick(), PlugOutcome::SampleFailed);
        assert_eq!(*ctl.state(), before);
        assert_eq!(ctl.history().sum(), sum);
    }

    #[test]
    fn test_inactive_skips_everything() {
        let tunables = HotplugTunables::new();
        let mut ctl = booted(&tunables);
        tunables.set_active(false);
        ctl.hal_mut().set_load(4, 0);
        let calls = ctl.hal().calls();

        assert_eq!(ctl.tick(), PlugOutcome::Inactive);
        assert_eq!(ctl.hal().calls(), calls);
        assert_eq!(ctl.history().sum(), 0);
    }

    // -- lifecycle ----------------------------------------------------------

    #[test]
    fn test_first_tick_normalizes_cores() {
        let tunables = HotplugTunables::new();
        let mut hal = SimCpus::new();
        hal.online = [false, true, true, false];
        let mut ctl: CoreCountController<'_, SimCpus> = CoreCountController::new(hal, &tunables);

        ctl.tick();
        assert_eq!(ctl.hal().online_mask(), 0b0001);
        assert_eq!(ctl.state().commanded(), 0b0001);
    }

    #[test]
    fn test_suspend_leaves_primary_only() {
        let tunables = HotplugTunables::new();
        let mut ctl = booted(&tunables);
        ctl.actuate(4);

        ctl.suspend();
        assert_eq!(ctl.hal().online_mask(), 0b0001);
        assert_eq!(ctl.state().actual_count(), 1);
        assert_eq!(ctl.state().desired_count(), 1);
    }

    #[test]
    fn test_resume_seeds_just_under_two_cores() {
        let tunables = HotplugTunables::new();
        let mut ctl = booted(&tunables);
        ctl.suspend();
        ctl.resume();

        assert_eq!(ctl.load_average(), up_threshold(1) - 1);
        assert!(ctl.state().verify_pending());

        // Idle screen-on stays at one core.
        ctl.hal_mut().set_load(0, 0);
        assert_eq!(ctl.tick(), PlugOutcome::Verified { changed: 0 });
        assert_eq!(ctl.hal().online_count(), 1);
    }

    #[test]
    fn test_resume_ramps_on_first_busy_sample() {
        let tunables = HotplugTunables::new();
        let mut ctl = booted(&tunables);
        ctl.suspend();
        ctl.resume();

        ctl.hal_mut().set_load(2, 0);
        assert_eq!(ctl.tick(), PlugOutcome::Verified { changed: 1 });
        assert_eq!(ctl.hal().online_count(), 2);
    }

    #[test]
    fn test_stats_track_time_at_count_and_reset() {
        let tunables = HotplugTunables::new();
        let mut ctl = booted(&tunables);
        settle(&mut ctl, 0, 0);
        assert_eq!(ctl.stats().time_cores_running[0], HISTORY_SIZE as u32);

        tunables.request_stats_reset();
        ctl.tick();
        assert_eq!(ctl.stats().time_cores_running[0], 1, "reset happens before the tick records");
    }
}
