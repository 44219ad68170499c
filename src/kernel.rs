//! # Kernel
//!
//! Top-level entry point. A [`Governor`] owns both controllers and the
//! deadline of each, and is the only thing a platform talks to.
//!
//! ## Lifecycle
//!
//! ```text
//! platform init
//!   └─► Governor::new(hotplug, thermal)
//!         └─► start(now)           ← hotplug due after STARTUP_DELAY_MS,
//!               │                    thermal due immediately
//!               └─► loop {
//!                     poll(now)     ← run due ticks, reschedule
//!                     sleep next_wake(now)
//!                   }
//!
//! screen off ─► suspend()          ← cancel both, primary core only
//! screen on  ─► resume(now)        ← hotplug in 1 ms, thermal in poll_ms
//! trip IRQ   ─► thermal_trip(now)  ← thermal due immediately
//! ```
//!
//! Every entry point takes `&mut self`, so a tick can never interleave with
//! a suspend, toggle or trip. Platforms that call in from interrupt
//! context wrap the governor in [`crate::sync::Shared`].

use tracing::info;

use crate::arch::{CpuHotplug, FreqLimits, RunQueueStats, TempSensor};
use crate::config::{MAX_CORES, RESUME_DELAY_MS, STARTUP_DELAY_MS};
use crate::hotplug::CoreCountController;
use crate::scheduler::PeriodicTask;
use crate::thermal::ThermalController;
use crate::trigger::{PollTrigger, WakeTrigger};

/// Driver version, reported in the boot banner.
pub const VERSION: (u32, u32) = (1, 0);

/// Owner of both controllers and their schedules.
pub struct Governor<'t, C, T, W = PollTrigger> {
    hotplug: CoreCountController<'t, C>,
    thermal: ThermalController<'t, T, W>,
    hotplug_task: PeriodicTask,
    thermal_task: PeriodicTask,
    suspended: bool,
}

impl<'t, C, T, W> Governor<'t, C, T, W>
where
    C: RunQueueStats + CpuHotplug,
    T: TempSensor + FreqLimits,
    W: WakeTrigger,
{
    pub fn new(hotplug: CoreCountController<'t, C>, thermal: ThermalController<'t, T, W>) -> Self {
        Self {
            hotplug,
            thermal,
            hotplug_task: PeriodicTask::new(),
            thermal_task: PeriodicTask::new(),
            suspended: false,
        }
    }

    /// Boot sequencing. The first hotplug tick waits for platform PM to
    /// settle; thermal protection starts right away.
    pub fn start(&mut self, now: u32) {
        let (major, minor) = VERSION;
        info!(major, minor, "msm-pm starting");
        for core in (0..MAX_CORES).filter(|&core| self.hotplug.hal().is_core_online(core)) {
            info!(cpu = core, "core online at boot");
        }

        self.hotplug_task.schedule(now, STARTUP_DELAY_MS);
        if self.thermal.tunables().enabled() {
            self.thermal_task.schedule(now, 0);
        }
    }

    /// Run whichever controller ticks are due at `now`. Returns the delay
    /// until the next one, like [`Governor::next_wake`].
    pub fn poll(&mut self, now: u32) -> Option<u32> {
        if self.hotplug_task.take_due(now) {
            self.hotplug.tick();
            self.hotplug_task.schedule(now, self.hotplug.tunables().sampling_ms());
        }
        if self.thermal_task.take_due(now) {
            self.run_thermal(now);
        }
        self.next_wake(now)
    }

    fn run_thermal(&mut self, now: u32) {
        if !self.thermal.tunables().enabled() {
            self.thermal.disable();
            return;
        }
        if let Some(delay) = self.thermal.tick() {
            self.thermal_task.schedule(now, delay);
        }
    }

    /// Screen-off. Thermal ceilings stay in force.
    pub fn suspend(&mut self) {
        self.hotplug_task.cancel();
        self.thermal_task.cancel();
        self.hotplug.suspend();
        self.suspended = true;
        info!("suspended, secondary cores offline");
    }

    /// Screen-on.
    pub fn resume(&mut self, now: u32) {
        self.suspended = false;
        self.hotplug.resume();
        self.hotplug_task.schedule(now, RESUME_DELAY_MS);
        if self.thermal.tunables().enabled() {
            self.thermal_task.schedule(now, self.thermal.tunables().poll_ms());
        }
        info!("resumed");
    }

    /// Toggle the hotplug controller. Disabling cancels the pending tick;
    /// enabling runs one immediately unless one is already pending.
    pub fn set_hotplug_enabled(&mut self, enabled: bool, now: u32) {
        self.hotplug.tunables().set_active(enabled);
        if !enabled {
            self.hotplug_task.cancel();
        } else if !self.suspended && !self.hotplug_task.is_pending() {
            self.hotplug_task.schedule(now, 0);
        }
        info!(enabled, "hotplug");
    }

    /// Toggle thermal throttling. Disabling cancels the pending tick and
    /// lifts any ceiling before returning.
    pub fn set_thermal_enabled(&mut self, enabled: bool, now: u32) {
        self.thermal.tunables().set_enabled(enabled);
        if enabled {
            if !self.suspended {
                self.thermal_task.schedule(now, 0);
            }
        } else {
            self.thermal_task.cancel();
            self.thermal.disable();
        }
        info!(enabled, "thermal throttling");
    }

    /// A temperature watchpoint fired.
    pub fn thermal_trip(&mut self, now: u32) {
        if !self.suspended && self.thermal.tunables().enabled() {
            self.thermal_task.schedule(now, 0);
        }
    }

    /// Delay until the earliest pending tick, or `None` if nothing is
    /// scheduled.
    pub fn next_wake(&self, now: u32) -> Option<u32> {
        match (self.hotplug_task.due_in(now), self.thermal_task.due_in(now)) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn hotplug(&self) -> &CoreCountController<'t, C> {
        &self.hotplug
    }

    pub fn hotplug_mut(&mut self) -> &mut CoreCountController<'t, C> {
        &mut self.hotplug
    }

    pub fn thermal(&self) -> &ThermalController<'t, T, W> {
        &self.thermal
    }

    pub fn thermal_mut(&mut self) -> &mut ThermalController<'t, T, W> {
        &mut self.thermal
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::sim::{SimCpus, SimThermal, SimTrip};
    use crate::config::{HotplugTunables, ThermalTunables, DEF_TRIP_BACKSTOP_MS};
    use crate::thermal::Ceiling;
    use crate::trigger::TripTrigger;

    const LADDER: [(i32, u32); 2] = [(60, 1_350_000), (80, 384_000)];

    type SimGovernor<'t> = Governor<'t, SimCpus, SimThermal>;

    fn governor<'t>(hp: &'t HotplugTunables, th: &'t ThermalTunables, temp: i32) -> SimGovernor<'t> {
        Governor::new(
            CoreCountController::new(SimCpus::new(), hp),
            ThermalController::new(SimThermal::new(temp), PollTrigger, th),
        )
    }

    fn tunables() -> (HotplugTunables, ThermalTunables) {
        (HotplugTunables::new(), ThermalTunables::with_tiers(&LADDER).unwrap())
    }

    #[test]
    fn test_start_delays_hotplug_not_thermal() {
        let (hp, th) = tunables();
        let mut gov = governor(&hp, &th, 85);
        // Heavy enough that the very first sample asks for a second core.
        gov.hotplug_mut().hal_mut().set_load(16, 0);

        gov.start(0);
        assert_eq!(gov.next_wake(0), Some(0));
        gov.poll(0);
        assert_eq!(gov.thermal().state().limited_max_freq, Ceiling::Khz(384_000));
        assert_eq!(gov.hotplug().hal().hotplug_calls, 0);
        assert_eq!(gov.next_wake(0), Some(th.poll_ms()));

        gov.poll(STARTUP_DELAY_MS - 1);
        assert_eq!(gov.hotplug().hal().hotplug_calls, 0, "no hotplug before startup delay");
        gov.poll(STARTUP_DELAY_MS);
        assert!(gov.hotplug().hal().hotplug_calls > 0);
    }

    #[test]
    fn test_hotplug_reschedules_at_sampling_period() {
        let (hp, th) = tunables();
        hp.set_sampling_ms(20);
        let mut gov = governor(&hp, &th, 30);
        gov.start(0);
        gov.poll(0);
        gov.poll(STARTUP_DELAY_MS);
        assert_eq!(gov.next_wake(STARTUP_DELAY_MS), Some(20));
    }

    #[test]
    fn test_inactive_hotplug_keeps_rescheduling() {
        let (hp, th) = tunables();
        hp.set_active(false);
        let mut gov = governor(&hp, &th, 30);
        gov.start(0);
        gov.poll(STARTUP_DELAY_MS);
        assert_eq!(gov.hotplug_task.due_in(STARTUP_DELAY_MS), Some(hp.sampling_ms()));
        assert_eq!(gov.hotplug().history().sum(), 0, "no sampling while inactive");
    }

    #[test]
    fn test_suspend_cancels_and_keeps_ceiling() {
        let (hp, th) = tunables();
        let mut gov = governor(&hp, &th, 85);
        gov.start(0);
        gov.poll(0);
        gov.poll(STARTUP_DELAY_MS);
        gov.hotplug_mut().verify_cores(4);

        gov.suspend();
        assert_eq!(gov.next_wake(STARTUP_DELAY_MS), None);
        assert_eq!(gov.hotplug().hal().online_mask(), 0b0001);
        assert_eq!(gov.thermal().hal().ceilings[0], Ceiling::Khz(384_000));
    }

    #[test]
    fn test_resume_schedules_both() {
        let (hp, th) = tunables();
        let mut gov = governor(&hp, &th, 30);
        gov.start(0);
        gov.suspend();

        gov.resume(100);
        assert!(!gov.is_suspended());
        assert_eq!(gov.hotplug_task.due_in(100), Some(RESUME_DELAY_MS));
        assert_eq!(gov.thermal_task.due_in(100), Some(th.poll_ms()));
        assert!(gov.hotplug().state().verify_pending());
    }

    #[test]
    fn test_disable_thermal_lifts_ceiling_synchronously() {
        let (hp, th) = tunables();
        let mut gov = governor(&hp, &th, 85);
        gov.start(0);
        gov.poll(0);

        gov.set_thermal_enabled(false, 10);
        assert!(!gov.thermal_task.is_pending());
        assert_eq!(gov.thermal().hal().ceilings, [Ceiling::NoLimit; MAX_CORES]);

        gov.set_thermal_enabled(true, 20);
        assert_eq!(gov.thermal_task.due_in(20), Some(0));
    }

    #[test]
    fn test_cleared_flag_stops_thermal_at_next_tick() {
        let (hp, th) = tunables();
        let mut gov = governor(&hp, &th, 85);
        gov.start(0);
        gov.poll(0);

        th.set_enabled(false);
        gov.poll(th.poll_ms());
        assert!(!gov.thermal_task.is_pending(), "no reschedule once disabled");
        assert_eq!(gov.thermal().state().limited_max_freq, Ceiling::NoLimit);
    }

    #[test]
    fn test_hotplug_toggle() {
        let (hp, th) = tunables();
        let mut gov = governor(&hp, &th, 30);
        gov.start(0);

        gov.set_hotplug_enabled(false, 10);
        assert!(!hp.active());
        assert!(!gov.hotplug_task.is_pending());

        gov.set_hotplug_enabled(true, 10);
        assert_eq!(gov.hotplug_task.due_in(10), Some(0));
    }

    #[test]
    fn test_trip_drives_thermal_ticks() {
        let (hp, th) = tunables();
        let mut gov = Governor::new(
            CoreCountController::new(SimCpus::new(), &hp),
            ThermalController::new(SimThermal::new(65), TripTrigger::new(SimTrip::new()), &th),
        );
        gov.start(0);
        gov.poll(0);
        assert_eq!(gov.thermal_task.due_in(0), Some(DEF_TRIP_BACKSTOP_MS), "only the backstop timer");
        assert_eq!(gov.thermal().trigger().sensor().armed, Some((Some(80), Some(55))));

        gov.thermal_mut().hal_mut().temp = 81;
        gov.thermal_trip(50);
        gov.poll(50);
        assert_eq!(gov.thermal().state().limited_max_freq, Ceiling::Khz(384_000));
        assert_eq!(gov.thermal().trigger().sensor().armed, Some((None, Some(75))));
    }

    #[test]
    fn test_trip_backstop_picks_up_new_ladder() {
        let hp = HotplugTunables::new();
        let th = ThermalTunables::with_tiers(&[(80, 384_000)]).unwrap();
        let mut gov = Governor::new(
            CoreCountController::new(SimCpus::new(), &hp),
            ThermalController::new(SimThermal::new(70), TripTrigger::new(SimTrip::new()), &th),
        );
        gov.start(0);
        gov.poll(0);
        assert_eq!(gov.thermal().trigger().sensor().armed, Some((Some(80), None)));

        th.set_tiers(&[(60, 384_000)]).unwrap();
        assert!(!gov.thermal().trigger().sensor().fires_at(70), "old window stays quiet");
        assert_eq!(gov.thermal_task.due_in(0), Some(DEF_TRIP_BACKSTOP_MS));

        gov.poll(DEF_TRIP_BACKSTOP_MS);
        assert_eq!(gov.thermal().state().limited_max_freq, Ceiling::Khz(384_000));
        assert_eq!(gov.thermal().hal().ceilings, [Ceiling::Khz(384_000); MAX_CORES]);
    }

    #[test]
    fn test_trip_ignored_while_suspended() {
        let (hp, th) = tunables();
        let mut gov = governor(&hp, &th, 30);
        gov.start(0);
        gov.suspend();
        gov.thermal_trip(5);
        assert!(!gov.thermal_task.is_pending());
    }
}
