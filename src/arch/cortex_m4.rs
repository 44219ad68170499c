//! # Cortex-M4 Port Layer
//!
//! Time base and run loop for the power-management microcontroller.
//!
//! SysTick fires at `TICK_HZ` and advances a free-running millisecond
//! counter. The main thread polls the governor inside a critical section,
//! then sleeps with `wfi` until the next interrupt (SysTick, or a
//! platform interrupt that called into the governor).
//!
//! ## Interrupt Priorities
//!
//! SysTick only bumps an atomic, so it can run at any priority. Platform
//! handlers that reach the governor do so through [`Shared`], which masks
//! interrupts; they never observe a half-finished tick.

use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::SYST;

use crate::arch::{CpuHotplug, FreqLimits, RunQueueStats, TempSensor};
use crate::config::{SYSTEM_CLOCK_HZ, TICK_HZ};
use crate::kernel::Governor;
use crate::sync::Shared;
use crate::trigger::WakeTrigger;

/// Milliseconds since `configure_systick`. Wraps after ~49.7 days.
static MILLIS: AtomicU32 = AtomicU32::new(0);

// ---------------------------------------------------------------------------
// SysTick configuration
// ---------------------------------------------------------------------------

/// Configure SysTick to fire at `TICK_HZ` from the processor clock.
pub fn configure_systick(syst: &mut SYST) {
    let reload = SYSTEM_CLOCK_HZ / TICK_HZ - 1;
    syst.set_reload(reload);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
}

/// Current value of the millisecond counter.
#[inline]
pub fn now_ms() -> u32 {
    MILLIS.load(Ordering::Relaxed)
}

/// SysTick exception handler.
#[no_mangle]
pub extern "C" fn SysTick() {
    MILLIS.fetch_add(1000 / TICK_HZ, Ordering::Relaxed);
}

// ---------------------------------------------------------------------------
// Run loop
// ---------------------------------------------------------------------------

/// Start the time base, boot the governor and run it forever.
///
/// The governor must already be installed in `governor`.
pub fn start<C, T, W>(governor: &Shared<Governor<'static, C, T, W>>, mut syst: SYST) -> !
where
    C: RunQueueStats + CpuHotplug,
    T: TempSensor + FreqLimits,
    W: WakeTrigger,
{
    configure_systick(&mut syst);
    governor.with(|g| g.start(now_ms()));
    run(governor)
}

/// Poll the governor on every wake-up. Does not return.
pub fn run<C, T, W>(governor: &Shared<Governor<'static, C, T, W>>) -> !
where
    C: RunQueueStats + CpuHotplug,
    T: TempSensor + FreqLimits,
    W: WakeTrigger,
{
    loop {
        governor.with(|g| g.poll(now_ms()));
        cortex_m::asm::wfi();
    }
}
