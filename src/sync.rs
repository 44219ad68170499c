//! # Synchronization Primitives
//!
//! Critical-section access to the governor from more than one context.
//!
//! On the Cortex-M4 port a critical section masks interrupts; on the host
//! it is a global lock (`critical-section`'s `std` implementation). Either
//! way, code holding a [`Shared`] borrow cannot be interleaved with any
//! other holder. A suspend, toggle or trip handler therefore waits for an
//! in-flight tick to finish, and a cancelled tick has fully stopped by the
//! time the handler's own closure runs.

use core::cell::RefCell;

use ::critical_section::{CriticalSection, Mutex};

/// Execute a closure within a critical section.
///
/// Keep the closure short: on the microcontroller interrupts are masked
/// for its whole duration.
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(CriticalSection<'_>) -> R,
{
    ::critical_section::with(f)
}

/// A value installed once at init and then reached from any context.
///
/// Suitable for a `static`:
///
/// ```ignore
/// static GOVERNOR: Shared<Governor<'static, Cpus, Tsens>> = Shared::new();
/// ```
pub struct Shared<T> {
    cell: Mutex<RefCell<Option<T>>>,
}

impl<T> Shared<T> {
    pub const fn new() -> Self {
        Self {
            cell: Mutex::new(RefCell::new(None)),
        }
    }

    /// Install `value`, returning whatever was there before.
    pub fn install(&self, value: T) -> Option<T> {
        critical_section(|cs| self.cell.borrow_ref_mut(cs).replace(value))
    }

    pub fn take(&self) -> Option<T> {
        critical_section(|cs| self.cell.borrow_ref_mut(cs).take())
    }

    pub fn is_installed(&self) -> bool {
        critical_section(|cs| self.cell.borrow_ref(cs).is_some())
    }

    /// Run `f` on the value inside a critical section. Returns `None` if
    /// nothing is installed.
    ///
    /// # Panics
    /// If `f` re-enters `with` on the same `Shared`.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        critical_section(|cs| self.cell.borrow_ref_mut(cs).as_mut().map(f))
    }
}

impl<T> Default for Shared<T> {
    fn default() -> Self {
        Self::new()
    }
}
