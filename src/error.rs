//! # Errors
//!
//! Nothing in this crate is fatal. Port errors are logged by the
//! controller that hit them and the next tick retries; tunable errors are
//! returned to whoever tried to write a bad value.

/// Failure reported by a hardware port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HalError {
    #[error("unable to read sensor {sensor}")]
    SensorRead { sensor: u32 },

    #[error("run-queue statistics unavailable")]
    MetricUnavailable,

    #[error("cpu{core} rejected hotplug request (online: {online})")]
    HotplugRejected { core: usize, online: bool },

    #[error("no frequency policy for cpu{core}")]
    NoPolicy { core: usize },

    #[error("cpu{core} rejected frequency {khz} kHz")]
    FrequencyRejected { core: usize, khz: u32 },

    #[error("cpu{core} rejected ceiling update")]
    CeilingRejected { core: usize },

    #[error("unable to program trip points on sensor {sensor}")]
    TripProgramming { sensor: u32 },
}

/// Rejected write to a runtime tunable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TunableError {
    #[error("tier index {index} out of range (max {max})")]
    TierOutOfRange { index: usize, max: usize },

    #[error("{count} tiers requested, at most {max} supported")]
    TooManyTiers { count: usize, max: usize },
}
