//! # Wake Triggers
//!
//! Decides how the thermal controller is woken for its next tick.
//!
//! - [`PollTrigger`]: fixed period, every `poll_ms`
//! - [`TripTrigger`]: program the sensor's high/low watchpoints around the
//!   current tier and sleep until one fires
//!
//! Tier selection is identical under both; only the wake source differs.

use tracing::{debug, warn};

use crate::arch::TripSensor;
use crate::config::DEF_TRIP_BACKSTOP_MS;

/// Temperatures at which the next tier decision can change. `None` leaves
/// that edge unarmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TripWindow {
    pub high: Option<i32>,
    pub low: Option<i32>,
}

impl TripWindow {
    pub fn is_open(&self) -> bool {
        self.high.is_none() && self.low.is_none()
    }
}

/// Wake source for the thermal controller.
pub trait WakeTrigger {
    /// Prepare the next wake. Returns the delay until the next timed tick,
    /// or `None` if only a hardware event will deliver it.
    fn rearm(&mut self, sensor: u32, window: TripWindow, poll_ms: u32) -> Option<u32>;

    /// Cancel any pending hardware wake.
    fn disarm(&mut self, _sensor: u32) {}
}

/// Periodic polling.
#[derive(Debug, Clone, Copy, Default)]
pub struct PollTrigger;

impl WakeTrigger for PollTrigger {
    fn rearm(&mut self, _sensor: u32, _window: TripWindow, poll_ms: u32) -> Option<u32> {
        Some(poll_ms)
    }
}

/// Event-driven wake through sensor watchpoints.
///
/// A successful arm still leaves a slow backstop timer running, since a
/// tunable change moves the tier edges without firing the old window.
/// Falls back to polling for one period whenever the window cannot be
/// armed, or has no edge to arm.
#[derive(Debug, Clone)]
pub struct TripTrigger<S> {
    sensor: S,
    backstop_ms: u32,
}

impl<S: TripSensor> TripTrigger<S> {
    pub fn new(sensor: S) -> Self {
        Self::with_backstop(sensor, DEF_TRIP_BACKSTOP_MS)
    }

    pub fn with_backstop(sensor: S, backstop_ms: u32) -> Self {
        Self { sensor, backstop_ms }
    }

    pub fn backstop_ms(&self) -> u32 {
        self.backstop_ms
    }

    pub fn sensor(&self) -> &S {
        &self.sensor
    }

    pub fn sensor_mut(&mut self) -> &mut S {
        &mut self.sensor
    }
}

impl<S: TripSensor> WakeTrigger for TripTrigger<S> {
    fn rearm(&mut self, sensor: u32, window: TripWindow, poll_ms: u32) -> Option<u32> {
        if window.is_open() {
            return Some(poll_ms);
        }
        match self.sensor.arm_temperature_trip(sensor, window.high, window.low) {
            Ok(()) => {
                debug!(sensor, high = ?window.high, low = ?window.low, backstop_ms = self.backstop_ms, "trip points armed");
                Some(self.backstop_ms)
            }
            Err(err) => {
                warn!(sensor, %err, poll_ms, "unable to arm trip points, polling");
                Some(poll_ms)
            }
        }
    }

    fn disarm(&mut self, sensor: u32) {
        self.sensor.disarm_temperature_trip(sensor);
    }
}
