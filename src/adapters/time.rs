//! Host time adapters.
//!
//! - [`HostClock`] is the monotonic millisecond/microsecond clock, backed
//!   by `std::time::Instant`.  The host keeps counting while it "sleeps",
//!   so [`ClockPort::advance_ms`] only records the slept time for
//!   diagnostics instead of moving the clock.
//! - [`HostRtc`] is the calendar clock.  It starts unset, like a board
//!   with a flat backup battery, and runs from the host's monotonic clock
//!   once set.

use std::time::Instant;

use chrono::{NaiveDateTime, TimeDelta};

use crate::app::ports::{ClockError, ClockPort, RtcPort};

/// Monotonic clock for the host simulation.
pub struct HostClock {
    start: Instant,
    slept_ms: u64,
}

impl Default for HostClock {
    fn default() -> Self {
        Self::new()
    }
}

impl HostClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            slept_ms: 0,
        }
    }

    /// Total milliseconds reported as slept.
    pub fn slept_ms(&self) -> u64 {
        self.slept_ms
    }
}

impl ClockPort for HostClock {
    fn now_ms(&self) -> u32 {
        // wraps like the MCU tick counter
        self.start.elapsed().as_millis() as u32
    }

    fn now_us(&self) -> u32 {
        self.start.elapsed().as_micros() as u32
    }

    fn advance_ms(&mut self, ms: u32) {
        self.slept_ms += u64::from(ms);
    }
}

/// Settable calendar clock for the host simulation.
#[derive(Default)]
pub struct HostRtc {
    /// Time set and the instant it was set at.
    base: Option<(NaiveDateTime, Instant)>,
}

impl HostRtc {
    pub fn new() -> Self {
        Self::default()
    }

    /// An RTC already set to the host's wall clock.
    pub fn from_system_time() -> Self {
        Self {
            base: Some((chrono::Utc::now().naive_utc(), Instant::now())),
        }
    }
}

impl RtcPort for HostRtc {
    fn rtc_now(&mut self) -> Result<NaiveDateTime, ClockError> {
        let (t, at) = self.base.ok_or(ClockError::NotSet)?;
        let elapsed = TimeDelta::from_std(at.elapsed()).map_err(|_| ClockError::BusError)?;
        Ok(t + elapsed)
    }

    fn rtc_set(&mut self, t: NaiveDateTime) -> Result<(), ClockError> {
        self.base = Some((t, Instant::now()));
        Ok(())
    }
}
