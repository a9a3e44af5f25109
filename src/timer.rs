//! Cooperative millisecond timers.
//!
//! [`Timer`] is a recurring interval counter polled from the main loop.
//! Every poll compares the time since the last firing to the interval;
//! each expired interval bumps an event counter.  When polling falls
//! behind by more than one interval the missed firings are caught up in
//! one step and counted as overrun.
//!
//! All elapsed-time math uses `wrapping_sub` on `u32` milliseconds, so
//! the timers keep working across the 49.7-day wrap of the tick counter.
//!
//! [`Timeout`] is the one-shot companion used for per-state deadlines.

/// Recurring interval timer.
#[derive(Debug, Clone, Default)]
pub struct Timer {
    /// Time of the most recent firing (or of `begin`/`retrigger`).
    time: u32,
    interval: u32,
    events: u32,
    overrun: u32,
}

impl Timer {
    pub const fn new() -> Self {
        Self {
            time: 0,
            interval: 0,
            events: 0,
            overrun: 0,
        }
    }

    /// Arm the timer to fire every `interval_ms`, starting at `now`.
    pub fn begin(&mut self, interval_ms: u32, now: u32) {
        self.interval = interval_ms;
        self.time = now;
        self.events = 0;
    }

    /// Account for every interval that expired up to `now`.
    pub fn poll(&mut self, now: u32) {
        if self.interval == 0 {
            return;
        }
        if now.wrapping_sub(self.time) < self.interval {
            return;
        }

        self.time = self.time.wrapping_add(self.interval);
        self.events = self.events.saturating_add(1);

        let behind = now.wrapping_sub(self.time);
        if behind < self.interval {
            return;
        }

        // Missed more than one firing: catch up in one step.
        let n = behind / self.interval;
        self.events = self.events.saturating_add(n);
        self.time = self.time.wrapping_add(n.wrapping_mul(self.interval));
        self.overrun = self.overrun.saturating_add(n);
    }

    /// Test-and-clear: true if any firing was pending.
    pub fn is_ready(&mut self) -> bool {
        self.read_ticks() != 0
    }

    /// Return and clear the pending firing count.
    pub fn read_ticks(&mut self) -> u32 {
        core::mem::take(&mut self.events)
    }

    /// Pending firing count, left untouched.
    pub fn peek_ticks(&self) -> u32 {
        self.events
    }

    /// Milliseconds until the next firing; 0 when a firing is pending.
    pub fn remaining(&self, now: u32) -> u32 {
        if self.events != 0 {
            return 0;
        }
        self.interval.saturating_sub(now.wrapping_sub(self.time))
    }

    /// Restart the current interval at `now`, dropping pending firings.
    pub fn retrigger(&mut self, now: u32) {
        self.time = now;
        self.events = 0;
    }

    /// Change the interval.  The current period keeps its start time.
    pub fn set_interval(&mut self, interval_ms: u32) {
        self.interval = interval_ms;
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    /// Total firings that were caught up late.
    pub fn overrun(&self) -> u32 {
        self.overrun
    }
}

/// One-shot deadline.  Fires once, then stays quiet until set again.
#[derive(Debug, Clone, Copy, Default)]
pub struct Timeout {
    start: u32,
    delay: u32,
    active: bool,
    fired: bool,
}

impl Timeout {
    pub const fn new() -> Self {
        Self {
            start: 0,
            delay: 0,
            active: false,
            fired: false,
        }
    }

    /// Arm the deadline `delay_ms` after `now`, discarding any earlier one.
    pub fn set(&mut self, delay_ms: u32, now: u32) {
        self.start = now;
        self.delay = delay_ms;
        self.active = true;
        self.fired = false;
    }

    /// Disarm without firing.
    pub fn cancel(&mut self) {
        self.active = false;
        self.fired = false;
    }

    /// Returns true exactly once, on the poll where the deadline passes.
    pub fn poll(&mut self, now: u32) -> bool {
        if self.active && now.wrapping_sub(self.start) >= self.delay {
            self.active = false;
            self.fired = true;
            return true;
        }
        false
    }

    /// Test-and-clear of the fired flag.
    pub fn timed_out(&mut self) -> bool {
        core::mem::take(&mut self.fired)
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}
