//! Digital PIR motion sensor with a real-time one-pole low-pass filter.
//!
//! Each poll maps the pin level to +1 (motion) or -1 (quiet) and folds
//! it into the filter with a gain derived from the elapsed microseconds,
//! so the 1 s time constant holds regardless of the polling rate:
//!
//! ```text
//! gain  = dt_us / TIME_CONSTANT_US
//! value = value + gain * (input - value)      clamped to [-1, 1]
//! ```
//!
//! [`ActivityAccumulator`] turns the filtered value into time-weighted
//! per-window averages for the measurement record.

use embedded_hal::digital::InputPin;
use log::warn;

/// Filter time constant in microseconds.
pub const TIME_CONSTANT_US: u32 = 1_000_000;

/// PIR filter driver.
pub struct PirFilter<P> {
    pin: P,
    value: f32,
    last_us: u32,
    last_ms: u32,
    warned: bool,
}

impl<P: InputPin> PirFilter<P> {
    pub fn new(pin: P) -> Self {
        Self {
            pin,
            value: 0.0,
            last_us: 0,
            last_ms: 0,
            warned: false,
        }
    }

    /// Reset the filter output to 0 and start timing from now.
    pub fn begin(&mut self, now_us: u32, now_ms: u32) {
        self.value = 0.0;
        self.last_us = now_us;
        self.last_ms = now_ms;
    }

    /// Sample the pin and advance the filter.
    pub fn poll(&mut self, now_us: u32, now_ms: u32) {
        let motion = match self.pin.is_high() {
            Ok(level) => level,
            Err(_) => {
                if !self.warned {
                    warn!("PIR: pin read failed, treating as no motion");
                    self.warned = true;
                }
                false
            }
        };
        self.update(motion, now_us, now_ms);
    }

    /// Filtered value in [-1, 1].
    pub fn read(&self) -> f32 {
        self.value
    }

    /// Filtered value and the millisecond time of the sample behind it.
    pub fn read_with_time(&self) -> (f32, u32) {
        (self.value, self.last_ms)
    }

    fn update(&mut self, motion: bool, now_us: u32, now_ms: u32) {
        let input = if motion { 1.0 } else { -1.0 };
        let gain = now_us.wrapping_sub(self.last_us) as f32 / TIME_CONSTANT_US as f32;
        self.value = (self.value + gain * (input - self.value)).clamp(-1.0, 1.0);
        self.last_us = now_us;
        self.last_ms = now_ms;
    }
}

// ---------------------------------------------------------------------------
// Activity accumulation
// ---------------------------------------------------------------------------

/// Summary of one activity window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActivitySample {
    /// Time-weighted mean filter value over the window.
    pub avg: f32,
    pub min: f32,
    pub max: f32,
}

/// Running min/max/time-weighted sum of PIR samples for one window.
#[derive(Debug, Clone, Copy)]
pub struct ActivityAccumulator {
    max: f32,
    min: f32,
    sum: f32,
    base_ms: u32,
    last_ms: u32,
}

impl Default for ActivityAccumulator {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ActivityAccumulator {
    pub fn new(now_ms: u32) -> Self {
        Self {
            max: -1.0,
            min: 1.0,
            sum: 0.0,
            base_ms: now_ms,
            last_ms: now_ms,
        }
    }

    /// Start a new window at `now_ms`.
    pub fn reset(&mut self, now_ms: u32) {
        *self = Self::new(now_ms);
    }

    /// Add one filter sample taken at `t_ms`, weighted by the time since
    /// the previous sample.
    pub fn accumulate(&mut self, value: f32, t_ms: u32) {
        self.max = self.max.max(value);
        self.min = self.min.min(value);
        let dt = t_ms.wrapping_sub(self.last_ms);
        self.sum += value * dt as f32;
        self.last_ms = t_ms;
    }

    /// Close the window at `now_ms` and start the next one.
    ///
    /// Returns `None` without touching the window when no time has passed
    /// since it opened.
    pub fn measure(&mut self, now_ms: u32) -> Option<ActivitySample> {
        let elapsed = now_ms.wrapping_sub(self.base_ms);
        if elapsed == 0 {
            return None;
        }
        let sample = ActivitySample {
            avg: self.sum / elapsed as f32,
            min: self.min,
            max: self.max,
        };
        self.reset(now_ms);
        Some(sample)
    }

    pub fn sum(&self) -> f32 {
        self.sum
    }
}
