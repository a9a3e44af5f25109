//! DS18B20 OneWire temperature probe.
//!
//! The probe is driven by the measurement loop's probe states and never
//! blocks: every phase records a millisecond timestamp and later polls
//! report readiness once the fixed delay has passed.
//!
//! ```text
//!  power_up ─▶ poll_power (100 ms) ─▶ start_measurement
//!        ─▶ poll_measurement (750 ms) ─▶ finish_measurement
//! ```
//!
//! Bus discovery runs only while no valid address is cached; a
//! "disconnected" read drops the address so the next cycle searches again.

use log::{debug, warn};

use crate::app::ports::OneWireBus;
use crate::error::SensorError;

/// Power stabilisation delay after switching the probe supply on.
pub const POWER_ON_MS: u32 = 100;
/// Worst-case 12-bit conversion time.
pub const CONVERSION_MS: u32 = 750;
/// OneWire family code of the DS18B20.
pub const DS18B20_FAMILY: u8 = 0x28;
/// Conversion resolution in bits.
pub const RESOLUTION_BITS: u8 = 12;

pub type DeviceAddress = [u8; 8];

pub struct Probe<B> {
    bus: B,
    address: Option<DeviceAddress>,
    power_requested: bool,
    power_on: bool,
    power_time: u32,
    start_time: u32,
    celsius: f32,
}

impl<B: OneWireBus> Probe<B> {
    pub fn new(bus: B) -> Self {
        Self {
            bus,
            address: None,
            power_requested: false,
            power_on: false,
            power_time: 0,
            start_time: 0,
            celsius: 0.0,
        }
    }

    pub fn begin(&mut self) {
        self.power_on = false;
        self.power_requested = false;
        self.address = None;
    }

    /// Switch the probe supply on and note the time.  Repeated calls
    /// while power is already requested keep the first timestamp.
    pub fn power_up(&mut self, now_ms: u32) {
        if !self.power_on && !self.power_requested {
            self.bus.set_power(true);
            self.power_time = now_ms;
            self.power_requested = true;
        }
    }

    /// True once the supply has had time to settle.
    pub fn poll_power(&mut self, now_ms: u32) -> bool {
        if !self.power_on && now_ms.wrapping_sub(self.power_time) < POWER_ON_MS {
            return false;
        }
        self.power_on = true;
        true
    }

    pub fn power_down(&mut self) {
        self.bus.set_power(false);
        self.power_on = false;
        self.power_requested = false;
    }

    /// Discover the probe if needed, set 12-bit mode and start a
    /// conversion.  Returns whether a conversion is now running.
    pub fn start_measurement(&mut self, now_ms: u32) -> bool {
        if !self.poll_power(now_ms) {
            self.address = None;
            return false;
        }

        if self.address.is_none() {
            self.address = match self.bus.first_device() {
                Some(addr) if addr[0] == DS18B20_FAMILY => Some(addr),
                Some(addr) => {
                    warn!("probe: unsupported family 0x{:02x}", addr[0]);
                    None
                }
                None => None,
            };
        }

        let Some(addr) = self.address else {
            return false;
        };

        if let Err(e) = self.bus.set_resolution(&addr, RESOLUTION_BITS) {
            debug!("probe: set resolution failed: {}", e);
            self.address = None;
        } else if let Err(e) = self.bus.request_conversion(&addr) {
            debug!("probe: conversion request failed: {}", e);
            self.address = None;
        } else {
            self.start_time = now_ms;
        }
        self.address.is_some()
    }

    /// True when the result can be read, or when there is nothing to wait
    /// for because no conversion is running.
    pub fn poll_measurement(&self, now_ms: u32) -> bool {
        match self.address {
            None => true,
            Some(_) => now_ms.wrapping_sub(self.start_time) > CONVERSION_MS,
        }
    }

    /// Read the conversion result in degrees Celsius.
    ///
    /// On failure the cached address is dropped and the stored reading
    /// is forced to zero.
    pub fn finish_measurement(&mut self) -> Result<f32, SensorError> {
        let result = match self.address {
            None => Err(SensorError::NotPresent),
            Some(addr) => self.bus.read_raw(&addr).map(|raw| f32::from(raw) / 128.0),
        };
        match result {
            Ok(c) => self.celsius = c,
            Err(_) => {
                self.address = None;
                self.celsius = 0.0;
            }
        }
        result
    }

    /// Last successful reading, or 0 after a failure.
    pub fn celsius(&self) -> f32 {
        self.celsius
    }

    pub fn has_address(&self) -> bool {
        self.address.is_some()
    }
}
