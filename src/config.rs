//! Node configuration parameters
//!
//! All tunable parameters of the measurement loop.  The host binary loads
//! them from a JSON file; on a board they come from flash.  Missing JSON
//! fields fall back to the defaults below.

use serde::{Deserialize, Serialize};

use crate::app::ports::ConfigError;
use crate::measurement::Format;

/// Operating flags.  These select deployment behaviour rather than tune it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatingFlags {
    /// Request confirmed uplinks.
    pub confirmed_uplink: bool,
    /// Deep-sleep test mode: deep sleep even when attended, short alert.
    pub deep_sleep_test: bool,
    /// Never deep sleep.
    pub disable_deep_sleep: bool,
    /// Deployed in the field with nobody watching the console.
    pub unattended: bool,
}

/// Core node configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    // --- Uplink cadence ---
    /// Fast-start uplink interval (seconds)
    pub tx_cycle_secs: u32,
    /// Steady-state uplink interval (seconds)
    pub tx_cycle_secs_permanent: u32,
    /// Number of fast-start uplinks after activation
    pub tx_cycle_count: u32,
    /// LoRaWAN FPort
    pub uplink_port: u8,
    /// Wire format of every uplink
    pub format: Format,

    // --- Activity ---
    /// PIR accumulation sample period (seconds)
    pub pir_sample_secs: u32,
    /// Activity window length (seconds)
    pub activity_secs: u32,

    // --- State timeouts ---
    /// Sensor settle time after activation (milliseconds)
    pub warmup_ms: u32,
    /// Light-sensor deadline in Measure (milliseconds)
    pub measure_timeout_ms: u32,
    /// Delay between the update finishing and the reset (milliseconds)
    pub reboot_delay_ms: u32,

    // --- Power ---
    /// Minimum time to the next uplink before Sleeping sleeps (milliseconds)
    pub sleep_threshold_ms: u32,
    /// Per-poll low-power nap (milliseconds); 0 disables
    pub idle_sleep_ms: u32,
    pub enable_deep_sleep: bool,
    /// Vbus above which the board counts as USB powered (volts)
    pub usb_power_threshold_v: f32,

    // --- LED ---
    pub disable_led_in_low_light: bool,
    /// White-channel count at or below which it is "low light"
    pub low_light_threshold: u16,

    // --- Diagnostics ---
    /// Initial log mask (see `adapters::log_sink`)
    pub debug_mask: u32,

    pub operating: OperatingFlags,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            // Uplink cadence
            tx_cycle_secs: 30,
            tx_cycle_secs_permanent: 6 * 60,
            tx_cycle_count: 10,
            uplink_port: 1,
            format: Format::Pellets,

            // Activity
            pir_sample_secs: 2,
            activity_secs: 60,

            // State timeouts
            warmup_ms: 5000,
            measure_timeout_ms: 1000,
            reboot_delay_ms: 1000,

            // Power
            sleep_threshold_ms: 1500,
            idle_sleep_ms: 200,
            enable_deep_sleep: false,
            usb_power_threshold_v: 3.0,

            // LED
            disable_led_in_low_light: true,
            low_light_threshold: 500,

            // Diagnostics
            debug_mask: 0x5, // Error | Trace

            operating: OperatingFlags::default(),
        }
    }
}

impl NodeConfig {
    /// Range-check every field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tx_cycle_secs == 0 || self.tx_cycle_secs_permanent == 0 {
            return Err(ConfigError::ValidationFailed("tx cycle must be non-zero"));
        }
        if self.tx_cycle_secs > self.tx_cycle_secs_permanent {
            return Err(ConfigError::ValidationFailed(
                "fast-start tx cycle longer than permanent cycle",
            ));
        }
        if self.tx_cycle_secs_permanent > u32::MAX / 1000 {
            return Err(ConfigError::ValidationFailed("permanent tx cycle too long"));
        }
        if self.pir_sample_secs == 0 || self.activity_secs == 0 {
            return Err(ConfigError::ValidationFailed("activity periods must be non-zero"));
        }
        if self.warmup_ms == 0 || self.measure_timeout_ms == 0 || self.reboot_delay_ms == 0 {
            return Err(ConfigError::ValidationFailed("state timeouts must be non-zero"));
        }
        if !(self.usb_power_threshold_v.is_finite() && self.usb_power_threshold_v > 0.0) {
            return Err(ConfigError::ValidationFailed("usb power threshold out of range"));
        }
        if self.uplink_port == 0 || self.uplink_port > 223 {
            return Err(ConfigError::ValidationFailed("uplink port must be 1..=223"));
        }
        Ok(())
    }

    /// Parse and validate a JSON config.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text).map_err(|_| ConfigError::Corrupted)?;
        config.validate()?;
        Ok(config)
    }
}
