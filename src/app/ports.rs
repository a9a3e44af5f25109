//! Port traits: the hexagonal boundary between the measurement loop and
//! the board.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ MeasurementLoop (domain)
//! ```
//!
//! Every piece of hardware the loop touches is reached through one of the
//! traits below.  A board support layer implements all of them on one
//! object, which then satisfies [`Platform`] through the blanket impl; the
//! loop owns that object, so the domain core never touches a peripheral
//! directly and the integration tests substitute a scripted fake.
//!
//! Method names are prefixed per port (`card_*`, `light_*`, …) so a
//! single type can implement every port without ambiguity.

use std::rc::Rc;

use chrono::NaiveDateTime;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::signal::Signal;

use crate::error::SensorError;
use crate::measurement::{Env, Light};

/// Completion signal shared between the loop and the uplink transport.
/// The transport raises it with `true` on success and `false` on failure.
pub type UplinkDone = Rc<Signal<NoopRawMutex, bool>>;

// ───────────────────────────────────────────────────────────────
// Time
// ───────────────────────────────────────────────────────────────

/// Monotonic software clock.
///
/// The clock does not run while the MCU is in a sleep mode, so callers
/// that slept must add the slept time back with [`advance_ms`](Self::advance_ms).
pub trait ClockPort {
    fn now_ms(&self) -> u32;
    fn now_us(&self) -> u32;
    fn advance_ms(&mut self, ms: u32);
}

/// Battery-backed calendar clock, always UTC.
pub trait RtcPort {
    fn rtc_now(&mut self) -> Result<NaiveDateTime, ClockError>;
    fn rtc_set(&mut self, t: NaiveDateTime) -> Result<(), ClockError>;
}

// ───────────────────────────────────────────────────────────────
// Board sensors
// ───────────────────────────────────────────────────────────────

/// Supply rails and boot bookkeeping.
pub trait BoardPort {
    fn battery_voltage(&mut self) -> f32;
    /// System rail; `None` on boards that cannot measure it.
    fn system_voltage(&mut self) -> Option<f32>;
    fn bus_voltage(&mut self) -> f32;
    /// Persistent boot counter; `None` when the board keeps none.
    fn boot_count(&self) -> Option<u32>;
}

/// Temperature / pressure / humidity sensor (BME280).
pub trait EnvSensorPort {
    /// Probe and configure the sensor.  Returns whether it answered.
    fn env_begin(&mut self) -> bool;
    fn read_env(&mut self) -> Result<Env, SensorError>;
}

/// One-shot light sensor (Si1133).
pub trait LightSensorPort {
    /// Probe and configure the sensor.  Returns whether it answered.
    fn light_begin(&mut self) -> bool;
    fn light_start(&mut self);
    fn light_ready(&mut self) -> bool;
    fn light_read(&mut self) -> Light;
    fn light_stop(&mut self);
}

/// OneWire bus with the probe supply switch.
pub trait OneWireBus {
    fn set_power(&mut self, on: bool);
    /// First device found by a bus search.
    fn first_device(&mut self) -> Option<[u8; 8]>;
    fn set_resolution(&mut self, addr: &[u8; 8], bits: u8) -> Result<(), SensorError>;
    fn request_conversion(&mut self, addr: &[u8; 8]) -> Result<(), SensorError>;
    /// Scratchpad temperature in 1/128 °C.  A disconnected probe reports
    /// [`SensorError::Disconnected`].
    fn read_raw(&mut self, addr: &[u8; 8]) -> Result<i16, SensorError>;
}

// ───────────────────────────────────────────────────────────────
// Power and indication
// ───────────────────────────────────────────────────────────────

pub trait PowerPort {
    /// Quiesce buses and peripherals before any sleep.
    fn prepare_sleep(&mut self);
    /// Re-initialise what [`prepare_sleep`](Self::prepare_sleep) shut down.
    fn recover_from_sleep(&mut self);
    /// Blocking light sleep.
    fn light_sleep(&mut self, ms: u32);
    /// Blocking deep sleep; returns on wake.
    fn deep_sleep(&mut self, secs: u32);
    /// Hard MCU reset.  Real boards do not return.
    fn system_reset(&mut self);
    /// Re-run the low-power timer setup (console `mode lptim`).
    fn reconfigure_lptim(&mut self);
}

/// LED blink patterns the loop requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedPattern {
    Off,
    Sleeping,
    Sending,
    TwoShort,
}

pub trait IndicatorPort {
    fn set_led(&mut self, pattern: LedPattern);
}

// ───────────────────────────────────────────────────────────────
// Uplink transport
// ───────────────────────────────────────────────────────────────

/// LoRaWAN MAC as seen by the loop.
pub trait UplinkPort {
    fn is_provisioned(&self) -> bool;

    /// Queue `payload` on `port`.  Returns whether the uplink was launched;
    /// when it was, `done` is raised exactly once, possibly before this
    /// call returns.
    fn send_uplink(&mut self, payload: &[u8], confirmed: bool, port: u8, done: UplinkDone) -> bool;

    /// Drive the MAC.
    fn radio_poll(&mut self);

    /// True if the MAC must run within `within_ms` (RX windows, duty cycle).
    fn has_time_critical_jobs(&self, within_ms: u32) -> bool;

    /// Forget the session and join again.
    fn rejoin(&mut self);

    /// Accept provisioning commands for `secs` seconds.
    fn open_provisioning_window(&mut self, secs: u32);
}

// ───────────────────────────────────────────────────────────────
// Removable storage
// ───────────────────────────────────────────────────────────────

/// One directory listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
}

/// SD card.  Every use is a session: `card_begin`, one or more
/// operations, `card_end`.  Paths are `/`-separated and relative to the
/// card root.
pub trait CardPort {
    /// Power the card and mount the filesystem.
    fn card_begin(&mut self) -> Result<(), CardError>;
    /// Unmount and power down.
    fn card_end(&mut self);
    fn card_exists(&mut self, path: &str) -> bool;
    fn card_mkdir(&mut self, path: &str) -> Result<(), CardError>;
    fn card_append(&mut self, path: &str, data: &[u8]) -> Result<(), CardError>;
    /// Read up to `buf.len()` bytes at `offset`.  Returns 0 at end of file.
    fn card_read_at(&mut self, path: &str, offset: u64, buf: &mut [u8]) -> Result<usize, CardError>;
    fn card_remove(&mut self, path: &str) -> Result<(), CardError>;
    fn card_list(&mut self, path: &str) -> Result<Vec<DirEntry>, CardError>;
}

// ───────────────────────────────────────────────────────────────
// Firmware download
// ───────────────────────────────────────────────────────────────

/// Which flash slot an image is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Update,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    /// Image written and verified; a reset applies it.
    Success,
    /// Header or signature check failed.
    Invalid,
    /// Flash write failed.
    WriteFailed,
    /// The source ran dry before the image was complete.
    Truncated,
}

/// Data source the downloader pulls an image from.
pub trait DownloadClient {
    /// Bytes ready to read now; `Some(0)` means "ask for more",
    /// `None` means the source is exhausted.
    fn query_available(&mut self) -> Option<usize>;
    /// Ask the source to make more data available.
    fn prompt_for_data(&mut self);
    /// Copy up to `buf.len()` ready bytes into `buf`, padding the rest
    /// with 0xFF.  Returns the count of real bytes.
    fn read_bytes(&mut self, buf: &mut [u8]) -> usize;
    /// Final status, reported once.
    fn complete(&mut self, status: DownloadStatus);
}

/// Flash-side image writer.
pub trait FirmwarePort {
    /// Prepare to receive an image.  Returns false when a download cannot
    /// start (busy, no slot).
    fn download_start(&mut self, kind: ImageKind) -> bool;
    /// Advance the download by one step, pulling from `client`.
    fn download_poll(&mut self, client: &mut dyn DownloadClient);
}

// ───────────────────────────────────────────────────────────────
// Config port (driven adapter: domain ↔ persistent storage)
// ───────────────────────────────────────────────────────────────

/// Load and save the node configuration.
///
/// Implementations validate on both paths: a config that fails
/// [`NodeConfig::validate`](crate::config::NodeConfig::validate) is never
/// returned and never stored.
pub trait ConfigPort {
    fn load(&self) -> Result<crate::config::NodeConfig, ConfigError>;
    fn save(&mut self, config: &crate::config::NodeConfig) -> Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: domain ↔ NVS / flash)
// ───────────────────────────────────────────────────────────────

/// Persistent key-value storage for the provisioning record.
///
/// - Keys are namespaced to prevent collisions between subsystems.
/// - Write operations MUST be atomic: no partial writes on power loss.
pub trait StoragePort {
    /// Read a value.  Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key.  Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    /// Check whether a key exists without reading it.
    fn exists(&self, namespace: &str, key: &str) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The loop emits structured [`LoopEvent`](super::events::LoopEvent)s
/// through this port.
pub trait EventSink {
    fn emit(&mut self, event: &super::events::LoopEvent);
}

// ───────────────────────────────────────────────────────────────
// Platform bundle
// ───────────────────────────────────────────────────────────────

/// Everything the measurement loop needs from the board.
pub trait Platform:
    ClockPort
    + RtcPort
    + BoardPort
    + EnvSensorPort
    + LightSensorPort
    + PowerPort
    + IndicatorPort
    + UplinkPort
    + CardPort
    + FirmwarePort
    + StoragePort
{
}

impl<T> Platform for T where
    T: ClockPort
        + RtcPort
        + BoardPort
        + EnvSensorPort
        + LightSensorPort
        + PowerPort
        + IndicatorPort
        + UplinkPort
        + CardPort
        + FirmwarePort
        + StoragePort
{
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from configuration validation and loading.
#[derive(Debug)]
pub enum ConfigError {
    /// No config found.
    NotFound,
    /// Stored config failed deserialization.
    Corrupted,
    /// A config field failed range validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
    /// Generic I/O error from the backing store.
    IoError,
}

/// Errors from [`StoragePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Storage partition is full.
    Full,
    /// Generic I/O error.
    IoError,
}

/// Errors from [`CardPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardError {
    /// No card in the slot, or it did not answer.
    NotPresent,
    /// The filesystem could not be mounted.
    MountFailed,
    NotFound,
    IoError,
}

/// Errors from [`RtcPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockError {
    /// The RTC lost power and has not been set since.
    NotSet,
    /// Bus transaction with the RTC failed.
    BusError,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "config not found"),
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl core::fmt::Display for CardError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotPresent => write!(f, "no SD card"),
            Self::MountFailed => write!(f, "SD mount failed"),
            Self::NotFound => write!(f, "file not found"),
            Self::IoError => write!(f, "SD I/O error"),
        }
    }
}

impl core::fmt::Display for ClockError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotSet => write!(f, "RTC not set"),
            Self::BusError => write!(f, "RTC bus error"),
        }
    }
}
