//! Unified error types for the sensor node.
//!
//! A single `Error` enum that every subsystem can convert into.  All
//! variants are `Copy` so they can be passed through the FSM and the
//! event sink without allocation.  FSM states never propagate these past
//! their own boundary; they log and pick the fallback edge instead.

use core::fmt;

use crate::app::ports::ConfigError;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible operation in the node funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A sensor could not be read or is absent.
    Sensor(SensorError),
    /// The uplink payload could not be encoded or decoded.
    Codec(CodecError),
    /// The SD data log could not be written.
    Log(LogError),
    /// A firmware update or migration step failed.
    Update(UpdateError),
    /// Configuration is invalid or could not be loaded.
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sensor(e) => write!(f, "sensor: {e}"),
            Self::Codec(e) => write!(f, "codec: {e}"),
            Self::Log(e) => write!(f, "log: {e}"),
            Self::Update(e) => write!(f, "update: {e}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl core::error::Error for Error {}

// ---------------------------------------------------------------------------
// Sensor errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    /// Sensor did not answer at `begin()`.
    NotPresent,
    /// A bus transaction failed.
    BusError,
    /// GPIO read returned an error.
    GpioReadFailed,
    /// A OneWire device reported "disconnected" during a read.
    Disconnected,
    /// A OneWire device with an unsupported family code was found.
    UnsupportedDevice,
    /// A conversion was polled before it was started.
    NotStarted,
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotPresent => write!(f, "sensor not present"),
            Self::BusError => write!(f, "bus transaction failed"),
            Self::GpioReadFailed => write!(f, "GPIO read failed"),
            Self::Disconnected => write!(f, "device disconnected"),
            Self::UnsupportedDevice => write!(f, "unsupported device"),
            Self::NotStarted => write!(f, "conversion not started"),
        }
    }
}

impl From<SensorError> for Error {
    fn from(e: SensorError) -> Self {
        Self::Sensor(e)
    }
}

// ---------------------------------------------------------------------------
// Codec errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// A put would overflow the fixed-capacity tx buffer.
    CapacityExceeded,
    /// The payload ended before every flagged group was read.
    Truncated,
    /// The first byte is not a known format tag.
    UnknownFormat(u8),
    /// Bytes remain after every flagged group was read.
    TrailingBytes,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CapacityExceeded => write!(f, "tx buffer capacity exceeded"),
            Self::Truncated => write!(f, "payload truncated"),
            Self::UnknownFormat(b) => write!(f, "unknown format byte 0x{b:02x}"),
            Self::TrailingBytes => write!(f, "trailing bytes after payload"),
        }
    }
}

impl From<CodecError> for Error {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

// ---------------------------------------------------------------------------
// SD log errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogError {
    /// The measurement has no valid timestamp.
    ClockNotSet,
    /// No card, or the card could not be mounted.
    NoCard,
    /// `Data` directory could not be created.
    MkdirFailed,
    /// Opening or appending to the data file failed.
    WriteFailed,
    /// The CSV row could not be formatted.
    FormatFailed,
}

impl fmt::Display for LogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClockNotSet => write!(f, "RTC not set, not storing data"),
            Self::NoCard => write!(f, "no SD card"),
            Self::MkdirFailed => write!(f, "can't create data directory"),
            Self::WriteFailed => write!(f, "can't write data file"),
            Self::FormatFailed => write!(f, "can't format log row"),
        }
    }
}

impl From<LogError> for Error {
    fn from(e: LogError) -> Self {
        Self::Log(e)
    }
}

// ---------------------------------------------------------------------------
// Firmware update / migration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateError {
    /// Neither `update.bin` nor `fallback.bin` exists.
    NoImage,
    /// The downloader refused to start.
    StartFailed,
    /// The downloader finished with a failure status.
    DownloadFailed,
    /// The download did not complete within the poll budget.
    Timeout,
    /// The persisted provisioning record could not be read or written.
    ProvisioningStore,
}

impl fmt::Display for UpdateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoImage => write!(f, "no firmware image"),
            Self::StartFailed => write!(f, "download start failed"),
            Self::DownloadFailed => write!(f, "download failed"),
            Self::Timeout => write!(f, "download timed out"),
            Self::ProvisioningStore => write!(f, "provisioning store failed"),
        }
    }
}

impl From<UpdateError> for Error {
    fn from(e: UpdateError) -> Self {
        Self::Update(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(match e {
            ConfigError::NotFound => "not found",
            ConfigError::Corrupted => "stored config corrupted",
            ConfigError::ValidationFailed(msg) => msg,
            ConfigError::IoError => "store I/O failed",
        })
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
