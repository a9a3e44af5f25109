//! Per-cycle measurement record.
//!
//! A [`Measurement`] is zeroed at the start of every measurement cycle,
//! filled in piecewise by the Measure state (synchronous reads) and the
//! light sensor (asynchronous one-shot), then frozen into the "file"
//! snapshot when the cycle reaches Transmit.  Every optional group has a
//! matching [`Flags`] bit; a group's value is only meaningful when its bit
//! is set.

use core::fmt;
use core::ops::{BitOr, BitOrAssign};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// Maximum number of activity averages carried by one measurement.
pub const MAX_ACTIVITY_ENTRIES: usize = 8;

/// Number of pellet feeders on the board.
pub const NUM_FEEDERS: usize = 2;

// ---------------------------------------------------------------------------
// Wire format tag
// ---------------------------------------------------------------------------

/// Uplink wire format.  Fixed for the lifetime of a measurement loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum Format {
    /// No timestamp, one activity window with min/max, three light channels.
    Legacy = 0x21,
    /// GPS timestamp, pellet counters, up to eight activity averages.
    Pellets = 0x22,
    /// GPS timestamp, external probe temperature instead of pellets.
    Probe = 0x23,
}

impl Format {
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// True when a 4-byte timestamp follows the format byte.
    pub const fn has_timestamp(self) -> bool {
        !matches!(self, Self::Legacy)
    }

    /// Flag bit that marks the activity group in this format.
    pub const fn activity_flag(self) -> Flags {
        match self {
            Self::Legacy => Flags::LEGACY_ACTIVITY,
            Self::Pellets | Self::Probe => Flags::ACTIVITY,
        }
    }

    /// Flag bits this format knows how to encode.
    pub const fn supported_flags(self) -> Flags {
        let common = Flags::VBAT.0 | Flags::VCC.0 | Flags::VBUS.0 | Flags::BOOT.0 | Flags::TPH.0 | Flags::LIGHT.0;
        match self {
            Self::Legacy => Flags(common | Flags::LEGACY_ACTIVITY.0),
            Self::Pellets => Flags(common | Flags::PELLETS.0 | Flags::ACTIVITY.0),
            Self::Probe => Flags(common | Flags::TPROBE.0 | Flags::ACTIVITY.0),
        }
    }

    /// Worst-case payload size with every supported flag set.
    pub const fn max_payload_len(self) -> usize {
        // format + flags + Vbat + Vcc + Vbus + boot + TPH
        let common = 1 + 1 + 2 + 2 + 2 + 1 + 6;
        match self {
            // light IR/White/UV, activity avg/min/max
            Self::Legacy => common + 6 + 6,
            // timestamp, white, pellets, activity
            Self::Pellets => common + 4 + 2 + NUM_FEEDERS * 3 + MAX_ACTIVITY_ENTRIES * 2,
            // timestamp, white, probe, activity
            Self::Probe => common + 4 + 2 + 2 + MAX_ACTIVITY_ENTRIES * 2,
        }
    }
}

impl TryFrom<u8> for Format {
    type Error = CodecError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0x21 => Ok(Self::Legacy),
            0x22 => Ok(Self::Pellets),
            0x23 => Ok(Self::Probe),
            other => Err(CodecError::UnknownFormat(other)),
        }
    }
}

impl From<Format> for u8 {
    fn from(f: Format) -> Self {
        f.tag()
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02x}", self.tag())
    }
}

// ---------------------------------------------------------------------------
// Flags
// ---------------------------------------------------------------------------

/// Presence bitset carried in the payload's flag byte.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Flags(u8);

impl Flags {
    pub const NONE: Self = Self(0);
    pub const VBAT: Self = Self(1 << 0);
    pub const VCC: Self = Self(1 << 1);
    pub const VBUS: Self = Self(1 << 2);
    pub const BOOT: Self = Self(1 << 3);
    pub const TPH: Self = Self(1 << 4);
    pub const LIGHT: Self = Self(1 << 5);
    /// Format 0x21 activity window (avg/min/max).
    pub const LEGACY_ACTIVITY: Self = Self(1 << 6);
    /// Format 0x22 pellet counters.
    pub const PELLETS: Self = Self(1 << 6);
    /// Format 0x23 external probe temperature.
    pub const TPROBE: Self = Self(1 << 6);
    /// Format 0x22/0x23 activity sequence.
    pub const ACTIVITY: Self = Self(1 << 7);

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }
}

impl BitOr for Flags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Flags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Flags(0b{:08b})", self.0)
    }
}

// ---------------------------------------------------------------------------
// Groups
// ---------------------------------------------------------------------------

/// BME280 reading.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Env {
    /// Degrees Celsius.
    pub temperature: f32,
    /// hPa.
    pub pressure: f32,
    /// Percent relative humidity.
    pub humidity: f32,
}

/// Light sensor channels in raw counts.  Only `white` is measured by the
/// current boards; IR and UV ride along for format 0x21.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Light {
    pub ir: f32,
    pub white: f32,
    pub uv: f32,
}

/// One feeder's counters as captured by `read_and_reset`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PelletReading {
    /// Pellets dispensed since the previous capture (saturating).
    pub recent: u8,
    /// Pellets dispensed since power-up.
    pub total: u32,
}

/// Bounded FIFO of per-window PIR activity averages, oldest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivityLog {
    entries: heapless::Vec<f32, MAX_ACTIVITY_ENTRIES>,
    /// Minimum filter value seen in the most recent window.
    pub last_min: f32,
    /// Maximum filter value seen in the most recent window.
    pub last_max: f32,
}

impl ActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an average, evicting the oldest entry when full.
    pub fn push(&mut self, avg: f32) {
        if self.entries.is_full() {
            self.entries.remove(0);
        }
        // Cannot fail: a slot was freed above if the log was full.
        let _ = self.entries.push(avg);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.is_full()
    }

    /// Entries oldest first.
    pub fn as_slice(&self) -> &[f32] {
        &self.entries
    }

    /// Most recent average, if any.
    pub fn latest(&self) -> Option<f32> {
        self.entries.last().copied()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.last_min = 0.0;
        self.last_max = 0.0;
    }
}

// ---------------------------------------------------------------------------
// Measurement
// ---------------------------------------------------------------------------

/// Everything one measurement cycle produces.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Measurement {
    pub flags: Flags,
    /// Battery volts.
    pub vbat: f32,
    /// System rail volts.
    pub vsystem: f32,
    /// USB bus volts.
    pub vbus: f32,
    pub boot_count: u32,
    /// RTC time in UTC; `None` when the RTC was not set or could not be read.
    pub timestamp: Option<NaiveDateTime>,
    pub env: Env,
    pub light: Light,
    pub activity: ActivityLog,
    pub pellets: [PelletReading; NUM_FEEDERS],
    /// External probe, degrees Celsius.
    pub probe_c: f32,
}

impl Measurement {
    /// Zero everything, including the flag byte.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// True when the record can be written to the SD log.
    pub fn has_valid_timestamp(&self) -> bool {
        self.timestamp
            .is_some_and(|t| t.and_utc().timestamp() > 0)
    }
}
