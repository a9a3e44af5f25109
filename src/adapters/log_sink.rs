//! Log-based event sink adapter and the console logger.
//!
//! [`LogEventSink`] implements [`EventSink`] by writing structured loop
//! events to the `log` channel.  [`MaskedLogger`] is the `log::Log`
//! backend behind that channel: it writes to stderr and drops records
//! whose level is masked off by the runtime debug mask, which the `log`
//! console command changes without locks.

use core::sync::atomic::{AtomicU32, Ordering};
use std::io::Write;

use log::{info, Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

use crate::app::events::LoopEvent;
use crate::app::ports::EventSink;
use crate::codec::to_hex;

// ───────────────────────────────────────────────────────────────
// Debug mask
// ───────────────────────────────────────────────────────────────

/// Bits of the runtime debug mask.
pub struct DebugFlags;

impl DebugFlags {
    pub const ERROR: u32 = 1 << 0;
    pub const WARNING: u32 = 1 << 1;
    pub const TRACE: u32 = 1 << 2;
    pub const INFO: u32 = 1 << 3;
    pub const DEFAULT: u32 = Self::ERROR | Self::TRACE;
}

static DEBUG_MASK: AtomicU32 = AtomicU32::new(DebugFlags::DEFAULT);

/// Current debug mask.
pub fn mask() -> u32 {
    DEBUG_MASK.load(Ordering::Relaxed)
}

pub fn set_mask(mask: u32) {
    DEBUG_MASK.store(mask, Ordering::Relaxed);
}

/// Mask bit that gates `level`.
pub fn level_bit(level: Level) -> u32 {
    match level {
        Level::Error => DebugFlags::ERROR,
        Level::Warn => DebugFlags::WARNING,
        Level::Info => DebugFlags::INFO,
        Level::Debug | Level::Trace => DebugFlags::TRACE,
    }
}

// ───────────────────────────────────────────────────────────────
// Logger
// ───────────────────────────────────────────────────────────────

/// `log` backend filtered by the debug mask.
pub struct MaskedLogger;

static LOGGER: MaskedLogger = MaskedLogger;

impl Log for MaskedLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        mask() & level_bit(metadata.level()) != 0
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err, "[{:<5}] {}", record.level(), record.args());
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Install [`MaskedLogger`] with `initial_mask`.
pub fn init(initial_mask: u32) -> Result<(), SetLoggerError> {
    set_mask(initial_mask);
    log::set_logger(&LOGGER)?;
    log::set_max_level(LevelFilter::Trace);
    Ok(())
}

// ───────────────────────────────────────────────────────────────
// Event sink
// ───────────────────────────────────────────────────────────────

/// Adapter that logs every [`LoopEvent`] to the serial console.
#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &LoopEvent) {
        match event {
            LoopEvent::Started(state) => info!("START | initial_state={:?}", state),
            LoopEvent::StateChanged { from, to } => info!("STATE | {:?} -> {:?}", from, to),
            LoopEvent::ActiveChanged(active) => info!("MODE  | active={}", active),
            LoopEvent::ActivityRecorded { avg, count } => {
                info!("PIR   | window avg={:.3} entries={}", avg, count);
            }
            LoopEvent::UplinkQueued {
                format,
                len,
                confirmed,
            } => info!("TX    | queued {} bytes, format {}, confirmed={}", len, format, confirmed),
            LoopEvent::UplinkNotLaunched => info!("TX    | not launched"),
            LoopEvent::UplinkCompleted { success } => info!("TX    | complete, success={}", success),
            LoopEvent::TxCycleChanged { secs, count } => {
                info!("TX    | cycle {} secs, count {}", secs, count);
            }
            LoopEvent::LogRowWritten => info!("SD    | row written"),
            LoopEvent::LogWriteFailed => info!("SD    | row not written"),
            LoopEvent::FirmwareUpdated(kind) => info!("FW    | {:?} image applied", kind),
            LoopEvent::MigrationApplied => info!("FW    | migration applied"),
            LoopEvent::Sleeping { deep, ms } => {
                info!("POWER | {} sleep {} ms", if *deep { "deep" } else { "light" }, ms);
            }
        }
    }
}

/// Render a payload the way the console shows uplinks.
pub fn payload_line(bytes: &[u8]) -> String {
    format!("{} bytes: {}", bytes.len(), to_hex(bytes))
}
