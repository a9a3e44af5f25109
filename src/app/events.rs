//! Outbound loop events.
//!
//! The [`MeasurementLoop`](super::service::MeasurementLoop) emits these
//! through the [`EventSink`](super::ports::EventSink) port.  Adapters on
//! the other side decide what to do with them: log to the console, count
//! them in a test, forward them to a host tool.

use crate::fsm::StateId;
use crate::measurement::Format;
use crate::app::ports::ImageKind;

/// Structured events emitted by the measurement loop.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopEvent {
    /// The loop has started (carries initial state).
    Started(StateId),

    /// The FSM transitioned between states.
    StateChanged { from: StateId, to: StateId },

    /// The loop went active or inactive.
    ActiveChanged(bool),

    /// An activity window closed; `count` is the sequence length now.
    ActivityRecorded { avg: f32, count: usize },

    /// An uplink was handed to the transport.
    UplinkQueued { format: Format, len: usize, confirmed: bool },

    /// The transport could not launch the uplink.
    UplinkNotLaunched,

    /// The transport reported completion.
    UplinkCompleted { success: bool },

    /// The uplink interval changed.
    TxCycleChanged { secs: u32, count: u32 },

    /// A row was appended to the SD log.
    LogRowWritten,

    /// The SD log write failed.
    LogWriteFailed,

    /// A firmware image was flashed; a reset follows.
    FirmwareUpdated(ImageKind),

    /// A network migration was applied.
    MigrationApplied,

    /// The board is about to sleep for `ms` milliseconds.
    Sleeping { deep: bool, ms: u32 },
}
