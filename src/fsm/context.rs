//! Shared mutable context threaded through every FSM handler.
//!
//! `LoopContext` is the single struct that state handlers read from and
//! write to.  It owns the board ([`Platform`]), the sensor drivers, the
//! loop's timers, the measurement being built and the snapshot of the
//! last one.  Think of it as the "blackboard" in a blackboard architecture.

use std::rc::Rc;

use embassy_sync::signal::Signal;
use embedded_hal::digital::InputPin;
use log::info;

use crate::app::events::LoopEvent;
use crate::app::ports::{LedPattern, OneWireBus, Platform, UplinkDone};
use crate::codec::TxBuffer;
use crate::config::NodeConfig;
use crate::measurement::Measurement;
use crate::sensors::pellet::PelletFeeder;
use crate::sensors::pir::{ActivityAccumulator, PirFilter};
use crate::sensors::probe::Probe;
use crate::timer::{Timeout, Timer};

use super::StateId;

// ---------------------------------------------------------------------------
// Flags
// ---------------------------------------------------------------------------

/// Lifecycle, request and status flags of the loop.
///
/// Request flags (`rq_*`) are set by the public API and cleared by the
/// state that honours them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopFlags {
    /// Timers armed by `begin()`.
    pub registered: bool,
    /// Measuring (anything but Inactive).
    pub active: bool,
    pub rq_active: bool,
    pub rq_inactive: bool,
    /// `end()` was called.
    pub exit: bool,
    /// A firmware download is in progress.
    pub fw_update: bool,
    /// Vbus above the USB threshold at the last poll.
    pub usb_power: bool,

    pub tx_pending: bool,
    pub tx_complete: bool,
    pub tx_err: bool,

    /// BME280 answered at `begin()`.
    pub have_env: bool,
    /// Si1133 answered at `begin()`.
    pub have_light: bool,
    /// Last white reading was at or below the low-light threshold.
    pub low_light: bool,
    /// The sleep alert was shown since entering Sleeping.
    pub printed_sleeping: bool,
}

// ---------------------------------------------------------------------------
// LoopContext
// ---------------------------------------------------------------------------

/// The shared context passed to every state handler function.
pub struct LoopContext<P, I, B> {
    // -- Board --
    pub hw: P,
    pub config: NodeConfig,

    // -- Sensors --
    pub pir: PirFilter<I>,
    pub activity: ActivityAccumulator,
    pub feeders: PelletFeeder<I>,
    /// Present only on probe boards.
    pub probe: Option<Probe<B>>,
    /// A probe conversion is running.
    pub probe_started: bool,

    // -- Timing --
    pub uplink_timer: Timer,
    pub pir_sample_timer: Timer,
    pub activity_timer: Timer,
    /// Per-state deadline (Warmup, Measure, probe, deep-sleep countdown, reboot).
    pub state_timer: Timeout,
    /// End of the deep-sleep countdown.
    pub deep_sleep_at: Option<u32>,

    // -- Cadence --
    pub tx_cycle_secs: u32,
    /// Fast-start uplinks left; 0 once the permanent interval is in force.
    pub tx_cycle_count: u32,

    // -- Data --
    /// Measurement being built.
    pub data: Measurement,
    /// Snapshot of the last completed measurement, for the SD log.
    pub file_data: Measurement,
    /// Encoded payload of `file_data`.
    pub file_tx: TxBuffer,

    pub flags: LoopFlags,
    pub tx_done: UplinkDone,

    /// Events raised by handlers, drained by the service after each poll.
    pub events: Vec<LoopEvent>,
}

impl<P, I, B> LoopContext<P, I, B>
where
    P: Platform,
    I: InputPin,
    B: OneWireBus,
{
    pub fn new(
        config: NodeConfig,
        hw: P,
        pir_pin: I,
        feeder_pins: [I; 2],
        probe: Option<Probe<B>>,
    ) -> Self {
        Self {
            tx_cycle_secs: config.tx_cycle_secs,
            tx_cycle_count: config.tx_cycle_count,
            hw,
            config,
            pir: PirFilter::new(pir_pin),
            activity: ActivityAccumulator::default(),
            feeders: PelletFeeder::new(feeder_pins),
            probe,
            probe_started: false,
            uplink_timer: Timer::new(),
            pir_sample_timer: Timer::new(),
            activity_timer: Timer::new(),
            state_timer: Timeout::new(),
            deep_sleep_at: None,
            data: Measurement::default(),
            file_data: Measurement::default(),
            file_tx: TxBuffer::new(),
            flags: LoopFlags::default(),
            tx_done: Rc::new(Signal::new()),
            events: Vec::new(),
        }
    }

    pub fn now(&self) -> u32 {
        self.hw.now_ms()
    }

    /// Arm the per-state deadline.
    pub fn set_timer(&mut self, ms: u32) {
        let now = self.now();
        self.state_timer.set(ms, now);
    }

    /// Test-and-clear the per-state deadline.
    pub fn timed_out(&mut self) -> bool {
        self.state_timer.timed_out()
    }

    /// Show `pattern` unless the LED is suppressed in low light.
    pub fn show_led(&mut self, pattern: LedPattern) {
        if !(self.config.disable_led_in_low_light && self.flags.low_light) {
            self.hw.set_led(pattern);
        }
    }

    /// State that starts a measurement: the probe states on probe boards.
    pub fn measure_entry_state(&self) -> StateId {
        if self.probe.is_some() && self.config.format == crate::measurement::Format::Probe {
            StateId::TprobePowerOn
        } else {
            StateId::Measure
        }
    }

    /// Change the uplink interval and the fast-start count.
    pub fn set_tx_cycle_time(&mut self, secs: u32, count: u32) {
        self.tx_cycle_secs = secs;
        self.tx_cycle_count = count;
        self.uplink_timer.set_interval(secs.saturating_mul(1000));
        self.events.push(LoopEvent::TxCycleChanged { secs, count });
    }

    /// Count one completed uplink against the fast-start budget.  The
    /// permanent interval is restored exactly once, when the count runs out.
    pub fn update_tx_cycle_time(&mut self) {
        match self.tx_cycle_count {
            0 => {}
            1 => {
                info!("resetting tx cycle to default: {}", self.config.tx_cycle_secs_permanent);
                self.set_tx_cycle_time(self.config.tx_cycle_secs_permanent, 0);
            }
            n => self.tx_cycle_count = n - 1,
        }
    }

    /// Fold a transport completion into the tx flags.  Returns whether one
    /// was pending.
    pub fn collect_uplink_done(&mut self) -> bool {
        let Some(success) = self.tx_done.try_take() else {
            return false;
        };
        self.flags.tx_pending = false;
        self.flags.tx_complete = true;
        self.flags.tx_err = !success;
        self.events.push(LoopEvent::UplinkCompleted { success });
        true
    }

    /// Fold the current PIR filter value into the activity window.
    pub fn accumulate_pir(&mut self) {
        let (value, t) = self.pir.read_with_time();
        self.activity.accumulate(value, t);
    }

    /// Close the activity window and append its average.  Returns whether
    /// the activity sequence is now full.
    pub fn measure_activity(&mut self) -> bool {
        let now = self.now();
        let Some(sample) = self.activity.measure(now) else {
            return false;
        };
        self.data.activity.push(sample.avg);
        self.data.activity.last_min = sample.min;
        self.data.activity.last_max = sample.max;
        self.data.flags |= self.config.format.activity_flag();
        if let Ok(t) = self.hw.rtc_now() {
            self.data.timestamp = Some(t);
        }
        self.events.push(LoopEvent::ActivityRecorded {
            avg: sample.avg,
            count: self.data.activity.len(),
        });
        self.data.activity.is_full()
    }
}
