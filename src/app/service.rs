//! Application service: the hexagonal core.
//!
//! [`MeasurementLoop`] owns the FSM, the board and the shared context.
//! It exposes a clean, hardware-agnostic API.  All I/O flows through
//! the port traits bundled in [`Platform`], making the entire service
//! testable with a fake board.
//!
//! ```text
//!  Platform ◀──▶ ┌────────────────────────────┐ ──▶ EventSink
//!                │      MeasurementLoop        │
//!  InputPin  ──▶ │  FSM · timers · PIR · probe │
//!                └────────────────────────────┘
//! ```
//!
//! The loop is cooperative: the caller invokes [`MeasurementLoop::poll`]
//! as often as it can, and the FSM is evaluated only when something
//! happened (a request, a timer, an uplink completion).

use embedded_hal::digital::InputPin;
use log::info;

use crate::adapters::log_sink::LogEventSink;
use crate::config::NodeConfig;
use crate::fsm::context::{LoopContext, LoopFlags};
use crate::fsm::states::build_state_table;
use crate::fsm::{Fsm, StateId};
use crate::measurement::Measurement;
use crate::scheduler::Pollable;
use crate::sensors::probe::Probe;

use super::events::LoopEvent;
use super::ports::{EventSink, OneWireBus, Platform};

// ───────────────────────────────────────────────────────────────
// MeasurementLoop
// ───────────────────────────────────────────────────────────────

/// The measurement loop orchestrates all domain logic.
pub struct MeasurementLoop<P, I, B> {
    fsm: Fsm<LoopContext<P, I, B>>,
    ctx: LoopContext<P, I, B>,
    sink: Box<dyn EventSink>,
    poll_count: u64,
    eval_count: u64,
}

impl<P, I, B> MeasurementLoop<P, I, B>
where
    P: Platform,
    I: InputPin,
    B: OneWireBus,
{
    /// Construct the loop.  Does **not** start the FSM; call
    /// [`begin`](Self::begin) next.
    pub fn new(
        config: NodeConfig,
        hw: P,
        pir_pin: I,
        feeder_pins: [I; 2],
        probe: Option<Probe<B>>,
    ) -> Self {
        let ctx = LoopContext::new(config, hw, pir_pin, feeder_pins, probe);
        let fsm = Fsm::new(build_state_table(), StateId::Initial);
        Self {
            fsm,
            ctx,
            sink: Box::new(LogEventSink::new()),
            poll_count: 0,
            eval_count: 0,
        }
    }

    /// Replace the default log sink.
    #[must_use]
    pub fn with_sink(mut self, sink: impl EventSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Arm the timers, probe the sensors and start the FSM.
    pub fn begin(&mut self) {
        let ctx = &mut self.ctx;
        let now = ctx.now();
        let now_us = ctx.hw.now_us();

        if !ctx.flags.registered {
            ctx.flags.registered = true;
            ctx.uplink_timer
                .begin(ctx.tx_cycle_secs.saturating_mul(1000), now);
            ctx.pir_sample_timer
                .begin(ctx.config.pir_sample_secs.saturating_mul(1000), now);
            ctx.activity_timer
                .begin(ctx.config.activity_secs.saturating_mul(1000), now);
        }

        ctx.pir.begin(now_us, now);
        ctx.activity.reset(now);
        ctx.feeders.begin();
        if let Some(probe) = ctx.probe.as_mut() {
            probe.begin();
        }

        ctx.flags.have_env = ctx.hw.env_begin();
        if !ctx.flags.have_env {
            log::warn!("No BME280 found: check wiring");
        }
        ctx.flags.have_light = ctx.hw.light_begin();
        if ctx.flags.have_light {
            // assume dark until the first reading says otherwise
            ctx.flags.low_light = true;
        } else {
            log::warn!("No Si1133 found: check hardware");
        }

        if !self.fsm.is_running() {
            ctx.flags.exit = false;
            ctx.flags.fw_update = false;
            self.fsm.start(ctx);
            let state = self.fsm.current_state();
            self.ctx.events.insert(0, LoopEvent::Started(state));
            info!("MeasurementLoop started in {:?}", state);
        }
        self.drain_events();
    }

    /// Ask the FSM to stop.  Every state moves to `Final`.
    pub fn end(&mut self) {
        if self.fsm.is_running() {
            self.ctx.flags.exit = true;
            self.eval();
        }
    }

    /// Request activation (`true`) or deactivation (`false`).
    pub fn request_active(&mut self, enable: bool) {
        if enable {
            self.ctx.flags.rq_active = true;
        } else {
            self.ctx.flags.rq_inactive = true;
        }
        self.eval();
    }

    /// Change the uplink interval and the fast-start count.
    pub fn set_tx_cycle_time(&mut self, secs: u32, count: u32) {
        self.ctx.set_tx_cycle_time(secs, count);
        if self.ctx.uplink_timer.peek_ticks() != 0 {
            self.eval();
        } else {
            self.drain_events();
        }
    }

    // ── Per-poll orchestration ────────────────────────────────

    /// Run one cooperative step: sample inputs, advance the timers,
    /// evaluate the FSM if anything happened, then nap if allowed.
    pub fn poll(&mut self) {
        self.poll_count += 1;
        let ctx = &mut self.ctx;
        let now = ctx.now();
        let now_us = ctx.hw.now_us();

        // 1. Inputs and timers run whether or not the loop is active
        ctx.pir.poll(now_us, now);
        ctx.feeders.poll();
        ctx.uplink_timer.poll(now);
        ctx.pir_sample_timer.poll(now);
        ctx.activity_timer.poll(now);
        let state_timer_fired = ctx.state_timer.poll(now);

        // 2. Collect events
        let mut event = false;
        if !ctx.flags.active {
            if !ctx.flags.rq_active {
                self.drain_events();
                return;
            }
            event = true;
        }

        if ctx.pir_sample_timer.is_ready() {
            ctx.accumulate_pir();
        }
        if ctx.activity_timer.is_ready() && ctx.measure_activity() {
            event = true;
        }
        if state_timer_fired {
            event = true;
        }
        if ctx.uplink_timer.peek_ticks() != 0 {
            event = true;
        }
        if ctx.collect_uplink_done() {
            event = true;
        }

        // 3. FSM
        if event {
            self.eval();
        }

        // 4. Power
        self.idle_nap();
        self.drain_events();
    }

    // ── Queries ───────────────────────────────────────────────

    /// Current FSM state.
    pub fn state(&self) -> StateId {
        self.fsm.current_state()
    }

    pub fn is_active(&self) -> bool {
        self.ctx.flags.active
    }

    /// Snapshot of the lifecycle and status flags.
    pub fn flags(&self) -> LoopFlags {
        self.ctx.flags
    }

    /// Current uplink interval (seconds) and fast-start count.
    pub fn tx_cycle(&self) -> (u32, u32) {
        (self.ctx.tx_cycle_secs, self.ctx.tx_cycle_count)
    }

    /// The last completed measurement and its encoded payload.
    pub fn last_file_record(&self) -> (&Measurement, &[u8]) {
        (&self.ctx.file_data, self.ctx.file_tx.as_bytes())
    }

    /// Measurement currently being built.
    pub fn pending_measurement(&self) -> &Measurement {
        &self.ctx.data
    }

    pub fn config(&self) -> &NodeConfig {
        &self.ctx.config
    }

    pub fn hw(&self) -> &P {
        &self.ctx.hw
    }

    pub fn hw_mut(&mut self) -> &mut P {
        &mut self.ctx.hw
    }

    /// Total polls executed since construction.
    pub fn poll_count(&self) -> u64 {
        self.poll_count
    }

    /// FSM evaluations so far.  Polls without a trigger do not count.
    pub fn eval_count(&self) -> u64 {
        self.eval_count
    }

    // ── Internal ──────────────────────────────────────────────

    fn eval(&mut self) {
        self.eval_count += 1;
        let prev = self.fsm.current_state();
        self.fsm.eval(&mut self.ctx);
        let next = self.fsm.current_state();
        if next != prev {
            self.ctx
                .events
                .push(LoopEvent::StateChanged { from: prev, to: next });
        }
        self.drain_events();
    }

    /// Low-power nap between polls.  Skipped on USB power, during a
    /// firmware download and when the radio needs the CPU soon.
    fn idle_nap(&mut self) {
        let ctx = &mut self.ctx;
        let vbus = ctx.hw.bus_voltage();
        ctx.flags.usb_power = vbus > ctx.config.usb_power_threshold_v;

        let ms = ctx.config.idle_sleep_ms;
        if ctx.flags.usb_power || ctx.flags.fw_update || ms == 0 {
            return;
        }
        if ctx.hw.has_time_critical_jobs(ms) {
            return;
        }
        ctx.hw.prepare_sleep();
        ctx.hw.light_sleep(ms);
        ctx.hw.advance_ms(ms);
        ctx.hw.recover_from_sleep();
    }

    fn drain_events(&mut self) {
        for event in self.ctx.events.drain(..) {
            self.sink.emit(&event);
        }
    }
}

impl<P, I, B> Pollable for MeasurementLoop<P, I, B>
where
    P: Platform,
    I: InputPin,
    B: OneWireBus,
{
    fn name(&self) -> &'static str {
        "measurement-loop"
    }

    fn poll(&mut self) {
        MeasurementLoop::poll(self);
    }
}
