//! Concrete state handler functions and table builder.
//!
//! Each state is defined by three plain `fn` pointers, no closures and no
//! dynamic dispatch.  This is the classic embedded C FSM pattern
//! expressed in safe Rust.
//!
//! ```text
//!  Initial ─▶ Inactive ──[request_active]──▶ Warmup ──[5 s]──┐
//!               ▲                                            ▼
//!               │                          (probe) TprobePowerOn ─▶ TprobeMeasuring
//!     [request_inactive]                                     │
//!               │                                            ▼
//!           Sleeping ◀── TryToMigrate ◀── TryToUpdate ◀── WriteFile ◀── Transmit ◀── Measure
//!            │  ▲                             │              │
//!            │  └────────── AwaitCard ◀───────┼──────────────┘ (no card, not provisioned)
//!            │                                ▼
//!            └──[uplink timer]──▶ Measure   RebootForUpdate ──▶ Final
//!
//!  Any state ──[end()]──▶ Final
//! ```

use embedded_hal::digital::InputPin;
use log::{debug, error, info, warn};

use super::context::LoopContext;
use super::{StateDescriptor, StateId};
use crate::app::events::LoopEvent;
use crate::app::ports::{LedPattern, OneWireBus, Platform};
use crate::codec::{uplink, TxBuffer};
use crate::error::{CodecError, UpdateError};
use crate::measurement::{Flags, Format};
use crate::provisioning::ProvisioningRecord;
use crate::sensors::probe::{CONVERSION_MS, POWER_ON_MS};
use crate::{sdlog, update};

/// Countdown before deep sleep, normal operation.
pub const DEEP_SLEEP_ALERT_SECS: u32 = 30;
/// Countdown before deep sleep in deep-sleep test mode.
pub const DEEP_SLEEP_ALERT_TEST_SECS: u32 = 10;

// ═══════════════════════════════════════════════════════════════════════════
//  Table builder
// ═══════════════════════════════════════════════════════════════════════════

/// Build the static state table.  Called once at construction.
pub fn build_state_table<P, I, B>() -> [StateDescriptor<LoopContext<P, I, B>>; StateId::COUNT]
where
    P: Platform,
    I: InputPin,
    B: OneWireBus,
{
    [
        // Index 0: Initial
        StateDescriptor {
            id: StateId::Initial,
            name: "Initial",
            on_enter: Some(initial_enter),
            on_exit: None,
            on_update: initial_update,
        },
        // Index 1: Inactive
        StateDescriptor {
            id: StateId::Inactive,
            name: "Inactive",
            on_enter: None,
            on_exit: None,
            on_update: inactive_update,
        },
        // Index 2: Warmup
        StateDescriptor {
            id: StateId::Warmup,
            name: "Warmup",
            on_enter: Some(warmup_enter),
            on_exit: None,
            on_update: warmup_update,
        },
        // Index 3: TprobePowerOn
        StateDescriptor {
            id: StateId::TprobePowerOn,
            name: "TprobePowerOn",
            on_enter: Some(probe_power_on_enter),
            on_exit: None,
            on_update: probe_power_on_update,
        },
        // Index 4: TprobeMeasuring
        StateDescriptor {
            id: StateId::TprobeMeasuring,
            name: "TprobeMeasuring",
            on_enter: Some(probe_measuring_enter),
            on_exit: Some(probe_measuring_exit),
            on_update: probe_measuring_update,
        },
        // Index 5: Measure
        StateDescriptor {
            id: StateId::Measure,
            name: "Measure",
            on_enter: Some(measure_enter),
            on_exit: None,
            on_update: measure_update,
        },
        // Index 6: Transmit
        StateDescriptor {
            id: StateId::Transmit,
            name: "Transmit",
            on_enter: Some(transmit_enter),
            on_exit: None,
            on_update: transmit_update,
        },
        // Index 7: WriteFile
        StateDescriptor {
            id: StateId::WriteFile,
            name: "WriteFile",
            on_enter: None,
            on_exit: None,
            on_update: write_file_update,
        },
        // Index 8: TryToUpdate
        StateDescriptor {
            id: StateId::TryToUpdate,
            name: "TryToUpdate",
            on_enter: None,
            on_exit: None,
            on_update: try_to_update_update,
        },
        // Index 9: TryToMigrate
        StateDescriptor {
            id: StateId::TryToMigrate,
            name: "TryToMigrate",
            on_enter: Some(try_to_migrate_enter),
            on_exit: None,
            on_update: to_sleeping,
        },
        // Index 10: AwaitCard
        StateDescriptor {
            id: StateId::AwaitCard,
            name: "AwaitCard",
            on_enter: Some(await_card_enter),
            on_exit: None,
            on_update: to_sleeping,
        },
        // Index 11: Sleeping
        StateDescriptor {
            id: StateId::Sleeping,
            name: "Sleeping",
            on_enter: Some(sleeping_enter),
            on_exit: Some(sleeping_exit),
            on_update: sleeping_update,
        },
        // Index 12: RebootForUpdate
        StateDescriptor {
            id: StateId::RebootForUpdate,
            name: "RebootForUpdate",
            on_enter: Some(reboot_enter),
            on_exit: None,
            on_update: reboot_update,
        },
        // Index 13: Final
        StateDescriptor {
            id: StateId::Final,
            name: "Final",
            on_enter: Some(final_enter),
            on_exit: None,
            on_update: final_update,
        },
    ]
}

// ═══════════════════════════════════════════════════════════════════════════
//  INITIAL / INACTIVE
// ═══════════════════════════════════════════════════════════════════════════

fn initial_enter<P: Platform, I: InputPin, B: OneWireBus>(ctx: &mut LoopContext<P, I, B>) {
    ctx.data.reset();
}

fn initial_update<P: Platform, I: InputPin, B: OneWireBus>(
    ctx: &mut LoopContext<P, I, B>,
) -> Option<StateId> {
    if ctx.flags.exit {
        return Some(StateId::Final);
    }
    Some(StateId::Inactive)
}

fn inactive_update<P: Platform, I: InputPin, B: OneWireBus>(
    ctx: &mut LoopContext<P, I, B>,
) -> Option<StateId> {
    if ctx.flags.exit {
        return Some(StateId::Final);
    }
    if ctx.flags.rq_active {
        ctx.flags.rq_active = false;
        ctx.flags.rq_inactive = false;
        ctx.flags.active = true;
        let now = ctx.now();
        ctx.uplink_timer.retrigger(now);
        ctx.events.push(LoopEvent::ActiveChanged(true));
        return Some(StateId::Warmup);
    }
    None
}

// ═══════════════════════════════════════════════════════════════════════════
//  WARMUP: sensors settle, activity window restarts
// ═══════════════════════════════════════════════════════════════════════════

fn warmup_enter<P: Platform, I: InputPin, B: OneWireBus>(ctx: &mut LoopContext<P, I, B>) {
    let now = ctx.now();
    ctx.activity.reset(now);
    ctx.set_timer(ctx.config.warmup_ms);
}

fn warmup_update<P: Platform, I: InputPin, B: OneWireBus>(
    ctx: &mut LoopContext<P, I, B>,
) -> Option<StateId> {
    if ctx.flags.exit {
        return Some(StateId::Final);
    }
    if ctx.timed_out() {
        return Some(ctx.measure_entry_state());
    }
    None
}

// ═══════════════════════════════════════════════════════════════════════════
//  TPROBE: power the probe, run one conversion
// ═══════════════════════════════════════════════════════════════════════════

fn probe_power_on_enter<P: Platform, I: InputPin, B: OneWireBus>(
    ctx: &mut LoopContext<P, I, B>,
) {
    let now = ctx.now();
    if let Some(probe) = ctx.probe.as_mut() {
        probe.power_up(now);
    }
    ctx.set_timer(POWER_ON_MS);
}

fn probe_power_on_update<P: Platform, I: InputPin, B: OneWireBus>(
    ctx: &mut LoopContext<P, I, B>,
) -> Option<StateId> {
    if ctx.flags.exit {
        return Some(StateId::Final);
    }
    let now = ctx.now();
    match ctx.probe.as_mut().map(|probe| probe.poll_power(now)) {
        Some(false) => None,
        _ => Some(StateId::TprobeMeasuring),
    }
}

fn probe_measuring_enter<P: Platform, I: InputPin, B: OneWireBus>(
    ctx: &mut LoopContext<P, I, B>,
) {
    let now = ctx.now();
    ctx.probe_started = ctx
        .probe
        .as_mut()
        .is_some_and(|probe| probe.start_measurement(now));
    if ctx.probe_started {
        ctx.set_timer(CONVERSION_MS + 1);
    } else {
        debug!("probe: no device on the bus");
    }
}

fn probe_measuring_update<P: Platform, I: InputPin, B: OneWireBus>(
    ctx: &mut LoopContext<P, I, B>,
) -> Option<StateId> {
    if ctx.flags.exit {
        return Some(StateId::Final);
    }
    if !ctx.probe_started {
        return Some(StateId::Measure);
    }
    let now = ctx.now();
    let probe = ctx.probe.as_mut()?;
    if !probe.poll_measurement(now) {
        return None;
    }
    match probe.finish_measurement() {
        Ok(c) => {
            ctx.data.probe_c = c;
            ctx.data.flags |= Flags::TPROBE;
        }
        Err(e) => warn!("probe: read failed: {}", e),
    }
    Some(StateId::Measure)
}

fn probe_measuring_exit<P: Platform, I: InputPin, B: OneWireBus>(
    ctx: &mut LoopContext<P, I, B>,
) {
    ctx.probe_started = false;
    if let Some(probe) = ctx.probe.as_mut() {
        probe.power_down();
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  MEASURE: synchronous readings, then wait for the light sensor
// ═══════════════════════════════════════════════════════════════════════════

fn measure_enter<P: Platform, I: InputPin, B: OneWireBus>(ctx: &mut LoopContext<P, I, B>) {
    if ctx.flags.have_light {
        ctx.hw.light_start();
    }
    update_synchronous_measurements(ctx);
    ctx.set_timer(ctx.config.measure_timeout_ms);
}

fn measure_update<P: Platform, I: InputPin, B: OneWireBus>(
    ctx: &mut LoopContext<P, I, B>,
) -> Option<StateId> {
    if ctx.flags.exit {
        return Some(StateId::Final);
    }
    if !ctx.flags.have_light {
        return Some(StateId::Transmit);
    }
    if ctx.hw.light_ready() {
        update_light(ctx);
        ctx.hw.light_stop();
        return Some(StateId::Transmit);
    }
    if ctx.timed_out() {
        ctx.hw.light_stop();
        error!("light sensor timed out");
        return Some(StateId::Transmit);
    }
    None
}

fn update_synchronous_measurements<P: Platform, I: InputPin, B: OneWireBus>(
    ctx: &mut LoopContext<P, I, B>,
) {
    let data = &mut ctx.data;

    data.vbat = ctx.hw.battery_voltage();
    data.flags |= Flags::VBAT;

    if let Some(v) = ctx.hw.system_voltage() {
        data.vsystem = v;
        data.flags |= Flags::VCC;
    }

    data.vbus = ctx.hw.bus_voltage();
    data.flags |= Flags::VBUS;

    if let Some(n) = ctx.hw.boot_count() {
        data.boot_count = n;
        data.flags |= Flags::BOOT;
    }

    if ctx.flags.have_env {
        match ctx.hw.read_env() {
            Ok(env) => {
                data.env = env;
                data.flags |= Flags::TPH;
            }
            Err(e) => warn!("BME280 read failed: {}", e),
        }
    }

    if ctx.config.format == Format::Pellets {
        data.pellets = ctx.feeders.read_and_reset();
        data.flags |= Flags::PELLETS;
    }

    data.timestamp = ctx.hw.rtc_now().ok();
}

fn update_light<P: Platform, I: InputPin, B: OneWireBus>(ctx: &mut LoopContext<P, I, B>) {
    let light = ctx.hw.light_read();
    ctx.flags.low_light = light.white <= f32::from(ctx.config.low_light_threshold);
    ctx.data.light = light;
    ctx.data.flags |= Flags::LIGHT;
}

// ═══════════════════════════════════════════════════════════════════════════
//  TRANSMIT: encode, snapshot for the log, hand to the radio
// ═══════════════════════════════════════════════════════════════════════════

fn transmit_enter<P: Platform, I: InputPin, B: OneWireBus>(ctx: &mut LoopContext<P, I, B>) {
    let encoded = uplink::encode(&ctx.data, ctx.config.format);
    stage_uplink(ctx, encoded);
}

/// Snapshot the measurement for the log and launch the uplink.  A payload
/// that failed to encode is never sent; the cycle completes as a failed
/// transmit.
fn stage_uplink<P: Platform, I: InputPin, B: OneWireBus>(
    ctx: &mut LoopContext<P, I, B>,
    encoded: Result<TxBuffer, CodecError>,
) {
    ctx.file_data = ctx.data.clone();
    ctx.data.reset();
    ctx.flags.tx_complete = false;

    match encoded {
        Ok(tx) => {
            debug!("uplink {}: {:?}", ctx.config.format, tx);
            ctx.file_tx = tx;
            if ctx.hw.is_provisioned() {
                start_transmission(ctx);
            }
        }
        Err(e) => {
            error!("uplink encode failed, not sending: {}", e);
            ctx.file_tx = TxBuffer::new();
            ctx.flags.tx_pending = false;
            ctx.flags.tx_complete = true;
            ctx.flags.tx_err = true;
        }
    }
}

fn start_transmission<P: Platform, I: InputPin, B: OneWireBus>(ctx: &mut LoopContext<P, I, B>) {
    ctx.hw.set_led(LedPattern::Off);
    ctx.show_led(LedPattern::Sending);

    let confirmed = ctx.config.operating.confirmed_uplink;
    if confirmed {
        info!("requesting confirmed tx");
    }

    ctx.flags.tx_pending = true;
    ctx.flags.tx_complete = false;
    ctx.flags.tx_err = false;
    ctx.tx_done.reset();

    let launched = ctx.hw.send_uplink(
        ctx.file_tx.as_bytes(),
        confirmed,
        ctx.config.uplink_port,
        ctx.tx_done.clone(),
    );
    if launched {
        ctx.events.push(LoopEvent::UplinkQueued {
            format: ctx.config.format,
            len: ctx.file_tx.len(),
            confirmed,
        });
    } else {
        warn!("uplink not launched");
        ctx.flags.tx_pending = false;
        ctx.flags.tx_complete = true;
        ctx.flags.tx_err = true;
        ctx.events.push(LoopEvent::UplinkNotLaunched);
    }
}

fn transmit_update<P: Platform, I: InputPin, B: OneWireBus>(
    ctx: &mut LoopContext<P, I, B>,
) -> Option<StateId> {
    if ctx.flags.exit {
        return Some(StateId::Final);
    }
    ctx.collect_uplink_done();

    if !ctx.hw.is_provisioned() {
        return Some(StateId::WriteFile);
    }
    if ctx.flags.tx_complete {
        ctx.update_tx_cycle_time();
        return Some(StateId::WriteFile);
    }
    None
}

// ═══════════════════════════════════════════════════════════════════════════
//  WRITEFILE / TRYTOUPDATE / TRYTOMIGRATE / AWAITCARD: card housekeeping
// ═══════════════════════════════════════════════════════════════════════════

fn write_file_update<P: Platform, I: InputPin, B: OneWireBus>(
    ctx: &mut LoopContext<P, I, B>,
) -> Option<StateId> {
    if ctx.flags.exit {
        return Some(StateId::Final);
    }
    let dev_eui = if ctx.hw.is_provisioned() {
        ProvisioningRecord::load(&ctx.hw).map(|r| r.dev_eui)
    } else {
        None
    };
    match sdlog::write_record(
        &mut ctx.hw,
        &ctx.file_data,
        ctx.config.format,
        ctx.file_tx.as_bytes(),
        dev_eui,
    ) {
        Ok(()) => {
            ctx.events.push(LoopEvent::LogRowWritten);
            Some(StateId::TryToUpdate)
        }
        Err(e) => {
            debug!("data log not written: {}", e);
            ctx.events.push(LoopEvent::LogWriteFailed);
            if ctx.hw.is_provisioned() {
                Some(StateId::TryToUpdate)
            } else {
                Some(StateId::AwaitCard)
            }
        }
    }
}

fn try_to_update_update<P: Platform, I: InputPin, B: OneWireBus>(
    ctx: &mut LoopContext<P, I, B>,
) -> Option<StateId> {
    if ctx.flags.exit {
        return Some(StateId::Final);
    }
    ctx.flags.fw_update = true;
    let next = match update::apply_sd_update(&mut ctx.hw) {
        Ok(kind) => {
            ctx.events.push(LoopEvent::FirmwareUpdated(kind));
            StateId::RebootForUpdate
        }
        Err(UpdateError::NoImage) => StateId::TryToMigrate,
        Err(e) => {
            warn!("firmware update failed: {}", e);
            StateId::TryToMigrate
        }
    };
    ctx.flags.fw_update = false;
    Some(next)
}

fn try_to_migrate_enter<P: Platform, I: InputPin, B: OneWireBus>(
    ctx: &mut LoopContext<P, I, B>,
) {
    match update::check_migration(&mut ctx.hw) {
        Ok(true) => ctx.events.push(LoopEvent::MigrationApplied),
        Ok(false) => {}
        Err(e) => warn!("migration failed: {}", e),
    }
}

fn await_card_enter<P: Platform, I: InputPin, B: OneWireBus>(_ctx: &mut LoopContext<P, I, B>) {
    warn!("no SD card and not provisioned!");
}

fn to_sleeping<P: Platform, I: InputPin, B: OneWireBus>(
    ctx: &mut LoopContext<P, I, B>,
) -> Option<StateId> {
    if ctx.flags.exit {
        return Some(StateId::Final);
    }
    Some(StateId::Sleeping)
}

// ═══════════════════════════════════════════════════════════════════════════
//  SLEEPING: wait for the next uplink, deep sleep when allowed
// ═══════════════════════════════════════════════════════════════════════════

fn sleeping_enter<P: Platform, I: InputPin, B: OneWireBus>(ctx: &mut LoopContext<P, I, B>) {
    let now = ctx.now();
    ctx.activity.reset(now);
    ctx.show_led(LedPattern::Sleeping);
    ctx.flags.printed_sleeping = false;
    ctx.deep_sleep_at = None;
}

fn sleeping_exit<P: Platform, I: InputPin, B: OneWireBus>(ctx: &mut LoopContext<P, I, B>) {
    ctx.state_timer.cancel();
    ctx.deep_sleep_at = None;
}

fn sleeping_update<P: Platform, I: InputPin, B: OneWireBus>(
    ctx: &mut LoopContext<P, I, B>,
) -> Option<StateId> {
    if ctx.flags.exit {
        return Some(StateId::Final);
    }
    if ctx.flags.rq_inactive {
        ctx.flags.rq_active = false;
        ctx.flags.rq_inactive = false;
        ctx.flags.active = false;
        ctx.events.push(LoopEvent::ActiveChanged(false));
        return Some(StateId::Inactive);
    }
    if ctx.uplink_timer.is_ready() {
        return Some(ctx.measure_entry_state());
    }

    let now = ctx.now();
    if ctx.uplink_timer.remaining(now) > ctx.config.sleep_threshold_ms && sleep(ctx) {
        let now = ctx.now();
        ctx.uplink_timer.poll(now);
        if ctx.uplink_timer.is_ready() {
            return Some(ctx.measure_entry_state());
        }
    }
    None
}

/// Sleep policy for the Sleeping state.  Returns whether a deep sleep
/// happened.
fn sleep<P: Platform, I: InputPin, B: OneWireBus>(ctx: &mut LoopContext<P, I, B>) -> bool {
    let now = ctx.now();
    let deep = deep_sleep_allowed(ctx, now);

    if !ctx.flags.printed_sleeping {
        sleep_alert(ctx, deep);
    }
    if !deep {
        return false;
    }
    if let Some(at) = ctx.deep_sleep_at {
        // countdown still running
        if (now.wrapping_sub(at) as i32) < 0 {
            return false;
        }
    }
    do_deep_sleep(ctx)
}

fn deep_sleep_allowed<P: Platform, I: InputPin, B: OneWireBus>(
    ctx: &LoopContext<P, I, B>,
    now: u32,
) -> bool {
    let op = ctx.config.operating;
    ctx.config.enable_deep_sleep
        && ctx.uplink_timer.remaining(now) / 1000 >= 2
        && (op.deep_sleep_test || (!op.disable_deep_sleep && op.unattended))
}

fn sleep_alert<P: Platform, I: InputPin, B: OneWireBus>(ctx: &mut LoopContext<P, I, B>, deep: bool) {
    ctx.flags.printed_sleeping = true;
    if !deep {
        info!("using light sleep");
        return;
    }

    let secs = if ctx.config.operating.deep_sleep_test {
        DEEP_SLEEP_ALERT_TEST_SECS
    } else {
        DEEP_SLEEP_ALERT_SECS
    };
    info!("using deep sleep in {} secs", secs);
    ctx.show_led(LedPattern::TwoShort);
    let ms = secs * 1000;
    ctx.deep_sleep_at = Some(ctx.now().wrapping_add(ms));
    // the deadline raises an event so the countdown is re-checked
    ctx.set_timer(ms);
}

fn do_deep_sleep<P: Platform, I: InputPin, B: OneWireBus>(ctx: &mut LoopContext<P, I, B>) -> bool {
    let now = ctx.now();
    let secs = ctx.uplink_timer.remaining(now) / 1000;
    if secs == 0 {
        return false;
    }

    ctx.hw.set_led(LedPattern::Off);
    ctx.events.push(LoopEvent::Sleeping {
        deep: true,
        ms: secs * 1000,
    });
    ctx.hw.prepare_sleep();
    ctx.hw.deep_sleep(secs);
    ctx.hw.advance_ms(secs * 1000);
    ctx.hw.recover_from_sleep();
    ctx.show_led(LedPattern::Sleeping);
    true
}

// ═══════════════════════════════════════════════════════════════════════════
//  REBOOTFORUPDATE / FINAL
// ═══════════════════════════════════════════════════════════════════════════

fn reboot_enter<P: Platform, I: InputPin, B: OneWireBus>(ctx: &mut LoopContext<P, I, B>) {
    info!("Rebooting to apply firmware");
    ctx.set_timer(ctx.config.reboot_delay_ms);
}

fn reboot_update<P: Platform, I: InputPin, B: OneWireBus>(
    ctx: &mut LoopContext<P, I, B>,
) -> Option<StateId> {
    if ctx.flags.exit {
        return Some(StateId::Final);
    }
    if ctx.timed_out() {
        ctx.hw.system_reset();
        return Some(StateId::Final);
    }
    None
}

fn final_enter<P: Platform, I: InputPin, B: OneWireBus>(ctx: &mut LoopContext<P, I, B>) {
    ctx.hw.set_led(LedPattern::Off);
    ctx.flags.active = false;
    info!("measurement loop stopped");
}

fn final_update<P: Platform, I: InputPin, B: OneWireBus>(
    _ctx: &mut LoopContext<P, I, B>,
) -> Option<StateId> {
    None
}
