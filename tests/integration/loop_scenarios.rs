//! End-to-end measurement cycles through the public `MeasurementLoop` API.
//!
//! Timeline used throughout (default config, no idle naps):
//!
//! ```text
//!  t=0       begin()              Inactive
//!  t=25 s    request_active(true) Warmup, uplink timer restarted
//!  t=30 s    warmup expires       Measure → Transmit (uplink in flight)
//!  t=30.01 s uplink completes     WriteFile → TryToUpdate → TryToMigrate → Sleeping
//!  t=55 s    uplink timer         next cycle
//! ```

use sensornode::app::events::LoopEvent;
use sensornode::app::ports::{ImageKind, LedPattern, StoragePort};
use sensornode::adapters::flasher::IMAGE_MAGIC;
use sensornode::adapters::hardware::SimOneWire;
use sensornode::codec::uplink;
use sensornode::config::NodeConfig;
use sensornode::fsm::StateId;
use sensornode::measurement::{Flags, Format};
use sensornode::provisioning::ProvisioningRecord;
use sensornode::update::{MIGRATE_APP_EUI, MIGRATE_MARKER};

use crate::mock_hw::{Harness, MockBoard};

const ACTIVATE_AT: u32 = 25_000;
const MEASURE_AT: u32 = 30_000;

/// Start the loop and activate it at `ACTIVATE_AT`.
fn activated(config: NodeConfig, board: MockBoard) -> Harness {
    let mut h = Harness::new(config, board);
    h.lp.begin();
    h.poll_at(ACTIVATE_AT);
    h.lp.request_active(true);
    h
}

/// Run one full cycle from Warmup to Sleeping with a successful uplink.
fn run_first_cycle(h: &mut Harness) {
    h.poll_at(MEASURE_AT);
    assert_eq!(h.lp.state(), StateId::Transmit);
    assert!(h.hw_mut().complete_uplink(true));
    h.step(10);
    assert_eq!(h.lp.state(), StateId::Sleeping);
}

// ── Activation ────────────────────────────────────────────────

#[test]
fn begin_settles_in_inactive() {
    let mut h = Harness::new(Harness::config(), MockBoard::new());
    h.lp.begin();
    assert_eq!(h.lp.state(), StateId::Inactive);
    assert!(h.sink.contains(&LoopEvent::Started(StateId::Inactive)));

    // inactive polls never evaluate the FSM
    h.poll_at(60_000);
    assert_eq!(h.lp.state(), StateId::Inactive);
    assert!(!h.lp.is_active());
}

#[test]
fn request_active_enters_warmup() {
    let h = activated(Harness::config(), MockBoard::new());
    assert_eq!(h.lp.state(), StateId::Warmup);
    assert!(h.lp.is_active());
    assert!(h.sink.contains(&LoopEvent::ActiveChanged(true)));
    assert!(h.sink.contains(&LoopEvent::StateChanged {
        from: StateId::Inactive,
        to: StateId::Warmup
    }));
}

#[test]
fn warmup_holds_until_timeout() {
    let mut h = activated(Harness::config(), MockBoard::new());
    h.poll_at(MEASURE_AT - 1);
    assert_eq!(h.lp.state(), StateId::Warmup);
    h.poll_at(MEASURE_AT);
    assert_eq!(h.lp.state(), StateId::Transmit);
}

#[test]
fn activation_restarts_uplink_timer() {
    let mut h = activated(Harness::config(), MockBoard::new());
    run_first_cycle(&mut h);

    // 30 s after begin() would have fired without the restart
    h.poll_at(54_999);
    assert_eq!(h.lp.state(), StateId::Sleeping);
    assert_eq!(h.hw().uplinks.len(), 1);

    h.poll_at(ACTIVATE_AT + 30_000);
    assert_eq!(h.lp.state(), StateId::Transmit);
    assert_eq!(h.hw().uplinks.len(), 2);
}

// ── Measure / Transmit ────────────────────────────────────────

#[test]
fn cycle_sends_pellet_payload_and_logs_row() {
    let mut h = activated(Harness::config(), MockBoard::new());
    run_first_cycle(&mut h);

    let (payload, confirmed, port) = h.hw().uplinks[0].clone();
    assert!(!confirmed);
    assert_eq!(port, 1);
    let up = uplink::decode(&payload).unwrap();
    assert_eq!(up.format, Some(Format::Pellets));
    for flag in [Flags::VBAT, Flags::VBUS, Flags::BOOT, Flags::TPH, Flags::LIGHT, Flags::PELLETS] {
        assert!(up.flags.contains(flag), "missing {:?}", flag);
    }
    assert!(!up.flags.contains(Flags::VCC), "board has no system rail");
    assert_eq!(up.boot, Some(7));

    let text = h.hw().file_text("Data/20240307.dat").unwrap();
    let mut lines = text.split("\r\n");
    assert!(lines.next().unwrap().starts_with("Time,DevEUI,Raw,"));
    let row = lines.next().unwrap();
    assert!(row.starts_with("2024-03-07T09:00:30Z,,\"22"), "row: {row}");

    assert!(h.sink.contains(&LoopEvent::UplinkCompleted { success: true }));
    assert!(h.sink.contains(&LoopEvent::LogRowWritten));
    assert_eq!(h.lp.tx_cycle(), (30, 9));
    assert_eq!(h.lp.last_file_record().1, payload.as_slice());
}

#[test]
fn transmit_waits_for_completion() {
    let mut h = activated(Harness::config(), MockBoard::new());
    h.poll_at(MEASURE_AT);
    h.step(5_000);
    assert_eq!(h.lp.state(), StateId::Transmit);
    assert!(h.lp.flags().tx_pending);
    assert!(h.hw().files.is_empty());
}

#[test]
fn light_timeout_transmits_without_light() {
    let mut board = MockBoard::new();
    board.light_delay_ms = u32::MAX;
    let mut h = activated(Harness::config(), board);

    h.poll_at(MEASURE_AT);
    assert_eq!(h.lp.state(), StateId::Measure);
    h.poll_at(MEASURE_AT + 999);
    assert_eq!(h.lp.state(), StateId::Measure);
    h.poll_at(MEASURE_AT + 1_000);
    assert_eq!(h.lp.state(), StateId::Transmit);

    let up = uplink::decode(&h.hw().uplinks[0].0).unwrap();
    assert!(!up.flags.contains(Flags::LIGHT));
}

#[test]
fn no_light_sensor_goes_straight_to_transmit() {
    let mut board = MockBoard::new();
    board.light = None;
    let mut h = activated(Harness::config(), board);
    h.poll_at(MEASURE_AT);
    assert_eq!(h.lp.state(), StateId::Transmit);
}

#[test]
fn low_light_suppresses_sending_led() {
    let mut board = MockBoard::new();
    if let Some(light) = board.light.as_mut() {
        light.white = 100.0;
    }
    let mut h = activated(Harness::config(), board);
    h.poll_at(MEASURE_AT);
    assert!(!h.hw().leds.contains(&LedPattern::Sending));

    let mut h = activated(Harness::config(), MockBoard::new());
    h.poll_at(MEASURE_AT);
    assert_eq!(h.hw().last_led(), Some(LedPattern::Sending));
}

#[test]
fn confirmed_uplink_flag() {
    let mut config = Harness::config();
    config.operating.confirmed_uplink = true;
    config.uplink_port = 7;
    let mut h = activated(config, MockBoard::new());
    h.poll_at(MEASURE_AT);
    let (_, confirmed, port) = h.hw().uplinks[0].clone();
    assert!(confirmed);
    assert_eq!(port, 7);
}

#[test]
fn refused_uplink_still_completes_cycle() {
    let mut board = MockBoard::new();
    board.accept_uplinks = false;
    let mut h = activated(Harness::config(), board);
    h.poll_at(MEASURE_AT);
    assert_eq!(h.lp.state(), StateId::Sleeping);
    assert!(h.sink.contains(&LoopEvent::UplinkNotLaunched));
    assert!(h.lp.flags().tx_err);
    assert_eq!(h.lp.tx_cycle(), (30, 9));
}

#[test]
fn failed_uplink_is_reported() {
    let mut h = activated(Harness::config(), MockBoard::new());
    h.poll_at(MEASURE_AT);
    h.hw_mut().complete_uplink(false);
    h.step(10);
    assert_eq!(h.lp.state(), StateId::Sleeping);
    assert!(h.sink.contains(&LoopEvent::UplinkCompleted { success: false }));
    assert!(h.lp.flags().tx_err);
}

// ── Provisioning and the SD card ──────────────────────────────

#[test]
fn unprovisioned_without_card_awaits_card() {
    let mut board = MockBoard::new();
    board.provisioned = false;
    board.card_present = false;
    let mut h = activated(Harness::config(), board);

    h.poll_at(MEASURE_AT);
    assert_eq!(h.lp.state(), StateId::Sleeping);
    assert!(h.hw().uplinks.is_empty());
    assert!(h.sink.contains(&LoopEvent::LogWriteFailed));
    assert!(h.sink.contains(&LoopEvent::StateChanged {
        from: StateId::Warmup,
        to: StateId::Sleeping
    }));
    // uplink budget untouched when nothing was sent
    assert_eq!(h.lp.tx_cycle(), (30, 10));
}

#[test]
fn unprovisioned_with_card_logs_without_dev_eui() {
    let mut board = MockBoard::new();
    board.provisioned = false;
    let mut h = activated(Harness::config(), board);

    h.poll_at(MEASURE_AT);
    assert_eq!(h.lp.state(), StateId::Sleeping);
    assert!(h.sink.contains(&LoopEvent::LogRowWritten));
    let text = h.hw().file_text("Data/20240307.dat").unwrap();
    assert!(text.contains("\r\n2024-03-07T09:00:30Z,,\""));
}

#[test]
fn provisioned_row_carries_dev_eui() {
    let mut board = MockBoard::new();
    let record = ProvisioningRecord {
        dev_eui: [0x30, 0x05, 0x1C, 0x00, 0x0B, 0xA3, 0x04, 0x00],
        ..ProvisioningRecord::default()
    };
    record.save(&mut board).unwrap();
    let mut h = activated(Harness::config(), board);
    run_first_cycle(&mut h);

    let text = h.hw().file_text("Data/20240307.dat").unwrap();
    assert!(text.contains(",\"0004a30b001c0530\","), "{text}");
}

#[test]
fn unset_rtc_skips_log_row() {
    let mut board = MockBoard::new();
    board.rtc = None;
    let mut h = activated(Harness::config(), board);
    run_first_cycle(&mut h);
    assert!(h.hw().files.is_empty());
    assert!(h.sink.contains(&LoopEvent::LogWriteFailed));
}

#[test]
fn second_row_has_no_header() {
    let mut h = activated(Harness::config(), MockBoard::new());
    run_first_cycle(&mut h);
    h.poll_at(55_000);
    h.hw_mut().complete_uplink(true);
    h.step(10);

    let text = h.hw().file_text("Data/20240307.dat").unwrap();
    assert_eq!(text.matches("Time,DevEUI").count(), 1);
    assert_eq!(text.matches("\r\n").count(), 3);
}

// ── Firmware update and migration ─────────────────────────────

#[test]
fn update_image_reboots() {
    let mut board = MockBoard::new();
    let mut image = IMAGE_MAGIC.to_vec();
    image.extend((0..1000u32).map(|i| i as u8));
    board.files.insert("update.bin".into(), image.clone());
    let mut h = activated(Harness::config(), board);
    run_first_cycle_into(&mut h, StateId::RebootForUpdate);

    assert!(h.sink.contains(&LoopEvent::FirmwareUpdated(ImageKind::Update)));
    assert!(!h.hw().files.contains_key("update.bin"));
    assert_eq!(h.hw().flasher.applied(), Some(&(ImageKind::Update, image)));

    h.step(999);
    assert_eq!(h.hw().resets, 0);
    h.step(1);
    assert_eq!(h.hw().resets, 1);
    assert_eq!(h.lp.state(), StateId::Final);
}

#[test]
fn bad_image_is_removed_and_cycle_continues() {
    let mut board = MockBoard::new();
    board.files.insert("fallback.bin".into(), b"garbage".to_vec());
    let mut h = activated(Harness::config(), board);
    run_first_cycle(&mut h);
    assert!(!h.hw().files.contains_key("fallback.bin"));
    assert!(h.hw().flasher.applied().is_none());
}

#[test]
fn migration_marker_rewrites_provisioning() {
    let mut board = MockBoard::new();
    let record = ProvisioningRecord {
        dev_eui: [1; 8],
        app_eui: [9; 8],
        dev_addr: 0x2601_1234,
    };
    record.save(&mut board).unwrap();
    board.files.insert(MIGRATE_MARKER.into(), Vec::new());
    let mut h = activated(Harness::config(), board);
    run_first_cycle(&mut h);

    assert!(h.sink.contains(&LoopEvent::MigrationApplied));
    assert_eq!(h.hw().rejoins, 1);
    assert!(!h.hw().files.contains_key(MIGRATE_MARKER));
    let migrated = ProvisioningRecord::load(h.hw()).unwrap();
    assert_eq!(migrated.dev_eui, [1; 8]);
    assert_eq!(migrated.app_eui, MIGRATE_APP_EUI);
    assert_eq!(migrated.dev_addr, 0);
    assert!(h.hw().exists("lorawan", "prov"));
}

#[test]
fn stuck_marker_is_applied_again_next_cycle() {
    let mut board = MockBoard::new();
    ProvisioningRecord {
        dev_eui: [1; 8],
        app_eui: [9; 8],
        dev_addr: 0x2601_1234,
    }
    .save(&mut board)
    .unwrap();
    board.files.insert(MIGRATE_MARKER.into(), Vec::new());
    board.card_write_protected = true;
    let mut h = activated(Harness::config(), board);
    run_first_cycle(&mut h);

    assert_eq!(h.hw().rejoins, 1);
    assert!(h.hw().files.contains_key(MIGRATE_MARKER));
    assert_eq!(ProvisioningRecord::load(h.hw()).unwrap().app_eui, MIGRATE_APP_EUI);

    h.poll_at(ACTIVATE_AT + 30_000);
    assert!(h.hw_mut().complete_uplink(true));
    h.step(10);
    assert_eq!(h.lp.state(), StateId::Sleeping);
    assert_eq!(h.hw().rejoins, 2);
    assert_eq!(h.sink.count(|e| *e == LoopEvent::MigrationApplied), 2);
}

fn run_first_cycle_into(h: &mut Harness, expected: StateId) {
    h.poll_at(MEASURE_AT);
    assert!(h.hw_mut().complete_uplink(true));
    h.step(10);
    assert_eq!(h.lp.state(), expected);
}

// ── Uplink cadence ────────────────────────────────────────────

#[test]
fn fast_start_count_resets_once() {
    let mut config = Harness::config();
    config.tx_cycle_count = 1;
    let mut h = activated(config, MockBoard::new());
    run_first_cycle(&mut h);

    assert_eq!(h.lp.tx_cycle(), (360, 0));
    assert!(h.sink.contains(&LoopEvent::TxCycleChanged { secs: 360, count: 0 }));

    // next uplink on the permanent interval
    h.poll_at(ACTIVATE_AT + 30_000);
    assert_eq!(h.lp.state(), StateId::Sleeping);
    h.poll_at(ACTIVATE_AT + 360_000);
    assert_eq!(h.lp.state(), StateId::Transmit);
    h.hw_mut().complete_uplink(true);
    h.step(10);

    assert_eq!(h.lp.tx_cycle(), (360, 0));
    assert_eq!(
        h.sink.count(|e| matches!(e, LoopEvent::TxCycleChanged { .. })),
        1
    );
}

#[test]
fn set_tx_cycle_time_at_runtime() {
    let mut h = activated(Harness::config(), MockBoard::new());
    run_first_cycle(&mut h);
    h.lp.set_tx_cycle_time(120, 0);
    assert_eq!(h.lp.tx_cycle(), (120, 0));
    assert!(h.sink.contains(&LoopEvent::TxCycleChanged { secs: 120, count: 0 }));

    h.poll_at(ACTIVATE_AT + 119_999);
    assert_eq!(h.lp.state(), StateId::Sleeping);
    h.poll_at(ACTIVATE_AT + 120_000);
    assert_eq!(h.lp.state(), StateId::Transmit);
}

// ── Sleeping ──────────────────────────────────────────────────

#[test]
fn request_inactive_from_sleeping() {
    let mut h = activated(Harness::config(), MockBoard::new());
    run_first_cycle(&mut h);
    h.lp.request_active(false);
    assert_eq!(h.lp.state(), StateId::Inactive);
    assert!(!h.lp.is_active());
    assert!(h.sink.contains(&LoopEvent::ActiveChanged(false)));

    // no more uplinks while inactive
    h.poll_at(120_000);
    assert_eq!(h.hw().uplinks.len(), 1);
}

#[test]
fn deep_sleep_after_countdown() {
    let mut config = Harness::config();
    config.tx_cycle_secs = 300;
    config.enable_deep_sleep = true;
    config.operating.unattended = true;
    let mut h = activated(config, MockBoard::new());
    run_first_cycle(&mut h);
    assert!(h.hw().leds.contains(&LedPattern::TwoShort));
    assert!(h.hw().deep_sleeps.is_empty());

    // countdown still running
    h.poll_at(MEASURE_AT + 30_000);
    assert!(h.hw().deep_sleeps.is_empty());

    h.poll_at(MEASURE_AT + 30_010);
    assert_eq!(h.hw().deep_sleeps.len(), 1);
    let secs = h.hw().deep_sleeps[0];
    // slept up to the next uplink, whole seconds only
    assert_eq!(secs, (ACTIVATE_AT + 300_000 - (MEASURE_AT + 30_010)) / 1000);
    assert!(h.sink.contains(&LoopEvent::Sleeping {
        deep: true,
        ms: secs * 1000
    }));
    assert_eq!(h.lp.state(), StateId::Sleeping);
}

#[test]
fn attended_node_uses_light_sleep_only() {
    let mut config = Harness::config();
    config.tx_cycle_secs = 300;
    config.enable_deep_sleep = true;
    let mut h = activated(config, MockBoard::new());
    run_first_cycle(&mut h);
    h.poll_at(MEASURE_AT + 60_000);
    assert!(h.hw().deep_sleeps.is_empty());
    assert!(!h.hw().leds.contains(&LedPattern::TwoShort));
}

#[test]
fn idle_nap_skipped_on_usb_power() {
    let mut config = Harness::config();
    config.idle_sleep_ms = 200;
    let mut h = activated(config.clone(), MockBoard::new());
    h.poll_at(26_000);
    assert_eq!(h.hw().light_sleeps, vec![200]);
    // the clock is advanced by the slept time
    assert_eq!(h.now(), 26_200);

    let mut board = MockBoard::new();
    board.vbus = 5.0;
    let mut h = activated(config.clone(), board);
    h.poll_at(26_000);
    assert!(h.hw().light_sleeps.is_empty());
    assert!(h.lp.flags().usb_power);

    let mut board = MockBoard::new();
    board.time_critical = true;
    let mut h = activated(config, board);
    h.poll_at(26_000);
    assert!(h.hw().light_sleeps.is_empty());
}

// ── Shutdown ──────────────────────────────────────────────────

#[test]
fn end_stops_from_any_state() {
    let mut h = activated(Harness::config(), MockBoard::new());
    h.lp.end();
    assert_eq!(h.lp.state(), StateId::Final);
    assert!(!h.lp.is_active());
    assert_eq!(h.hw().last_led(), Some(LedPattern::Off));

    let mut h = activated(Harness::config(), MockBoard::new());
    run_first_cycle(&mut h);
    h.lp.end();
    assert_eq!(h.lp.state(), StateId::Final);

    // nothing runs after Final
    h.poll_at(120_000);
    assert_eq!(h.lp.state(), StateId::Final);
    assert_eq!(h.hw().uplinks.len(), 1);
}

// ── Probe variant ─────────────────────────────────────────────

#[test]
fn probe_states_precede_measure() {
    let mut config = Harness::config();
    config.format = Format::Probe;
    let bus = SimOneWire::with_probe(20.5);
    let mut h = Harness::with_probe(config, MockBoard::new(), Some(bus.clone()));
    h.lp.begin();
    h.poll_at(ACTIVATE_AT);
    h.lp.request_active(true);

    h.poll_at(MEASURE_AT);
    assert_eq!(h.lp.state(), StateId::TprobePowerOn);
    assert!(bus.is_powered());

    h.poll_at(MEASURE_AT + 100);
    assert_eq!(h.lp.state(), StateId::TprobeMeasuring);
    assert_eq!(bus.conversions(), 1);

    h.poll_at(MEASURE_AT + 100 + 750);
    assert_eq!(h.lp.state(), StateId::TprobeMeasuring);
    h.poll_at(MEASURE_AT + 100 + 751);
    assert_eq!(h.lp.state(), StateId::Transmit);
    assert!(!bus.is_powered());

    let up = uplink::decode(&h.hw().uplinks[0].0).unwrap();
    assert_eq!(up.format, Some(Format::Probe));
    assert!(up.flags.contains(Flags::TPROBE));
    assert_eq!(up.probe_c, Some(20.5));
    assert!(up.pellets.is_none());
}

#[test]
fn missing_probe_skips_to_measure() {
    let mut config = Harness::config();
    config.format = Format::Probe;
    let mut h = Harness::with_probe(config, MockBoard::new(), Some(SimOneWire::empty()));
    h.lp.begin();
    h.poll_at(ACTIVATE_AT);
    h.lp.request_active(true);

    h.poll_at(MEASURE_AT);
    h.poll_at(MEASURE_AT + 100);
    assert_eq!(h.lp.state(), StateId::Transmit);
    let up = uplink::decode(&h.hw().uplinks[0].0).unwrap();
    assert!(!up.flags.contains(Flags::TPROBE));
}

#[test]
fn pellet_edges_reach_the_payload() {
    let mut h = activated(Harness::config(), MockBoard::new());
    for _ in 0..3 {
        h.feeders[0].set_high(false);
        h.step(10);
        h.feeders[0].set_high(true);
        h.step(10);
    }
    h.poll_at(MEASURE_AT);
    let up = uplink::decode(&h.hw().uplinks[0].0).unwrap();
    let pellets = up.pellets.unwrap();
    assert_eq!(pellets[0].recent, 3);
    assert_eq!(pellets[0].total, 3);
    assert_eq!(pellets[1].recent, 0);
}

#[test]
fn activity_windows_fill_the_uplink() {
    let config = NodeConfig {
        pir_sample_secs: 1,
        activity_secs: 2,
        ..Harness::config()
    };
    let mut h = activated(config, MockBoard::new());
    run_first_cycle(&mut h);
    h.sink.clear();

    // motion from here on; windows close every 2 s from 32 s
    h.pir.set_high(true);
    let mut evals = h.lp.eval_count();
    let mut t = 30_500;
    while t <= 46_000 {
        h.poll_at(t);
        if t == 32_000 {
            evals = h.lp.eval_count();
        }
        if t == 44_000 {
            // seven windows, none of them evaluates the FSM
            assert_eq!(h.lp.pending_measurement().activity.len(), 7);
            assert_eq!(h.lp.eval_count(), evals);
        }
        t += 500;
    }
    // the eighth fills the sequence
    assert_eq!(h.lp.eval_count(), evals + 1);
    assert_eq!(h.lp.state(), StateId::Sleeping);

    let counts: Vec<usize> = h
        .sink
        .events()
        .iter()
        .filter_map(|e| match e {
            LoopEvent::ActivityRecorded { count, .. } => Some(*count),
            _ => None,
        })
        .collect();
    assert_eq!(counts, (1..=8).collect::<Vec<_>>());
    let pending = h.lp.pending_measurement();
    assert!(pending.flags.contains(Flags::ACTIVITY));
    assert!(pending.activity.is_full());

    h.poll_at(ACTIVATE_AT + 30_000);
    assert_eq!(h.lp.state(), StateId::Transmit);
    let up = uplink::decode(&h.hw().uplinks[1].0).unwrap();
    assert!(up.flags.contains(Flags::ACTIVITY));
    assert_eq!(up.activity.len(), 8);
    assert!(up.activity.iter().all(|a| *a > 0.5), "activity: {:?}", up.activity);
    assert!(up.activity.windows(2).all(|w| w[0] <= w[1]), "activity: {:?}", up.activity);
}
