//! Console commands executed against a running loop.

use chrono::NaiveDate;
use sensornode::app::commands::{self, CommandError, CommandReply, ConsoleCommand};
use sensornode::app::ports::{CardError, ClockError};
use sensornode::fsm::StateId;

use crate::mock_hw::{Harness, MockBoard};

fn run(h: &mut Harness, line: &str) -> Result<CommandReply, CommandError> {
    ConsoleCommand::parse(line).and_then(|cmd| commands::execute(&mut h.lp, cmd))
}

fn started(board: MockBoard) -> Harness {
    let mut h = Harness::new(Harness::config(), board);
    h.lp.begin();
    h
}

#[test]
fn date_reads_and_sets_rtc() {
    let mut h = started(MockBoard::new());
    h.poll_at(5_000);
    let expected = NaiveDate::from_ymd_opt(2024, 3, 7)
        .and_then(|d| d.and_hms_opt(9, 0, 5))
        .unwrap();
    assert_eq!(run(&mut h, "date"), Ok(CommandReply::Date(expected)));

    let set = NaiveDate::from_ymd_opt(2025, 1, 2)
        .and_then(|d| d.and_hms_opt(3, 4, 5))
        .unwrap();
    assert_eq!(run(&mut h, "date 2025-01-02T03:04:05Z"), Ok(CommandReply::Date(set)));
    h.step(1_000);
    let reply = run(&mut h, "date").unwrap();
    assert_eq!(reply.to_string(), "2025-01-02T03:04:06Z");
}

#[test]
fn date_on_unset_rtc() {
    let mut board = MockBoard::new();
    board.rtc = None;
    let mut h = started(board);

    assert_eq!(
        run(&mut h, "date"),
        Err(CommandError::Clock(ClockError::NotSet))
    );
    assert_eq!(
        run(&mut h, "date 12:00:00Z"),
        Err(CommandError::Clock(ClockError::NotSet))
    );
    let midnight = NaiveDate::from_ymd_opt(2024, 5, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap();
    assert_eq!(run(&mut h, "date 2024-05-01"), Ok(CommandReply::Date(midnight)));
    assert!(h.hw().rtc.is_some());
}

#[test]
fn dir_and_tree_list_the_card() {
    let mut board = MockBoard::new();
    board.dirs.insert("Data".into());
    board.files.insert("Data/20240307.dat".into(), vec![0; 42]);
    board.files.insert("update.bin".into(), vec![0; 7]);
    let mut h = started(board);

    let CommandReply::Listing(top) = run(&mut h, "dir").unwrap() else {
        panic!("expected a listing");
    };
    let names: Vec<_> = top.iter().map(|e| e.entry.name.as_str()).collect();
    assert_eq!(names, ["Data", "update.bin"]);
    assert!(top.iter().all(|e| e.depth == 0));

    let CommandReply::Listing(all) = run(&mut h, "tree").unwrap() else {
        panic!("expected a listing");
    };
    assert_eq!(all.len(), 3);
    assert_eq!(all[1].depth, 1);
    assert_eq!(all[1].entry.name, "20240307.dat");
    assert_eq!(all[1].entry.size, 42);

    let text = run(&mut h, "dir Data").unwrap().to_string();
    assert!(text.starts_with("20240307.dat"), "{text}");
    assert_eq!(h.hw().card_sessions, 3);
}

#[test]
fn dir_without_card_fails() {
    let mut board = MockBoard::new();
    board.card_present = false;
    let mut h = started(board);
    let ends = h.hw().card_ends;
    assert_eq!(
        run(&mut h, "dir"),
        Err(CommandError::Card(CardError::NotPresent))
    );
    // the failed session is still closed
    assert_eq!(h.hw().card_ends, ends + 1);
}

#[test]
fn mode_reports_and_reconfigures() {
    let mut h = started(MockBoard::new());
    assert_eq!(
        run(&mut h, "mode"),
        Ok(CommandReply::Mode {
            active: false,
            tx_cycle_secs: 30,
            tx_cycle_count: 10
        })
    );
    assert_eq!(run(&mut h, "mode lptim"), Ok(CommandReply::Done));
    assert_eq!(h.hw().lptim_reconfigs, 1);
    assert_eq!(run(&mut h, "mode turbo"), Err(CommandError::InvalidParameter));
}

#[test]
fn provision_opens_window() {
    let mut h = started(MockBoard::new());
    assert_eq!(run(&mut h, "provision"), Ok(CommandReply::Done));
    assert_eq!(run(&mut h, "provision 15"), Ok(CommandReply::Done));
    assert_eq!(h.hw().provisioning_windows, vec![60, 15]);
}

#[test]
fn commands_leave_fsm_alone() {
    let mut h = started(MockBoard::new());
    h.poll_at(25_000);
    h.lp.request_active(true);
    assert_eq!(h.lp.state(), StateId::Warmup);

    for line in ["date", "mode", "dir", "provision 1", "mode lptim"] {
        assert!(run(&mut h, line).is_ok(), "{line}");
    }
    assert_eq!(h.lp.state(), StateId::Warmup);
    h.poll_at(30_000);
    assert_eq!(h.lp.state(), StateId::Transmit);
}
