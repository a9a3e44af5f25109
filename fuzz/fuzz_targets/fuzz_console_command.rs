//! Fuzz target: console line parsing
//!
//! Arbitrary console input goes through `ConsoleCommand::parse` and, for
//! `date`, through the ISO-8601 argument parser.  Neither may panic.
//!
//! cargo fuzz run fuzz_console_command

#![no_main]

use libfuzzer_sys::fuzz_target;
use sensornode::app::commands::{ConsoleCommand, parse_date_arg};

fuzz_target!(|data: &[u8]| {
    let Ok(line) = core::str::from_utf8(data) else {
        return;
    };
    if let Ok(ConsoleCommand::Date(Some(arg))) = ConsoleCommand::parse(line) {
        let _ = parse_date_arg(&arg, None);
        let _ = parse_date_arg(&arg, chrono::DateTime::from_timestamp(0, 0).map(|t| t.naive_utc()));
    }
});
