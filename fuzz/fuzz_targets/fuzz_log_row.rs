//! Fuzz target: `sdlog::format_row`
//!
//! The first byte is the flag byte, the next eight the DevEUI (when the
//! second byte is odd), the rest the raw payload.  Every row must be a
//! single CRLF-terminated line with one field per header column.
//!
//! cargo fuzz run fuzz_log_row

#![no_main]

use libfuzzer_sys::fuzz_target;
use sensornode::measurement::{Flags, Format, Measurement};
use sensornode::sdlog::{self, HEADER};

fuzz_target!(|data: &[u8]| {
    let [flags, eui_sel, rest @ ..] = data else {
        return;
    };
    let (dev_eui, raw) = match rest.split_first_chunk::<8>() {
        Some((eui, raw)) if eui_sel & 1 == 1 => (Some(*eui), raw),
        _ => (None, rest),
    };

    let mut m = Measurement {
        flags: Flags::from_bits(*flags),
        timestamp: chrono::DateTime::from_timestamp(1_700_000_000, 0).map(|t| t.naive_utc()),
        ..Measurement::default()
    };
    for b in raw.iter().take(12) {
        m.activity.push(f32::from(*b as i8) / 128.0);
    }

    for format in [Format::Legacy, Format::Pellets, Format::Probe] {
        let bytes = sdlog::format_row(&m, format, raw, dev_eui, true).expect("row with a valid timestamp");
        let text = String::from_utf8(bytes).expect("row is ASCII");
        let mut lines = text.split_terminator("\r\n");
        assert_eq!(lines.next(), Some(HEADER.join(",").as_str()));
        let row = lines.next().expect("data row");
        assert_eq!(row.split(',').count(), HEADER.len());
        assert!(lines.next().is_none());
    }
});
