//! SD card data log.
//!
//! One CSV row per measurement cycle, appended to `Data/YYYYMMDD.dat`
//! (UTC date of the measurement).  A new file starts with the header row.
//! Rows end in CRLF so the files open cleanly on the desktop tools the
//! field crews use.
//!
//! ```text
//! Time,DevEUI,Raw,Vbat,Vsystem,Vbus,BootCount,T,RH,P,Light,
//! P[0].delta,P[0].total,P[1].delta,P[1].total,Act[7],…,Act[0]
//! ```
//!
//! A column is empty when its flag bit is clear.  `DevEUI` and `Raw` are
//! quoted hex so spreadsheets keep leading zeros.

use chrono::{Datelike, NaiveDateTime};
use csv::{QuoteStyle, Terminator, WriterBuilder};
use log::{debug, warn};

use crate::app::ports::CardPort;
use crate::codec::to_hex;
use crate::error::LogError;
use crate::measurement::{Flags, Format, MAX_ACTIVITY_ENTRIES, Measurement};

pub const DATA_DIR: &str = "Data";

pub const HEADER: [&str; 23] = [
    "Time", "DevEUI", "Raw", "Vbat", "Vsystem", "Vbus", "BootCount", "T", "RH", "P", "Light",
    "P[0].delta", "P[0].total", "P[1].delta", "P[1].total",
    "Act[7]", "Act[6]", "Act[5]", "Act[4]", "Act[3]", "Act[2]", "Act[1]", "Act[0]",
];

/// `Data/YYYYMMDD.dat` for the day of `t`.
pub fn file_name(t: NaiveDateTime) -> String {
    format!("{}/{:04}{:02}{:02}.dat", DATA_DIR, t.year(), t.month(), t.day())
}

/// ISO-8601 UTC with a `Z` suffix, second resolution.
pub fn iso8601(t: NaiveDateTime) -> String {
    t.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn float(v: f32) -> String {
    format!("{v:.2}")
}

fn quoted(s: &str) -> String {
    format!("\"{s}\"")
}

/// Build the CSV fields of one row.
///
/// `dev_eui` is in LoRaWAN (LSB-first) order; the log shows it MSB first.
fn row_fields(
    m: &Measurement,
    format: Format,
    raw: &[u8],
    dev_eui: Option<[u8; 8]>,
) -> Result<Vec<String>, LogError> {
    let t = m.timestamp.filter(|_| m.has_valid_timestamp()).ok_or(LogError::ClockNotSet)?;
    let has = |f: Flags| m.flags.contains(f);
    let mut out = Vec::with_capacity(HEADER.len());

    out.push(iso8601(t));
    out.push(match dev_eui {
        Some(mut eui) => {
            eui.reverse();
            quoted(&to_hex(&eui))
        }
        None => String::new(),
    });
    out.push(quoted(&to_hex(raw)));

    out.push(if has(Flags::VBAT) { float(m.vbat) } else { String::new() });
    out.push(if has(Flags::VCC) { float(m.vsystem) } else { String::new() });
    out.push(if has(Flags::VBUS) { float(m.vbus) } else { String::new() });
    out.push(if has(Flags::BOOT) { m.boot_count.to_string() } else { String::new() });

    if has(Flags::TPH) {
        out.push(float(m.env.temperature));
        out.push(float(m.env.humidity));
        out.push(float(m.env.pressure));
    } else {
        out.extend(core::iter::repeat_n(String::new(), 3));
    }

    out.push(if has(Flags::LIGHT) { float(m.light.white) } else { String::new() });

    let pellets = format == Format::Pellets && has(Flags::PELLETS);
    for p in &m.pellets {
        if pellets {
            out.push(p.recent.to_string());
            out.push(p.total.to_string());
        } else {
            out.extend(core::iter::repeat_n(String::new(), 2));
        }
    }

    let activity = m.activity.as_slice();
    let show_activity = has(format.activity_flag());
    for i in (0..MAX_ACTIVITY_ENTRIES).rev() {
        out.push(match activity.get(i) {
            Some(avg) if show_activity => float(*avg),
            _ => String::new(),
        });
    }

    Ok(out)
}

/// Format the bytes appended for one cycle: optional header, then the row.
pub fn format_row(
    m: &Measurement,
    format: Format,
    raw: &[u8],
    dev_eui: Option<[u8; 8]>,
    with_header: bool,
) -> Result<Vec<u8>, LogError> {
    let fields = row_fields(m, format, raw, dev_eui)?;

    // Fields are pre-quoted where needed; the writer only joins them.
    let mut wtr = WriterBuilder::new()
        .has_headers(false)
        .quote_style(QuoteStyle::Never)
        .terminator(Terminator::CRLF)
        .from_writer(Vec::new());

    if with_header {
        wtr.write_record(HEADER).map_err(|_| LogError::FormatFailed)?;
    }
    wtr.write_record(&fields).map_err(|_| LogError::FormatFailed)?;
    wtr.into_inner().map_err(|_| LogError::FormatFailed)
}

/// Append one row to today's data file.  Runs a complete card session.
pub fn write_record<C: CardPort + ?Sized>(
    card: &mut C,
    m: &Measurement,
    format: Format,
    raw: &[u8],
    dev_eui: Option<[u8; 8]>,
) -> Result<(), LogError> {
    let Some(t) = m.timestamp.filter(|_| m.has_valid_timestamp()) else {
        warn!("RTC not set, not storing data");
        return Err(LogError::ClockNotSet);
    };

    if let Err(e) = card.card_begin() {
        warn!("SD card not detected: {}", e);
        card.card_end();
        return Err(LogError::NoCard);
    }

    let result = append_row(card, t, m, format, raw, dev_eui);
    card.card_end();
    result
}

fn append_row<C: CardPort + ?Sized>(
    card: &mut C,
    t: NaiveDateTime,
    m: &Measurement,
    format: Format,
    raw: &[u8],
    dev_eui: Option<[u8; 8]>,
) -> Result<(), LogError> {
    if !card.card_exists(DATA_DIR) && card.card_mkdir(DATA_DIR).is_err() {
        warn!("mkdir failed");
        return Err(LogError::MkdirFailed);
    }

    let name = file_name(t);
    let is_new = !card.card_exists(&name);
    let bytes = format_row(m, format, raw, dev_eui, is_new)?;

    card.card_append(&name, &bytes).map_err(|e| {
        warn!("can't write {}: {}", name, e);
        LogError::WriteFailed
    })?;
    debug!("sd: appended {} bytes to {}", bytes.len(), name);
    Ok(())
}
