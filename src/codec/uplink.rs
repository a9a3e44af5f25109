//! Per-format payload layout.
//!
//! ```text
//! [format][gps time u32, 0x22/0x23 only][flags][groups in flag-bit order]
//! ```
//!
//! Groups whose flag bit is clear contribute no bytes.  The decoder is the
//! mirror image and dispatches strictly on the format byte; it backs the
//! tests, the fuzz target and offline log inspection.

use chrono::NaiveDateTime;

use super::sflt::{f2sflt16, sflt16_to_f32};
use super::TxBuffer;
use crate::error::CodecError;
use crate::measurement::{
    Env, Flags, Format, Light, MAX_ACTIVITY_ENTRIES, Measurement, NUM_FEEDERS, PelletReading,
};

/// Seconds between the Unix epoch and the GPS epoch (1980-01-06).
const GPS_EPOCH_UNIX: i64 = 315_964_800;
/// GPS-UTC offset in seconds.
const GPS_LEAP_SECONDS: i64 = 18;

/// GPS seconds for `t`, or 0 when `t` is absent or before the GPS epoch.
pub fn gps_time(t: Option<NaiveDateTime>) -> u32 {
    t.map(|t| t.and_utc().timestamp() - GPS_EPOCH_UNIX + GPS_LEAP_SECONDS)
        .and_then(|s| u32::try_from(s).ok())
        .unwrap_or(0)
}

/// Inverse of [`gps_time`]; 0 decodes as "no time".
pub fn from_gps_time(gps: u32) -> Option<NaiveDateTime> {
    if gps == 0 {
        return None;
    }
    chrono::DateTime::from_timestamp(i64::from(gps) + GPS_EPOCH_UNIX - GPS_LEAP_SECONDS, 0)
        .map(|t| t.naive_utc())
}

/// Encode `m` in the given wire format.
pub fn encode(m: &Measurement, format: Format) -> Result<TxBuffer, CodecError> {
    let mut b = TxBuffer::new();
    encode_into(&mut b, m, format)?;
    Ok(b)
}

/// Encode `m` into `b`, replacing its contents.
pub fn encode_into(b: &mut TxBuffer, m: &Measurement, format: Format) -> Result<(), CodecError> {
    let flags = m.flags.intersection(format.supported_flags());

    b.begin();
    b.put(format.tag())?;
    if format.has_timestamp() {
        b.put4(gps_time(m.timestamp))?;
    }
    b.put(flags.bits())?;

    if flags.contains(Flags::VBAT) {
        b.put_v(m.vbat)?;
    }
    if flags.contains(Flags::VCC) {
        b.put_v(m.vsystem)?;
    }
    if flags.contains(Flags::VBUS) {
        b.put_v(m.vbus)?;
    }
    if flags.contains(Flags::BOOT) {
        b.put_boot(m.boot_count)?;
    }
    if flags.contains(Flags::TPH) {
        b.put_t(m.env.temperature)?;
        b.put_p(m.env.pressure)?;
        b.put_rh(m.env.humidity)?;
    }
    if flags.contains(Flags::LIGHT) {
        if format == Format::Legacy {
            b.put_lux(m.light.ir)?;
            b.put_lux(m.light.white)?;
            b.put_lux(m.light.uv)?;
        } else {
            b.put_lux(m.light.white)?;
        }
    }

    match format {
        Format::Legacy => {
            if flags.contains(Flags::LEGACY_ACTIVITY) {
                b.put_sflt16(m.activity.latest().unwrap_or(0.0))?;
                b.put_sflt16(m.activity.last_min)?;
                b.put_sflt16(m.activity.last_max)?;
            }
        }
        Format::Pellets => {
            if flags.contains(Flags::PELLETS) {
                for p in &m.pellets {
                    b.put2((p.total & 0xFFFF) as u16)?;
                    b.put(p.recent)?;
                }
            }
            put_activity_sequence(b, m, flags)?;
        }
        Format::Probe => {
            if flags.contains(Flags::TPROBE) {
                b.put2((m.probe_c * 128.0) as i16 as u16)?;
            }
            put_activity_sequence(b, m, flags)?;
        }
    }
    Ok(())
}

fn put_activity_sequence(b: &mut TxBuffer, m: &Measurement, flags: Flags) -> Result<(), CodecError> {
    if flags.contains(Flags::ACTIVITY) {
        for avg in m.activity.as_slice() {
            b.put2(f2sflt16(*avg))?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// A decoded uplink.  Absent groups are `None` / empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Uplink {
    pub format: Option<Format>,
    pub gps_time: Option<u32>,
    pub flags: Flags,
    pub vbat: Option<f32>,
    pub vsystem: Option<f32>,
    pub vbus: Option<f32>,
    pub boot: Option<u8>,
    pub env: Option<Env>,
    pub light: Option<Light>,
    pub pellets: Option<[PelletReading; NUM_FEEDERS]>,
    pub probe_c: Option<f32>,
    /// Activity averages, oldest first.
    pub activity: heapless::Vec<f32, MAX_ACTIVITY_ENTRIES>,
    /// Format 0x21 window (min, max).
    pub activity_range: Option<(f32, f32)>,
}

struct Reader<'a> {
    bytes: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let (head, rest) = self.bytes.split_first_chunk::<N>().ok_or(CodecError::Truncated)?;
        self.bytes = rest;
        Ok(*head)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_be_bytes(self.take()?))
    }

    fn i16(&mut self) -> Result<i16, CodecError> {
        Ok(i16::from_be_bytes(self.take()?))
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_be_bytes(self.take()?))
    }

    fn remaining(&self) -> usize {
        self.bytes.len()
    }
}

/// Decode a payload produced by [`encode`].
pub fn decode(bytes: &[u8]) -> Result<Uplink, CodecError> {
    let mut r = Reader { bytes };
    let format = Format::try_from(r.u8()?)?;
    let mut out = Uplink {
        format: Some(format),
        ..Uplink::default()
    };

    if format.has_timestamp() {
        out.gps_time = Some(r.u32()?);
    }
    let flags = Flags::from_bits(r.u8()?);
    out.flags = flags;

    let volts = |raw: i16| f32::from(raw) / 4096.0;
    if flags.contains(Flags::VBAT) {
        out.vbat = Some(volts(r.i16()?));
    }
    if flags.contains(Flags::VCC) {
        out.vsystem = Some(volts(r.i16()?));
    }
    if flags.contains(Flags::VBUS) {
        out.vbus = Some(volts(r.i16()?));
    }
    if flags.contains(Flags::BOOT) {
        out.boot = Some(r.u8()?);
    }
    if flags.contains(Flags::TPH) {
        let temperature = f32::from(r.i16()?) / 256.0;
        let pressure = f32::from(r.u16()?) / 25.0;
        let humidity = f32::from(r.u16()?) * 100.0 / 65535.0;
        out.env = Some(Env {
            temperature,
            pressure,
            humidity,
        });
    }
    if flags.contains(Flags::LIGHT) {
        out.light = Some(if format == Format::Legacy {
            let ir = f32::from(r.u16()?);
            let white = f32::from(r.u16()?);
            let uv = f32::from(r.u16()?);
            Light { ir, white, uv }
        } else {
            Light {
                white: f32::from(r.u16()?),
                ..Light::default()
            }
        });
    }

    match format {
        Format::Legacy => {
            if flags.contains(Flags::LEGACY_ACTIVITY) {
                let avg = sflt16_to_f32(r.u16()?);
                let min = sflt16_to_f32(r.u16()?);
                let max = sflt16_to_f32(r.u16()?);
                let _ = out.activity.push(avg);
                out.activity_range = Some((min, max));
            }
        }
        Format::Pellets | Format::Probe => {
            if format == Format::Pellets && flags.contains(Flags::PELLETS) {
                let mut pellets = [PelletReading::default(); NUM_FEEDERS];
                for p in &mut pellets {
                    p.total = u32::from(r.u16()?);
                    p.recent = r.u8()?;
                }
                out.pellets = Some(pellets);
            }
            if format == Format::Probe && flags.contains(Flags::TPROBE) {
                out.probe_c = Some(f32::from(r.i16()?) / 128.0);
            }
            if flags.contains(Flags::ACTIVITY) {
                if r.remaining() % 2 != 0 || r.remaining() / 2 > MAX_ACTIVITY_ENTRIES {
                    return Err(CodecError::TrailingBytes);
                }
                while r.remaining() > 0 {
                    let v = sflt16_to_f32(r.u16()?);
                    out.activity.push(v).map_err(|_| CodecError::TrailingBytes)?;
                }
            }
        }
    }

    if r.remaining() != 0 {
        return Err(CodecError::TrailingBytes);
    }
    Ok(out)
}
