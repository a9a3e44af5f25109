//! Uplink payload codec.
//!
//! [`TxBuffer`] is a fixed-capacity big-endian byte buffer with typed
//! `put` encoders.  Every put is bounds-checked and returns
//! [`CodecError::CapacityExceeded`] instead of writing past the end.
//!
//! | Encoder       | Wire          | Scale                  |
//! |---------------|---------------|------------------------|
//! | `put_v`       | i16           | volts × 4096           |
//! | `put_t`       | i16           | °C × 256               |
//! | `put_p`       | u16           | hPa × 25               |
//! | `put_rh`      | u16           | %RH × 65535 / 100      |
//! | `put_lux`     | u16           | counts                 |
//! | `put_boot`    | u8            | boot count low byte    |
//! | `put_sflt16`  | u16           | [-1, 1] small float    |
//! | `put_uflt16`  | u16           | [0, 1] small float     |
//!
//! The per-format field layout lives in [`uplink`].

pub mod sflt;
pub mod uplink;

use core::fmt;

use crate::error::CodecError;

/// Buffer capacity; covers the largest supported payload.
pub const TX_BUFFER_CAPACITY: usize = 48;

/// Round half up and saturate to `i16`, returned as its two's-complement bits.
pub fn encode16s(v: f32) -> u16 {
    // `as` saturates at the i16 range and maps NaN to 0.
    ((v + 0.5).floor() as i16) as u16
}

/// Round half up and saturate to `u16`.
pub fn encode16u(v: f32) -> u16 {
    (v + 0.5).floor() as u16
}

/// Fixed-capacity uplink buffer.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct TxBuffer {
    buf: heapless::Vec<u8, TX_BUFFER_CAPACITY>,
}

impl TxBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard the contents.
    pub fn begin(&mut self) {
        self.buf.clear();
    }

    pub fn put(&mut self, b: u8) -> Result<(), CodecError> {
        self.buf.push(b).map_err(|_| CodecError::CapacityExceeded)
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        self.buf
            .extend_from_slice(bytes)
            .map_err(|_| CodecError::CapacityExceeded)
    }

    pub fn put2(&mut self, v: u16) -> Result<(), CodecError> {
        self.put_bytes(&v.to_be_bytes())
    }

    pub fn put4(&mut self, v: u32) -> Result<(), CodecError> {
        self.put_bytes(&v.to_be_bytes())
    }

    pub fn put_v(&mut self, volts: f32) -> Result<(), CodecError> {
        self.put2(encode16s(volts * 4096.0))
    }

    pub fn put_t(&mut self, celsius: f32) -> Result<(), CodecError> {
        self.put2(encode16s(celsius * 256.0))
    }

    pub fn put_p(&mut self, hpa: f32) -> Result<(), CodecError> {
        self.put2(encode16u(hpa * 25.0))
    }

    pub fn put_rh(&mut self, percent: f32) -> Result<(), CodecError> {
        self.put2(encode16u(percent * 65535.0 / 100.0))
    }

    pub fn put_lux(&mut self, counts: f32) -> Result<(), CodecError> {
        self.put2(encode16u(counts))
    }

    pub fn put_boot(&mut self, boot_count: u32) -> Result<(), CodecError> {
        self.put((boot_count & 0xFF) as u8)
    }

    pub fn put_sflt16(&mut self, v: f32) -> Result<(), CodecError> {
        self.put2(sflt::f2sflt16(v))
    }

    pub fn put_uflt16(&mut self, v: f32) -> Result<(), CodecError> {
        self.put2(sflt::f2uflt16(v))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

impl fmt::Debug for TxBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxBuffer[")?;
        for b in self.buf.iter() {
            write!(f, "{b:02x}")?;
        }
        write!(f, "]")
    }
}

/// Lower-case hex dump, as used in the SD log's `Raw` column.
pub fn to_hex(bytes: &[u8]) -> String {
    use core::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode16s_rounds_and_saturates() {
        assert_eq!(encode16s(1.4), 1);
        assert_eq!(encode16s(1.5), 2);
        assert_eq!(encode16s(-1.5), 0xFFFF);
        assert_eq!(encode16s(-1.6), 0xFFFE);
        assert_eq!(encode16s(40_000.0), 0x7FFF);
        assert_eq!(encode16s(-40_000.0), 0x8000);
    }

    #[test]
    fn encode16u_rounds_and_saturates() {
        assert_eq!(encode16u(0.49), 0);
        assert_eq!(encode16u(0.5), 1);
        assert_eq!(encode16u(-3.0), 0);
        assert_eq!(encode16u(70_000.0), 0xFFFF);
    }

    #[test]
    fn scaled_encoders_are_big_endian() {
        let mut b = TxBuffer::new();
        b.put_v(3.3).unwrap();
        b.put_t(-2.0).unwrap();
        b.put_p(1013.25).unwrap();
        b.put_rh(50.0).unwrap();
        b.put_boot(0x1234).unwrap();
        assert_eq!(
            b.as_bytes(),
            &[0x34, 0xCD, 0xFE, 0x00, 0x62, 0xF3, 0x80, 0x00, 0x34]
        );
    }

    #[test]
    fn overflow_is_reported_not_written() {
        let mut b = TxBuffer::new();
        for _ in 0..TX_BUFFER_CAPACITY {
            b.put(0xAA).unwrap();
        }
        assert_eq!(b.put(0), Err(CodecError::CapacityExceeded));
        assert_eq!(b.put2(0), Err(CodecError::CapacityExceeded));
        assert_eq!(b.len(), TX_BUFFER_CAPACITY);
    }

    #[test]
    fn begin_clears() {
        let mut b = TxBuffer::new();
        b.put4(0xDEAD_BEEF).unwrap();
        assert_eq!(to_hex(b.as_bytes()), "deadbeef");
        b.begin();
        assert!(b.is_empty());
    }
}
