//! 16-bit "small float" formats used for fractional values in [-1, 1].
//!
//! ```text
//! sflt16:  s eeee mmmmmmmmmmm     value = ±(m / 2048) · 2^(e - 15)
//! uflt16:    eeee mmmmmmmmmmmm    value =  (m / 4096) · 2^(e - 15)
//! ```
//!
//! Out-of-range inputs saturate: sflt16 maps ≥ 1 to 0x7FFF and ≤ -1 to
//! 0xFFFF, uflt16 maps ≥ 1 to 0xFFFF and negatives to 0.
//!
//! Magnitudes below 2^-16 are denormalised: the exponent is pinned at 0 and
//! the fraction shifted right, so 2^-20 encodes as 0x0040 and decodes back
//! to 2^-20.  LMIC's `LMIC_f2sflt16` pins the exponent without shifting,
//! which reads back as 2^-16 for every such input; payloads differ from
//! LMIC's only in that range.

/// Split `x` into a mantissa in [0.5, 1) (sign preserved) and a power of two.
fn frexp(x: f32) -> (f32, i32) {
    if x == 0.0 || !x.is_finite() {
        return (x, 0);
    }
    let bits = x.to_bits();
    let exp_bits = ((bits >> 23) & 0xff) as i32;
    if exp_bits == 0 {
        // subnormal: scale into the normal range first
        let (m, e) = frexp(x * 2f32.powi(25));
        return (m, e - 25);
    }
    let mantissa = f32::from_bits((bits & 0x807f_ffff) | (126 << 23));
    (mantissa, exp_bits - 126)
}

/// Shared body of both encoders; `frac_bits` is 11 or 12.
fn encode_magnitude(magnitude: f32, frac_bits: u32) -> Option<u16> {
    let (mut normal, exp) = frexp(magnitude);
    let mut exp = exp + 15;
    if exp < 0 {
        // below the smallest exponent: denormalise the fraction
        normal *= 2f32.powi(exp);
        exp = 0;
    }
    let one = 1u32 << frac_bits;
    let mut fraction = (normal * one as f32 + 0.5) as u32;
    if fraction >= one {
        fraction = one >> 1;
        exp += 1;
    }
    if exp > 15 {
        return None;
    }
    Some((((exp as u32) << frac_bits) | fraction) as u16)
}

/// Encode a signed value in [-1, 1] as sflt16.
pub fn f2sflt16(f: f32) -> u16 {
    if f <= -1.0 {
        return 0xFFFF;
    }
    if f >= 1.0 || f.is_nan() {
        return 0x7FFF;
    }
    let sign = if f < 0.0 { 0x8000 } else { 0 };
    match encode_magnitude(f.abs(), 11) {
        Some(v) => sign | v,
        None => sign | 0x7FFF,
    }
}

/// Encode an unsigned value in [0, 1] as uflt16.
pub fn f2uflt16(f: f32) -> u16 {
    if f < 0.0 || f.is_nan() {
        return 0;
    }
    if f >= 1.0 {
        return 0xFFFF;
    }
    encode_magnitude(f, 12).unwrap_or(0xFFFF)
}

/// Decode an sflt16 value.
pub fn sflt16_to_f32(raw: u16) -> f32 {
    let sign = if raw & 0x8000 != 0 { -1.0 } else { 1.0 };
    let exp = i32::from((raw >> 11) & 0x0F);
    let mantissa = f32::from(raw & 0x07FF) / 2048.0;
    sign * mantissa * 2f32.powi(exp - 15)
}

/// Decode a uflt16 value.
pub fn uflt16_to_f32(raw: u16) -> f32 {
    let exp = i32::from(raw >> 12);
    let mantissa = f32::from(raw & 0x0FFF) / 4096.0;
    mantissa * 2f32.powi(exp - 15)
}
