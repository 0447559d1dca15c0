//! Calibration constants are stored in a TI-specific 4-byte float: a biased
//! exponent byte followed by a 24-bit mantissa with an implied leading one,
//! whose top bit is replaced by the sign. Big-endian, as in data flash.
//!
//! The conversion has to match the chip's bit for bit, so it is done the
//! same way TI's reference code does it.

const EXPONENT_BIAS: i32 = 128;

/// Nudge that keeps values sitting right below a power of two from being
/// normalized one step too far
const ROUNDING_NUDGE: f64 = 1.0 + 1.0 / 33_554_432.0;

/// Multiplies by 2^exp. Exact as long as the result stays in range
fn scale_by_pow2(mut value: f64, exp: i32) -> f64 {
    if exp >= 0 {
        for _ in 0..exp {
            value *= 2.0;
        }
    } else {
        for _ in exp..0 {
            value /= 2.0;
        }
    }

    value
}

/// Converts a float into the chip's representation
pub fn float_to_device_format(value: f32) -> [u8; 4] {
    let magnitude = (if value < 0.0 { -value } else { value }) as f64;

    if magnitude == 0.0 {
        return [0; 4];
    }

    let mut exp: i32 = 0;
    let mut normalized = magnitude * ROUNDING_NUDGE;

    while normalized < 0.5 && exp > -EXPONENT_BIAS {
        normalized *= 2.0;
        exp -= 1;
    }

    while normalized >= 1.0 && exp < EXPONENT_BIAS - 1 {
        normalized /= 2.0;
        exp += 1;
    }

    // 2^(8 - exp) * |value| lands in [128, 256), the implied one is dropped
    let mut mantissa = scale_by_pow2(magnitude, 8 - exp) - 128.0;

    let high = mantissa as u8;
    mantissa = 256.0 * (mantissa - high as f64);
    let middle = mantissa as u8;
    mantissa = 256.0 * (mantissa - middle as f64);
    let low = mantissa as u8;

    let sign = if value < 0.0 { 0x80 } else { 0 };

    [(exp + EXPONENT_BIAS) as u8, high | sign, middle, low]
}

/// Converts the chip's representation back into a float
pub fn device_format_to_float(raw: [u8; 4]) -> f32 {
    if raw[0] == 0 {
        return 0.0;
    }

    let exp = raw[0] as i32 - EXPONENT_BIAS;
    let mantissa = ((raw[1] | 0x80) as u32) << 16 | (raw[2] as u32) << 8 | raw[3] as u32;
    let magnitude = scale_by_pow2(mantissa as f64, exp - 24) as f32;

    if raw[1] & 0x80 != 0 {
        -magnitude
    } else {
        magnitude
    }
}
