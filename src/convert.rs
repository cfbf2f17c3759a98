//! Linear mapping between stored integer samples and calibrated physical
//! values, plus the little-endian sample encodings used on disk.
//!
//! ```text
//! gain     = (pmax - pmin) / (dmax - dmin)
//! offset   = pmax / gain - dmax
//! physical = (digital + offset) * gain
//! digital  = physical / gain - offset
//! ```

use crate::error::{EdfError, Result};

/// Bytes per sample in EDF files.
pub const EDF_SAMPLE_WIDTH: usize = 2;
/// Bytes per sample in BDF files.
pub const BDF_SAMPLE_WIDTH: usize = 3;

/// Precomputed gain/offset of one signal.
///
/// # Examples
///
/// ```rust
/// use edf_codec::convert::Scaling;
///
/// let scaling = Scaling::new(-32768, 32767, -100.0, 100.0)?;
/// let physical = scaling.to_physical(16384);
/// assert!((physical - 50.0).abs() < 0.01);
/// assert_eq!(scaling.to_digital(physical).round() as i32, 16384);
/// # Ok::<(), edf_codec::EdfError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scaling {
    gain: f64,
    offset: f64,
}

impl Scaling {
    pub fn new(digital_min: i32, digital_max: i32, physical_min: f64, physical_max: f64) -> Result<Self> {
        if digital_max == digital_min {
            return Err(EdfError::range(
                "digital_min/digital_max",
                format!("digital_min equals digital_max ({})", digital_min),
            ));
        }
        if physical_max == physical_min {
            return Err(EdfError::range(
                "physical_min/physical_max",
                format!("physical_min equals physical_max ({})", physical_min),
            ));
        }
        if !physical_min.is_finite() || !physical_max.is_finite() {
            return Err(EdfError::range(
                "physical_min/physical_max",
                "physical limits must be finite",
            ));
        }

        let gain = (physical_max - physical_min) / (digital_max as f64 - digital_min as f64);
        let offset = physical_max / gain - digital_max as f64;
        Ok(Scaling { gain, offset })
    }

    pub fn gain(&self) -> f64 {
        self.gain
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn to_physical(&self, digital: i32) -> f64 {
        (digital as f64 + self.offset) * self.gain
    }

    /// Pre-rounding digital value.
    pub fn to_digital(&self, physical: f64) -> f64 {
        physical / self.gain - self.offset
    }
}

/// Converts one digital value to its physical value.
pub fn to_physical(digital: i32, digital_min: i32, digital_max: i32, physical_min: f64, physical_max: f64) -> Result<f64> {
    Ok(Scaling::new(digital_min, digital_max, physical_min, physical_max)?.to_physical(digital))
}

/// Converts one physical value to its (unrounded) digital value.
pub fn to_digital(physical: f64, digital_min: i32, digital_max: i32, physical_min: f64, physical_max: f64) -> Result<f64> {
    Ok(Scaling::new(digital_min, digital_max, physical_min, physical_max)?.to_digital(physical))
}

/// Slice form of [`to_physical`].
pub fn dig2phys(digital: &[i32], digital_min: i32, digital_max: i32, physical_min: f64, physical_max: f64) -> Result<Vec<f64>> {
    let scaling = Scaling::new(digital_min, digital_max, physical_min, physical_max)?;
    Ok(digital.iter().map(|&d| scaling.to_physical(d)).collect())
}

/// Slice form of [`to_digital`]; values are not rounded.
pub fn phys2dig(physical: &[f64], digital_min: i32, digital_max: i32, physical_min: f64, physical_max: f64) -> Result<Vec<f64>> {
    let scaling = Scaling::new(digital_min, digital_max, physical_min, physical_max)?;
    Ok(physical.iter().map(|&p| scaling.to_digital(p)).collect())
}

/// Inclusive range of a signed integer stored in `width` bytes.
pub fn storage_limits(width: usize) -> (i64, i64) {
    let bits = (width * 8) as u32;
    (-(1i64 << (bits - 1)), (1i64 << (bits - 1)) - 1)
}

/// Rounds half away from zero and checks the result fits `width` bytes.
pub fn round_to_storage(value: f64, width: usize) -> Result<i32> {
    let (min, max) = storage_limits(width);
    // f64::round 即为远离零的舍入
    let rounded = value.round();
    if !rounded.is_finite() || rounded < min as f64 || rounded > max as f64 {
        return Err(EdfError::SampleOverflow {
            signal: String::new(),
            value,
            min,
            max,
        });
    }
    Ok(rounded as i32)
}

/// Appends `value` as a little-endian signed integer of `width` bytes.
pub fn encode_sample(value: i32, width: usize, out: &mut Vec<u8>) {
    let bytes = value.to_le_bytes();
    out.extend_from_slice(&bytes[..width]);
}

/// Reads a little-endian signed integer of `bytes.len()` (2 or 3) bytes.
pub fn decode_sample(bytes: &[u8]) -> i32 {
    match bytes.len() {
        2 => i16::from_le_bytes([bytes[0], bytes[1]]) as i32,
        // 24 位补码需要符号扩展
        3 => {
            let sign = if bytes[2] & 0x80 != 0 { 0xFF } else { 0x00 };
            i32::from_le_bytes([bytes[0], bytes[1], bytes[2], sign])
        }
        n => panic!("unsupported sample width {}", n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_every_16bit_step() {
        let scaling = Scaling::new(-32768, 32767, -200.0, 200.0).unwrap();
        for d in (-32768..=32767).step_by(7) {
            let p = scaling.to_physical(d);
            assert_eq!(round_to_storage(scaling.to_digital(p), 2).unwrap(), d);
        }
    }

    #[test]
    fn test_round_trip_asymmetric_limits() {
        let scaling = Scaling::new(-2048, 2047, 0.5, 3.25).unwrap();
        for d in -2048..=2047 {
            let p = scaling.to_physical(d);
            assert_eq!(scaling.to_digital(p).round() as i32, d);
        }
        assert!((scaling.to_physical(-2048) - 0.5).abs() < 1e-12);
        assert!((scaling.to_physical(2047) - 3.25).abs() < 1e-12);
    }

    #[test]
    fn test_degenerate_limits_are_range_errors() {
        assert_eq!(
            to_physical(1, 5, 5, -1.0, 1.0).unwrap_err().kind(),
            crate::ErrorKind::Range
        );
        assert_eq!(
            to_digital(1.0, -5, 5, 2.0, 2.0).unwrap_err().kind(),
            crate::ErrorKind::Range
        );
    }

    #[test]
    fn test_no_clamping() {
        // 超出物理范围的值映射到数字范围之外
        let d = to_digital(150.0, -100, 100, -100.0, 100.0).unwrap();
        assert!((d - 150.0).abs() < 1e-9);
    }

    #[test]
    fn test_rounding_ties_away_from_zero() {
        assert_eq!(round_to_storage(2.5, 2).unwrap(), 3);
        assert_eq!(round_to_storage(-2.5, 2).unwrap(), -3);
        assert_eq!(round_to_storage(-0.4, 2).unwrap(), 0);
    }

    #[test]
    fn test_storage_overflow() {
        assert!(round_to_storage(32767.4, 2).is_ok());
        assert!(round_to_storage(32767.6, 2).is_err());
        assert!(round_to_storage(-32769.0, 2).is_err());
        assert!(round_to_storage(40000.0, 3).is_ok());
        assert!(round_to_storage(8388608.0, 3).is_err());
        assert!(round_to_storage(f64::NAN, 2).is_err());
    }

    #[test]
    fn test_sample_encoding() {
        let mut buf = Vec::new();
        encode_sample(-2, 2, &mut buf);
        encode_sample(-8388608, 3, &mut buf);
        encode_sample(8388607, 3, &mut buf);
        assert_eq!(buf, vec![0xFE, 0xFF, 0x00, 0x00, 0x80, 0xFF, 0xFF, 0x7F]);
        assert_eq!(decode_sample(&buf[0..2]), -2);
        assert_eq!(decode_sample(&buf[2..5]), -8388608);
        assert_eq!(decode_sample(&buf[5..8]), 8388607);
    }

    #[test]
    fn test_slice_helpers() {
        let phys = dig2phys(&[-10, 0, 10], -10, 10, -1.0, 1.0).unwrap();
        assert_eq!(phys.len(), 3);
        assert!((phys[2] - 1.0).abs() < 1e-12);
        let dig = phys2dig(&phys, -10, 10, -1.0, 1.0).unwrap();
        assert!((dig[0] + 10.0).abs() < 1e-9);
    }
}
