//! Rational time bases and timestamp rescaling

use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// A time base: one tick lasts `num / den` seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rational {
    pub num: i64,
    pub den: i64,
}

impl Rational {
    pub const fn new(num: i64, den: i64) -> Self {
        Self { num, den }
    }

    pub fn is_valid(&self) -> bool {
        self.num > 0 && self.den > 0
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Microsecond time base
pub const MICROSECONDS: Rational = Rational::new(1, 1_000_000);

/// 90 kHz clock used for video and MPEG-TS timestamps
pub const MPEG_TIME_BASE: Rational = Rational::new(1, 90_000);

/// Converts `value` ticks of `from` into ticks of `to`
///
/// Rounds half away from zero. Intermediate math is done in 128 bits so large
/// timestamps cannot overflow; results outside `i64` saturate.
pub fn rescale(value: i64, from: Rational, to: Rational) -> i64 {
    let num = value as i128 * from.num as i128 * to.den as i128;
    let den = from.den as i128 * to.num as i128;
    if den == 0 {
        return 0;
    }
    let (num, den) = if den < 0 { (-num, -den) } else { (num, den) };

    let half = den / 2;
    let rounded = if num >= 0 {
        (num + half) / den
    } else {
        (num - half) / den
    };
    rounded.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Expresses an elapsed duration in ticks of `to`
pub fn from_elapsed(elapsed: Duration, to: Rational) -> i64 {
    let micros = i64::try_from(elapsed.as_micros()).unwrap_or(i64::MAX);
    rescale(micros, MICROSECONDS, to)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rescale_micros_to_90khz() {
        assert_eq!(rescale(1_000_000, MICROSECONDS, MPEG_TIME_BASE), 90_000);
        assert_eq!(rescale(33_333, MICROSECONDS, MPEG_TIME_BASE), 3000);
        assert_eq!(rescale(0, MICROSECONDS, MPEG_TIME_BASE), 0);
    }

    #[test]
    fn test_rescale_rounds_half_away_from_zero() {
        let from = Rational::new(1, 2);
        let to = Rational::new(1, 1);
        assert_eq!(rescale(1, from, to), 1);
        assert_eq!(rescale(-1, from, to), -1);
        assert_eq!(rescale(3, from, to), 2);
    }

    #[test]
    fn test_rescale_large_values() {
        let v = i64::MAX / 2;
        assert_eq!(rescale(v, MPEG_TIME_BASE, MPEG_TIME_BASE), v);
    }

    #[test]
    fn test_from_elapsed() {
        assert_eq!(from_elapsed(Duration::from_millis(1500), MPEG_TIME_BASE), 135_000);
        assert_eq!(from_elapsed(Duration::from_micros(11), MPEG_TIME_BASE), 1);
    }

    #[test]
    fn test_display() {
        assert_eq!(MPEG_TIME_BASE.to_string(), "1/90000");
        assert!(MPEG_TIME_BASE.is_valid());
        assert!(!Rational::new(0, 1).is_valid());
    }
}
