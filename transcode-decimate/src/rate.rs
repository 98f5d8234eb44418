//! Rational frame rates.

use crate::error::{DecimateError, Result};
use std::fmt;

/// A frame rate represented as a numerator and denominator.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rational {
    /// Numerator
    pub num: i64,
    /// Denominator (must be positive)
    pub den: i64,
}

impl Rational {
    /// Create a new rational number.
    ///
    /// # Panics
    ///
    /// Panics if denominator is zero.
    pub fn new(num: i64, den: i64) -> Self {
        assert!(den != 0, "Denominator cannot be zero");
        let (num, den) = if den < 0 { (-num, -den) } else { (num, den) };
        Self { num, den }
    }

    /// NTSC film rate, 24000/1001.
    pub const fn ntsc_film() -> Self {
        Self {
            num: 24000,
            den: 1001,
        }
    }

    /// NTSC video rate, 30000/1001.
    pub const fn ntsc_video() -> Self {
        Self {
            num: 30000,
            den: 1001,
        }
    }

    /// Reduce the rational to its simplest form.
    pub fn reduce(&self) -> Self {
        if self.num == 0 {
            return Self { num: 0, den: 1 };
        }
        let g = gcd(self.num.unsigned_abs(), self.den.unsigned_abs());
        Self {
            num: self.num / g as i64,
            den: self.den / g as i64,
        }
    }

    /// Convert to f64.
    pub fn to_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }

    /// Multiply by `mul / div` and reduce.
    pub fn scale(&self, mul: i64, div: i64) -> Self {
        Self::new(self.num * mul, self.den * div).reduce()
    }

    /// Convert a floating point rate to a rational.
    ///
    /// Rates that are exact multiples of the NTSC 1001 bases are recognized
    /// first; everything else goes through a continued-fraction reduction at
    /// single precision.
    pub fn from_f64(rate: f64) -> Result<Self> {
        if rate <= 0.0 || !rate.is_finite() {
            return Err(DecimateError::invalid_params(format!(
                "rate must be greater than 0 (got {})",
                rate
            )));
        }
        let target = rate as f32;
        let u = (rate * 1001.0 + 0.5) as u64;
        for base in [30000u64, 24000] {
            let x = ((u / base * base) as f64 / 1001.0) as f32;
            if x == target {
                return Ok(Self::new(u as i64, 1001));
            }
        }
        if rate < 14.986 {
            for base in [30000u64, 24000] {
                let u = (base as f64 / rate + 0.5) as u64;
                let d = u / 1001 * 1001;
                if d > 0 && (base as f64 / d as f64) as f32 == target {
                    return Ok(Self::new(base as i64, u as i64));
                }
            }
        }
        reduce_float(target)
            .map(|(num, den)| Self::new(num as i64, den as i64))
            .ok_or_else(|| DecimateError::invalid_params("rate value is out of range"))
    }
}

impl Default for Rational {
    fn default() -> Self {
        Self::ntsc_video()
    }
}

impl fmt::Debug for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rational({}/{})", self.num, self.den)
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.den)
        }
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

/// Exact binary fraction of a float, `None` when it does not fit in 32 bits.
fn float_to_frac(input: f32) -> Option<(u32, u32)> {
    let bits = input.to_bits();
    let mut mantissa = (bits & 0x7F_FFFF) + 0x80_0000;
    let mut exponent = ((bits & 0x7F80_0000) >> 23) as i32 - 127 - 23;
    while mantissa & 1 == 0 {
        mantissa >>= 1;
        exponent += 1;
    }
    if exponent < -31 {
        return float_to_frac(1.0 / input).map(|(n, d)| (d, n));
    }
    while exponent > 0 && mantissa & 0x8000_0000 == 0 {
        mantissa <<= 1;
        exponent -= 1;
    }
    if exponent > 0 {
        return None;
    }
    Some((mantissa, 1u32 << (-exponent)))
}

/// Smallest-denominator fraction that rounds to `value` at single precision.
fn reduce_float(value: f32) -> Option<(u64, u64)> {
    let (num, den) = float_to_frac(value)?;
    let (num, den) = (num as u64, den as u64);
    let (mut n0, mut n1) = (0u64, 1u64);
    let (mut d0, mut d1) = (1u64, 0u64);
    let (mut nx, mut dx) = (num, den);
    let mut f1 = 0u64;
    let (mut a2, mut f2, mut n2, mut d2);
    loop {
        a2 = nx / dx;
        f2 = nx % dx;
        n2 = n0 + n1 * a2;
        d2 = d0 + d1 * a2;
        if f2 == 0 || (n2 as f64 / d2 as f64) as f32 == value {
            break;
        }
        n0 = n1;
        n1 = n2;
        d0 = d1;
        d1 = d2;
        nx = dx;
        dx = f2;
        f1 = f2;
    }
    if d2 == 1 {
        return Some((n2, d2));
    }

    let amin = if a2 % 2 == 0 && d0 * f1 > f2 * d1 {
        a2 / 2
    } else {
        a2 / 2 + 1
    };
    let eps_bits = if n1 * den > num * d1 {
        value.to_bits() - 1
    } else {
        value.to_bits() + 1
    };
    let r2 = (f32::from_bits(eps_bits) as f64 + value as f64) / 2.0;
    let yn = n0 as f64 - r2 * d0 as f64;
    let yd = r2 * d1 as f64 - n1 as f64;
    let ax = if yd > 0.0 {
        (((yn + yd) / yd) as u64).max(amin)
    } else {
        amin
    };
    Some((n0 + n1 * ax, d0 + d1 * ax))
}
