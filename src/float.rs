use std::fmt::{Debug, Display};

use num_traits::{Float as NumFloat, FloatConst, FromPrimitive};

/// Marker trait for the floating-point types a tape can be swept over (`f32`, `f64`).
///
/// Bundles the numeric traits the interpreters need, plus a few helpers that
/// the recurrences and the transport codec share.
pub trait Float:
    NumFloat + FloatConst + FromPrimitive + Copy + Send + Sync + Default + Debug + Display + 'static
{
    /// `i` as a float. Used for the degree factors in Taylor recurrences.
    #[inline]
    fn of(i: usize) -> Self {
        Self::from_usize(i).unwrap_or_else(Self::nan)
    }

    /// Gauss error function, evaluated in `f64`.
    fn erf(self) -> Self {
        let x = self.to_f64().unwrap_or(f64::NAN);
        Self::from_f64(erf_f64(x)).unwrap_or_else(Self::nan)
    }

    /// Bit pattern used on the wire. Values travel as `f64`.
    #[inline]
    fn to_wire(self) -> u64 {
        self.to_f64().unwrap_or(f64::NAN).to_bits()
    }

    #[inline]
    fn from_wire(bits: u64) -> Self {
        Self::from_f64(f64::from_bits(bits)).unwrap_or_else(Self::nan)
    }
}

impl Float for f32 {}
impl Float for f64 {}

/// Maclaurin series below |x| = 3, continued fraction for `erfc` above.
fn erf_f64(x: f64) -> f64 {
    if x.is_nan() {
        return x;
    }
    let ax = x.abs();
    if ax < 3.0 {
        let x2 = x * x;
        let mut term = x;
        let mut sum = x;
        let mut n = 0.0;
        while term.abs() > 1e-17 * sum.abs() {
            n += 1.0;
            term *= -x2 / n;
            sum += term / (2.0 * n + 1.0);
            if n > 200.0 {
                break;
            }
        }
        return sum * std::f64::consts::FRAC_2_SQRT_PI;
    }
    if ax > 27.0 {
        return x.signum();
    }
    // erfc(x) = exp(-x²)/√π · 1/(x + (1/2)/(x + 1/(x + (3/2)/(x + ...))))
    let mut t = ax;
    for k in (1..=80).rev() {
        t = ax + (k as f64 * 0.5) / t;
    }
    let erfc = (-ax * ax).exp() / (std::f64::consts::PI.sqrt() * t);
    (1.0 - erfc).copysign(x)
}
