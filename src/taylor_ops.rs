//! Truncated power-series recurrences.
//!
//! Convention: `c[k] = f^(k)(t₀) / k!` (scaled Taylor coefficients), with
//! `c[0]` the value. All functions take input slices `&[F]` and write an
//! output `&mut [F]`; the degree is `c.len() - 1`. Inputs and outputs must
//! not alias: the sweep engine stages operands into scratch series before
//! calling these, which is what makes `res == arg` safe on the tape.

use crate::float::Float;

// ══════════════════════════════════════════════
//  Arithmetic
// ══════════════════════════════════════════════

/// `c = a * b`, the Cauchy product.
///
/// `c[k] = Σ_{j=0}^{k} a[j] * b[k-j]`
#[inline]
pub fn taylor_mul<F: Float>(a: &[F], b: &[F], c: &mut [F]) {
    for k in 0..c.len() {
        let mut sum = F::zero();
        for j in 0..=k {
            sum = sum + a[j] * b[k - j];
        }
        c[k] = sum;
    }
}

/// `c += a * b`, or `c -= a * b` when `subtract`.
#[inline]
pub fn taylor_mul_acc<F: Float>(a: &[F], b: &[F], c: &mut [F], subtract: bool) {
    for k in 0..c.len() {
        let mut sum = F::zero();
        for j in 0..=k {
            sum = sum + a[j] * b[k - j];
        }
        c[k] = if subtract { c[k] - sum } else { c[k] + sum };
    }
}

/// `c = a / b`; solves `a = c * b` coefficient by coefficient.
///
/// `c[k] = (a[k] - Σ_{j=1}^{k} b[j] * c[k-j]) / b[0]`
#[inline]
pub fn taylor_div<F: Float>(a: &[F], b: &[F], c: &mut [F]) {
    let inv_b0 = F::one() / b[0];
    for k in 0..c.len() {
        let mut sum = a[k];
        for j in 1..=k {
            sum = sum - b[j] * c[k - j];
        }
        c[k] = sum * inv_b0;
    }
}

/// `c = s / a` for a scalar numerator.
#[inline]
pub fn taylor_const_div<F: Float>(s: F, a: &[F], c: &mut [F]) {
    let inv_a0 = F::one() / a[0];
    c[0] = s * inv_a0;
    for k in 1..c.len() {
        let mut sum = F::zero();
        for j in 1..=k {
            sum = sum + a[j] * c[k - j];
        }
        c[k] = -sum * inv_a0;
    }
}

/// `c = a^n` for a positive integer `n`, by repeated Cauchy products.
///
/// Well defined at `a[0] = 0`, where the logarithmic recurrence is not.
pub fn taylor_powi_mul<F: Float>(a: &[F], n: u32, c: &mut [F], scratch: &mut [F]) {
    c.copy_from_slice(a);
    for _ in 1..n {
        taylor_mul(c, a, scratch);
        c.copy_from_slice(scratch);
    }
}

// ══════════════════════════════════════════════
//  Transcendentals (logarithmic derivative technique)
// ══════════════════════════════════════════════

/// `c = exp(a)`
///
/// `c[0] = exp(a[0])`
/// `c[k] = (1/k) * Σ_{j=1}^{k} j * a[j] * c[k-j]`
#[inline]
pub fn taylor_exp<F: Float>(a: &[F], c: &mut [F]) {
    c[0] = a[0].exp();
    for k in 1..c.len() {
        let mut sum = F::zero();
        for j in 1..=k {
            sum = sum + F::of(j) * a[j] * c[k - j];
        }
        c[k] = sum / F::of(k);
    }
}

/// `c = ln(a)` with `inv_a0` supplied by the caller.
///
/// `c[k] = (a[k] - (1/k) * Σ_{j=1}^{k-1} j * c[j] * a[k-j]) * inv_a0`
///
/// Passing `inv_a0 = NaN` poisons every coefficient, which is how the
/// singular case at `a[0] = 0` is expressed.
#[inline]
pub fn taylor_ln<F: Float>(a: &[F], inv_a0: F, c: &mut [F]) {
    c[0] = a[0].ln();
    for k in 1..c.len() {
        let mut sum = F::zero();
        for j in 1..k {
            sum = sum + F::of(j) * c[j] * a[k - j];
        }
        c[k] = (a[k] - sum / F::of(k)) * inv_a0;
    }
}

/// `c = sqrt(a)` for `a[0] > 0`.
///
/// `c[k] = (a[k] - Σ_{j=1}^{k-1} c[j] * c[k-j]) / (2 * c[0])`
#[inline]
pub fn taylor_sqrt<F: Float>(a: &[F], c: &mut [F]) {
    c[0] = a[0].sqrt();
    let inv_two_c0 = F::one() / (F::of(2) * c[0]);
    for k in 1..c.len() {
        let mut sum = F::zero();
        for j in 1..k {
            sum = sum + c[j] * c[k - j];
        }
        c[k] = (a[k] - sum) * inv_two_c0;
    }
}

/// `c = a^r` for a constant `r` and `a[0] != 0`.
///
/// From `a * c' = r * a' * c`:
/// `c[k] = (1/(k a[0])) * Σ_{j=1}^{k} (r j - (k - j)) * a[j] * c[k-j]`
#[inline]
pub fn taylor_pow_const<F: Float>(a: &[F], r: F, c: &mut [F]) {
    c[0] = a[0].powf(r);
    let inv_a0 = F::one() / a[0];
    for k in 1..c.len() {
        let mut sum = F::zero();
        for j in 1..=k {
            sum = sum + (r * F::of(j) - F::of(k - j)) * a[j] * c[k - j];
        }
        c[k] = sum * inv_a0 / F::of(k);
    }
}

/// `(s, co) = sin_cos(a)`, a coupled recurrence.
///
/// `s[k] = (1/k) * Σ_{j=1}^{k} j * a[j] * co[k-j]`
/// `co[k] = -(1/k) * Σ_{j=1}^{k} j * a[j] * s[k-j]`
#[inline]
pub fn taylor_sin_cos<F: Float>(a: &[F], s: &mut [F], co: &mut [F]) {
    let (s0, c0) = a[0].sin_cos();
    s[0] = s0;
    co[0] = c0;
    for k in 1..s.len() {
        let inv_k = F::one() / F::of(k);
        let mut sum_s = F::zero();
        let mut sum_c = F::zero();
        for j in 1..=k {
            let jf = F::of(j);
            sum_s = sum_s + jf * a[j] * co[k - j];
            sum_c = sum_c + jf * a[j] * s[k - j];
        }
        s[k] = sum_s * inv_k;
        co[k] = -sum_c * inv_k;
    }
}

/// Integrate `c' = g * a'` for coefficients `1..`; `c[0]` is left as is.
///
/// `c[k] = (1/k) * Σ_{j=1}^{k} j * a[j] * g[k-j]`
///
/// Every function whose derivative series `g` is already on the tape
/// (atan, asin, erf, recorded quadratures, …) propagates this way.
#[inline]
pub fn taylor_integrate<F: Float>(a: &[F], g: &[F], c: &mut [F]) {
    for k in 1..c.len() {
        let mut sum = F::zero();
        for j in 1..=k {
            sum = sum + F::of(j) * a[j] * g[k - j];
        }
        c[k] = sum / F::of(k);
    }
}

// ══════════════════════════════════════════════
//  Singular points
// ══════════════════════════════════════════════

/// Sign of the first nonzero coefficient in `coeffs`, if any.
#[inline]
pub fn leading_sign<F: Float>(coeffs: &[F]) -> Option<bool> {
    coeffs
        .iter()
        .find(|&&t| t != F::zero())
        .map(|&t| t > F::zero())
}

/// `c = a^r` at `a[0] = 0` for non-integer `r > 0`, coefficient `k ≥ 1`:
/// zero while `r - k > 1`, infinite for `0 < r - k < 1`, NaN once `r - k < 0`.
pub fn taylor_pow_fractional_at_zero<F: Float>(r: F, c: &mut [F]) {
    c[0] = F::zero();
    for k in 1..c.len() {
        let rem = r - F::of(k - 1);
        c[k] = if rem > F::one() {
            F::zero()
        } else if rem > F::zero() {
            F::infinity()
        } else {
            F::nan()
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-12 * (1.0 + a.abs().max(b.abs()))
    }

    #[test]
    fn pow_matches_repeated_product() {
        let a = [1.5, 0.7, -0.2, 0.3];
        let mut c = [0.0; 4];
        let mut p = [0.0; 4];
        let mut s = [0.0; 4];
        taylor_pow_const(&a, 3.0, &mut c);
        taylor_powi_mul(&a, 3, &mut p, &mut s);
        for k in 0..4 {
            assert!(close(c[k], p[k]), "k={k}: {} vs {}", c[k], p[k]);
        }
    }

    #[test]
    fn div_inverts_mul() {
        let a = [2.0, -1.0, 0.5, 0.25];
        let b = [1.25, 0.3, 0.0, -0.7];
        let mut prod = [0.0; 4];
        let mut back = [0.0; 4];
        taylor_mul(&a, &b, &mut prod);
        taylor_div(&prod, &b, &mut back);
        for k in 0..4 {
            assert!(close(back[k], a[k]));
        }
    }

    #[test]
    fn ln_inverts_exp() {
        let a = [0.3, 1.0, -0.5, 0.2];
        let mut e = [0.0; 4];
        let mut l = [0.0; 4];
        taylor_exp(&a, &mut e);
        taylor_ln(&e, 1.0 / e[0], &mut l);
        for k in 0..4 {
            assert!(close(l[k], a[k]));
        }
    }

    #[test]
    fn sqrt_squares_back() {
        let a = [4.0, 1.0, 0.5, -0.25];
        let mut r = [0.0; 4];
        let mut sq = [0.0; 4];
        taylor_sqrt(&a, &mut r);
        taylor_mul(&r, &r, &mut sq);
        for k in 0..4 {
            assert!(close(sq[k], a[k]));
        }
    }

    #[test]
    fn fractional_power_at_zero() {
        let mut c = [0.0f64; 4];
        taylor_pow_fractional_at_zero(1.5, &mut c);
        assert_eq!(c[0], 0.0);
        assert_eq!(c[1], 0.0);
        assert!(c[2].is_infinite());
        assert!(c[3].is_nan());
    }

    #[test]
    fn leading_sign_skips_zeros() {
        assert_eq!(leading_sign(&[0.0, 0.0, -2.0, 1.0]), Some(false));
        assert_eq!(leading_sign(&[0.0, 3.0]), Some(true));
        assert_eq!(leading_sign::<f64>(&[0.0, 0.0]), None);
    }
}
