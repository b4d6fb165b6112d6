//! Real Taylor lanes: `p` directions of `d` coefficients per location.
//!
//! Coefficients are stored `[location][direction][degree]` for degrees
//! `1..=d`; the value (degree 0) lives in the engine's value buffer and is
//! passed in where a recurrence needs it. Each direction is staged into a
//! scratch series of length `d + 1` before the result is written, so
//! `res == arg` needs no special casing.

use std::cmp::Ordering;

use crate::error::FrameError;
use crate::float::Float;
use crate::opcode::OpCode;
use crate::status::Status;
use crate::taylor_ops::{
    leading_sign, taylor_const_div, taylor_div, taylor_exp, taylor_integrate, taylor_ln,
    taylor_mul, taylor_mul_acc, taylor_pow_const, taylor_pow_fractional_at_zero,
    taylor_powi_mul, taylor_sin_cos, taylor_sqrt,
};
use crate::transport::{ByteCursor, FrameKind};

use super::engine::Engine;
use super::lanes::{ExternalCall, Lanes};
use super::{check_len, Domain, Mode, Order, Outcome, SweepContext, Width};

/// Coefficient storage.
struct Series<F> {
    p: usize,
    d: usize,
    buf: Vec<F>,
}

impl<F: Float> Series<F> {
    #[inline]
    fn at(&self, loc: usize, dir: usize) -> usize {
        (loc * self.p + dir) * self.d
    }

    #[inline]
    fn block(&self, loc: usize) -> std::ops::Range<usize> {
        let w = self.p * self.d;
        loc * w..(loc + 1) * w
    }

    /// `out = [v, coefficients of (loc, dir)]`
    #[inline]
    fn load(&self, loc: usize, dir: usize, v: F, out: &mut [F]) {
        let base = self.at(loc, dir);
        out[0] = v;
        out[1..].copy_from_slice(&self.buf[base..base + self.d]);
    }

    /// Write `series[1..]` to `(loc, dir)`.
    #[inline]
    fn store(&mut self, loc: usize, dir: usize, series: &[F]) {
        let base = self.at(loc, dir);
        self.buf[base..base + self.d].copy_from_slice(&series[1..]);
    }

    fn copy_dir(&mut self, res: usize, arg: usize, dir: usize) {
        if res != arg {
            let src = self.at(arg, dir);
            let dst = self.at(res, dir);
            self.buf.copy_within(src..src + self.d, dst);
        }
    }
}

/// Staging series, each of length `d + 1`.
struct Scratch<F> {
    a: Vec<F>,
    b: Vec<F>,
    c: Vec<F>,
    e: Vec<F>,
    w: Vec<F>,
}

pub(super) struct TaylorLanes<'x, F: Float> {
    t: Series<F>,
    s: Scratch<F>,
    /// `[independent][direction][degree]`
    inputs: &'x [F],
    /// `[dependent][direction][degree]`
    outputs: Vec<F>,
    /// Dependents reached by an `AssignDep` before the sweep ended.
    exported: Vec<bool>,
}

impl<'x, F: Float> TaylorLanes<'x, F> {
    pub(super) fn new(num_locations: usize, m: usize, p: usize, d: usize, inputs: &'x [F]) -> Self {
        let series = || vec![F::zero(); d + 1];
        TaylorLanes {
            t: Series {
                p,
                d,
                buf: vec![F::nan(); num_locations * p * d],
            },
            s: Scratch {
                a: series(),
                b: series(),
                c: series(),
                e: series(),
                w: series(),
            },
            inputs,
            outputs: vec![F::zero(); m * p * d],
            exported: vec![false; m],
        }
    }

    fn width(&self) -> usize {
        self.t.p * self.t.d
    }

    /// Stage `arg`, apply `f(a, c, work)`, store `c` into `res`; per direction.
    fn unary(&mut self, res: usize, arg: usize, va: F, mut f: impl FnMut(&[F], &mut [F], &mut [F])) {
        for l in 0..self.t.p {
            self.t.load(arg, l, va, &mut self.s.a);
            f(&self.s.a, &mut self.s.c, &mut self.s.w);
            self.t.store(res, l, &self.s.c);
        }
    }

    fn binary(&mut self, res: usize, a: usize, b: usize, va: F, vb: F, f: impl Fn(&[F], &[F], &mut [F])) {
        for l in 0..self.t.p {
            self.t.load(a, l, va, &mut self.s.a);
            self.t.load(b, l, vb, &mut self.s.b);
            f(&self.s.a, &self.s.b, &mut self.s.c);
            self.t.store(res, l, &self.s.c);
        }
    }

    fn elementwise(&mut self, res: usize, a: usize, b: usize, f: impl Fn(F, F) -> F) {
        let (ra, rb, rr) = (self.t.block(a), self.t.block(b), self.t.block(res));
        for k in 0..self.width() {
            self.t.buf[rr.start + k] = f(self.t.buf[ra.start + k], self.t.buf[rb.start + k]);
        }
    }
}

impl<'x, F: Float> Lanes<F> for TaylorLanes<'x, F> {
    const FRAME: FrameKind = FrameKind::Taylor;

    fn independent(&mut self, res: usize, i: usize) {
        let w = self.width();
        let r = self.t.block(res);
        self.t.buf[r].copy_from_slice(&self.inputs[i * w..(i + 1) * w]);
    }

    fn dependent(&mut self, res: usize, j: usize) {
        let w = self.width();
        let r = self.t.block(res);
        self.outputs[j * w..(j + 1) * w].copy_from_slice(&self.t.buf[r]);
        self.exported[j] = true;
    }

    fn clear(&mut self, res: usize) {
        let r = self.t.block(res);
        self.t.buf[r].fill(F::zero());
    }

    fn copy(&mut self, res: usize, arg: usize) {
        if res != arg {
            let src = self.t.block(arg);
            let dst = self.t.block(res).start;
            self.t.buf.copy_within(src, dst);
        }
    }

    fn negate(&mut self, res: usize, arg: usize) {
        self.elementwise(res, arg, arg, |a, _| -a);
    }

    fn add(&mut self, res: usize, a: usize, b: usize) {
        self.elementwise(res, a, b, |x, y| x + y);
    }

    fn sub(&mut self, res: usize, a: usize, b: usize) {
        self.elementwise(res, a, b, |x, y| x - y);
    }

    fn scale(&mut self, res: usize, arg: usize, c: F) {
        self.elementwise(res, arg, arg, |a, _| c * a);
    }

    fn mul(&mut self, res: usize, a: usize, b: usize, va: F, vb: F) {
        self.binary(res, a, b, va, vb, taylor_mul);
    }

    fn mul_acc(&mut self, res: usize, a: usize, b: usize, va: F, vb: F, subtract: bool) {
        for l in 0..self.t.p {
            self.t.load(a, l, va, &mut self.s.a);
            self.t.load(b, l, vb, &mut self.s.b);
            self.t.load(res, l, F::zero(), &mut self.s.c);
            taylor_mul_acc(&self.s.a, &self.s.b, &mut self.s.c, subtract);
            self.t.store(res, l, &self.s.c);
        }
    }

    fn div(&mut self, res: usize, a: usize, b: usize, va: F, vb: F) {
        self.binary(res, a, b, va, vb, taylor_div);
    }

    fn const_div(&mut self, res: usize, arg: usize, c: F, va: F) {
        self.unary(res, arg, va, |a, out, _| taylor_const_div(c, a, out));
    }

    fn exp(&mut self, res: usize, arg: usize, va: F) {
        self.unary(res, arg, va, |a, out, _| taylor_exp(a, out));
    }

    /// At `va == 0` a direction approaching from below is NaN throughout.
    fn log(&mut self, res: usize, arg: usize, va: F) {
        self.unary(res, arg, va, |a, out, _| {
            let inv = if a[0] == F::zero() {
                if a[1..].iter().any(|&t| t < F::zero()) {
                    F::nan()
                } else {
                    F::infinity()
                }
            } else {
                F::one() / a[0]
            };
            taylor_ln(a, inv, out);
        });
    }

    fn sqrt(&mut self, res: usize, arg: usize, va: F) {
        self.unary(res, arg, va, |a, out, _| {
            if a[0] == F::zero() {
                let fill = match leading_sign(&a[1..]) {
                    Some(true) => F::infinity(),
                    Some(false) => F::nan(),
                    None => F::zero(),
                };
                out.fill(fill);
            } else {
                taylor_sqrt(a, out);
            }
        });
    }

    fn pow(&mut self, res: usize, arg: usize, va: F, r: F) {
        self.unary(res, arg, va, |a, out, work| {
            if a[0] != F::zero() {
                taylor_pow_const(a, r, out);
            } else if r <= F::zero() {
                out.fill(F::nan());
            } else if r.fract() != F::zero() {
                taylor_pow_fractional_at_zero(r, out);
            } else if r == F::one() {
                out.copy_from_slice(a);
            } else {
                let n = r.to_u32().unwrap_or(u32::MAX);
                taylor_powi_mul(a, n, out, work);
            }
        });
    }

    fn sin_cos(&mut self, s: usize, c: usize, arg: usize, va: F) {
        for l in 0..self.t.p {
            self.t.load(arg, l, va, &mut self.s.a);
            taylor_sin_cos(&self.s.a, &mut self.s.c, &mut self.s.e);
            self.t.store(s, l, &self.s.c);
            self.t.store(c, l, &self.s.e);
        }
    }

    fn integrate(&mut self, res: usize, arg: usize, deriv: usize, va: F, vd: F) {
        self.binary(res, arg, deriv, va, vd, taylor_integrate);
    }

    /// Per direction: an all-zero direction stays zero; otherwise the first
    /// coefficient is `±inf` when the direction points into the domain and
    /// NaN when it leaves it, and higher coefficients are NaN.
    fn branch_point(&mut self, res: usize, arg: usize, op: OpCode, va: F) {
        let sign = if op == OpCode::Acos { -F::one() } else { F::one() };
        self.unary(res, arg, va, |a, out, _| {
            out.fill(F::zero());
            let Some(up) = leading_sign(&a[1..]) else {
                return;
            };
            let inward = if op == OpCode::Acosh { up } else { up != (a[0] > F::zero()) };
            out[1] = if inward { sign * F::infinity() } else { F::nan() };
            for c in out[2..].iter_mut() {
                *c = F::nan();
            }
        });
    }

    /// Each direction follows the argument that is smaller along it: by
    /// value, then by the first differing coefficient, then `a`.
    fn min(&mut self, res: usize, a: usize, b: usize, order: Option<Ordering>) -> Status {
        let d = self.t.d;
        for l in 0..self.t.p {
            let pick = match order.unwrap_or(Ordering::Equal) {
                Ordering::Less => a,
                Ordering::Greater => b,
                Ordering::Equal => {
                    let (ba, bb) = (self.t.at(a, l), self.t.at(b, l));
                    let first_diff = (0..d)
                        .map(|k| (self.t.buf[ba + k], self.t.buf[bb + k]))
                        .find(|(x, y)| x != y);
                    match first_diff {
                        Some((x, y)) if x > y => b,
                        _ => a,
                    }
                }
            };
            self.t.copy_dir(res, pick, l);
        }
        Status::Smooth
    }

    /// At a zero value each direction takes the sign of its first nonzero
    /// coefficient; doing so is reported as degenerate.
    fn abs(&mut self, res: usize, arg: usize, sign: Option<Ordering>) -> Status {
        let mut status = Status::Smooth;
        let d = self.t.d;
        let y = match sign {
            Some(Ordering::Less) => -F::one(),
            Some(Ordering::Greater) => F::one(),
            _ => F::zero(),
        };
        for l in 0..self.t.p {
            let (ba, br) = (self.t.at(arg, l), self.t.at(res, l));
            let mut x = y;
            for k in 0..d {
                let t = self.t.buf[ba + k];
                if x == F::zero() && t != F::zero() {
                    status = Status::Degenerate;
                    x = t.signum();
                }
                self.t.buf[br + k] = x * t;
            }
        }
        status
    }

    fn select(&mut self, res: usize, arg: usize, alt: Option<usize>, pick: Option<bool>) {
        match (pick, alt) {
            (Some(false), Some(b)) => self.copy(res, b),
            (Some(false), None) => {}
            _ => self.copy(res, arg),
        }
    }

    fn external(&mut self, call: ExternalCall<'_, F>) -> Status {
        let Some(f) = call.function else {
            return Status::Smooth;
        };
        let w = self.width();
        let gather = |series: &Series<F>, lo: usize, count: usize| -> Vec<F> {
            let start = series.block(lo).start;
            series.buf[start..start + count * w].to_vec()
        };
        let mut xt = gather(&self.t, call.x_lo, call.n);
        let mut yt = gather(&self.t, call.y_lo, call.m);
        let status = f.forward(call.x, &mut xt, call.y, &mut yt, w);
        let xs = self.t.block(call.x_lo).start;
        self.t.buf[xs..xs + xt.len()].copy_from_slice(&xt);
        let ys = self.t.block(call.y_lo).start;
        self.t.buf[ys..ys + yt.len()].copy_from_slice(&yt);
        status
    }

    fn snapshot(&self, loc: usize, degree: usize, out: &mut Vec<F>) {
        for l in 0..self.t.p {
            let base = self.t.at(loc, l);
            out.extend_from_slice(&self.t.buf[base..base + degree]);
        }
    }

    fn encode(&self, loc: usize, out: &mut Vec<u8>) {
        for &t in &self.t.buf[self.t.block(loc)] {
            out.extend_from_slice(&t.to_wire().to_le_bytes());
        }
    }

    fn decode(&mut self, loc: usize, entry: &mut ByteCursor<'_>) -> Result<(), FrameError> {
        let w = self.width();
        if entry.remaining() != w * 8 {
            return Err(FrameError::BadEntry {
                len: entry.remaining(),
            });
        }
        let start = self.t.block(loc).start;
        for k in 0..w {
            self.t.buf[start + k] = F::from_wire(entry.u64()?);
        }
        Ok(())
    }
}

// ══════════════════════════════════════════════
//  Entry points
// ══════════════════════════════════════════════

impl<'a, F: Float> SweepContext<'a, F> {
    #[allow(clippy::too_many_arguments)]
    fn taylor_sweep(
        self,
        m: usize,
        n: usize,
        mode: Mode,
        x: &[F],
        xs: &[F],
        y: Option<&mut [F]>,
        ys: Option<&mut [F]>,
    ) -> Outcome<F> {
        self.tape.check_counts(m, n);
        let w = mode.directions() * mode.degree();
        check_len("x", Some(x), n);
        check_len("input Taylor", Some(xs), n * w);
        check_len("y", y.as_deref(), m);
        check_len("output Taylor", ys.as_deref(), m * w);
        let lanes = TaylorLanes::new(self.tape.num_locations(), m, mode.directions(), mode.degree(), xs);
        let done = Engine::new(self, mode, lanes).run(Some(x), y);
        if let Some(ys) = ys {
            // Rows never exported keep whatever the caller left there.
            for j in (0..m).filter(|&j| done.lanes.exported[j]) {
                ys[j * w..(j + 1) * w].copy_from_slice(&done.lanes.outputs[j * w..(j + 1) * w]);
            }
        }
        Outcome {
            status: done.status,
            checkpoint: done.checkpoint,
        }
    }

    /// First-order scalar sweep: values and one directional derivative.
    ///
    /// `keep` may be 0, 1 or 2.
    #[allow(clippy::too_many_arguments)]
    pub fn fos_forward(
        self,
        m: usize,
        n: usize,
        keep: usize,
        x: &[F],
        xd: &[F],
        y: Option<&mut [F]>,
        yd: Option<&mut [F]>,
    ) -> Outcome<F> {
        let mode = Mode {
            order: Order::First,
            width: Width::Scalar,
            domain: Domain::Real,
            keep,
        };
        self.taylor_sweep(m, n, mode, x, xd, y, yd)
    }

    /// Higher-order scalar sweep: Taylor coefficients `1..=d` along one
    /// direction. `xs` and `ys` are `[variable][degree]`; `keep <= d + 1`.
    #[allow(clippy::too_many_arguments)]
    pub fn hos_forward(
        self,
        m: usize,
        n: usize,
        d: usize,
        keep: usize,
        x: &[F],
        xs: &[F],
        y: Option<&mut [F]>,
        ys: Option<&mut [F]>,
    ) -> Outcome<F> {
        let mode = Mode {
            order: Order::Higher(d),
            width: Width::Scalar,
            domain: Domain::Real,
            keep,
        };
        self.taylor_sweep(m, n, mode, x, xs, y, ys)
    }

    /// First-order vector sweep over `p` directions; `xs` is `[variable][direction]`.
    #[allow(clippy::too_many_arguments)]
    pub fn fov_forward(
        self,
        m: usize,
        n: usize,
        p: usize,
        x: &[F],
        xs: &[F],
        y: Option<&mut [F]>,
        ys: Option<&mut [F]>,
    ) -> Outcome<F> {
        let mode = Mode {
            order: Order::First,
            width: Width::Vector(p),
            domain: Domain::Real,
            keep: 0,
        };
        self.taylor_sweep(m, n, mode, x, xs, y, ys)
    }

    /// Higher-order vector sweep; `xs` is `[variable][direction][degree]`.
    #[allow(clippy::too_many_arguments)]
    pub fn hov_forward(
        self,
        m: usize,
        n: usize,
        d: usize,
        p: usize,
        x: &[F],
        xs: &[F],
        y: Option<&mut [F]>,
        ys: Option<&mut [F]>,
    ) -> Outcome<F> {
        self.hov_wk_forward(m, n, d, 0, p, x, xs, y, ys)
    }

    /// [`hov_forward`](Self::hov_forward) with checkpointing, `keep <= d + 1`.
    #[allow(clippy::too_many_arguments)]
    pub fn hov_wk_forward(
        self,
        m: usize,
        n: usize,
        d: usize,
        keep: usize,
        p: usize,
        x: &[F],
        xs: &[F],
        y: Option<&mut [F]>,
        ys: Option<&mut [F]>,
    ) -> Outcome<F> {
        let mode = Mode {
            order: Order::Higher(d),
            width: Width::Vector(p),
            domain: Domain::Real,
            keep,
        };
        self.taylor_sweep(m, n, mode, x, xs, y, ys)
    }
}
