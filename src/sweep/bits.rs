//! Bit-pattern lanes: `p` dependence words of `u64` per location.
//!
//! Bit `k` of word `w` at a location is set when the location depends on
//! the direction `64 * w + k` seeded by the caller. Every operation ORs the
//! words of its arguments. The only exceptions are constants, which clear,
//! and the tight-mode choices of `min` and conditional assignment.

use std::cmp::Ordering;

use crate::error::FrameError;
use crate::float::Float;
use crate::opcode::OpCode;
use crate::status::Status;
use crate::transport::{ByteCursor, FrameKind};

use super::engine::Engine;
use super::lanes::{ExternalCall, Lanes};
use super::{check_len, Domain, Mode, Order, Outcome, SweepContext, Width};

pub(super) struct BitLanes<'x> {
    p: usize,
    /// `[location][word]`
    words: Vec<u64>,
    inputs: &'x [u64],
    outputs: Vec<u64>,
    exported: Vec<bool>,
}

impl<'x> BitLanes<'x> {
    fn new(num_locations: usize, m: usize, p: usize, inputs: &'x [u64]) -> Self {
        BitLanes {
            p,
            words: vec![0; num_locations * p],
            inputs,
            outputs: vec![0; m * p],
            exported: vec![false; m],
        }
    }

    #[inline]
    fn at(&self, loc: usize) -> usize {
        loc * self.p
    }

    fn or(&mut self, res: usize, a: usize, b: usize) {
        let (ra, rb, rr) = (self.at(a), self.at(b), self.at(res));
        for w in 0..self.p {
            self.words[rr + w] = self.words[ra + w] | self.words[rb + w];
        }
    }

    fn copy(&mut self, res: usize, arg: usize) {
        if res != arg {
            let src = self.at(arg);
            let dst = self.at(res);
            self.words.copy_within(src..src + self.p, dst);
        }
    }

    /// `res |= arg`
    fn or_into(&mut self, res: usize, arg: usize) {
        self.or(res, res, arg);
    }

    fn any(&self, loc: usize) -> bool {
        let r = self.at(loc);
        self.words[r..r + self.p].iter().any(|&w| w != 0)
    }
}

impl<'x, F: Float> Lanes<F> for BitLanes<'x> {
    const FRAME: FrameKind = FrameKind::Bits;

    fn independent(&mut self, res: usize, i: usize) {
        let r = self.at(res);
        let p = self.p;
        self.words[r..r + p].copy_from_slice(&self.inputs[i * p..(i + 1) * p]);
    }

    fn dependent(&mut self, res: usize, j: usize) {
        let r = self.at(res);
        let p = self.p;
        self.outputs[j * p..(j + 1) * p].copy_from_slice(&self.words[r..r + p]);
        self.exported[j] = true;
    }

    fn clear(&mut self, res: usize) {
        let r = self.at(res);
        self.words[r..r + self.p].fill(0);
    }

    fn copy(&mut self, res: usize, arg: usize) {
        BitLanes::copy(self, res, arg);
    }

    fn negate(&mut self, res: usize, arg: usize) {
        self.copy(res, arg);
    }

    fn add(&mut self, res: usize, a: usize, b: usize) {
        self.or(res, a, b);
    }

    fn sub(&mut self, res: usize, a: usize, b: usize) {
        self.or(res, a, b);
    }

    fn scale(&mut self, res: usize, arg: usize, _c: F) {
        self.copy(res, arg);
    }

    fn mul(&mut self, res: usize, a: usize, b: usize, _va: F, _vb: F) {
        self.or(res, a, b);
    }

    fn mul_acc(&mut self, res: usize, a: usize, b: usize, _va: F, _vb: F, _subtract: bool) {
        self.or_into(res, a);
        self.or_into(res, b);
    }

    fn div(&mut self, res: usize, a: usize, b: usize, _va: F, _vb: F) {
        self.or(res, a, b);
    }

    fn const_div(&mut self, res: usize, arg: usize, _c: F, _va: F) {
        self.copy(res, arg);
    }

    fn exp(&mut self, res: usize, arg: usize, _va: F) {
        self.copy(res, arg);
    }

    fn log(&mut self, res: usize, arg: usize, _va: F) {
        self.copy(res, arg);
    }

    fn sqrt(&mut self, res: usize, arg: usize, _va: F) {
        self.copy(res, arg);
    }

    fn pow(&mut self, res: usize, arg: usize, _va: F, _c: F) {
        self.copy(res, arg);
    }

    fn sin_cos(&mut self, s: usize, c: usize, arg: usize, _va: F) {
        self.copy(s, arg);
        self.copy(c, arg);
    }

    fn integrate(&mut self, res: usize, arg: usize, _deriv: usize, _va: F, _vd: F) {
        self.copy(res, arg);
    }

    fn branch_point(&mut self, res: usize, arg: usize, _op: OpCode, _va: F) {
        self.copy(res, arg);
    }

    fn min(&mut self, res: usize, a: usize, b: usize, order: Option<Ordering>) -> Status {
        match order {
            Some(Ordering::Less) => self.copy(res, a),
            Some(Ordering::Greater) => self.copy(res, b),
            Some(Ordering::Equal) | None => self.or(res, a, b),
        }
        Status::Smooth
    }

    fn abs(&mut self, res: usize, arg: usize, sign: Option<Ordering>) -> Status {
        let status = if sign == Some(Ordering::Equal) && self.any(arg) {
            Status::Degenerate
        } else {
            Status::Smooth
        };
        self.copy(res, arg);
        status
    }

    fn select(&mut self, res: usize, arg: usize, alt: Option<usize>, pick: Option<bool>) {
        match (pick, alt) {
            (Some(true), _) => self.copy(res, arg),
            (Some(false), Some(b)) => self.copy(res, b),
            (Some(false), None) => {}
            (None, Some(b)) => self.or(res, arg, b),
            (None, None) => self.or_into(res, arg),
        }
    }

    /// Every output depends on every input.
    fn external(&mut self, call: ExternalCall<'_, F>) -> Status {
        let p = self.p;
        let mut union = vec![0u64; p];
        for loc in call.x_lo..call.x_lo + call.n {
            let r = self.at(loc);
            for (u, &w) in union.iter_mut().zip(&self.words[r..r + p]) {
                *u |= w;
            }
        }
        for loc in call.y_lo..call.y_lo + call.m {
            let r = self.at(loc);
            self.words[r..r + p].copy_from_slice(&union);
        }
        match call.function {
            Some(f) => f.evaluate(call.x, call.y),
            None => Status::Smooth,
        }
    }

    fn snapshot(&self, _loc: usize, _degree: usize, _out: &mut Vec<F>) {}

    fn encode(&self, loc: usize, out: &mut Vec<u8>) {
        let r = self.at(loc);
        for w in &self.words[r..r + self.p] {
            out.extend_from_slice(&w.to_le_bytes());
        }
    }

    fn decode(&mut self, loc: usize, entry: &mut ByteCursor<'_>) -> Result<(), FrameError> {
        if entry.remaining() != self.p * 8 {
            return Err(FrameError::BadEntry {
                len: entry.remaining(),
            });
        }
        let r = self.at(loc);
        for w in 0..self.p {
            self.words[r + w] = entry.u64()?;
        }
        Ok(())
    }
}

impl<'a, F: Float> SweepContext<'a, F> {
    #[allow(clippy::too_many_arguments)]
    fn bit_sweep(
        self,
        m: usize,
        n: usize,
        p: usize,
        tight: bool,
        x: Option<&[F]>,
        xs: &[u64],
        y: Option<&mut [F]>,
        ys: &mut [u64],
    ) -> Outcome<F> {
        self.tape.check_counts(m, n);
        assert!(p > 0, "bit-pattern sweep needs at least one word per location");
        check_len("x", x, n);
        check_len("input pattern", Some(xs), n * p);
        check_len("y", y.as_deref(), m);
        check_len("output pattern", Some(&*ys), m * p);
        let mode = Mode {
            order: Order::First,
            width: Width::Vector(p),
            domain: Domain::BitPattern { tight },
            keep: 0,
        };
        let lanes = BitLanes::new(self.tape.num_locations(), m, p, xs);
        let done = Engine::new(self, mode, lanes).run(x, y);
        for j in (0..m).filter(|&j| done.lanes.exported[j]) {
            ys[j * p..(j + 1) * p].copy_from_slice(&done.lanes.outputs[j * p..(j + 1) * p]);
        }
        Outcome {
            status: done.status,
            checkpoint: None,
        }
    }

    /// Dependence patterns evaluated at `x`: `min` and conditional
    /// assignments follow the branch actually taken.
    ///
    /// `xs` holds `p` seed words per independent, `ys` receives `p` words
    /// per dependent.
    #[allow(clippy::too_many_arguments)]
    pub fn int_forward_tight(
        self,
        m: usize,
        n: usize,
        p: usize,
        x: &[F],
        xs: &[u64],
        y: Option<&mut [F]>,
        ys: &mut [u64],
    ) -> Outcome<F> {
        self.bit_sweep(m, n, p, true, Some(x), xs, y, ys)
    }

    /// Dependence patterns valid at every point: both sides of each choice.
    pub fn int_forward_safe(self, m: usize, n: usize, p: usize, xs: &[u64], ys: &mut [u64]) -> Outcome<F> {
        self.bit_sweep(m, n, p, false, None, xs, None, ys)
    }
}
