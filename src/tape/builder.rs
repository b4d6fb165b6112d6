use crate::external::ExternalFunction;
use crate::float::Float;
use crate::opcode::OpCode;

use super::{Tape, TapeStats};

/// A location on a tape under construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Slot(pub(crate) u32);

impl Slot {
    /// Raw location index.
    #[inline]
    pub fn location(self) -> u32 {
        self.0
    }
}

/// Assembles tapes instruction by instruction.
///
/// The builder evaluates every operation as it records it, so the branch
/// flags of nonsmooth and comparison opcodes reflect the recording point,
/// exactly like an operator-overloading recorder would. Each result gets a
/// fresh slot unless [`overwrite`](Self::overwrite) redirects it.
pub struct TapeBuilder<F: Float> {
    opcodes: Vec<u8>,
    locations: Vec<u32>,
    values: Vec<F>,
    current: Vec<F>,
    overwrite: Option<u32>,
}

impl<F: Float> Default for TapeBuilder<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: Float> TapeBuilder<F> {
    pub fn new() -> Self {
        let mut b = TapeBuilder {
            opcodes: Vec::new(),
            locations: Vec::new(),
            values: Vec::new(),
            current: Vec::new(),
            overwrite: None,
        };
        b.opcodes.push(OpCode::StartOfTape as u8);
        b
    }

    /// Value of `s` at the recording point.
    pub fn value(&self, s: Slot) -> F {
        self.current[s.0 as usize]
    }

    /// Number of slots allocated so far.
    pub fn num_locations(&self) -> usize {
        self.current.len()
    }

    /// Write the next result into `s` instead of a fresh slot.
    pub fn overwrite(&mut self, s: Slot) -> &mut Self {
        self.overwrite = Some(s.0);
        self
    }

    /// Append a raw instruction. No value tracking, no checks.
    pub fn emit(&mut self, op: OpCode, locations: &[u32], values: &[F]) {
        self.opcodes.push(op as u8);
        self.locations.extend_from_slice(locations);
        self.values.extend_from_slice(values);
    }

    /// Reserve `n` slots with no instruction. Raw tapes use this to size
    /// the location space.
    pub fn reserve(&mut self, n: usize) -> Vec<Slot> {
        (0..n).map(|_| self.fresh(F::nan())).collect()
    }

    fn fresh(&mut self, v: F) -> Slot {
        self.current.push(v);
        Slot((self.current.len() - 1) as u32)
    }

    fn result(&mut self, v: F) -> Slot {
        match self.overwrite.take() {
            Some(loc) => {
                self.current[loc as usize] = v;
                Slot(loc)
            }
            None => self.fresh(v),
        }
    }

    fn set(&mut self, s: Slot, v: F) {
        self.current[s.0 as usize] = v;
    }

    // ── Structural ──

    pub fn independent(&mut self, x: F) -> Slot {
        let s = self.result(x);
        self.emit(OpCode::AssignInd, &[s.0], &[]);
        s
    }

    pub fn dependent(&mut self, s: Slot) {
        self.emit(OpCode::AssignDep, &[s.0], &[]);
    }

    pub fn constant(&mut self, c: F) -> Slot {
        let s = self.result(c);
        if c == F::zero() {
            self.emit(OpCode::AssignZero, &[s.0], &[]);
        } else if c == F::one() {
            self.emit(OpCode::AssignOne, &[s.0], &[]);
        } else {
            self.emit(OpCode::AssignConst, &[s.0], &[c]);
        }
        s
    }

    pub fn copy(&mut self, a: Slot) -> Slot {
        let s = self.result(self.value(a));
        self.emit(OpCode::Assign, &[a.0, s.0], &[]);
        s
    }

    /// `res = a` into an existing slot.
    pub fn assign(&mut self, res: Slot, a: Slot) {
        self.set(res, self.value(a));
        self.emit(OpCode::Assign, &[a.0, res.0], &[]);
    }

    pub fn assign_const(&mut self, res: Slot, c: F) {
        self.set(res, c);
        self.emit(OpCode::AssignConst, &[res.0], &[c]);
    }

    /// Consecutive constants, one instruction.
    pub fn take_stock(&mut self, cs: &[F]) -> Vec<Slot> {
        let slots: Vec<Slot> = cs.iter().map(|&c| self.fresh(c)).collect();
        let first = slots.first().map_or(self.current.len() as u32, |s| s.0);
        self.emit(OpCode::TakeStock, &[cs.len() as u32, first], cs);
        slots
    }

    /// Mark `first..=last` as dead.
    pub fn death_not(&mut self, first: Slot, last: Slot) {
        self.emit(OpCode::DeathNot, &[first.0, last.0], &[]);
    }

    // ── Arithmetic ──

    fn binary(&mut self, op: OpCode, a: Slot, b: Slot, v: F) -> Slot {
        let s = self.result(v);
        self.emit(op, &[a.0, b.0, s.0], &[]);
        s
    }

    fn with_const(&mut self, op: OpCode, a: Slot, c: F, v: F) -> Slot {
        let s = self.result(v);
        self.emit(op, &[a.0, s.0], &[c]);
        s
    }

    fn unary(&mut self, op: OpCode, a: Slot, v: F) -> Slot {
        let s = self.result(v);
        self.emit(op, &[a.0, s.0], &[]);
        s
    }

    pub fn add(&mut self, a: Slot, b: Slot) -> Slot {
        self.binary(OpCode::Add, a, b, self.value(a) + self.value(b))
    }

    pub fn sub(&mut self, a: Slot, b: Slot) -> Slot {
        self.binary(OpCode::Sub, a, b, self.value(a) - self.value(b))
    }

    pub fn mul(&mut self, a: Slot, b: Slot) -> Slot {
        self.binary(OpCode::Mul, a, b, self.value(a) * self.value(b))
    }

    pub fn div(&mut self, a: Slot, b: Slot) -> Slot {
        self.binary(OpCode::Div, a, b, self.value(a) / self.value(b))
    }

    /// `c + a`
    pub fn add_const(&mut self, a: Slot, c: F) -> Slot {
        self.with_const(OpCode::AddConst, a, c, c + self.value(a))
    }

    /// `c - a`
    pub fn sub_from_const(&mut self, c: F, a: Slot) -> Slot {
        self.with_const(OpCode::SubFromConst, a, c, c - self.value(a))
    }

    /// `c * a`
    pub fn mul_const(&mut self, a: Slot, c: F) -> Slot {
        self.with_const(OpCode::MulConst, a, c, c * self.value(a))
    }

    /// `c / a`
    pub fn const_div(&mut self, c: F, a: Slot) -> Slot {
        self.with_const(OpCode::ConstDiv, a, c, c / self.value(a))
    }

    pub fn neg(&mut self, a: Slot) -> Slot {
        self.unary(OpCode::Neg, a, -self.value(a))
    }

    pub fn pos(&mut self, a: Slot) -> Slot {
        self.unary(OpCode::Pos, a, self.value(a))
    }

    // ── In-place ──

    pub fn add_assign(&mut self, res: Slot, a: Slot) {
        self.set(res, self.value(res) + self.value(a));
        self.emit(OpCode::EqPlus, &[a.0, res.0], &[]);
    }

    pub fn sub_assign(&mut self, res: Slot, a: Slot) {
        self.set(res, self.value(res) - self.value(a));
        self.emit(OpCode::EqMinus, &[a.0, res.0], &[]);
    }

    pub fn mul_assign(&mut self, res: Slot, a: Slot) {
        self.set(res, self.value(res) * self.value(a));
        self.emit(OpCode::EqMult, &[a.0, res.0], &[]);
    }

    pub fn add_assign_const(&mut self, res: Slot, c: F) {
        self.set(res, self.value(res) + c);
        self.emit(OpCode::EqPlusConst, &[res.0], &[c]);
    }

    pub fn sub_assign_const(&mut self, res: Slot, c: F) {
        self.set(res, self.value(res) - c);
        self.emit(OpCode::EqMinusConst, &[res.0], &[c]);
    }

    pub fn mul_assign_const(&mut self, res: Slot, c: F) {
        self.set(res, self.value(res) * c);
        self.emit(OpCode::EqMultConst, &[res.0], &[c]);
    }

    pub fn incr(&mut self, res: Slot) {
        self.set(res, self.value(res) + F::one());
        self.emit(OpCode::Incr, &[res.0], &[]);
    }

    pub fn decr(&mut self, res: Slot) {
        self.set(res, self.value(res) - F::one());
        self.emit(OpCode::Decr, &[res.0], &[]);
    }

    /// `res += a * b`
    pub fn add_product(&mut self, res: Slot, a: Slot, b: Slot) {
        self.set(res, self.value(res) + self.value(a) * self.value(b));
        self.emit(OpCode::EqPlusProd, &[a.0, b.0, res.0], &[]);
    }

    /// `res -= a * b`
    pub fn sub_product(&mut self, res: Slot, a: Slot, b: Slot) {
        self.set(res, self.value(res) - self.value(a) * self.value(b));
        self.emit(OpCode::EqMinusProd, &[a.0, b.0, res.0], &[]);
    }

    // ── Elementary functions ──

    pub fn exp(&mut self, a: Slot) -> Slot {
        self.unary(OpCode::Exp, a, self.value(a).exp())
    }

    pub fn ln(&mut self, a: Slot) -> Slot {
        self.unary(OpCode::Log, a, self.value(a).ln())
    }

    pub fn sqrt(&mut self, a: Slot) -> Slot {
        self.unary(OpCode::Sqrt, a, self.value(a).sqrt())
    }

    /// `a^c` with a constant exponent.
    pub fn powf(&mut self, a: Slot, c: F) -> Slot {
        self.with_const(OpCode::PowConst, a, c, self.value(a).powf(c))
    }

    pub fn sin(&mut self, a: Slot) -> Slot {
        let (s, c) = self.value(a).sin_cos();
        let co = self.fresh(c);
        let res = self.result(s);
        self.emit(OpCode::Sin, &[a.0, co.0, res.0], &[]);
        res
    }

    pub fn cos(&mut self, a: Slot) -> Slot {
        let (s, c) = self.value(a).sin_cos();
        let co = self.fresh(s);
        let res = self.result(c);
        self.emit(OpCode::Cos, &[a.0, co.0, res.0], &[]);
        res
    }

    /// Record `op` whose derivative series is produced by `prelude`.
    fn via_derivative(
        &mut self,
        op: OpCode,
        a: Slot,
        v: F,
        prelude: impl FnOnce(&mut Self, Slot) -> Slot,
    ) -> Slot {
        let pending = self.overwrite.take();
        let deriv = prelude(self, a);
        self.overwrite = pending;
        self.binary(op, a, deriv, v)
    }

    pub fn atan(&mut self, a: Slot) -> Slot {
        let v = self.value(a).atan();
        self.via_derivative(OpCode::Atan, a, v, |b, a| {
            let sq = b.mul(a, a);
            let den = b.add_const(sq, F::one());
            b.const_div(F::one(), den)
        })
    }

    pub fn asin(&mut self, a: Slot) -> Slot {
        let v = self.value(a).asin();
        self.via_derivative(OpCode::Asin, a, v, |b, a| {
            let root = b.one_minus_square_root(a);
            b.const_div(F::one(), root)
        })
    }

    pub fn acos(&mut self, a: Slot) -> Slot {
        let v = self.value(a).acos();
        self.via_derivative(OpCode::Acos, a, v, |b, a| {
            let root = b.one_minus_square_root(a);
            b.const_div(-F::one(), root)
        })
    }

    pub fn asinh(&mut self, a: Slot) -> Slot {
        let v = self.value(a).asinh();
        self.via_derivative(OpCode::Asinh, a, v, |b, a| {
            let sq = b.mul(a, a);
            let sum = b.add_const(sq, F::one());
            let root = b.sqrt(sum);
            b.const_div(F::one(), root)
        })
    }

    pub fn acosh(&mut self, a: Slot) -> Slot {
        let v = self.value(a).acosh();
        self.via_derivative(OpCode::Acosh, a, v, |b, a| {
            let sq = b.mul(a, a);
            let diff = b.add_const(sq, -F::one());
            let root = b.sqrt(diff);
            b.const_div(F::one(), root)
        })
    }

    pub fn atanh(&mut self, a: Slot) -> Slot {
        let v = self.value(a).atanh();
        self.via_derivative(OpCode::Atanh, a, v, |b, a| {
            let sq = b.mul(a, a);
            let den = b.sub_from_const(F::one(), sq);
            b.const_div(F::one(), den)
        })
    }

    pub fn erf(&mut self, a: Slot) -> Slot {
        let v = Float::erf(self.value(a));
        self.via_derivative(OpCode::Erf, a, v, |b, a| {
            let sq = b.mul(a, a);
            let neg = b.neg(sq);
            let e = b.exp(neg);
            b.mul_const(e, F::FRAC_2_SQRT_PI())
        })
    }

    fn one_minus_square_root(&mut self, a: Slot) -> Slot {
        let sq = self.mul(a, a);
        let diff = self.sub_from_const(F::one(), sq);
        self.sqrt(diff)
    }

    /// Recorded quadrature: `res` takes `value`, its derivative series is
    /// the integral of `deriv` along `arg`.
    pub fn gen_quad(&mut self, arg: Slot, deriv: Slot, value: F) -> Slot {
        let check = self.value(arg);
        let s = self.result(value);
        self.emit(OpCode::GenQuad, &[arg.0, deriv.0, s.0], &[check, value]);
        s
    }

    // ── Nonsmooth ──

    pub fn min(&mut self, a: Slot, b: Slot) -> Slot {
        let (va, vb) = (self.value(a), self.value(b));
        let flag = if va < vb { F::one() } else { F::zero() };
        let s = self.result(va.min(vb));
        self.emit(OpCode::Min, &[a.0, b.0, s.0], &[flag]);
        s
    }

    /// `max(a, b) = -min(-a, -b)`
    pub fn max(&mut self, a: Slot, b: Slot) -> Slot {
        let pending = self.overwrite.take();
        let na = self.neg(a);
        let nb = self.neg(b);
        let m = self.min(na, nb);
        self.overwrite = pending;
        self.neg(m)
    }

    pub fn abs(&mut self, a: Slot) -> Slot {
        let va = self.value(a);
        let flag = if va > F::zero() { F::one() } else { F::zero() };
        let s = self.result(va.abs());
        self.emit(OpCode::Abs, &[a.0, s.0], &[flag]);
        s
    }

    pub fn ceil(&mut self, a: Slot) -> Slot {
        let v = self.value(a).ceil();
        self.with_const(OpCode::Ceil, a, v, v)
    }

    pub fn floor(&mut self, a: Slot) -> Slot {
        let v = self.value(a).floor();
        self.with_const(OpCode::Floor, a, v, v)
    }

    /// `cond > 0 ? a : b`
    pub fn cond_assign(&mut self, cond: Slot, a: Slot, b: Slot) -> Slot {
        let vc = self.value(cond);
        let v = if vc > F::zero() { self.value(a) } else { self.value(b) };
        let s = self.result(v);
        self.emit(OpCode::CondAssign, &[cond.0, a.0, b.0, s.0], &[vc]);
        s
    }

    /// `if cond > 0 { res = a }`
    pub fn cond_assign_into(&mut self, res: Slot, cond: Slot, a: Slot) {
        let vc = self.value(cond);
        if vc > F::zero() {
            self.set(res, self.value(a));
        }
        self.emit(OpCode::CondAssignS, &[cond.0, a.0, res.0], &[vc]);
    }

    /// Record the sign of `a` at the recording point as a branch check.
    pub fn branch_on_sign(&mut self, a: Slot) -> OpCode {
        let v = self.value(a);
        let op = if v > F::zero() {
            OpCode::GtZero
        } else if v < F::zero() {
            OpCode::LtZero
        } else {
            OpCode::EqZero
        };
        self.emit(op, &[a.0], &[]);
        op
    }

    /// Record an explicit branch check.
    pub fn compare(&mut self, op: OpCode, a: Slot) {
        assert!(op.is_comparison(), "{op:?} is not a branch check");
        self.emit(op, &[a.0], &[]);
    }

    // ── Extension points ──

    /// Copy `inputs` into a contiguous block, allocate `m` contiguous
    /// outputs and record an [`OpCode::ExtDiff`] call to `index`.
    pub fn external(
        &mut self,
        index: usize,
        f: &mut dyn ExternalFunction<F>,
        inputs: &[Slot],
        m: usize,
    ) -> Vec<Slot> {
        let mut x: Vec<F> = inputs.iter().map(|&s| self.value(s)).collect();
        let xs: Vec<Slot> = x.iter().map(|&v| self.fresh(v)).collect();
        for (&src, &dst) in inputs.iter().zip(xs.iter()) {
            self.emit(OpCode::Assign, &[src.0, dst.0], &[]);
        }
        let mut y = vec![F::zero(); m];
        f.evaluate(&mut x, &mut y);
        for (&s, &v) in xs.iter().zip(x.iter()) {
            self.set(s, v);
        }
        let ys: Vec<Slot> = y.iter().map(|&v| self.fresh(v)).collect();
        let x_lo = xs.first().map_or(0, |s| s.0);
        let y_lo = ys.first().map_or(0, |s| s.0);
        self.emit(
            OpCode::ExtDiff,
            &[index as u32, inputs.len() as u32, m as u32, x_lo, y_lo],
            &[],
        );
        ys
    }

    pub fn send(&mut self, slots: &[Slot], peer: usize, tag: u32) {
        self.counted(OpCode::Send, slots);
        self.locations.extend_from_slice(&[peer as u32, tag]);
    }

    /// Receive `count` fresh slots. Their recording-point values are unknown (NaN).
    pub fn receive(&mut self, count: usize, peer: usize, tag: u32) -> Vec<Slot> {
        let slots = self.reserve(count);
        self.counted(OpCode::Receive, &slots);
        self.locations.extend_from_slice(&[peer as u32, tag]);
        slots
    }

    /// Broadcast `slots` from `root`; on other ranks they are overwritten.
    pub fn broadcast(&mut self, slots: &[Slot], root: usize) {
        self.counted(OpCode::Broadcast, slots);
        self.locations.push(root as u32);
    }

    /// Gather `slots` from every rank into `rcount` fresh slots on `root`.
    pub fn gather(&mut self, slots: &[Slot], root: usize, rcount: usize) -> Vec<Slot> {
        let recv = self.reserve(rcount);
        self.counted(OpCode::Gather, slots);
        self.locations.push(root as u32);
        self.locations.push(rcount as u32);
        self.locations.extend(recv.iter().map(|s| s.0));
        recv
    }

    /// Scatter `slots` (meaningful on `root`) into `rcount` fresh slots per rank.
    pub fn scatter(&mut self, root: usize, slots: &[Slot], rcount: usize) -> Vec<Slot> {
        let recv = self.reserve(rcount);
        self.opcodes.push(OpCode::Scatter as u8);
        self.locations.push(root as u32);
        self.locations.push(slots.len() as u32);
        self.locations.extend(slots.iter().map(|s| s.0));
        self.locations.push(rcount as u32);
        self.locations.extend(recv.iter().map(|s| s.0));
        recv
    }

    pub fn barrier(&mut self) {
        self.emit(OpCode::Barrier, &[], &[]);
    }

    fn counted(&mut self, op: OpCode, slots: &[Slot]) {
        self.opcodes.push(op as u8);
        self.locations.push(slots.len() as u32);
        self.locations.extend(slots.iter().map(|s| s.0));
    }

    /// Close the tape.
    pub fn finish(mut self) -> Tape<F> {
        self.opcodes.push(OpCode::EndOfTape as u8);
        let count = |op: OpCode| self.opcodes.iter().filter(|&&b| b == op as u8).count();
        let stats = TapeStats {
            num_independents: count(OpCode::AssignInd),
            num_dependents: count(OpCode::AssignDep),
            num_locations: self.current.len(),
            num_operations: self.opcodes.len(),
            num_values: self.values.len(),
        };
        let tape = Tape {
            opcodes: self.opcodes,
            locations: self.locations,
            values: self.values,
            stats,
        };
        if let Err(err) = tape.validate() {
            panic!("recorded tape is malformed: {err}");
        }
        tape
    }
}
