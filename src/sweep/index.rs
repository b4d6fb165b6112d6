//! Index-domain lanes: sorted sets of independent indices per location.
//!
//! `indopro` sweeps return the set of each dependent, the Jacobian sparsity
//! row. `nonl_ind` sweeps additionally feed a [`NonlinearDomain`] with
//! every non-affine interaction and return its rows, one per independent.
//!
//! A result set is taken out of the buffer with `mem::take`, rebuilt from
//! the argument sets, and put back. Arguments aliasing the result are
//! handled before the take.

use std::cmp::Ordering;
use std::mem;

use crate::error::FrameError;
use crate::float::Float;
use crate::index_set::{IndexSet, NonlinearDomain};
use crate::opcode::OpCode;
use crate::status::Status;
use crate::transport::{ByteCursor, FrameKind};

use super::engine::Engine;
use super::lanes::{ExternalCall, Lanes};
use super::{check_len, Domain, IndexOutcome, Mode, Order, SweepContext, Width};

pub(super) struct IndexLanes {
    sets: Vec<IndexSet>,
    nonlinear: Option<NonlinearDomain>,
    outputs: Vec<IndexSet>,
}

impl IndexLanes {
    fn new(num_locations: usize, m: usize, nonlinear: Option<NonlinearDomain>) -> Self {
        IndexLanes {
            sets: vec![IndexSet::new(); num_locations],
            nonlinear,
            outputs: vec![IndexSet::new(); m],
        }
    }

    fn copy(&mut self, res: usize, arg: usize) {
        if res != arg {
            let mut r = mem::take(&mut self.sets[res]);
            r.copy_from(&self.sets[arg]);
            self.sets[res] = r;
        }
    }

    /// `res = a ∪ b`
    fn union(&mut self, res: usize, a: usize, b: usize) {
        match (res == a, res == b) {
            (true, true) => {}
            (true, false) => self.absorb(res, b),
            (false, true) => self.absorb(res, a),
            (false, false) => {
                let mut r = mem::take(&mut self.sets[res]);
                r.union_of(self.sets[a].as_slice(), self.sets[b].as_slice());
                self.sets[res] = r;
            }
        }
    }

    /// `res ∪= arg`
    fn absorb(&mut self, res: usize, arg: usize) {
        if res != arg {
            let mut r = mem::take(&mut self.sets[res]);
            r.union_with(self.sets[arg].as_slice());
            self.sets[res] = r;
        }
    }

    fn nonlinear_binary(&mut self, a: usize, b: usize) {
        if let Some(nl) = &mut self.nonlinear {
            nl.extend_binary(&self.sets[a], &self.sets[b]);
        }
    }

    fn nonlinear_unary(&mut self, arg: usize) {
        if let Some(nl) = &mut self.nonlinear {
            nl.extend_unary(&self.sets[arg]);
        }
    }

    /// Nonlinear unary: extend, then copy.
    fn unary(&mut self, res: usize, arg: usize) {
        self.nonlinear_unary(arg);
        self.copy(res, arg);
    }
}

impl<F: Float> Lanes<F> for IndexLanes {
    const FRAME: FrameKind = FrameKind::Indices;

    fn independent(&mut self, res: usize, i: usize) {
        self.sets[res].reset_to(i as u32);
    }

    fn dependent(&mut self, res: usize, j: usize) {
        self.outputs[j].copy_from(&self.sets[res]);
    }

    fn clear(&mut self, res: usize) {
        self.sets[res].clear();
    }

    fn copy(&mut self, res: usize, arg: usize) {
        IndexLanes::copy(self, res, arg);
    }

    fn negate(&mut self, res: usize, arg: usize) {
        self.copy(res, arg);
    }

    fn add(&mut self, res: usize, a: usize, b: usize) {
        self.union(res, a, b);
    }

    fn sub(&mut self, res: usize, a: usize, b: usize) {
        self.union(res, a, b);
    }

    fn scale(&mut self, res: usize, arg: usize, _c: F) {
        self.copy(res, arg);
    }

    fn mul(&mut self, res: usize, a: usize, b: usize, _va: F, _vb: F) {
        self.nonlinear_binary(a, b);
        self.union(res, a, b);
    }

    fn mul_acc(&mut self, res: usize, a: usize, b: usize, _va: F, _vb: F, _subtract: bool) {
        self.nonlinear_binary(a, b);
        self.absorb(res, a);
        self.absorb(res, b);
    }

    fn div(&mut self, res: usize, a: usize, b: usize, _va: F, _vb: F) {
        self.nonlinear_binary(a, b);
        self.nonlinear_unary(b);
        self.union(res, a, b);
    }

    fn const_div(&mut self, res: usize, arg: usize, _c: F, _va: F) {
        self.unary(res, arg);
    }

    fn exp(&mut self, res: usize, arg: usize, _va: F) {
        self.unary(res, arg);
    }

    fn log(&mut self, res: usize, arg: usize, _va: F) {
        self.unary(res, arg);
    }

    fn sqrt(&mut self, res: usize, arg: usize, _va: F) {
        self.unary(res, arg);
    }

    fn pow(&mut self, res: usize, arg: usize, _va: F, _c: F) {
        self.unary(res, arg);
    }

    fn sin_cos(&mut self, s: usize, c: usize, arg: usize, _va: F) {
        self.nonlinear_unary(arg);
        self.copy(s, arg);
        self.copy(c, arg);
    }

    fn integrate(&mut self, res: usize, arg: usize, _deriv: usize, _va: F, _vd: F) {
        self.unary(res, arg);
    }

    fn branch_point(&mut self, res: usize, arg: usize, _op: OpCode, _va: F) {
        self.unary(res, arg);
    }

    fn min(&mut self, res: usize, a: usize, b: usize, order: Option<Ordering>) -> Status {
        match order {
            Some(Ordering::Less) => self.copy(res, a),
            Some(Ordering::Greater) => self.copy(res, b),
            Some(Ordering::Equal) | None => self.union(res, a, b),
        }
        Status::Smooth
    }

    fn abs(&mut self, res: usize, arg: usize, sign: Option<Ordering>) -> Status {
        let status = if sign == Some(Ordering::Equal) && !self.sets[arg].is_empty() {
            Status::Degenerate
        } else {
            Status::Smooth
        };
        self.copy(res, arg);
        status
    }

    /// The two-sided form always keeps both branches; the one-sided form
    /// follows the condition when it is known.
    fn select(&mut self, res: usize, arg: usize, alt: Option<usize>, pick: Option<bool>) {
        match (alt, pick) {
            (Some(b), _) => self.union(res, arg, b),
            (None, Some(true)) => self.copy(res, arg),
            (None, Some(false)) => {}
            (None, None) => self.absorb(res, arg),
        }
    }

    /// Every output depends on every input, nonlinearly.
    fn external(&mut self, call: ExternalCall<'_, F>) -> Status {
        let mut all = IndexSet::new();
        for loc in call.x_lo..call.x_lo + call.n {
            all.union_with(self.sets[loc].as_slice());
        }
        if let Some(nl) = &mut self.nonlinear {
            nl.extend_unary(&all);
        }
        for loc in call.y_lo..call.y_lo + call.m {
            self.sets[loc].copy_from(&all);
        }
        match call.function {
            Some(f) => f.evaluate(call.x, call.y),
            None => Status::Smooth,
        }
    }

    fn snapshot(&self, _loc: usize, _degree: usize, _out: &mut Vec<F>) {}

    fn encode(&self, loc: usize, out: &mut Vec<u8>) {
        let set = &self.sets[loc];
        out.extend_from_slice(&(set.len() as u32).to_le_bytes());
        for i in set.iter() {
            out.extend_from_slice(&i.to_le_bytes());
        }
    }

    fn decode(&mut self, loc: usize, entry: &mut ByteCursor<'_>) -> Result<(), FrameError> {
        let count = entry.u32()? as usize;
        if entry.remaining() != count * 4 {
            return Err(FrameError::BadEntry {
                len: entry.remaining() + 4,
            });
        }
        let mut indices = Vec::with_capacity(count);
        for _ in 0..count {
            indices.push(entry.u32()?);
        }
        self.sets[loc] = IndexSet::from_indices(indices);
        Ok(())
    }
}

impl<'a, F: Float> SweepContext<'a, F> {
    fn index_sweep(self, m: usize, n: usize, x: Option<&[F]>, nonlinear: bool) -> IndexOutcome {
        self.tape.check_counts(m, n);
        check_len("x", x, n);
        let mode = Mode {
            order: Order::First,
            width: Width::Scalar,
            domain: Domain::IndexSet {
                tight: x.is_some(),
                nonlinear,
            },
            keep: 0,
        };
        let domain = nonlinear.then(|| NonlinearDomain::new(n, self.options.index_capacity));
        let lanes = IndexLanes::new(self.tape.num_locations(), m, domain);
        let done = Engine::new(self, mode, lanes).run(x, None);
        let rows = match done.lanes.nonlinear {
            Some(nl) => nl.into_rows(),
            None => done.lanes.outputs,
        };
        IndexOutcome {
            status: done.status,
            rows,
        }
    }

    /// Jacobian sparsity at `x`: one sorted row of independent indices per
    /// dependent. `min` and one-sided conditional assignments follow the
    /// branch taken at `x`.
    pub fn indopro_forward_tight(self, m: usize, n: usize, x: &[F]) -> IndexOutcome {
        self.index_sweep(m, n, Some(x), false)
    }

    /// Jacobian sparsity valid at every point.
    pub fn indopro_forward_safe(self, m: usize, n: usize) -> IndexOutcome {
        self.index_sweep(m, n, None, false)
    }

    /// Nonlinear interaction domains at `x`: row `i` holds every `j` such
    /// that the tape is not affine in `(x_i, x_j)`.
    pub fn nonl_ind_forward_tight(self, m: usize, n: usize, x: &[F]) -> IndexOutcome {
        self.index_sweep(m, n, Some(x), true)
    }

    /// Nonlinear interaction domains valid at every point.
    pub fn nonl_ind_forward_safe(self, m: usize, n: usize) -> IndexOutcome {
        self.index_sweep(m, n, None, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_handles_aliased_result() {
        let mut lanes = IndexLanes::new(3, 0, None);
        lanes.sets[0] = IndexSet::from_indices(vec![0, 2]);
        lanes.sets[1] = IndexSet::from_indices(vec![1]);
        lanes.union(0, 0, 1);
        assert_eq!(lanes.sets[0].as_slice(), &[0, 1, 2]);
        lanes.union(2, 1, 1);
        assert_eq!(lanes.sets[2].as_slice(), &[1]);
    }

    #[test]
    fn product_feeds_both_rows() {
        let mut lanes = IndexLanes::new(3, 0, Some(NonlinearDomain::new(2, 4)));
        lanes.sets[0] = IndexSet::singleton(0);
        lanes.sets[1] = IndexSet::singleton(1);
        Lanes::<f64>::mul(&mut lanes, 2, 0, 1, 1.0, 1.0);
        let rows = lanes.nonlinear.take().map(NonlinearDomain::into_rows).unwrap();
        assert_eq!(rows[0].as_slice(), &[1]);
        assert_eq!(rows[1].as_slice(), &[0]);
        assert_eq!(lanes.sets[2].as_slice(), &[0, 1]);
    }
}
