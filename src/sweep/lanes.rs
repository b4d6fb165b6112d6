//! The seam between the interpreter and what it propagates.
//!
//! The engine owns the tape cursor, the zero-order values, the status fold
//! and the checkpoint log. Everything else an opcode does (Taylor
//! recurrences, dependence bits, index-set unions) goes through [`Lanes`].
//! Arguments are passed by location together with the zero-order values the
//! recurrences need; implementations must read every argument before they
//! write `res`, since `res` may alias an argument.

use std::cmp::Ordering;

use crate::error::FrameError;
use crate::external::ExternalFunction;
use crate::float::Float;
use crate::opcode::OpCode;
use crate::status::Status;
use crate::transport::{ByteCursor, FrameKind};

/// One external-function call, as seen by the lanes.
pub(super) struct ExternalCall<'e, F: Float> {
    /// `None` in modes that do not evaluate values.
    pub function: Option<&'e mut (dyn ExternalFunction<F> + 'static)>,
    pub x_lo: usize,
    pub n: usize,
    pub y_lo: usize,
    pub m: usize,
    /// Argument values, updated in place by the call (empty when `function` is `None`).
    pub x: &'e mut [F],
    pub y: &'e mut [F],
}

pub(super) trait Lanes<F: Float> {
    const FRAME: FrameKind;

    fn independent(&mut self, res: usize, i: usize);
    fn dependent(&mut self, res: usize, j: usize);

    /// Constant result: no dependence, zero derivatives.
    fn clear(&mut self, res: usize);
    fn copy(&mut self, res: usize, arg: usize);
    fn negate(&mut self, res: usize, arg: usize);
    fn add(&mut self, res: usize, a: usize, b: usize);
    fn sub(&mut self, res: usize, a: usize, b: usize);
    fn scale(&mut self, res: usize, arg: usize, c: F);

    fn mul(&mut self, res: usize, a: usize, b: usize, va: F, vb: F);
    /// `res ±= a * b`
    fn mul_acc(&mut self, res: usize, a: usize, b: usize, va: F, vb: F, subtract: bool);
    fn div(&mut self, res: usize, a: usize, b: usize, va: F, vb: F);
    /// `res = c / arg`
    fn const_div(&mut self, res: usize, arg: usize, c: F, va: F);

    fn exp(&mut self, res: usize, arg: usize, va: F);
    fn log(&mut self, res: usize, arg: usize, va: F);
    fn sqrt(&mut self, res: usize, arg: usize, va: F);
    fn pow(&mut self, res: usize, arg: usize, va: F, c: F);
    fn sin_cos(&mut self, s: usize, c: usize, arg: usize, va: F);

    /// `res' = deriv · arg'`, with `deriv` already a series on the tape.
    fn integrate(&mut self, res: usize, arg: usize, deriv: usize, va: F, vd: F);
    /// `op` evaluated exactly at one of its branch points `va`.
    fn branch_point(&mut self, res: usize, arg: usize, op: OpCode, va: F);

    /// `order` compares the two argument values (`None` when values are not tracked).
    fn min(&mut self, res: usize, a: usize, b: usize, order: Option<Ordering>) -> Status;
    /// `sign` compares the argument value with zero.
    fn abs(&mut self, res: usize, arg: usize, sign: Option<Ordering>) -> Status;
    /// Conditional assignment. `alt` is `None` for the one-sided form, where
    /// `res` keeps its content unless `arg` is picked. `pick` is `None`
    /// when the condition is not evaluated.
    fn select(&mut self, res: usize, arg: usize, alt: Option<usize>, pick: Option<bool>);

    fn external(&mut self, call: ExternalCall<'_, F>) -> Status;

    /// Append the first `degree` coefficients of every direction at `loc`.
    fn snapshot(&self, loc: usize, degree: usize, out: &mut Vec<F>);

    /// Append the lane payload of `loc` (after the value).
    fn encode(&self, loc: usize, out: &mut Vec<u8>);
    fn decode(&mut self, loc: usize, entry: &mut ByteCursor<'_>) -> Result<(), FrameError>;
}

/// Lane kind of zero-order sweeps: nothing beyond the values.
pub(super) struct NoLanes;

impl<F: Float> Lanes<F> for NoLanes {
    const FRAME: FrameKind = FrameKind::Values;

    fn independent(&mut self, _res: usize, _i: usize) {}
    fn dependent(&mut self, _res: usize, _j: usize) {}
    fn clear(&mut self, _res: usize) {}
    fn copy(&mut self, _res: usize, _arg: usize) {}
    fn negate(&mut self, _res: usize, _arg: usize) {}
    fn add(&mut self, _res: usize, _a: usize, _b: usize) {}
    fn sub(&mut self, _res: usize, _a: usize, _b: usize) {}
    fn scale(&mut self, _res: usize, _arg: usize, _c: F) {}
    fn mul(&mut self, _res: usize, _a: usize, _b: usize, _va: F, _vb: F) {}
    fn mul_acc(&mut self, _res: usize, _a: usize, _b: usize, _va: F, _vb: F, _subtract: bool) {}
    fn div(&mut self, _res: usize, _a: usize, _b: usize, _va: F, _vb: F) {}
    fn const_div(&mut self, _res: usize, _arg: usize, _c: F, _va: F) {}
    fn exp(&mut self, _res: usize, _arg: usize, _va: F) {}
    fn log(&mut self, _res: usize, _arg: usize, _va: F) {}
    fn sqrt(&mut self, _res: usize, _arg: usize, _va: F) {}
    fn pow(&mut self, _res: usize, _arg: usize, _va: F, _c: F) {}
    fn sin_cos(&mut self, _s: usize, _c: usize, _arg: usize, _va: F) {}
    fn integrate(&mut self, _res: usize, _arg: usize, _deriv: usize, _va: F, _vd: F) {}
    fn branch_point(&mut self, _res: usize, _arg: usize, _op: OpCode, _va: F) {}

    fn min(&mut self, _res: usize, _a: usize, _b: usize, _order: Option<Ordering>) -> Status {
        Status::Smooth
    }

    fn abs(&mut self, _res: usize, _arg: usize, _sign: Option<Ordering>) -> Status {
        Status::Smooth
    }

    fn select(&mut self, _res: usize, _arg: usize, _alt: Option<usize>, _pick: Option<bool>) {}

    fn external(&mut self, call: ExternalCall<'_, F>) -> Status {
        match call.function {
            Some(f) => f.evaluate(call.x, call.y),
            None => Status::Smooth,
        }
    }

    fn snapshot(&self, _loc: usize, _degree: usize, _out: &mut Vec<F>) {}
    fn encode(&self, _loc: usize, _out: &mut Vec<u8>) {}

    fn decode(&mut self, _loc: usize, _entry: &mut ByteCursor<'_>) -> Result<(), FrameError> {
        Ok(())
    }
}

/// Direction of a nonzero value, as the lanes see it.
#[inline]
pub(super) fn sign_of<F: Float>(v: F) -> Ordering {
    v.partial_cmp(&F::zero()).unwrap_or(Ordering::Equal)
}
