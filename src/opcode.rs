//! Tape opcodes and their fixed operand layout.
//!
//! The tape carries no per-instruction length prefix: the number of location
//! and value operands an opcode consumes is a static function of the opcode
//! ([`OpCode::arity`]). A handful of opcodes carry their own count as the
//! first location operand; those report [`Arity::Counted`].

/// Elementary operation codes.
///
/// Discriminants are dense from zero so a byte decodes by table lookup
/// ([`OpCode::from_u8`]). Operand order per opcode is documented on each
/// variant as `locations ; values`.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OpCode {
    // ── Markers ──
    StartOfTape,
    EndOfTape,
    /// Block boundary in the opcode stream. No effect.
    EndOfOp,
    /// Block boundary in the location stream. No effect.
    EndOfInt,
    /// Block boundary in the value stream. No effect.
    EndOfVal,

    // ── Structural ──
    /// `res` ← next independent.
    AssignInd,
    /// `res` → next dependent.
    AssignDep,
    /// `arg, res`
    Assign,
    /// `res ; c`
    AssignConst,
    /// `res`
    AssignZero,
    /// `res`
    AssignOne,
    /// `size, res ; c × size`. Fills `res..res+size` with constants.
    TakeStock,
    /// `first, last`. Locations `first..=last` go out of scope.
    DeathNot,

    // ── In-place updates ──
    /// `res ; c`. Value only.
    EqPlusConst,
    /// `res ; c`. Value only.
    EqMinusConst,
    /// `res ; c`. Scales value and every coefficient.
    EqMultConst,
    /// `res`. Value only.
    Incr,
    /// `res`. Value only.
    Decr,
    /// `arg, res`
    EqPlus,
    /// `arg, res`
    EqMinus,
    /// `arg, res`
    EqMult,
    /// `arg1, arg2, res`. `res += arg1 * arg2`.
    EqPlusProd,
    /// `arg1, arg2, res`. `res -= arg1 * arg2`.
    EqMinusProd,

    // ── Arithmetic ──
    /// `arg1, arg2, res`
    Add,
    /// `arg1, arg2, res`
    Sub,
    /// `arg1, arg2, res`
    Mul,
    /// `arg1, arg2, res`
    Div,
    /// `arg, res ; c`. `c + arg`.
    AddConst,
    /// `arg, res ; c`. `c - arg`.
    SubFromConst,
    /// `arg, res ; c`. `c * arg`.
    MulConst,
    /// `arg, res ; c`. `c / arg`.
    ConstDiv,
    /// `arg, res`
    Pos,
    /// `arg, res`
    Neg,

    // ── Elementary functions ──
    /// `arg, res`
    Exp,
    /// `arg, res`
    Log,
    /// `arg, res`
    Sqrt,
    /// `arg, res ; c`. Constant exponent.
    PowConst,
    /// `arg, co, res`. Writes `sin` to `res` and `cos` to `co`.
    Sin,
    /// `arg, co, res`. Writes `cos` to `res` and `sin` to `co`.
    Cos,
    /// `arg, deriv, res`. `deriv` holds `1/(1+arg²)` as a series.
    Atan,
    /// `arg, deriv, res`. `deriv` holds `1/sqrt(1-arg²)`.
    Asin,
    /// `arg, deriv, res`. `deriv` holds `-1/sqrt(1-arg²)`.
    Acos,
    /// `arg, deriv, res`. `deriv` holds `1/sqrt(1+arg²)`.
    Asinh,
    /// `arg, deriv, res`. `deriv` holds `1/sqrt(arg²-1)`.
    Acosh,
    /// `arg, deriv, res`. `deriv` holds `1/(1-arg²)`.
    Atanh,
    /// `arg, deriv, res`. `deriv` holds `2/sqrt(π)·exp(-arg²)`.
    Erf,
    /// `arg, deriv, res ; check, value`. Recorded quadrature: the result
    /// value is taken from the tape and `check` must equal `arg`'s value.
    GenQuad,

    // ── Nonsmooth ──
    /// `arg1, arg2, res ; flag`. `flag != 0` iff `arg1 < arg2` when taped.
    Min,
    /// `arg, res ; flag`. `flag != 0` iff `arg > 0` when taped.
    Abs,
    /// `arg, res ; taped result`
    Ceil,
    /// `arg, res ; taped result`
    Floor,
    /// `cond, arg1, arg2, res ; taped cond`. `res = cond > 0 ? arg1 : arg2`.
    CondAssign,
    /// `cond, arg1, res ; taped cond`. `if cond > 0 { res = arg1 }`.
    CondAssignS,

    // ── Branch checks ──
    /// `arg`. Taped with `arg == 0`.
    EqZero,
    /// `arg`. Taped with `arg != 0`.
    NeqZero,
    /// `arg`. Taped with `arg <= 0`.
    LeZero,
    /// `arg`. Taped with `arg > 0`.
    GtZero,
    /// `arg`. Taped with `arg >= 0`.
    GeZero,
    /// `arg`. Taped with `arg < 0`.
    LtZero,

    // ── Extension points ──
    /// `index, n, m, x_lo, y_lo`. External function over contiguous slots.
    ExtDiff,
    /// `count, loc × count, peer, tag`
    Send,
    /// `count, loc × count, peer, tag`
    Receive,
    /// `count, loc × count, root`
    Broadcast,
    /// `count, loc × count, root, rcount, loc × rcount`
    Gather,
    /// `root, scount, loc × scount, rcount, loc × rcount`
    Scatter,
    Barrier,
}

/// Operand layout of an opcode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Arity {
    /// Exactly `locations` location operands (all slot indices) and
    /// `values` value operands.
    Fixed { locations: usize, values: usize },
    /// Layout depends on counts stored in the location stream
    /// ([`OpCode::TakeStock`], [`OpCode::ExtDiff`] and the collective opcodes).
    Counted,
}

impl OpCode {
    /// Every opcode, indexed by discriminant.
    pub const ALL: [OpCode; 66] = [
        OpCode::StartOfTape,
        OpCode::EndOfTape,
        OpCode::EndOfOp,
        OpCode::EndOfInt,
        OpCode::EndOfVal,
        OpCode::AssignInd,
        OpCode::AssignDep,
        OpCode::Assign,
        OpCode::AssignConst,
        OpCode::AssignZero,
        OpCode::AssignOne,
        OpCode::TakeStock,
        OpCode::DeathNot,
        OpCode::EqPlusConst,
        OpCode::EqMinusConst,
        OpCode::EqMultConst,
        OpCode::Incr,
        OpCode::Decr,
        OpCode::EqPlus,
        OpCode::EqMinus,
        OpCode::EqMult,
        OpCode::EqPlusProd,
        OpCode::EqMinusProd,
        OpCode::Add,
        OpCode::Sub,
        OpCode::Mul,
        OpCode::Div,
        OpCode::AddConst,
        OpCode::SubFromConst,
        OpCode::MulConst,
        OpCode::ConstDiv,
        OpCode::Pos,
        OpCode::Neg,
        OpCode::Exp,
        OpCode::Log,
        OpCode::Sqrt,
        OpCode::PowConst,
        OpCode::Sin,
        OpCode::Cos,
        OpCode::Atan,
        OpCode::Asin,
        OpCode::Acos,
        OpCode::Asinh,
        OpCode::Acosh,
        OpCode::Atanh,
        OpCode::Erf,
        OpCode::GenQuad,
        OpCode::Min,
        OpCode::Abs,
        OpCode::Ceil,
        OpCode::Floor,
        OpCode::CondAssign,
        OpCode::CondAssignS,
        OpCode::EqZero,
        OpCode::NeqZero,
        OpCode::LeZero,
        OpCode::GtZero,
        OpCode::GeZero,
        OpCode::LtZero,
        OpCode::ExtDiff,
        OpCode::Send,
        OpCode::Receive,
        OpCode::Broadcast,
        OpCode::Gather,
        OpCode::Scatter,
        OpCode::Barrier,
    ];

    /// Decode a tape byte. `None` for bytes outside the opcode set.
    #[inline]
    pub fn from_u8(byte: u8) -> Option<OpCode> {
        Self::ALL.get(byte as usize).copied()
    }

    /// Operand layout.
    pub fn arity(self) -> Arity {
        use OpCode::*;
        let (locations, values) = match self {
            StartOfTape | EndOfTape | EndOfOp | EndOfInt | EndOfVal | Barrier => (0, 0),
            AssignInd | AssignDep | AssignZero | AssignOne | Incr | Decr => (1, 0),
            AssignConst | EqPlusConst | EqMinusConst | EqMultConst => (1, 1),
            EqZero | NeqZero | LeZero | GtZero | GeZero | LtZero => (1, 0),
            Assign | DeathNot | EqPlus | EqMinus | EqMult | Pos | Neg | Exp | Log | Sqrt => (2, 0),
            AddConst | SubFromConst | MulConst | ConstDiv | PowConst => (2, 1),
            Abs | Ceil | Floor => (2, 1),
            EqPlusProd | EqMinusProd | Add | Sub | Mul | Div => (3, 0),
            Sin | Cos | Atan | Asin | Acos | Asinh | Acosh | Atanh | Erf => (3, 0),
            Min | CondAssignS => (3, 1),
            GenQuad => (3, 2),
            CondAssign => (4, 1),
            TakeStock | ExtDiff | Send | Receive | Broadcast | Gather | Scatter => {
                return Arity::Counted
            }
        };
        Arity::Fixed { locations, values }
    }

    /// Branch-check opcodes that can abort a sweep.
    #[inline]
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            OpCode::EqZero
                | OpCode::NeqZero
                | OpCode::LeZero
                | OpCode::GtZero
                | OpCode::GeZero
                | OpCode::LtZero
        )
    }
}

/// Re-evaluate a recorded branch check against the current value.
///
/// Returns `None` when the taped relation still holds strictly, `Some(Mismatch)`
/// when a non-strict relation (including `== 0`) now holds with equality, and
/// `Some(BranchSwitch)` when it no longer holds.
pub fn check_branch<F: num_traits::Float>(op: OpCode, v: F) -> Option<crate::Status> {
    use crate::Status::{BranchSwitch, Mismatch};
    let zero = F::zero();
    match op {
        OpCode::EqZero if v != zero => Some(BranchSwitch),
        OpCode::EqZero => Some(Mismatch),
        OpCode::NeqZero => (v == zero).then_some(BranchSwitch),
        OpCode::LeZero if v > zero => Some(BranchSwitch),
        OpCode::LeZero => (v == zero).then_some(Mismatch),
        OpCode::GtZero => (v <= zero).then_some(BranchSwitch),
        OpCode::GeZero if v < zero => Some(BranchSwitch),
        OpCode::GeZero => (v == zero).then_some(Mismatch),
        OpCode::LtZero => (v >= zero).then_some(BranchSwitch),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Status;

    #[test]
    fn byte_table_is_dense() {
        for (i, op) in OpCode::ALL.iter().enumerate() {
            assert_eq!(*op as u8 as usize, i);
            assert_eq!(OpCode::from_u8(i as u8), Some(*op));
        }
        assert_eq!(OpCode::from_u8(OpCode::ALL.len() as u8), None);
        assert_eq!(OpCode::from_u8(255), None);
    }

    #[test]
    fn fixed_arities() {
        assert_eq!(
            OpCode::CondAssign.arity(),
            Arity::Fixed { locations: 4, values: 1 }
        );
        assert_eq!(
            OpCode::GenQuad.arity(),
            Arity::Fixed { locations: 3, values: 2 }
        );
        assert_eq!(OpCode::TakeStock.arity(), Arity::Counted);
    }

    #[test]
    fn branch_checks() {
        assert_eq!(check_branch(OpCode::GtZero, 1.0), None);
        assert_eq!(check_branch(OpCode::GtZero, -1.0), Some(Status::BranchSwitch));
        assert_eq!(check_branch(OpCode::GtZero, 0.0), Some(Status::BranchSwitch));
        assert_eq!(check_branch(OpCode::LeZero, 0.0), Some(Status::Mismatch));
        assert_eq!(check_branch(OpCode::GeZero, 0.0), Some(Status::Mismatch));
        assert_eq!(check_branch(OpCode::EqZero, 0.0), Some(Status::Mismatch));
        assert_eq!(check_branch(OpCode::EqZero, -0.0), Some(Status::Mismatch));
        assert_eq!(check_branch(OpCode::EqZero, 2.0), Some(Status::BranchSwitch));
        assert_eq!(check_branch(OpCode::NeqZero, 0.0), Some(Status::BranchSwitch));
        assert_eq!(check_branch(OpCode::LtZero, 0.5), Some(Status::BranchSwitch));
    }
}
