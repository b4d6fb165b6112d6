//! Sweep return codes.
//!
//! Codes form a total order, best to worst:
//! `3 > 2 > 1 > 0 > -1 > -2`. A sweep starts at [`Status::Smooth`] and folds
//! every observation with `min`, so a worse code is never overwritten by a
//! better one.

use std::fmt;

/// Outcome class of a forward sweep.
///
/// Variant order matches the numeric codes so the derived `Ord` is the
/// lattice order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Status {
    /// `-2`: tape inconsistency detected (e.g. a `GenQuad` cross-check failed). Sweep aborted.
    InvalidTape = -2,
    /// `-1`: a recorded comparison no longer holds. Sweep aborted; retape at this point.
    BranchSwitch = -1,
    /// `0`: a condition sits exactly on the switching value recorded on the tape.
    Mismatch = 0,
    /// `1`: degenerate choice, e.g. `min(x, x)` or a direction leaving a kink.
    Degenerate = 1,
    /// `2`: the point lies on a non-differentiable boundary, or differs
    /// from the recorded branch of a nonsmooth operation.
    Kink = 2,
    /// `3`: no issues.
    Smooth = 3,
}

impl Status {
    /// Integer code, `-2..=3`.
    #[inline]
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Map an integer code back onto the lattice, saturating at both ends.
    pub fn from_code(code: i32) -> Self {
        match code {
            c if c >= 3 => Status::Smooth,
            2 => Status::Kink,
            1 => Status::Degenerate,
            0 => Status::Mismatch,
            -1 => Status::BranchSwitch,
            _ => Status::InvalidTape,
        }
    }

    /// Worst-wins combination.
    #[inline]
    #[must_use]
    pub fn fold(self, other: Status) -> Status {
        self.min(other)
    }

    /// True for the two codes that terminate a sweep early.
    #[inline]
    pub fn is_aborted(self) -> bool {
        self < Status::Mismatch
    }

    #[inline]
    pub fn is_smooth(self) -> bool {
        self == Status::Smooth
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::Smooth
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self {
            Status::InvalidTape => "invalid tape",
            Status::BranchSwitch => "branch switch",
            Status::Mismatch => "on recorded switching point",
            Status::Degenerate => "degenerate nonsmooth choice",
            Status::Kink => "non-differentiable point",
            Status::Smooth => "smooth",
        };
        write!(f, "{} ({})", what, self.code())
    }
}

impl<'a> std::iter::Sum<&'a Status> for Status {
    fn sum<I: Iterator<Item = &'a Status>>(iter: I) -> Status {
        iter.fold(Status::Smooth, |acc, s| acc.fold(*s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_keeps_worst() {
        let s = Status::Smooth
            .fold(Status::Kink)
            .fold(Status::Smooth)
            .fold(Status::Degenerate)
            .fold(Status::Kink);
        assert_eq!(s, Status::Degenerate);
        assert_eq!(s.code(), 1);
    }

    #[test]
    fn codes_round_trip() {
        for code in -2..=3 {
            assert_eq!(Status::from_code(code).code(), code);
        }
        assert_eq!(Status::from_code(7), Status::Smooth);
        assert_eq!(Status::from_code(-9), Status::InvalidTape);
    }

    #[test]
    fn aborted_codes() {
        assert!(Status::BranchSwitch.is_aborted());
        assert!(Status::InvalidTape.is_aborted());
        assert!(!Status::Mismatch.is_aborted());
    }
}
