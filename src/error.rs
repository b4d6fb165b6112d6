//! Typed errors for tape construction and the collective transport.
//!
//! Sweeps themselves never return these: recoverable conditions are a
//! [`Status`](crate::Status), and driver/tape mismatches panic.

use thiserror::Error;

/// Structural problems found while validating a tape's streams.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TapeError {
    #[error("unknown opcode byte {byte} at operation {position}")]
    UnknownOpcode { byte: u8, position: usize },

    #[error("tape must begin with StartOfTape")]
    MissingStart,

    #[error("tape must end with EndOfTape")]
    MissingEnd,

    #[error("location stream exhausted at operation {position}")]
    TruncatedLocations { position: usize },

    #[error("value stream exhausted at operation {position}")]
    TruncatedValues { position: usize },

    #[error("{unread} trailing operands after EndOfTape")]
    TrailingOperands { unread: usize },

    #[error("location {location} at operation {position} exceeds declared {num_locations} locations")]
    LocationOutOfRange {
        location: u32,
        position: usize,
        num_locations: usize,
    },

    #[error("tape declares {declared} {kind} but records {recorded}")]
    CountMismatch {
        kind: &'static str,
        declared: usize,
        recorded: usize,
    },
}

/// Failures decoding a length-prefixed transport frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame truncated: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("frame carries {found:?} lanes, expected {expected:?}")]
    KindMismatch {
        expected: crate::transport::FrameKind,
        found: crate::transport::FrameKind,
    },

    #[error("unknown frame kind tag {0}")]
    UnknownKind(u8),

    #[error("frame carries {found} entries, expected {expected}")]
    CountMismatch { expected: usize, found: usize },

    #[error("entry of {len} bytes does not fit the lane layout")]
    BadEntry { len: usize },
}

/// Failures reported by a [`Collective`](crate::transport::Collective) implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("rank {rank} out of range for group of {size}")]
    RankOutOfRange { rank: usize, size: usize },

    #[error("peer {0} disconnected")]
    Disconnected(usize),

    #[error("root {root} must supply {expected} frames, got {found}")]
    ScatterShape {
        root: usize,
        expected: usize,
        found: usize,
    },

    #[error(transparent)]
    Frame(#[from] FrameError),
}
