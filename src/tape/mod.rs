//! Recorded tapes: three aligned operand streams plus header statistics.
//!
//! A tape is replayed strictly in order by a [`TapeReader`]. Tapes are built
//! either by a [`TapeBuilder`] or from raw streams via
//! [`Tape::from_streams`], which validates the layout.

use crate::error::TapeError;
use crate::float::Float;
use crate::opcode::{Arity, OpCode};

mod builder;
mod reader;

#[cfg(feature = "serde")]
mod serde_support;

pub use self::builder::{Slot, TapeBuilder};
pub use self::reader::TapeReader;

/// Header counts recorded alongside the streams.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TapeStats {
    pub num_independents: usize,
    pub num_dependents: usize,
    /// Maximum number of simultaneously live locations; all sweep buffers
    /// are sized from this.
    pub num_locations: usize,
    pub num_operations: usize,
    pub num_values: usize,
}

/// A recorded instruction log.
#[derive(Clone, Debug)]
pub struct Tape<F: Float> {
    pub(crate) opcodes: Vec<u8>,
    pub(crate) locations: Vec<u32>,
    pub(crate) values: Vec<F>,
    pub(crate) stats: TapeStats,
}

impl<F: Float> Tape<F> {
    /// Assemble a tape from raw streams and validate it.
    ///
    /// `num_locations` is the declared slot count. Independent and dependent
    /// counts are taken from the markers on the tape.
    pub fn from_streams(
        opcodes: Vec<u8>,
        locations: Vec<u32>,
        values: Vec<F>,
        num_locations: usize,
    ) -> Result<Self, TapeError> {
        let mut tape = Tape {
            stats: TapeStats {
                num_locations,
                num_operations: opcodes.len(),
                num_values: values.len(),
                ..TapeStats::default()
            },
            opcodes,
            locations,
            values,
        };
        let (ind, dep) = tape.scan()?;
        tape.stats.num_independents = ind;
        tape.stats.num_dependents = dep;
        Ok(tape)
    }

    pub fn stats(&self) -> &TapeStats {
        &self.stats
    }

    pub fn num_independents(&self) -> usize {
        self.stats.num_independents
    }

    pub fn num_dependents(&self) -> usize {
        self.stats.num_dependents
    }

    pub fn num_locations(&self) -> usize {
        self.stats.num_locations
    }

    pub fn opcodes(&self) -> &[u8] {
        &self.opcodes
    }

    pub fn locations(&self) -> &[u32] {
        &self.locations
    }

    pub fn values(&self) -> &[F] {
        &self.values
    }

    /// Cursor positioned at the start marker.
    pub fn reader(&self) -> TapeReader<'_, F> {
        TapeReader::new(self)
    }

    /// Re-run structural validation, including the header counts.
    pub fn validate(&self) -> Result<(), TapeError> {
        let (ind, dep) = self.scan()?;
        if ind != self.stats.num_independents {
            return Err(TapeError::CountMismatch {
                kind: "independents",
                declared: self.stats.num_independents,
                recorded: ind,
            });
        }
        if dep != self.stats.num_dependents {
            return Err(TapeError::CountMismatch {
                kind: "dependents",
                declared: self.stats.num_dependents,
                recorded: dep,
            });
        }
        Ok(())
    }

    /// Fatal driver/tape consistency check performed at the start of a sweep.
    ///
    /// # Panics
    ///
    /// If `m` or `n` differ from the recorded dependent/independent counts.
    pub fn check_counts(&self, m: usize, n: usize) {
        assert_eq!(
            m, self.stats.num_dependents,
            "wrong number of dependents: tape records {}",
            self.stats.num_dependents
        );
        assert_eq!(
            n, self.stats.num_independents,
            "wrong number of independents: tape records {}",
            self.stats.num_independents
        );
    }

    /// Walk every instruction, checking opcode bytes, stream lengths and
    /// slot bounds. Returns the independent and dependent marker counts.
    fn scan(&self) -> Result<(usize, usize), TapeError> {
        let nloc = self.stats.num_locations;
        let mut operands = Operands {
            locations: &self.locations,
            pos: 0,
        };
        let mut val_pos = 0usize;
        let mut independents = 0;
        let mut dependents = 0;

        match self.opcodes.first().map(|&b| OpCode::from_u8(b)) {
            Some(Some(OpCode::StartOfTape)) => {}
            _ => return Err(TapeError::MissingStart),
        }

        for (position, &byte) in self.opcodes.iter().enumerate() {
            let op = OpCode::from_u8(byte).ok_or(TapeError::UnknownOpcode { byte, position })?;
            let slot = |loc: u32, len: usize| -> Result<(), TapeError> {
                if loc as usize + len > nloc {
                    return Err(TapeError::LocationOutOfRange {
                        location: loc,
                        position,
                        num_locations: nloc,
                    });
                }
                Ok(())
            };
            let mut take = |n: usize| operands.take(n, position);

            let nvals = match op.arity() {
                Arity::Fixed { locations, values } => {
                    for &loc in take(locations)? {
                        slot(loc, 1)?;
                    }
                    values
                }
                Arity::Counted => match op {
                    OpCode::TakeStock => {
                        let h = take(2)?;
                        let (size, res) = (h[0] as usize, h[1]);
                        if size > 0 {
                            slot(res, size)?;
                        }
                        size
                    }
                    OpCode::ExtDiff => {
                        let h = take(5)?;
                        let (n, m, x_lo, y_lo) = (h[1] as usize, h[2] as usize, h[3], h[4]);
                        if n > 0 {
                            slot(x_lo, n)?;
                        }
                        if m > 0 {
                            slot(y_lo, m)?;
                        }
                        0
                    }
                    OpCode::Send | OpCode::Receive | OpCode::Broadcast | OpCode::Gather => {
                        let count = take(1)?[0] as usize;
                        for &loc in take(count)? {
                            slot(loc, 1)?;
                        }
                        let trailer = if op == OpCode::Broadcast { 1 } else { 2 };
                        let t = take(trailer)?;
                        if op == OpCode::Gather {
                            for &loc in take(t[1] as usize)? {
                                slot(loc, 1)?;
                            }
                        }
                        0
                    }
                    OpCode::Scatter => {
                        let scount = take(2)?[1] as usize;
                        for &loc in take(scount)? {
                            slot(loc, 1)?;
                        }
                        let rcount = take(1)?[0] as usize;
                        for &loc in take(rcount)? {
                            slot(loc, 1)?;
                        }
                        0
                    }
                    _ => unreachable!("fixed-arity opcode reported as counted"),
                },
            };
            if val_pos + nvals > self.values.len() {
                return Err(TapeError::TruncatedValues { position });
            }
            val_pos += nvals;

            match op {
                OpCode::AssignInd => independents += 1,
                OpCode::AssignDep => dependents += 1,
                OpCode::EndOfTape => {
                    let unread = (self.opcodes.len() - position - 1)
                        + (self.locations.len() - operands.pos)
                        + (self.values.len() - val_pos);
                    if unread > 0 {
                        return Err(TapeError::TrailingOperands { unread });
                    }
                    return Ok((independents, dependents));
                }
                _ => {}
            }
        }
        Err(TapeError::MissingEnd)
    }
}

/// Location-stream cursor used by validation.
struct Operands<'t> {
    locations: &'t [u32],
    pos: usize,
}

impl<'t> Operands<'t> {
    fn take(&mut self, n: usize, position: usize) -> Result<&'t [u32], TapeError> {
        let out = self
            .locations
            .get(self.pos..self.pos + n)
            .ok_or(TapeError::TruncatedLocations { position })?;
        self.pos += n;
        Ok(out)
    }
}
