use crate::float::Float;
use crate::opcode::OpCode;

use super::Tape;

/// Sequential cursor over a tape's three streams.
///
/// Each stream has its own position; the opcode decides how many operands
/// are pulled from the other two. Reads past the end of a stream, or an
/// opcode byte outside the opcode set, indicate a corrupted tape and panic.
pub struct TapeReader<'t, F: Float> {
    tape: &'t Tape<F>,
    op_pos: usize,
    loc_pos: usize,
    val_pos: usize,
}

impl<'t, F: Float> TapeReader<'t, F> {
    pub(crate) fn new(tape: &'t Tape<F>) -> Self {
        TapeReader {
            tape,
            op_pos: 0,
            loc_pos: 0,
            val_pos: 0,
        }
    }

    /// Rewind all three streams.
    pub fn reset(&mut self) {
        self.op_pos = 0;
        self.loc_pos = 0;
        self.val_pos = 0;
    }

    /// Index of the next opcode.
    pub fn position(&self) -> usize {
        self.op_pos
    }

    /// # Panics
    ///
    /// On an unknown opcode byte or a missing end marker.
    #[inline]
    pub fn next_opcode(&mut self) -> OpCode {
        let pos = self.op_pos;
        let byte = *self
            .tape
            .opcodes
            .get(pos)
            .unwrap_or_else(|| panic!("opcode stream ended without EndOfTape at {pos}"));
        self.op_pos += 1;
        OpCode::from_u8(byte)
            .unwrap_or_else(|| panic!("unknown opcode byte {byte} at operation {pos}: corrupted tape"))
    }

    /// Next location operand, widened to an index.
    #[inline]
    pub fn next_location(&mut self) -> usize {
        let loc = *self.tape.locations.get(self.loc_pos).unwrap_or_else(|| {
            panic!(
                "location stream exhausted at operation {}",
                self.op_pos.saturating_sub(1)
            )
        });
        self.loc_pos += 1;
        loc as usize
    }

    /// Next `n` raw location operands.
    #[inline]
    pub fn next_locations(&mut self, n: usize) -> &'t [u32] {
        let tape = self.tape;
        let out = tape
            .locations
            .get(self.loc_pos..self.loc_pos + n)
            .unwrap_or_else(|| panic!("location stream exhausted at operation {}", self.op_pos));
        self.loc_pos += n;
        out
    }

    #[inline]
    pub fn next_value(&mut self) -> F {
        let v = *self.tape.values.get(self.val_pos).unwrap_or_else(|| {
            panic!(
                "value stream exhausted at operation {}",
                self.op_pos.saturating_sub(1)
            )
        });
        self.val_pos += 1;
        v
    }

    /// Next `n` value operands as one block.
    #[inline]
    pub fn next_values(&mut self, n: usize) -> &'t [F] {
        let tape = self.tape;
        let out = tape
            .values
            .get(self.val_pos..self.val_pos + n)
            .unwrap_or_else(|| panic!("value stream exhausted at operation {}", self.op_pos));
        self.val_pos += n;
        out
    }
}
