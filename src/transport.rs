//! Collective-communication capability for distributed tapes.
//!
//! The sweep serializes the locations named by a collective opcode into a
//! [`Frame`]: a kind tag, an entry count, then one length-prefixed entry per
//! location. Each entry is the zero-order value followed by the lane payload
//! (Taylor coefficients, index set, or bit-pattern words). All lengths are
//! explicit; nothing relies on sentinel values.
//!
//! [`Collective`] is the narrow contract the engine calls through.
//! [`LocalGroup`] implements it in-process over channels, for tests and for
//! multi-threaded single-host runs.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Barrier};

use tracing::trace;

use crate::error::{FrameError, TransportError};

/// Lane payload carried by a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind {
    /// Value only.
    Values = 0,
    /// Value followed by real Taylor coefficients.
    Taylor = 1,
    /// Value followed by `u64` dependence words.
    Bits = 2,
    /// Value followed by a `u32` count and that many indices.
    Indices = 3,
}

impl FrameKind {
    fn from_tag(tag: u8) -> Result<Self, FrameError> {
        match tag {
            0 => Ok(FrameKind::Values),
            1 => Ok(FrameKind::Taylor),
            2 => Ok(FrameKind::Bits),
            3 => Ok(FrameKind::Indices),
            t => Err(FrameError::UnknownKind(t)),
        }
    }
}

/// Encoded message: `[kind: u8][count: u32]` then `count × ([len: u32][len bytes])`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    bytes: Vec<u8>,
}

impl Frame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Frame { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Validate the header and return an entry iterator.
    pub fn entries(&self, expected: FrameKind) -> Result<FrameEntries<'_>, FrameError> {
        let mut cur = ByteCursor::new(&self.bytes);
        let kind = FrameKind::from_tag(cur.take(1)?[0])?;
        if kind != expected {
            return Err(FrameError::KindMismatch {
                expected,
                found: kind,
            });
        }
        let count = cur.u32()? as usize;
        Ok(FrameEntries {
            cursor: cur,
            remaining: count,
            count,
        })
    }
}

/// Builds a [`Frame`] entry by entry.
pub struct FrameWriter {
    bytes: Vec<u8>,
    count: u32,
}

impl FrameWriter {
    pub fn new(kind: FrameKind) -> Self {
        let mut bytes = Vec::with_capacity(64);
        bytes.push(kind as u8);
        bytes.extend_from_slice(&0u32.to_le_bytes());
        FrameWriter { bytes, count: 0 }
    }

    /// Append one entry; `payload` is copied behind its length.
    pub fn push(&mut self, payload: &[u8]) {
        self.bytes
            .extend_from_slice(&(payload.len() as u32).to_le_bytes());
        self.bytes.extend_from_slice(payload);
        self.count += 1;
    }

    pub fn finish(mut self) -> Frame {
        self.bytes[1..5].copy_from_slice(&self.count.to_le_bytes());
        Frame { bytes: self.bytes }
    }
}

/// Iterator over the entries of a validated frame.
pub struct FrameEntries<'a> {
    cursor: ByteCursor<'a>,
    remaining: usize,
    count: usize,
}

impl<'a> FrameEntries<'a> {
    pub fn count(&self) -> usize {
        self.count
    }

    /// Fail unless the frame holds exactly `expected` entries.
    pub fn expect_count(&self, expected: usize) -> Result<(), FrameError> {
        if self.count != expected {
            return Err(FrameError::CountMismatch {
                expected,
                found: self.count,
            });
        }
        Ok(())
    }

    pub fn next_entry(&mut self) -> Result<Option<&'a [u8]>, FrameError> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let len = self.cursor.u32()? as usize;
        let entry = self.cursor.take(len)?;
        self.remaining -= 1;
        Ok(Some(entry))
    }
}

/// Little-endian reader over a byte slice.
pub struct ByteCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        ByteCursor { bytes, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], FrameError> {
        let out = self
            .bytes
            .get(self.pos..self.pos + n)
            .ok_or(FrameError::Truncated {
                needed: n,
                available: self.bytes.len() - self.pos,
            })?;
        self.pos += n;
        Ok(out)
    }

    pub fn u32(&mut self) -> Result<u32, FrameError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u64(&mut self) -> Result<u64, FrameError> {
        let b = self.take(8)?;
        let mut w = [0u8; 8];
        w.copy_from_slice(b);
        Ok(u64::from_le_bytes(w))
    }
}

/// Message-passing collaborator invoked by collective opcodes.
///
/// Calls are synchronous and may block; there is no cancellation.
pub trait Collective {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;
    fn send(&mut self, dest: usize, tag: u32, frame: Frame) -> Result<(), TransportError>;
    fn receive(&mut self, source: usize, tag: u32) -> Result<Frame, TransportError>;
    /// `frame` is `Some` on `root` and ignored elsewhere; every rank gets the root's frame.
    fn broadcast(&mut self, root: usize, frame: Option<Frame>) -> Result<Frame, TransportError>;
    /// Returns all frames in rank order on `root`, `None` elsewhere.
    fn gather(&mut self, root: usize, frame: Frame) -> Result<Option<Vec<Frame>>, TransportError>;
    /// `frames` (one per rank) is `Some` on `root`; every rank gets its own frame.
    fn scatter(&mut self, root: usize, frames: Option<Vec<Frame>>) -> Result<Frame, TransportError>;
    fn barrier(&mut self) -> Result<(), TransportError>;
}

// ══════════════════════════════════════════════
//  In-process group
// ══════════════════════════════════════════════

const TAG_BROADCAST: u32 = u32::MAX;
const TAG_GATHER: u32 = u32::MAX - 1;
const TAG_SCATTER: u32 = u32::MAX - 2;

struct Envelope {
    source: usize,
    tag: u32,
    frame: Frame,
}

/// One rank of an in-process group built by [`LocalGroup::new`].
pub struct LocalGroup {
    rank: usize,
    peers: Vec<Sender<Envelope>>,
    inbox: Receiver<Envelope>,
    pending: Vec<Envelope>,
    barrier: Arc<Barrier>,
}

impl LocalGroup {
    /// Create `size` connected endpoints, one per rank. Move each into its own thread.
    pub fn new(size: usize) -> Vec<LocalGroup> {
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..size).map(|_| channel()).unzip();
        let barrier = Arc::new(Barrier::new(size));
        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| LocalGroup {
                rank,
                peers: senders.clone(),
                inbox,
                pending: Vec::new(),
                barrier: Arc::clone(&barrier),
            })
            .collect()
    }

    fn check_rank(&self, rank: usize) -> Result<(), TransportError> {
        if rank >= self.peers.len() {
            return Err(TransportError::RankOutOfRange {
                rank,
                size: self.peers.len(),
            });
        }
        Ok(())
    }

    fn post(&self, dest: usize, tag: u32, frame: Frame) -> Result<(), TransportError> {
        self.check_rank(dest)?;
        self.peers[dest]
            .send(Envelope {
                source: self.rank,
                tag,
                frame,
            })
            .map_err(|_| TransportError::Disconnected(dest))
    }

    /// Blocking matched receive; unmatched messages are parked.
    fn take(&mut self, source: usize, tag: u32) -> Result<Frame, TransportError> {
        self.check_rank(source)?;
        if let Some(i) = self
            .pending
            .iter()
            .position(|e| e.source == source && e.tag == tag)
        {
            return Ok(self.pending.remove(i).frame);
        }
        loop {
            let env = self
                .inbox
                .recv()
                .map_err(|_| TransportError::Disconnected(source))?;
            if env.source == source && env.tag == tag {
                return Ok(env.frame);
            }
            self.pending.push(env);
        }
    }
}

impl Collective for LocalGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn send(&mut self, dest: usize, tag: u32, frame: Frame) -> Result<(), TransportError> {
        trace!(rank = self.rank, dest, tag, bytes = frame.len(), "send");
        self.post(dest, tag, frame)
    }

    fn receive(&mut self, source: usize, tag: u32) -> Result<Frame, TransportError> {
        let frame = self.take(source, tag)?;
        trace!(rank = self.rank, source, tag, bytes = frame.len(), "receive");
        Ok(frame)
    }

    fn broadcast(&mut self, root: usize, frame: Option<Frame>) -> Result<Frame, TransportError> {
        self.check_rank(root)?;
        if self.rank == root {
            let frame = frame.unwrap_or_else(|| Frame::from_bytes(Vec::new()));
            for dest in (0..self.size()).filter(|&r| r != root) {
                self.post(dest, TAG_BROADCAST, frame.clone())?;
            }
            Ok(frame)
        } else {
            self.take(root, TAG_BROADCAST)
        }
    }

    fn gather(&mut self, root: usize, frame: Frame) -> Result<Option<Vec<Frame>>, TransportError> {
        self.check_rank(root)?;
        if self.rank != root {
            self.post(root, TAG_GATHER, frame)?;
            return Ok(None);
        }
        let mut own = Some(frame);
        let mut out = Vec::with_capacity(self.size());
        for source in 0..self.size() {
            if source == root {
                out.extend(own.take());
            } else {
                out.push(self.take(source, TAG_GATHER)?);
            }
        }
        Ok(Some(out))
    }

    fn scatter(&mut self, root: usize, frames: Option<Vec<Frame>>) -> Result<Frame, TransportError> {
        self.check_rank(root)?;
        if self.rank != root {
            return self.take(root, TAG_SCATTER);
        }
        let frames = frames.unwrap_or_default();
        if frames.len() != self.size() {
            return Err(TransportError::ScatterShape {
                root,
                expected: self.size(),
                found: frames.len(),
            });
        }
        let mut own = None;
        for (dest, frame) in frames.into_iter().enumerate() {
            if dest == root {
                own = Some(frame);
            } else {
                self.post(dest, TAG_SCATTER, frame)?;
            }
        }
        Ok(own.unwrap_or_else(|| Frame::from_bytes(Vec::new())))
    }

    fn barrier(&mut self) -> Result<(), TransportError> {
        self.barrier.wait();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_entries_round_trip() {
        let mut w = FrameWriter::new(FrameKind::Taylor);
        w.push(&[1, 2, 3]);
        w.push(&[]);
        let frame = w.finish();

        let mut entries = frame.entries(FrameKind::Taylor).unwrap();
        assert_eq!(entries.count(), 2);
        assert_eq!(entries.next_entry().unwrap(), Some(&[1u8, 2, 3][..]));
        assert_eq!(entries.next_entry().unwrap(), Some(&[][..]));
        assert_eq!(entries.next_entry().unwrap(), None);
    }

    #[test]
    fn entry_count_is_checked() {
        let mut w = FrameWriter::new(FrameKind::Values);
        w.push(&[0; 8]);
        let frame = w.finish();
        let entries = frame.entries(FrameKind::Values).unwrap();
        assert!(entries.expect_count(1).is_ok());
        assert_eq!(
            entries.expect_count(3),
            Err(FrameError::CountMismatch {
                expected: 3,
                found: 1
            })
        );
    }

    #[test]
    fn kind_mismatch_is_reported() {
        let frame = FrameWriter::new(FrameKind::Bits).finish();
        assert!(matches!(
            frame.entries(FrameKind::Indices),
            Err(FrameError::KindMismatch { .. })
        ));
    }

    #[test]
    fn truncated_frame_is_reported() {
        let mut w = FrameWriter::new(FrameKind::Values);
        w.push(&[0; 8]);
        let mut bytes = w.finish().as_bytes().to_vec();
        bytes.truncate(bytes.len() - 3);
        let frame = Frame::from_bytes(bytes);
        let mut entries = frame.entries(FrameKind::Values).unwrap();
        assert!(matches!(entries.next_entry(), Err(FrameError::Truncated { .. })));
    }

    #[test]
    fn local_group_send_receive() {
        let mut group = LocalGroup::new(2);
        let mut b = group.pop().unwrap();
        let mut a = group.pop().unwrap();
        let handle = std::thread::spawn(move || {
            let f = b.receive(0, 7).unwrap();
            f.as_bytes().to_vec()
        });
        a.send(1, 7, Frame::from_bytes(vec![9, 9])).unwrap();
        assert_eq!(handle.join().unwrap(), vec![9, 9]);
    }
}
