//! The dispatch loop shared by every forward sweep.

use std::cmp::Ordering;
use std::slice;

use tracing::{debug, warn};

use crate::error::{FrameError, TransportError};
use crate::external::ExternalRegistry;
use crate::float::Float;
use crate::keep::{Checkpoint, KeepLog};
use crate::opcode::{check_branch, OpCode};
use crate::status::Status;
use crate::tape::TapeReader;
use crate::transport::{ByteCursor, Collective, Frame, FrameWriter};

use super::lanes::{sign_of, ExternalCall, Lanes};
use super::{Domain, Mode, SweepContext, SweepOptions};

/// What a finished sweep hands back to its entry point.
pub(super) struct Finished<F: Float, L> {
    pub status: Status,
    pub checkpoint: Option<Checkpoint<F>>,
    pub lanes: L,
}

pub(super) struct Engine<'a, F: Float, L: Lanes<F>> {
    mode: Mode,
    tight: bool,
    reader: TapeReader<'a, F>,
    options: SweepOptions,
    num_locations: usize,
    num_operations: usize,
    externals: Option<&'a mut ExternalRegistry<F>>,
    transport: Option<&'a mut dyn Collective>,
    /// Empty when the mode does not evaluate values.
    values: Vec<F>,
    written: Option<Vec<bool>>,
    lanes: L,
    keep: Option<KeepLog<F>>,
    keep_stage: Vec<F>,
    status: Status,
    independents: usize,
    dependents: usize,
}

impl<'a, F: Float, L: Lanes<F>> Engine<'a, F, L> {
    /// # Panics
    ///
    /// If `mode.keep` exceeds what the mode supports.
    pub(super) fn new(ctx: SweepContext<'a, F>, mode: Mode, lanes: L) -> Self {
        mode.check_keep();
        let tape = ctx.tape;
        let stats = *tape.stats();
        let nloc = stats.num_locations;
        let values = if mode.is_tight() {
            vec![F::nan(); nloc]
        } else {
            Vec::new()
        };
        let written = ctx.options.sentinel_check.then(|| vec![false; nloc]);
        let keep = (mode.keep > 0)
            .then(|| KeepLog::begin(mode.keep, mode.directions(), stats.num_operations));
        Engine {
            mode,
            tight: mode.is_tight(),
            reader: tape.reader(),
            options: ctx.options,
            num_locations: nloc,
            num_operations: stats.num_operations,
            externals: ctx.externals,
            transport: ctx.transport,
            values,
            written,
            lanes,
            keep,
            keep_stage: Vec::new(),
            status: Status::Smooth,
            independents: 0,
            dependents: 0,
        }
    }

    // ── Value buffer ──

    #[inline]
    fn read(&self, loc: usize) -> F {
        if let Some(written) = &self.written {
            if !written[loc] {
                panic!("read of uninitialized location {loc}");
            }
        }
        self.values.get(loc).copied().unwrap_or_else(F::nan)
    }

    #[inline]
    fn write(&mut self, loc: usize, v: F) {
        if let Some(slot) = self.values.get_mut(loc) {
            *slot = v;
        }
        if let Some(written) = &mut self.written {
            written[loc] = true;
        }
    }

    /// Checkpoint `loc` before it is overwritten.
    #[inline]
    fn keep_write(&mut self, loc: usize) {
        if let Some(log) = &mut self.keep {
            self.keep_stage.clear();
            self.lanes.snapshot(loc, log.degree(), &mut self.keep_stage);
            let v = self.values.get(loc).copied().unwrap_or_else(F::nan);
            log.snapshot(loc, v, &self.keep_stage);
        }
    }

    #[inline]
    fn observe(&mut self, s: Status) {
        self.status = self.status.fold(s);
    }

    // ── Dispatch ──

    /// Replay the tape once. `x` is `None` in modes without values.
    pub(super) fn run(mut self, x: Option<&[F]>, mut y: Option<&mut [F]>) -> Finished<F, L> {
        debug!(
            mode = %self.mode,
            locations = self.num_locations,
            operations = self.num_operations,
            "forward sweep"
        );
        loop {
            let pos = self.reader.position();
            let op = self.reader.next_opcode();
            match op {
                OpCode::EndOfTape => break,
                OpCode::StartOfTape | OpCode::EndOfOp | OpCode::EndOfInt | OpCode::EndOfVal => {}

                // ── Structural ──
                OpCode::AssignInd => {
                    let res = self.reader.next_location();
                    self.keep_write(res);
                    let i = self.independents;
                    self.independents += 1;
                    self.lanes.independent(res, i);
                    let v = x.map_or_else(F::nan, |x| x[i]);
                    self.write(res, v);
                }
                OpCode::AssignDep => {
                    let res = self.reader.next_location();
                    let v = self.read(res);
                    let j = self.dependents;
                    self.dependents += 1;
                    if let Some(y) = y.as_deref_mut() {
                        y[j] = v;
                    }
                    self.lanes.dependent(res, j);
                }
                OpCode::Assign => {
                    let arg = self.reader.next_location();
                    let res = self.reader.next_location();
                    let va = self.read(arg);
                    self.keep_write(res);
                    self.lanes.copy(res, arg);
                    self.write(res, va);
                }
                OpCode::AssignConst | OpCode::AssignZero | OpCode::AssignOne => {
                    let res = self.reader.next_location();
                    let c = match op {
                        OpCode::AssignConst => self.reader.next_value(),
                        OpCode::AssignZero => F::zero(),
                        _ => F::one(),
                    };
                    self.keep_write(res);
                    self.lanes.clear(res);
                    self.write(res, c);
                }
                OpCode::TakeStock => {
                    let size = self.reader.next_location();
                    let res = self.reader.next_location();
                    let cs = self.reader.next_values(size);
                    for (k, &c) in cs.iter().enumerate() {
                        self.keep_write(res + k);
                        self.lanes.clear(res + k);
                        self.write(res + k, c);
                    }
                }
                OpCode::DeathNot => {
                    let first = self.reader.next_location();
                    let last = self.reader.next_location();
                    if self.keep.is_some() {
                        for loc in (first..=last).rev() {
                            self.keep_write(loc);
                        }
                    }
                }

                // ── In-place updates ──
                OpCode::EqPlusConst | OpCode::EqMinusConst | OpCode::Incr | OpCode::Decr => {
                    let res = self.reader.next_location();
                    let delta = match op {
                        OpCode::EqPlusConst => self.reader.next_value(),
                        OpCode::EqMinusConst => -self.reader.next_value(),
                        OpCode::Incr => F::one(),
                        _ => -F::one(),
                    };
                    let vr = self.read(res);
                    self.keep_write(res);
                    self.write(res, vr + delta);
                }
                OpCode::EqMultConst => {
                    let res = self.reader.next_location();
                    let c = self.reader.next_value();
                    let vr = self.read(res);
                    self.keep_write(res);
                    self.lanes.scale(res, res, c);
                    self.write(res, vr * c);
                }
                OpCode::EqPlus | OpCode::EqMinus | OpCode::EqMult => {
                    let arg = self.reader.next_location();
                    let res = self.reader.next_location();
                    let va = self.read(arg);
                    let vr = self.read(res);
                    self.keep_write(res);
                    let v = match op {
                        OpCode::EqPlus => {
                            self.lanes.add(res, res, arg);
                            vr + va
                        }
                        OpCode::EqMinus => {
                            self.lanes.sub(res, res, arg);
                            vr - va
                        }
                        _ => {
                            self.lanes.mul(res, res, arg, vr, va);
                            vr * va
                        }
                    };
                    self.write(res, v);
                }
                OpCode::EqPlusProd | OpCode::EqMinusProd => {
                    let a = self.reader.next_location();
                    let b = self.reader.next_location();
                    let res = self.reader.next_location();
                    let (va, vb, vr) = (self.read(a), self.read(b), self.read(res));
                    let subtract = op == OpCode::EqMinusProd;
                    self.lanes.mul_acc(res, a, b, va, vb, subtract);
                    self.write(res, if subtract { vr - va * vb } else { vr + va * vb });
                }

                // ── Arithmetic ──
                OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div => {
                    let a = self.reader.next_location();
                    let b = self.reader.next_location();
                    let res = self.reader.next_location();
                    let (va, vb) = (self.read(a), self.read(b));
                    self.keep_write(res);
                    let v = match op {
                        OpCode::Add => {
                            self.lanes.add(res, a, b);
                            va + vb
                        }
                        OpCode::Sub => {
                            self.lanes.sub(res, a, b);
                            va - vb
                        }
                        OpCode::Mul => {
                            self.lanes.mul(res, a, b, va, vb);
                            va * vb
                        }
                        _ => {
                            self.lanes.div(res, a, b, va, vb);
                            va / vb
                        }
                    };
                    self.write(res, v);
                }
                OpCode::AddConst | OpCode::SubFromConst | OpCode::MulConst | OpCode::ConstDiv => {
                    let arg = self.reader.next_location();
                    let res = self.reader.next_location();
                    let c = self.reader.next_value();
                    let va = self.read(arg);
                    self.keep_write(res);
                    let v = match op {
                        OpCode::AddConst => {
                            self.lanes.copy(res, arg);
                            c + va
                        }
                        OpCode::SubFromConst => {
                            self.lanes.negate(res, arg);
                            c - va
                        }
                        OpCode::MulConst => {
                            self.lanes.scale(res, arg, c);
                            c * va
                        }
                        _ => {
                            self.lanes.const_div(res, arg, c, va);
                            c / va
                        }
                    };
                    self.write(res, v);
                }
                OpCode::Pos | OpCode::Neg => {
                    let arg = self.reader.next_location();
                    let res = self.reader.next_location();
                    let va = self.read(arg);
                    self.keep_write(res);
                    if op == OpCode::Pos {
                        self.lanes.copy(res, arg);
                        self.write(res, va);
                    } else {
                        self.lanes.negate(res, arg);
                        self.write(res, -va);
                    }
                }

                // ── Elementary functions ──
                OpCode::Exp | OpCode::Log | OpCode::Sqrt => {
                    let arg = self.reader.next_location();
                    let res = self.reader.next_location();
                    let va = self.read(arg);
                    self.keep_write(res);
                    let v = match op {
                        OpCode::Exp => {
                            self.lanes.exp(res, arg, va);
                            va.exp()
                        }
                        OpCode::Log => {
                            self.lanes.log(res, arg, va);
                            va.ln()
                        }
                        _ => {
                            self.lanes.sqrt(res, arg, va);
                            va.sqrt()
                        }
                    };
                    self.write(res, v);
                }
                OpCode::PowConst => {
                    let arg = self.reader.next_location();
                    let res = self.reader.next_location();
                    let c = self.reader.next_value();
                    let va = self.read(arg);
                    self.keep_write(res);
                    self.lanes.pow(res, arg, va, c);
                    self.write(res, va.powf(c));
                }
                OpCode::Sin | OpCode::Cos => {
                    let arg = self.reader.next_location();
                    let co = self.reader.next_location();
                    let res = self.reader.next_location();
                    let va = self.read(arg);
                    self.keep_write(co);
                    self.keep_write(res);
                    let (s, c) = va.sin_cos();
                    let (sin_loc, cos_loc) = if op == OpCode::Sin { (res, co) } else { (co, res) };
                    self.lanes.sin_cos(sin_loc, cos_loc, arg, va);
                    self.write(sin_loc, s);
                    self.write(cos_loc, c);
                }
                OpCode::Atan
                | OpCode::Asin
                | OpCode::Acos
                | OpCode::Asinh
                | OpCode::Acosh
                | OpCode::Atanh
                | OpCode::Erf => {
                    let arg = self.reader.next_location();
                    let deriv = self.reader.next_location();
                    let res = self.reader.next_location();
                    let va = self.read(arg);
                    let vd = self.read(deriv);
                    self.keep_write(res);
                    if at_branch_point(op, va) {
                        self.lanes.branch_point(res, arg, op, va);
                    } else {
                        self.lanes.integrate(res, arg, deriv, va, vd);
                    }
                    self.write(res, elementary(op, va));
                }
                OpCode::GenQuad => {
                    let arg = self.reader.next_location();
                    let deriv = self.reader.next_location();
                    let res = self.reader.next_location();
                    let check = self.reader.next_value();
                    let value = self.reader.next_value();
                    let va = self.read(arg);
                    if self.tight && check != va {
                        warn!(operation = pos, location = arg, "forward sweep aborted; tape invalid");
                        self.observe(Status::InvalidTape);
                        break;
                    }
                    if matches!(self.mode.domain, Domain::IndexSet { .. }) {
                        warn!(operation = pos, "forward sweep aborted; index domains not available for recorded quadratures");
                        self.observe(Status::InvalidTape);
                        break;
                    }
                    let vd = self.read(deriv);
                    self.keep_write(res);
                    self.lanes.integrate(res, arg, deriv, va, vd);
                    self.write(res, value);
                }

                // ── Nonsmooth ──
                OpCode::Min => {
                    let a = self.reader.next_location();
                    let b = self.reader.next_location();
                    let res = self.reader.next_location();
                    let flag = self.reader.next_value();
                    let (va, vb) = (self.read(a), self.read(b));
                    self.keep_write(res);
                    let order = self
                        .tight
                        .then(|| va.partial_cmp(&vb).unwrap_or(Ordering::Equal));
                    if let Some(order) = order {
                        let taped_less = flag != F::zero();
                        let s = match order {
                            Ordering::Greater if taped_less => Status::Kink,
                            Ordering::Less if !taped_less => Status::Kink,
                            Ordering::Equal if a == b => Status::Degenerate,
                            Ordering::Equal => Status::Kink,
                            _ => Status::Smooth,
                        };
                        self.observe(s);
                    }
                    let s = self.lanes.min(res, a, b, order);
                    self.observe(s);
                    self.write(res, if va < vb { va } else { vb });
                }
                OpCode::Abs => {
                    let arg = self.reader.next_location();
                    let res = self.reader.next_location();
                    let flag = self.reader.next_value();
                    let va = self.read(arg);
                    self.keep_write(res);
                    let sign = self.tight.then(|| sign_of(va));
                    if let Some(sign) = sign {
                        let taped_positive = flag != F::zero();
                        let s = match sign {
                            Ordering::Less if taped_positive => Status::Kink,
                            Ordering::Greater if !taped_positive => Status::Kink,
                            Ordering::Equal => Status::Kink,
                            _ => Status::Smooth,
                        };
                        self.observe(s);
                    }
                    let s = self.lanes.abs(res, arg, sign);
                    self.observe(s);
                    self.write(res, va.abs());
                }
                OpCode::Ceil | OpCode::Floor => {
                    let arg = self.reader.next_location();
                    let res = self.reader.next_location();
                    let taped = self.reader.next_value();
                    let va = self.read(arg);
                    self.keep_write(res);
                    let v = if op == OpCode::Ceil { va.ceil() } else { va.floor() };
                    if self.tight && v != taped {
                        self.observe(Status::Kink);
                    }
                    self.lanes.clear(res);
                    self.write(res, v);
                }
                OpCode::CondAssign | OpCode::CondAssignS => {
                    let cond = self.reader.next_location();
                    let a = self.reader.next_location();
                    let b = (op == OpCode::CondAssign).then(|| self.reader.next_location());
                    let res = self.reader.next_location();
                    let taped = self.reader.next_value();
                    let vc = self.read(cond);
                    let va = self.read(a);
                    let vb = b.map(|b| self.read(b));
                    self.keep_write(res);
                    let pick = self.tight.then(|| vc > F::zero());
                    if let Some(pick) = pick {
                        if pick == (taped <= F::zero()) {
                            self.observe(Status::Kink);
                        }
                        if vc == F::zero() {
                            self.observe(Status::Mismatch);
                        }
                    }
                    self.lanes.select(res, a, b, pick);
                    match (pick, vb) {
                        (Some(true), _) => self.write(res, va),
                        (Some(false), Some(vb)) => self.write(res, vb),
                        (None, _) => self.write(res, F::nan()),
                        (Some(false), None) => {}
                    }
                }

                // ── Branch checks ──
                OpCode::EqZero
                | OpCode::NeqZero
                | OpCode::LeZero
                | OpCode::GtZero
                | OpCode::GeZero
                | OpCode::LtZero => {
                    let arg = self.reader.next_location();
                    let v = self.read(arg);
                    if !self.tight {
                        continue;
                    }
                    match check_branch(op, v) {
                        Some(Status::BranchSwitch) => {
                            if self.options.branch_switch_warning {
                                warn!(
                                    opcode = ?op,
                                    location = arg,
                                    value = ?v,
                                    "branch switch detected; forward sweep aborted, retape at this point"
                                );
                            }
                            self.observe(Status::BranchSwitch);
                            break;
                        }
                        Some(s) => self.observe(s),
                        None => {}
                    }
                }

                // ── Extension points ──
                OpCode::ExtDiff => {
                    self.external(pos);
                    if self.status.is_aborted() {
                        break;
                    }
                }
                OpCode::Send
                | OpCode::Receive
                | OpCode::Broadcast
                | OpCode::Gather
                | OpCode::Scatter
                | OpCode::Barrier => {
                    if let Err(err) = self.exchange(op, pos) {
                        panic!("{op:?} at operation {pos} failed: {err}");
                    }
                }
            }
        }

        let checkpoint = self.keep.take().map(KeepLog::end);
        debug!(
            mode = self.mode.name(),
            status = %self.status,
            snapshots = checkpoint.as_ref().map_or(0, |c| c.len()),
            "forward sweep finished"
        );
        Finished {
            status: self.status,
            checkpoint,
            lanes: self.lanes,
        }
    }

    // ── External functions ──

    /// # Panics
    ///
    /// If the mode evaluates values and no function is registered under the
    /// recorded index.
    fn external(&mut self, pos: usize) {
        let h = self.reader.next_locations(5);
        let index = h[0] as usize;
        let (n, m) = (h[1] as usize, h[2] as usize);
        let (x_lo, y_lo) = (h[3] as usize, h[4] as usize);
        for loc in x_lo..x_lo + n {
            self.read(loc);
        }
        for loc in (x_lo..x_lo + n).chain(y_lo..y_lo + m) {
            self.keep_write(loc);
        }

        let tight = self.tight;
        let (mut xv, mut yv) = if tight {
            (
                self.values[x_lo..x_lo + n].to_vec(),
                self.values[y_lo..y_lo + m].to_vec(),
            )
        } else {
            (Vec::new(), Vec::new())
        };
        let function = if tight {
            match self.externals.as_deref_mut() {
                Some(registry) => Some(registry.get_mut(index)),
                None => panic!(
                    "ExtDiff at operation {pos} calls function {index} but no external registry is attached"
                ),
            }
        } else {
            None
        };
        let s = self.lanes.external(ExternalCall {
            function,
            x_lo,
            n,
            y_lo,
            m,
            x: &mut xv,
            y: &mut yv,
        });
        self.observe(s);

        for k in 0..n {
            let v = xv.get(k).copied().unwrap_or_else(F::nan);
            self.write(x_lo + k, v);
        }
        for k in 0..m {
            let v = yv.get(k).copied().unwrap_or_else(F::nan);
            self.write(y_lo + k, v);
        }
    }

    // ── Collectives ──

    fn peers(&mut self, op: OpCode, pos: usize) -> &mut (dyn Collective + 'a) {
        match self.transport.as_deref_mut() {
            Some(t) => t,
            None => panic!("{op:?} at operation {pos} requires a transport, none attached"),
        }
    }

    fn counted_locations(&mut self) -> &'a [u32] {
        let count = self.reader.next_location();
        self.reader.next_locations(count)
    }

    fn exchange(&mut self, op: OpCode, pos: usize) -> Result<(), TransportError> {
        match op {
            OpCode::Send | OpCode::Receive => {
                let locs = self.counted_locations();
                let peer = self.reader.next_location();
                let tag = self.reader.next_location() as u32;
                if op == OpCode::Send {
                    let frame = self.encode_frame(locs);
                    self.peers(op, pos).send(peer, tag, frame)?;
                } else {
                    let frame = self.peers(op, pos).receive(peer, tag)?;
                    self.decode_frames(slice::from_ref(&frame), locs)?;
                }
            }
            OpCode::Broadcast => {
                let locs = self.counted_locations();
                let root = self.reader.next_location();
                if self.peers(op, pos).rank() == root {
                    let frame = self.encode_frame(locs);
                    self.peers(op, pos).broadcast(root, Some(frame))?;
                } else {
                    let frame = self.peers(op, pos).broadcast(root, None)?;
                    self.decode_frames(slice::from_ref(&frame), locs)?;
                }
            }
            OpCode::Gather => {
                let locs = self.counted_locations();
                let root = self.reader.next_location();
                let recv = self.counted_locations();
                let frame = self.encode_frame(locs);
                if let Some(frames) = self.peers(op, pos).gather(root, frame)? {
                    self.decode_frames(&frames, recv)?;
                }
            }
            OpCode::Scatter => {
                let root = self.reader.next_location();
                let send = self.counted_locations();
                let recv = self.counted_locations();
                let (rank, size) = {
                    let peers = self.peers(op, pos);
                    (peers.rank(), peers.size())
                };
                let frames = if rank == root {
                    let chunk = recv.len();
                    if send.len() != size * chunk {
                        return Err(FrameError::CountMismatch {
                            expected: size * chunk,
                            found: send.len(),
                        }
                        .into());
                    }
                    let frames: Vec<Frame> = (0..size)
                        .map(|r| self.encode_frame(&send[r * chunk..(r + 1) * chunk]))
                        .collect();
                    Some(frames)
                } else {
                    None
                };
                let frame = self.peers(op, pos).scatter(root, frames)?;
                self.decode_frames(slice::from_ref(&frame), recv)?;
            }
            OpCode::Barrier => self.peers(op, pos).barrier()?,
            _ => unreachable!("{op:?} is not a collective opcode"),
        }
        Ok(())
    }

    /// One entry per location: the value as `f64` bits, then the lane payload.
    fn encode_frame(&self, locs: &[u32]) -> Frame {
        let mut writer = FrameWriter::new(L::FRAME);
        let mut entry = Vec::new();
        for &loc in locs {
            let loc = loc as usize;
            entry.clear();
            entry.extend_from_slice(&self.read(loc).to_wire().to_le_bytes());
            self.lanes.encode(loc, &mut entry);
            writer.push(&entry);
        }
        writer.finish()
    }

    /// Distribute the entries of `frames`, in order, onto `locs`. Every
    /// frame carries an equal share.
    fn decode_frames(&mut self, frames: &[Frame], locs: &[u32]) -> Result<(), FrameError> {
        let share = locs.len() / frames.len().max(1);
        let mut payloads = Vec::with_capacity(locs.len());
        for frame in frames {
            let mut entries = frame.entries(L::FRAME)?;
            entries.expect_count(share)?;
            while let Some(p) = entries.next_entry()? {
                payloads.push(p);
            }
        }
        if payloads.len() != locs.len() {
            return Err(FrameError::CountMismatch {
                expected: locs.len(),
                found: payloads.len(),
            });
        }
        for (&loc, bytes) in locs.iter().zip(payloads) {
            let loc = loc as usize;
            let mut cursor = ByteCursor::new(bytes);
            let v = F::from_wire(cursor.u64()?);
            self.keep_write(loc);
            self.lanes.decode(loc, &mut cursor)?;
            if cursor.remaining() != 0 {
                return Err(FrameError::BadEntry { len: bytes.len() });
            }
            self.write(loc, v);
        }
        Ok(())
    }
}

/// Inverse functions whose derivative is singular at `v`.
fn at_branch_point<F: Float>(op: OpCode, v: F) -> bool {
    match op {
        OpCode::Asin | OpCode::Acos | OpCode::Atanh => v.abs() == F::one(),
        OpCode::Acosh => v == F::one(),
        _ => false,
    }
}

fn elementary<F: Float>(op: OpCode, v: F) -> F {
    match op {
        OpCode::Atan => v.atan(),
        OpCode::Asin => v.asin(),
        OpCode::Acos => v.acos(),
        OpCode::Asinh => v.asinh(),
        OpCode::Acosh => v.acosh(),
        OpCode::Atanh => v.atanh(),
        OpCode::Erf => Float::erf(v),
        _ => unreachable!("{op:?} is not an inverse elementary function"),
    }
}
