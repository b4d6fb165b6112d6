//! Collective opcodes replayed across an in-process group of ranks.

use std::thread;

use approx::assert_relative_eq;
use tapesweep::transport::FrameWriter;
use tapesweep::{Collective, Frame, FrameKind, LocalGroup, Status, Tape, TapeBuilder, TransportError};

/// Run `f` once per rank, each on its own thread, and collect results in rank order.
fn spmd<T: Send>(size: usize, f: impl Fn(LocalGroup) -> T + Sync) -> Vec<T> {
    let f = &f;
    thread::scope(|s| {
        let handles: Vec<_> = LocalGroup::new(size)
            .into_iter()
            .map(|group| s.spawn(move || f(group)))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("rank panicked"))
            .collect()
    })
}

/// Rank 0 squares its input and sends it; rank 1 multiplies it by its own.
fn pipeline(rank: usize) -> Tape<f64> {
    let mut b = TapeBuilder::new();
    if rank == 0 {
        let x = b.independent(3.0);
        let s = b.mul(x, x);
        b.send(&[s], 1, 7);
        b.dependent(s);
    } else {
        let z = b.independent(2.0);
        let r = b.receive(1, 0, 7);
        let y = b.mul(r[0], z);
        b.dependent(y);
    }
    b.finish()
}

#[test]
fn send_receive_values() {
    let ys = spmd(2, |mut group| {
        let rank = group.rank();
        let x = [3.0, 2.0][rank];
        let mut y = [0.0];
        let out = pipeline(rank)
            .sweep()
            .with_transport(&mut group)
            .zos_forward(1, 1, 0, &[x], Some(&mut y));
        assert_eq!(out.status, Status::Smooth);
        y[0]
    });
    assert_eq!(ys, vec![9.0, 18.0]);
}

#[test]
fn send_receive_carries_tangents() {
    let results = spmd(2, |mut group| {
        let rank = group.rank();
        let (x, xd) = [(3.0, 1.0), (2.0, 0.0)][rank];
        let mut y = [0.0];
        let mut yd = [0.0];
        let _ = pipeline(rank).sweep().with_transport(&mut group).fos_forward(
            1,
            1,
            0,
            &[x],
            &[xd],
            Some(&mut y),
            Some(&mut yd),
        );
        (y[0], yd[0])
    });
    assert_eq!(results[0], (9.0, 6.0));
    // d(x^2 z) along (dx, dz) = (1, 0) at x = 3, z = 2
    assert_relative_eq!(results[1].0, 18.0);
    assert_relative_eq!(results[1].1, 12.0);
}

#[test]
fn mismatched_lane_kinds_fail_the_receiver() {
    thread::scope(|s| {
        let mut ranks = LocalGroup::new(2).into_iter();
        let (mut g0, mut g1) = (ranks.next().unwrap(), ranks.next().unwrap());
        let sender = s.spawn(move || {
            let mut yd = [0.0];
            let _ = pipeline(0).sweep().with_transport(&mut g0).fos_forward(
                1,
                1,
                0,
                &[3.0],
                &[1.0],
                None,
                Some(&mut yd),
            );
        });
        let receiver = s.spawn(move || {
            let _ = pipeline(1)
                .sweep()
                .with_transport(&mut g1)
                .zos_forward(1, 1, 0, &[2.0], None);
        });
        assert!(sender.join().is_ok());
        assert!(receiver.join().is_err());
    });
}

/// `y = 2 x_root + x`
fn broadcast_tape() -> Tape<f64> {
    let mut b = TapeBuilder::new();
    let x = b.independent(1.0);
    let v = b.mul_const(x, 2.0);
    b.broadcast(&[v], 0);
    let y = b.add(v, x);
    b.dependent(y);
    b.finish()
}

#[test]
fn broadcast_overwrites_non_root_slots() {
    let results = spmd(3, |mut group| {
        let x = [1.0, 10.0, 100.0][group.rank()];
        let mut y = [0.0];
        let mut yd = [0.0];
        let _ = broadcast_tape().sweep().with_transport(&mut group).fos_forward(
            1,
            1,
            0,
            &[x],
            &[1.0],
            Some(&mut y),
            Some(&mut yd),
        );
        (y[0], yd[0])
    });
    assert_eq!(results, vec![(3.0, 3.0), (12.0, 3.0), (102.0, 3.0)]);
}

#[test]
fn broadcast_merges_bit_patterns_across_ranks() {
    let words = spmd(2, |mut group| {
        let seed = [1u64, 2][group.rank()];
        let mut ys = [0u64];
        let _ = broadcast_tape()
            .sweep()
            .with_transport(&mut group)
            .int_forward_safe(1, 1, 1, &[seed], &mut ys);
        ys[0]
    });
    assert_eq!(words, vec![1, 3]);
}

#[test]
fn gather_sums_on_root() {
    let results = spmd(2, |mut group| {
        let rank = group.rank();
        let mut b = TapeBuilder::new();
        let x = b.independent(1.0);
        let s = b.mul(x, x);
        let all = b.gather(&[s], 0, 2);
        if rank == 0 {
            let y = b.add(all[0], all[1]);
            b.dependent(y);
        } else {
            // The receive slots are only filled on the root.
            b.dependent(s);
        }
        let tape = b.finish();

        let x = [1.0, 3.0][rank];
        let mut y = [0.0];
        let mut yd = [0.0];
        let out = tape.sweep().with_transport(&mut group).fos_forward(
            1,
            1,
            0,
            &[x],
            &[1.0],
            Some(&mut y),
            Some(&mut yd),
        );
        (out.status, y[0], yd[0])
    });
    assert_eq!(results[0], (Status::Smooth, 10.0, 8.0));
    assert_eq!(results[1], (Status::Smooth, 9.0, 6.0));
}

fn scatter_tape(rank: usize) -> Tape<f64> {
    let mut b = TapeBuilder::new();
    let xs: Vec<_> = if rank == 0 {
        (1..=4).map(|k| b.independent(k as f64)).collect()
    } else {
        Vec::new()
    };
    let part = b.scatter(0, &xs, 2);
    let y = b.mul(part[0], part[1]);
    b.dependent(y);
    b.finish()
}

#[test]
fn scatter_distributes_chunks() {
    let ys = spmd(2, |mut group| {
        let rank = group.rank();
        let x: &[f64] = if rank == 0 { &[1.0, 2.0, 3.0, 4.0] } else { &[] };
        let mut y = [0.0];
        let _ = scatter_tape(rank)
            .sweep()
            .with_transport(&mut group)
            .zos_forward(1, x.len(), 0, x, Some(&mut y));
        y[0]
    });
    assert_eq!(ys, vec![2.0, 12.0]);
}

#[test]
fn scatter_carries_index_domains() {
    let rows = spmd(2, |mut group| {
        let rank = group.rank();
        let n = if rank == 0 { 4 } else { 0 };
        let out = scatter_tape(rank)
            .sweep()
            .with_transport(&mut group)
            .indopro_forward_safe(1, n);
        out.rows[0].as_slice().to_vec()
    });
    // Rank 1 depends on the root's independents 2 and 3.
    assert_eq!(rows, vec![vec![0, 1], vec![2, 3]]);
}

#[test]
fn barrier_synchronizes() {
    let statuses = spmd(4, |mut group| {
        let mut b = TapeBuilder::new();
        let x = b.independent(1.0);
        b.barrier();
        let y = b.exp(x);
        b.dependent(y);
        let tape = b.finish();
        let out = tape
            .sweep()
            .with_transport(&mut group)
            .zos_forward(1, 1, 0, &[0.0], None);
        out.status
    });
    assert!(statuses.iter().all(|s| s.is_smooth()));
}

#[test]
#[should_panic(expected = "requires a transport")]
fn collective_without_transport_panics() {
    let mut b = TapeBuilder::new();
    let x = b.independent(1.0);
    b.barrier();
    b.dependent(x);
    let _ = b.finish().sweep().zos_forward(1, 1, 0, &[1.0], None);
}

/// A peer that always answers with `entries` plain values.
struct Chatty {
    entries: usize,
}

impl Collective for Chatty {
    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        2
    }
    fn send(&mut self, _: usize, _: u32, _: Frame) -> Result<(), TransportError> {
        Ok(())
    }
    fn receive(&mut self, _: usize, _: u32) -> Result<Frame, TransportError> {
        let mut w = FrameWriter::new(FrameKind::Values);
        for k in 0..self.entries {
            w.push(&(k as f64).to_bits().to_le_bytes());
        }
        Ok(w.finish())
    }
    fn broadcast(&mut self, _: usize, frame: Option<Frame>) -> Result<Frame, TransportError> {
        Ok(frame.unwrap_or_else(|| FrameWriter::new(FrameKind::Values).finish()))
    }
    fn gather(&mut self, _: usize, frame: Frame) -> Result<Option<Vec<Frame>>, TransportError> {
        Ok(Some(vec![frame]))
    }
    fn scatter(&mut self, _: usize, _: Option<Vec<Frame>>) -> Result<Frame, TransportError> {
        Ok(FrameWriter::new(FrameKind::Values).finish())
    }
    fn barrier(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

fn receive_one() -> Tape<f64> {
    let mut b = TapeBuilder::new();
    let x = b.independent(1.0);
    let r = b.receive(1, 1, 3);
    let y = b.add(r[0], x);
    b.dependent(y);
    b.finish()
}

#[test]
fn received_values_land_in_slots() {
    let mut peer = Chatty { entries: 1 };
    let mut y = [0.0];
    let out = receive_one()
        .sweep()
        .with_transport(&mut peer)
        .zos_forward(1, 1, 0, &[5.0], Some(&mut y));
    assert_eq!(out.status, Status::Smooth);
    assert_eq!(y[0], 5.0);
}

#[test]
#[should_panic(expected = "frame carries 2 entries, expected 1")]
fn entry_count_must_match_receive_slots() {
    let mut peer = Chatty { entries: 2 };
    let _ = receive_one()
        .sweep()
        .with_transport(&mut peer)
        .zos_forward(1, 1, 0, &[5.0], None);
}
