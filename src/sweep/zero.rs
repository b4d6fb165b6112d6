use crate::float::Float;

use super::engine::Engine;
use super::lanes::NoLanes;
use super::{check_len, Domain, Mode, Order, Outcome, SweepContext, Width};

impl<'a, F: Float> SweepContext<'a, F> {
    /// Zero-order sweep: re-evaluate the tape at `x`.
    ///
    /// With `keep == 1` every value is checkpointed before it is overwritten,
    /// which is what a first-order reverse sweep needs.
    ///
    /// # Panics
    ///
    /// If `m`/`n` disagree with the tape, if `keep > 1`, or if a buffer is
    /// shorter than its declared count.
    pub fn zos_forward(
        self,
        m: usize,
        n: usize,
        keep: usize,
        x: &[F],
        y: Option<&mut [F]>,
    ) -> Outcome<F> {
        self.tape.check_counts(m, n);
        check_len("x", Some(x), n);
        check_len("y", y.as_deref(), m);
        let mode = Mode {
            order: Order::Zero,
            width: Width::Scalar,
            domain: Domain::Real,
            keep,
        };
        let done = Engine::new(self, mode, NoLanes).run(Some(x), y);
        Outcome {
            status: done.status,
            checkpoint: done.checkpoint,
        }
    }
}
