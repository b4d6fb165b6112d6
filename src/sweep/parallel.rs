use rayon::prelude::*;

use crate::float::Float;
use crate::status::Status;
use crate::tape::Tape;

impl<F: Float> Tape<F> {
    /// Zero-order sweep at every point, in parallel.
    ///
    /// Each sweep builds its own context and buffers; only the tape is
    /// shared. Returns `(status, y)` per point, in input order.
    ///
    /// # Panics
    ///
    /// If a point has the wrong length, or if the tape calls external
    /// functions or collectives (no registry or transport is attached).
    pub fn zos_forward_batch_par(&self, points: &[Vec<F>]) -> Vec<(Status, Vec<F>)> {
        let (m, n) = (self.num_dependents(), self.num_independents());
        points
            .par_iter()
            .map(|x| {
                assert_eq!(x.len(), n, "wrong number of independents");
                let mut y = vec![F::zero(); m];
                let out = self.sweep().zos_forward(m, n, 0, x, Some(&mut y));
                (out.status, y)
            })
            .collect()
    }

    /// First-order sweep for every `(x, xd)` pair, in parallel.
    ///
    /// Returns `(status, y, yd)` per pair, in input order.
    pub fn fos_forward_batch_par(&self, points: &[(Vec<F>, Vec<F>)]) -> Vec<(Status, Vec<F>, Vec<F>)> {
        let (m, n) = (self.num_dependents(), self.num_independents());
        points
            .par_iter()
            .map(|(x, xd)| {
                assert_eq!(x.len(), n, "wrong number of independents");
                assert_eq!(xd.len(), n, "wrong number of tangent components");
                let mut y = vec![F::zero(); m];
                let mut yd = vec![F::zero(); m];
                let out = self
                    .sweep()
                    .fos_forward(m, n, 0, x, xd, Some(&mut y), Some(&mut yd));
                (out.status, y, yd)
            })
            .collect()
    }
}
