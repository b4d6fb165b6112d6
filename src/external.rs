//! User-supplied differentiated functions called from the tape.
//!
//! An [`OpCode::ExtDiff`](crate::OpCode::ExtDiff) instruction names a
//! registry index and two contiguous slot ranges. The sweep copies the
//! argument and result slots out, calls the function, folds the returned
//! status into the sweep status, and writes both ranges back (snapshotting
//! them first when keeping).

use crate::float::Float;
use crate::status::Status;

/// Capability contract for an externally differentiated function.
///
/// `x` holds the `n` argument values and may be updated in place; `y`
/// receives the `m` results.
pub trait ExternalFunction<F: Float>: Send {
    /// Zero-order evaluation.
    fn evaluate(&mut self, x: &mut [F], y: &mut [F]) -> Status;

    /// Evaluation with derivative lanes.
    ///
    /// `xt` and `yt` hold `lanes` coefficients per argument/result, laid out
    /// `[slot][direction][degree]`. First-order scalar sweeps pass
    /// `lanes == 1`.
    fn forward(
        &mut self,
        x: &mut [F],
        xt: &mut [F],
        y: &mut [F],
        yt: &mut [F],
        lanes: usize,
    ) -> Status;
}

/// Closure adapter for functions that only need zero-order evaluation and
/// a first-order rule expressed as a Jacobian-vector product.
pub struct FnExternal<E, J> {
    eval: E,
    jvp: J,
}

impl<E, J> FnExternal<E, J> {
    /// `eval(x, y)` computes values; `jvp(x, dx, dy)` maps one tangent
    /// direction of the arguments to the results.
    pub fn new(eval: E, jvp: J) -> Self {
        FnExternal { eval, jvp }
    }
}

impl<F, E, J> ExternalFunction<F> for FnExternal<E, J>
where
    F: Float,
    E: FnMut(&[F], &mut [F]) + Send,
    J: FnMut(&[F], &[F], &mut [F]) + Send,
{
    fn evaluate(&mut self, x: &mut [F], y: &mut [F]) -> Status {
        (self.eval)(x, y);
        Status::Smooth
    }

    /// Applies the Jacobian-vector product per lane. Only exact for
    /// first-order lanes; higher-degree lanes are linearized.
    fn forward(&mut self, x: &mut [F], xt: &mut [F], y: &mut [F], yt: &mut [F], lanes: usize) -> Status {
        (self.eval)(x, y);
        let n = x.len();
        let m = y.len();
        let mut dx = vec![F::zero(); n];
        let mut dy = vec![F::zero(); m];
        for lane in 0..lanes {
            for i in 0..n {
                dx[i] = xt[i * lanes + lane];
            }
            (self.jvp)(x, &dx, &mut dy);
            for j in 0..m {
                yt[j * lanes + lane] = dy[j];
            }
        }
        Status::Smooth
    }
}

/// Table of external functions addressed by the index stored on the tape.
pub struct ExternalRegistry<F: Float> {
    functions: Vec<Box<dyn ExternalFunction<F>>>,
}

impl<F: Float> Default for ExternalRegistry<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: Float> ExternalRegistry<F> {
    pub fn new() -> Self {
        ExternalRegistry {
            functions: Vec::new(),
        }
    }

    /// Register `f` and return the index to record on the tape.
    pub fn register(&mut self, f: impl ExternalFunction<F> + 'static) -> usize {
        self.functions.push(Box::new(f));
        self.functions.len() - 1
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn function_mut(&mut self, index: usize) -> Option<&mut (dyn ExternalFunction<F> + 'static)> {
        self.functions.get_mut(index).map(|f| f.as_mut())
    }

    /// # Panics
    ///
    /// If nothing is registered under `index`. A tape that calls an
    /// unregistered function cannot be replayed meaningfully.
    pub(crate) fn get_mut(&mut self, index: usize) -> &mut (dyn ExternalFunction<F> + 'static) {
        match self.function_mut(index) {
            Some(f) => f,
            None => panic!("no external function registered under index {index}"),
        }
    }
}
