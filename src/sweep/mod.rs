//! Forward sweeps over a recorded [`Tape`].
//!
//! A single interpreter ([`engine`]) replays the tape and delegates every
//! derivative effect to a *lane* kind chosen by the entry point:
//!
//! | entry point | order | width | domain |
//! |---|---|---|---|
//! | [`zos_forward`](SweepContext::zos_forward) | zero | – | real |
//! | [`fos_forward`](SweepContext::fos_forward) | first | scalar | real |
//! | [`hos_forward`](SweepContext::hos_forward) | higher | scalar | real |
//! | [`fov_forward`](SweepContext::fov_forward) | first | vector | real |
//! | [`hov_forward`](SweepContext::hov_forward), [`hov_wk_forward`](SweepContext::hov_wk_forward) | higher | vector | real |
//! | [`int_forward_tight`](SweepContext::int_forward_tight), [`int_forward_safe`](SweepContext::int_forward_safe) | first | vector | bit pattern |
//! | [`indopro_forward_tight`](SweepContext::indopro_forward_tight), [`nonl_ind_forward_tight`](SweepContext::nonl_ind_forward_tight) (and `_safe`) | – | – | index set |
//!
//! Every sweep returns a [`Status`]; only driver/tape mismatches panic.

use std::fmt;

use crate::external::ExternalRegistry;
use crate::float::Float;
use crate::index_set::IndexSet;
use crate::keep::Checkpoint;
use crate::status::Status;
use crate::tape::Tape;
use crate::transport::Collective;

mod bits;
mod engine;
mod index;
mod lanes;
mod taylor;
mod zero;

#[cfg(feature = "parallel")]
mod parallel;

/// Runtime switches for a sweep.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SweepOptions {
    /// Emit a `tracing` warning when a branch check fails.
    pub branch_switch_warning: bool,
    /// Track written locations and panic on reads of never-written ones.
    pub sentinel_check: bool,
    /// Initial capacity of each nonlinearity-domain row.
    pub index_capacity: usize,
}

impl Default for SweepOptions {
    fn default() -> Self {
        SweepOptions {
            branch_switch_warning: true,
            sentinel_check: cfg!(debug_assertions),
            index_capacity: 20,
        }
    }
}

/// Derivative order propagated by a sweep.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Order {
    Zero,
    First,
    /// Taylor coefficients `1..=d`.
    Higher(usize),
}

/// Number of simultaneous directions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Width {
    Scalar,
    Vector(usize),
}

/// What is carried alongside (or instead of) the values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Domain {
    Real,
    /// `u64` dependence words. `tight` sweeps also evaluate values.
    BitPattern { tight: bool },
    /// Sorted index sets, optionally with nonlinear interaction rows.
    IndexSet { tight: bool, nonlinear: bool },
}

/// Full sweep descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mode {
    pub order: Order,
    pub width: Width,
    pub domain: Domain,
    pub keep: usize,
}

impl Mode {
    /// Highest Taylor degree carried per direction.
    pub fn degree(&self) -> usize {
        match self.order {
            Order::Zero => 0,
            Order::First => 1,
            Order::Higher(d) => d,
        }
    }

    pub fn directions(&self) -> usize {
        match self.width {
            Width::Scalar => 1,
            Width::Vector(p) => p,
        }
    }

    /// Whether zero-order values are evaluated.
    pub fn is_tight(&self) -> bool {
        match self.domain {
            Domain::Real => true,
            Domain::BitPattern { tight } | Domain::IndexSet { tight, .. } => tight,
        }
    }

    /// Largest `keep` this mode can honour.
    pub fn max_keep(&self) -> usize {
        match (self.domain, self.order, self.width) {
            (Domain::Real, Order::Zero, _) => 1,
            (Domain::Real, Order::First, Width::Scalar) => 2,
            (Domain::Real, Order::Higher(d), _) => d + 1,
            _ => 0,
        }
    }

    /// Conventional short name, used in diagnostics.
    pub fn name(&self) -> &'static str {
        match (self.domain, self.order, self.width) {
            (Domain::Real, Order::Zero, _) => "zos",
            (Domain::Real, Order::First, Width::Scalar) => "fos",
            (Domain::Real, Order::Higher(_), Width::Scalar) => "hos",
            (Domain::Real, Order::First, Width::Vector(_)) => "fov",
            (Domain::Real, Order::Higher(_), Width::Vector(_)) if self.keep > 0 => "hov_wk",
            (Domain::Real, Order::Higher(_), Width::Vector(_)) => "hov",
            (Domain::BitPattern { tight: true }, ..) => "int_tight",
            (Domain::BitPattern { tight: false }, ..) => "int_safe",
            (Domain::IndexSet { tight: true, nonlinear: false }, ..) => "indopro_tight",
            (Domain::IndexSet { tight: false, nonlinear: false }, ..) => "indopro_safe",
            (Domain::IndexSet { tight: true, nonlinear: true }, ..) => "nonl_ind_tight",
            (Domain::IndexSet { tight: false, nonlinear: true }, ..) => "nonl_ind_safe",
        }
    }

    /// # Panics
    ///
    /// If `keep` exceeds [`max_keep`](Self::max_keep).
    pub(crate) fn check_keep(&self) {
        assert!(
            self.keep <= self.max_keep(),
            "{} forward sweep supports keep <= {}, got {}",
            self.name(),
            self.max_keep(),
            self.keep
        );
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (degree {}, directions {}, keep {})",
            self.name(),
            self.degree(),
            self.directions(),
            self.keep
        )
    }
}

/// Result of a real-valued or bit-pattern sweep.
#[derive(Debug)]
#[must_use]
pub struct Outcome<F: Float> {
    pub status: Status,
    /// Present when the sweep ran with `keep > 0`.
    pub checkpoint: Option<Checkpoint<F>>,
}

/// Result of an index-domain sweep.
#[derive(Clone, Debug)]
#[must_use]
pub struct IndexOutcome {
    pub status: Status,
    /// One row per dependent (`indopro`) or per independent (`nonl_ind`).
    pub rows: Vec<IndexSet>,
}

/// Everything one sweep needs besides its inputs.
///
/// Built per call and consumed by the entry point, so each sweep owns its
/// buffers for exactly its own duration.
pub struct SweepContext<'a, F: Float> {
    tape: &'a Tape<F>,
    options: SweepOptions,
    externals: Option<&'a mut ExternalRegistry<F>>,
    transport: Option<&'a mut dyn Collective>,
}

impl<'a, F: Float> SweepContext<'a, F> {
    pub fn new(tape: &'a Tape<F>) -> Self {
        SweepContext {
            tape,
            options: SweepOptions::default(),
            externals: None,
            transport: None,
        }
    }

    pub fn with_options(mut self, options: SweepOptions) -> Self {
        self.options = options;
        self
    }

    /// Functions called by [`OpCode::ExtDiff`](crate::OpCode::ExtDiff).
    pub fn with_externals(mut self, registry: &'a mut ExternalRegistry<F>) -> Self {
        self.externals = Some(registry);
        self
    }

    /// Peer group used by the collective opcodes.
    pub fn with_transport(mut self, transport: &'a mut dyn Collective) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn tape(&self) -> &'a Tape<F> {
        self.tape
    }

    pub fn options(&self) -> &SweepOptions {
        &self.options
    }
}

impl<F: Float> Tape<F> {
    /// Start configuring a sweep over this tape.
    pub fn sweep(&self) -> SweepContext<'_, F> {
        SweepContext::new(self)
    }
}

/// # Panics
///
/// If `buf` is present and shorter than `len`.
fn check_len<T>(what: &str, buf: Option<&[T]>, len: usize) {
    if let Some(b) = buf {
        assert!(
            b.len() >= len,
            "{what} buffer too short: need {len}, got {}",
            b.len()
        );
    }
}
