//! Forward-sweep interpreters for recorded AD tapes.
//!
//! A [`Tape`] is replayed by one generic engine in any of its modes:
//! plain values, first- and higher-order Taylor coefficients along one or
//! many directions, dependence bit patterns, and index-domain sparsity.
//! Start from [`Tape::sweep`].

pub mod error;
pub mod external;
pub mod float;
pub mod index_set;
pub mod keep;
pub mod opcode;
pub mod status;
pub mod sweep;
pub mod tape;
pub mod taylor_ops;
pub mod transport;

pub use error::{FrameError, TapeError, TransportError};
pub use external::{ExternalFunction, ExternalRegistry, FnExternal};
pub use float::Float;
pub use index_set::{IndexSet, NonlinearDomain};
pub use keep::{Checkpoint, Snapshot};
pub use opcode::OpCode;
pub use status::Status;
pub use sweep::{Domain, IndexOutcome, Mode, Order, Outcome, SweepContext, SweepOptions, Width};
pub use tape::{Slot, Tape, TapeBuilder, TapeReader, TapeStats};
pub use transport::{Collective, Frame, FrameKind, LocalGroup};

/// Type alias for tapes over `f64`.
pub type Tape64 = Tape<f64>;
/// Type alias for tapes over `f32`.
pub type Tape32 = Tape<f32>;
