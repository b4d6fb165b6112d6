//! Checkpoint log written by forward sweeps that run with `keep > 0`.
//!
//! Before a location is overwritten, its current value (and with `keep > 1`
//! the first `keep - 1` Taylor coefficients of every direction) is appended
//! to the log. A reverse sweep consumes the closed [`Checkpoint`] back to
//! front to restore intermediate states.
//!
//! Two-output operations log their companion slot first: `sin`/`cos` write
//! the covalue snapshot, then the result.

use crate::float::Float;

/// Open log for one sweep.
pub(crate) struct KeepLog<F: Float> {
    keep: usize,
    stride: usize,
    locations: Vec<u32>,
    values: Vec<F>,
    coefficients: Vec<F>,
}

impl<F: Float> KeepLog<F> {
    /// Open a log. `directions` is the number of derivative directions
    /// carried per location; `capacity_hint` is a snapshot count estimate.
    pub(crate) fn begin(keep: usize, directions: usize, capacity_hint: usize) -> Self {
        let stride = directions * keep.saturating_sub(1);
        KeepLog {
            keep,
            stride,
            locations: Vec::with_capacity(capacity_hint),
            values: Vec::with_capacity(capacity_hint),
            coefficients: Vec::with_capacity(capacity_hint * stride),
        }
    }

    /// Coefficients recorded per direction.
    #[inline]
    pub(crate) fn degree(&self) -> usize {
        self.keep.saturating_sub(1)
    }

    /// Append one snapshot. `coefficients` must yield exactly
    /// `directions * (keep - 1)` items, direction-major.
    pub(crate) fn snapshot(&mut self, location: usize, value: F, coefficients: &[F]) {
        debug_assert_eq!(coefficients.len(), self.stride);
        self.locations.push(location as u32);
        self.values.push(value);
        self.coefficients.extend_from_slice(coefficients);
    }

    /// Close the log.
    pub(crate) fn end(self) -> Checkpoint<F> {
        Checkpoint {
            keep: self.keep,
            stride: self.stride,
            locations: self.locations,
            values: self.values,
            coefficients: self.coefficients,
        }
    }
}

/// Closed checkpoint log, in write order.
#[derive(Clone, Debug, PartialEq)]
pub struct Checkpoint<F: Float> {
    keep: usize,
    stride: usize,
    locations: Vec<u32>,
    values: Vec<F>,
    coefficients: Vec<F>,
}

/// One checkpoint entry.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Snapshot<'a, F> {
    pub location: u32,
    pub value: F,
    /// Direction-major, `keep - 1` coefficients per direction.
    pub coefficients: &'a [F],
}

impl<F: Float> Checkpoint<F> {
    pub fn keep(&self) -> usize {
        self.keep
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<Snapshot<'_, F>> {
        let location = *self.locations.get(i)?;
        Some(Snapshot {
            location,
            value: self.values[i],
            coefficients: &self.coefficients[i * self.stride..(i + 1) * self.stride],
        })
    }

    /// Entries in write order. Reverse it to replay for an adjoint sweep.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = Snapshot<'_, F>> + ExactSizeIterator + '_ {
        (0..self.len()).map(move |i| Snapshot {
            location: self.locations[i],
            value: self.values[i],
            coefficients: &self.coefficients[i * self.stride..(i + 1) * self.stride],
        })
    }

    /// Snapshotted locations, in write order.
    pub fn locations(&self) -> &[u32] {
        &self.locations
    }
}
