//! Sorted index sets for sparsity propagation.
//!
//! An [`IndexSet`] holds the independent-variable indices that influence a
//! location. Propagation only ever copies or merges sets, so along any chain
//! of operations a set never loses an index. Capacity grows to twice the
//! merged size whenever a merge overflows, giving amortized linear growth.

/// Sorted, deduplicated set of independent indices.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IndexSet {
    items: Vec<u32>,
}

impl IndexSet {
    pub fn new() -> Self {
        IndexSet { items: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        IndexSet {
            items: Vec::with_capacity(capacity),
        }
    }

    pub fn singleton(index: u32) -> Self {
        let mut s = Self::new();
        s.items.push(index);
        s
    }

    /// Build from arbitrary indices (sorted and deduplicated here).
    pub fn from_indices(mut indices: Vec<u32>) -> Self {
        indices.sort_unstable();
        indices.dedup();
        IndexSet { items: indices }
    }

    #[inline]
    pub fn as_slice(&self) -> &[u32] {
        &self.items
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.items.capacity()
    }

    pub fn contains(&self, index: u32) -> bool {
        self.items.binary_search(&index).is_ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.items.iter().copied()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// `self = {index}`
    pub fn reset_to(&mut self, index: u32) {
        self.items.clear();
        self.items.push(index);
    }

    /// `self = other`, reusing the allocation.
    pub fn copy_from(&mut self, other: &IndexSet) {
        self.items.clear();
        self.grow_to(other.len());
        self.items.extend_from_slice(&other.items);
    }

    /// `self ∪= other`
    ///
    /// Counts the union first, then merges from the back in place so no
    /// temporary is needed.
    pub fn union_with(&mut self, other: &[u32]) {
        if other.is_empty() {
            return;
        }
        let old = self.items.len();
        let total = union_len(&self.items, other);
        if total == old {
            return;
        }
        self.grow_to(total);
        self.items.resize(total, 0);

        let (mut i, mut j, mut k) = (old, other.len(), total);
        while j > 0 {
            k -= 1;
            if i > 0 && self.items[i - 1] > other[j - 1] {
                self.items[k] = self.items[i - 1];
                i -= 1;
            } else if i > 0 && self.items[i - 1] == other[j - 1] {
                self.items[k] = other[j - 1];
                i -= 1;
                j -= 1;
            } else {
                self.items[k] = other[j - 1];
                j -= 1;
            }
        }
    }

    /// `self = a ∪ b`
    pub fn union_of(&mut self, a: &[u32], b: &[u32]) {
        self.items.clear();
        self.grow_to(a.len() + b.len());
        self.items.extend_from_slice(a);
        self.union_with(b);
    }

    /// Capacity policy: when `needed` exceeds capacity, reserve `2 * needed`.
    fn grow_to(&mut self, needed: usize) {
        if needed > self.items.capacity() {
            self.items.reserve_exact(2 * needed - self.items.len());
        }
    }
}

impl FromIterator<u32> for IndexSet {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        IndexSet::from_indices(iter.into_iter().collect())
    }
}

/// Size of `a ∪ b` for two sorted, deduplicated slices.
fn union_len(a: &[u32], b: &[u32]) -> usize {
    let (mut i, mut j, mut n) = (0, 0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                i += 1;
                j += 1;
            }
        }
        n += 1;
    }
    n + (a.len() - i) + (b.len() - j)
}

/// Per-independent sets of other independents it interacts with nonlinearly.
///
/// Row `i` collects every `j` such that some operation on the tape is not
/// affine in the pair `(x_i, x_j)`; these are the potential nonzeros of row
/// `i` of the Hessian.
#[derive(Clone, Debug, Default)]
pub struct NonlinearDomain {
    rows: Vec<IndexSet>,
}

impl NonlinearDomain {
    pub fn new(num_independents: usize, capacity: usize) -> Self {
        NonlinearDomain {
            rows: (0..num_independents)
                .map(|_| IndexSet::with_capacity(capacity))
                .collect(),
        }
    }

    /// For each `i ∈ a`: `row[i] ∪= b`; and symmetrically for `b`.
    pub fn extend_binary(&mut self, a: &IndexSet, b: &IndexSet) {
        self.extend_step(a, b);
        self.extend_step(b, a);
    }

    /// For each `i ∈ a`: `row[i] ∪= a`.
    pub fn extend_unary(&mut self, a: &IndexSet) {
        self.extend_step(a, a);
    }

    fn extend_step(&mut self, from: &IndexSet, with: &IndexSet) {
        for i in from.iter() {
            self.rows[i as usize].union_with(with.as_slice());
        }
    }

    pub fn row(&self, i: usize) -> &IndexSet {
        &self.rows[i]
    }

    pub fn into_rows(self) -> Vec<IndexSet> {
        self.rows
    }
}
