//! Bitset primitives.
//!
//! `BitSet` is a growable bitset over small non-negative integers, used for
//! active-row tracking. `FieldBitSet` wraps it with field-id semantics and
//! serves two roles in the engine:
//!
//! - the changed-field set attached to a `rows_changed` notification
//!   (batch-wide, not per-row), and
//! - the dependency set a predicate or calculation builds when binding to a
//!   schema, recording which inbound field ids can affect its result.

use alloc::vec::Vec;

const BITS: usize = 64;

/// A growable bitset over small non-negative integers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BitSet {
    blocks: Vec<u64>,
    len: usize,
}

impl BitSet {
    /// Creates a new empty bitset.
    pub fn new() -> Self {
        Self {
            blocks: Vec::new(),
            len: 0,
        }
    }

    /// Sets the bit at `index`, returning true if it was newly set.
    pub fn insert(&mut self, index: usize) -> bool {
        let block = index / BITS;
        if block >= self.blocks.len() {
            self.blocks.resize(block + 1, 0);
        }
        let mask = 1u64 << (index % BITS);
        if self.blocks[block] & mask == 0 {
            self.blocks[block] |= mask;
            self.len += 1;
            true
        } else {
            false
        }
    }

    /// Clears the bit at `index`, returning true if it was set.
    pub fn remove(&mut self, index: usize) -> bool {
        let block = index / BITS;
        if block >= self.blocks.len() {
            return false;
        }
        let mask = 1u64 << (index % BITS);
        if self.blocks[block] & mask != 0 {
            self.blocks[block] &= !mask;
            self.len -= 1;
            true
        } else {
            false
        }
    }

    /// Returns whether the bit at `index` is set.
    pub fn contains(&self, index: usize) -> bool {
        let block = index / BITS;
        block < self.blocks.len() && self.blocks[block] & (1u64 << (index % BITS)) != 0
    }

    /// Returns the number of set bits.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if no bit is set.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns whether any bit is set in both this and `other`.
    pub fn intersects(&self, other: &BitSet) -> bool {
        let n = self.blocks.len().min(other.blocks.len());
        for i in 0..n {
            if self.blocks[i] & other.blocks[i] != 0 {
                return true;
            }
        }
        false
    }

    /// Sets every bit that is set in `other`.
    pub fn union_with(&mut self, other: &BitSet) {
        other.for_each(|i| {
            self.insert(i);
        });
    }

    /// Clears all bits.
    pub fn clear(&mut self) {
        self.blocks.clear();
        self.len = 0;
    }

    /// Calls `f` with each set index, in ascending order.
    pub fn for_each(&self, mut f: impl FnMut(usize)) {
        for (b, &bits) in self.blocks.iter().enumerate() {
            let mut rest = bits;
            while rest != 0 {
                let bit = rest.trailing_zeros() as usize;
                f(b * BITS + bit);
                rest &= rest - 1;
            }
        }
    }

    /// Collects the set indexes into a vector, in ascending order.
    pub fn to_vec(&self) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.len);
        self.for_each(|i| out.push(i));
        out
    }
}

/// A bitset over field ids.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FieldBitSet {
    bits: BitSet,
}

impl FieldBitSet {
    /// Creates an empty field bitset.
    pub fn new() -> Self {
        Self { bits: BitSet::new() }
    }

    /// Creates a field bitset containing the given field ids.
    pub fn of(field_ids: &[usize]) -> Self {
        let mut set = Self::new();
        for &id in field_ids {
            set.field_changed(id);
        }
        set
    }

    /// Marks the field id as changed.
    #[inline]
    pub fn field_changed(&mut self, field_id: usize) {
        self.bits.insert(field_id);
    }

    /// Returns whether the field id is marked.
    #[inline]
    pub fn contains(&self, field_id: usize) -> bool {
        self.bits.contains(field_id)
    }

    /// Returns whether any field id is marked in both sets.
    #[inline]
    pub fn intersects(&self, other: &FieldBitSet) -> bool {
        self.bits.intersects(&other.bits)
    }

    /// Marks every field id marked in `other`.
    #[inline]
    pub fn union_with(&mut self, other: &FieldBitSet) {
        self.bits.union_with(&other.bits);
    }

    /// Returns true if no field id is marked.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Clears all marks.
    #[inline]
    pub fn clear(&mut self) {
        self.bits.clear();
    }

    /// Calls `f` with each marked field id, ascending.
    #[inline]
    pub fn for_each(&self, f: impl FnMut(usize)) {
        self.bits.for_each(f);
    }
}
