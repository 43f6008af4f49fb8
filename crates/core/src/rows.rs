//! Row-index primitives.
//!
//! Row ids are dense non-negative integers, unique within one operator's
//! output rowspace while active. The structures here keep the engine free of
//! pointer graphs: everything is arena-indexed by small integer ids with
//! explicit free-lists.
//!
//! - `RowAllocator` hands out row ids and recycles released ones.
//! - `IndexedRowSet` maps arbitrary row keys to dense entry ids, with a
//!   reserve step so a removed entry's id is not reused until the removal
//!   has been delivered downstream.
//! - `OneToMany` is a compact one-to-many map (left key to many right rows)
//!   with O(1) append and removal, backing union row mapping and group
//!   membership.

use alloc::vec::Vec;
use hashbrown::HashMap;

/// Dense row identifier within one operator's output rowspace.
pub type RowId = usize;

/// Dense field identifier within one schema.
pub type FieldId = usize;

/// A free-list row id allocator.
///
/// Released ids are reused before new ids are minted. Callers must only
/// release an id after its removal has been delivered downstream.
#[derive(Clone, Debug, Default)]
pub struct RowAllocator {
    next: RowId,
    free: Vec<RowId>,
}

impl RowAllocator {
    /// Creates a new allocator starting at row 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a row id, reusing a released id when one is available.
    pub fn allocate(&mut self) -> RowId {
        if let Some(row) = self.free.pop() {
            row
        } else {
            let row = self.next;
            self.next += 1;
            row
        }
    }

    /// Returns a row id to the free-list.
    pub fn release(&mut self, row: RowId) {
        self.free.push(row);
    }

    /// Discards all state, restarting at row 0.
    pub fn reset(&mut self) {
        self.next = 0;
        self.free.clear();
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EntryState {
    Active,
    Reserved,
    Free,
}

/// A set of row keys indexed by dense entry ids.
///
/// `add` assigns each new key the lowest free entry id; the entry id is
/// stable until the key is removed. `remove_and_reserve` detaches the key
/// but keeps the entry id out of circulation until `free_reserved` is
/// called, which operators do only after the corresponding remove
/// notification has been fired.
#[derive(Clone, Debug, Default)]
pub struct IndexedRowSet {
    keys: Vec<RowId>,
    states: Vec<EntryState>,
    index: HashMap<RowId, usize>,
    free: Vec<usize>,
    len: usize,
}

impl IndexedRowSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a key, returning its entry id. Returns the existing entry id if
    /// the key is already present.
    pub fn add(&mut self, key: RowId) -> usize {
        if let Some(&entry) = self.index.get(&key) {
            return entry;
        }
        let entry = match self.free.pop() {
            Some(entry) => {
                self.keys[entry] = key;
                self.states[entry] = EntryState::Active;
                entry
            }
            None => {
                self.keys.push(key);
                self.states.push(EntryState::Active);
                self.keys.len() - 1
            }
        };
        self.index.insert(key, entry);
        self.len += 1;
        entry
    }

    /// Returns the entry id for a key, if present.
    pub fn entry_of(&self, key: RowId) -> Option<usize> {
        self.index.get(&key).copied()
    }

    /// Returns whether the key is present.
    pub fn contains(&self, key: RowId) -> bool {
        self.index.contains_key(&key)
    }

    /// Returns the key stored at an entry id.
    ///
    /// Valid for active and reserved entries.
    pub fn key_at(&self, entry: usize) -> RowId {
        self.keys[entry]
    }

    /// Removes a key and immediately frees its entry id for reuse.
    pub fn remove(&mut self, key: RowId) -> Option<usize> {
        let entry = self.index.remove(&key)?;
        self.states[entry] = EntryState::Free;
        self.free.push(entry);
        self.len -= 1;
        Some(entry)
    }

    /// Removes the key at an entry id but keeps the entry id reserved.
    pub fn remove_and_reserve(&mut self, entry: usize) {
        debug_assert_eq!(self.states[entry], EntryState::Active);
        self.index.remove(&self.keys[entry]);
        self.states[entry] = EntryState::Reserved;
        self.len -= 1;
    }

    /// Releases a reserved entry id back to the free-list.
    pub fn free_reserved(&mut self, entry: usize) {
        debug_assert_eq!(self.states[entry], EntryState::Reserved);
        self.states[entry] = EntryState::Free;
        self.free.push(entry);
    }

    /// Returns the number of active keys.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if there are no active keys.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Calls `f` with each active entry id, ascending.
    pub fn for_each_entry(&self, mut f: impl FnMut(usize)) {
        for (entry, state) in self.states.iter().enumerate() {
            if *state == EntryState::Active {
                f(entry);
            }
        }
    }

    /// Removes everything, forgetting reserved entries as well.
    pub fn clear(&mut self) {
        self.keys.clear();
        self.states.clear();
        self.index.clear();
        self.free.clear();
        self.len = 0;
    }
}

#[derive(Clone, Debug)]
struct ManyEntry {
    left: usize,
    right: RowId,
    prev: Option<usize>,
    next: Option<usize>,
}

/// A compact one-to-many map from a left key to many right rows.
///
/// Entries are arena-indexed by dense entry ids (the union operator uses
/// the entry id directly as its outbound row id). Each left key's entries
/// form a doubly linked chain through the arena, so appending and removing
/// a known (left, right) pair are O(1), and iterating one left key's
/// members touches only that chain.
#[derive(Clone, Debug, Default)]
pub struct OneToMany {
    entries: Vec<ManyEntry>,
    states: Vec<EntryState>,
    index: HashMap<(usize, RowId), usize>,
    heads: Vec<Option<usize>>,
    counts: Vec<usize>,
    free: Vec<usize>,
    len: usize,
}

impl OneToMany {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps (left, right), returning the entry id. Returns the existing
    /// entry id if the pair is already mapped.
    pub fn put(&mut self, left: usize, right: RowId) -> usize {
        if let Some(&entry) = self.index.get(&(left, right)) {
            return entry;
        }
        if left >= self.heads.len() {
            self.heads.resize(left + 1, None);
            self.counts.resize(left + 1, 0);
        }
        let head = self.heads[left];
        let record = ManyEntry {
            left,
            right,
            prev: None,
            next: head,
        };
        let entry = match self.free.pop() {
            Some(entry) => {
                self.entries[entry] = record;
                self.states[entry] = EntryState::Active;
                entry
            }
            None => {
                self.entries.push(record);
                self.states.push(EntryState::Active);
                self.entries.len() - 1
            }
        };
        if let Some(head) = head {
            self.entries[head].prev = Some(entry);
        }
        self.heads[left] = Some(entry);
        self.counts[left] += 1;
        self.index.insert((left, right), entry);
        self.len += 1;
        entry
    }

    /// Returns the entry id for (left, right), if mapped.
    pub fn entry_of(&self, left: usize, right: RowId) -> Option<usize> {
        self.index.get(&(left, right)).copied()
    }

    /// Returns the left key of an entry. Valid for active and reserved
    /// entries.
    pub fn left_at(&self, entry: usize) -> usize {
        self.entries[entry].left
    }

    /// Returns the right row of an entry. Valid for active and reserved
    /// entries.
    pub fn right_at(&self, entry: usize) -> RowId {
        self.entries[entry].right
    }

    /// Returns the number of rows mapped under a left key.
    pub fn count(&self, left: usize) -> usize {
        self.counts.get(left).copied().unwrap_or(0)
    }

    /// Returns the total number of active entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if no pair is mapped.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Unmaps (left, right) but keeps the entry id reserved until
    /// `free_reserved`.
    pub fn remove_and_reserve(&mut self, left: usize, right: RowId) -> Option<usize> {
        let entry = self.index.remove(&(left, right))?;
        self.unlink(entry);
        self.states[entry] = EntryState::Reserved;
        self.counts[left] -= 1;
        self.len -= 1;
        Some(entry)
    }

    /// Releases a reserved entry id back to the free-list.
    pub fn free_reserved(&mut self, entry: usize) {
        debug_assert_eq!(self.states[entry], EntryState::Reserved);
        self.states[entry] = EntryState::Free;
        self.free.push(entry);
    }

    fn unlink(&mut self, entry: usize) {
        let (prev, next, left) = {
            let e = &self.entries[entry];
            (e.prev, e.next, e.left)
        };
        match prev {
            Some(p) => self.entries[p].next = next,
            None => self.heads[left] = next,
        }
        if let Some(n) = next {
            self.entries[n].prev = prev;
        }
    }

    /// Calls `f` with each right row mapped under a left key.
    pub fn for_each_right(&self, left: usize, mut f: impl FnMut(RowId)) {
        let mut cursor = self.heads.get(left).copied().flatten();
        while let Some(entry) = cursor {
            f(self.entries[entry].right);
            cursor = self.entries[entry].next;
        }
    }

    /// Calls `f` with each active (entry, left, right), ascending by entry.
    pub fn for_each_entry(&self, mut f: impl FnMut(usize, usize, RowId)) {
        for (entry, state) in self.states.iter().enumerate() {
            if *state == EntryState::Active {
                let e = &self.entries[entry];
                f(entry, e.left, e.right);
            }
        }
    }

    /// Removes everything, forgetting reserved entries as well.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.states.clear();
        self.index.clear();
        self.heads.clear();
        self.counts.clear();
        self.free.clear();
        self.len = 0;
    }
}
