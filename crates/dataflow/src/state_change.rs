//! Per-firing accumulators for staged row changes.
//!
//! Operators stage added/changed/removed row ids (and the batch-wide
//! changed-field set) while processing, then flush everything through
//! their `OutputManager` in one firing with a fixed order: removes, then
//! adds, then changes. After the remove notification has gone out, removed
//! row ids are handed back through a release callback so the operator's
//! allocator can recycle them - never before, since a consumer must see
//! the remove before the id reappears.

use crate::output::OutputManager;
use alloc::vec::Vec;
use rowflow_core::{FieldBitSet, FieldId, IndexedRowSet, RowId};

/// Simple per-firing accumulator.
///
/// Does not guard against a row appearing in more than one bucket; the
/// caller must ensure a row id is staged at most once per firing, using
/// `cancel_add`/`cancel_change` when a staged row is removed before the
/// firing goes out.
#[derive(Debug, Default)]
pub struct StateChange {
    added: Vec<RowId>,
    changed: Vec<RowId>,
    removed: Vec<RowId>,
    changed_fields: FieldBitSet,
}

impl StateChange {
    /// Creates an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages an added row.
    pub fn add_row(&mut self, row: RowId) {
        self.added.push(row);
    }

    /// Stages a changed row. Idempotent within one firing.
    pub fn change_row(&mut self, row: RowId) {
        if !self.changed.contains(&row) {
            self.changed.push(row);
        }
    }

    /// Stages a removed row.
    pub fn remove_row(&mut self, row: RowId) {
        self.removed.push(row);
    }

    /// Unstages a pending add, returning true if one was staged. The
    /// caller is then free to reclaim the row id: it was never delivered.
    pub fn cancel_add(&mut self, row: RowId) -> bool {
        match self.added.iter().position(|&r| r == row) {
            Some(pos) => {
                self.added.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Unstages a pending change, if any.
    pub fn cancel_change(&mut self, row: RowId) {
        if let Some(pos) = self.changed.iter().position(|&r| r == row) {
            self.changed.remove(pos);
        }
    }

    /// Marks a field as changed for this firing.
    pub fn change_field(&mut self, field_id: FieldId) {
        self.changed_fields.field_changed(field_id);
    }

    /// Returns the changed-field set for direct marking.
    pub fn changed_fields_mut(&mut self) -> &mut FieldBitSet {
        &mut self.changed_fields
    }

    /// Returns true if nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }

    /// Fires removes, then adds, then changes, and resets.
    pub fn fire(&mut self, output: &OutputManager) {
        self.fire_and_release(output, |_| {});
    }

    /// Fires removes, then adds, then changes; after the remove
    /// notification, hands each removed row id to `release`; then resets.
    pub fn fire_and_release(&mut self, output: &OutputManager, mut release: impl FnMut(RowId)) {
        if !self.removed.is_empty() {
            output.notify_removes(&self.removed);
        }
        if !self.added.is_empty() {
            output.notify_adds(&self.added);
        }
        if !self.changed.is_empty() {
            output.notify_changes(&self.changed, &self.changed_fields);
        }
        for &row in &self.removed {
            release(row);
        }
        self.reset();
    }

    fn reset(&mut self) {
        self.added.clear();
        self.changed.clear();
        self.removed.clear();
        self.changed_fields.clear();
    }
}

/// Accumulator for operators where one row may legitimately transit
/// several buckets within a single firing (GroupBy: two inbound rows can
/// produce an add then a change of the same group row).
///
/// Staging rules: adding a row cancels a pending remove for it; removing a
/// row cancels a pending add and change; `change_row_if_not_added` avoids
/// redundant change notifications for rows added in the same firing.
#[derive(Debug, Default)]
pub struct StateChangeSet {
    added: IndexedRowSet,
    changed: IndexedRowSet,
    removed: IndexedRowSet,
    changed_fields: FieldBitSet,
}

impl StateChangeSet {
    /// Creates an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages an added row.
    ///
    /// If a remove is pending for the row it is cancelled instead: the row
    /// was active before this firing and stays active, so the net effect
    /// downstream is at most a change.
    pub fn add_row(&mut self, row: RowId) {
        if self.removed.remove(row).is_some() {
            return;
        }
        self.added.add(row);
    }

    /// Stages a changed row.
    pub fn change_row(&mut self, row: RowId) {
        self.changed.add(row);
    }

    /// Stages a change unless the row was added this firing.
    pub fn change_row_if_not_added(&mut self, row: RowId) {
        if !self.added.contains(row) {
            self.changed.add(row);
        }
    }

    /// Stages a removed row, cancelling any pending change for it.
    ///
    /// If an add is pending for the row it is cancelled instead: the row
    /// was never published, so there is nothing to retract downstream.
    pub fn remove_row(&mut self, row: RowId) {
        self.changed.remove(row);
        if self.added.remove(row).is_some() {
            return;
        }
        self.removed.add(row);
    }

    /// Marks a field as changed for this firing.
    pub fn change_field(&mut self, field_id: FieldId) {
        self.changed_fields.field_changed(field_id);
    }

    /// Returns the changed-field set for direct marking.
    pub fn changed_fields_mut(&mut self) -> &mut FieldBitSet {
        &mut self.changed_fields
    }

    /// Returns true if nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }

    /// Fires removes, then adds, then changes; after the remove
    /// notification, hands each removed row id to `release`; then resets.
    pub fn fire_and_release(&mut self, output: &OutputManager, mut release: impl FnMut(RowId)) {
        let removed = collect(&self.removed);
        let added = collect(&self.added);
        let changed = collect(&self.changed);
        if !removed.is_empty() {
            output.notify_removes(&removed);
        }
        if !added.is_empty() {
            output.notify_adds(&added);
        }
        if !changed.is_empty() {
            output.notify_changes(&changed, &self.changed_fields);
        }
        for &row in &removed {
            release(row);
        }
        self.reset();
    }

    /// Fires without a release callback.
    pub fn fire(&mut self, output: &OutputManager) {
        self.fire_and_release(output, |_| {});
    }

    fn reset(&mut self) {
        self.added.clear();
        self.changed.clear();
        self.removed.clear();
        self.changed_fields.clear();
    }
}

fn collect(set: &IndexedRowSet) -> Vec<RowId> {
    let mut rows = Vec::with_capacity(set.len());
    set.for_each_entry(|entry| rows.push(set.key_at(entry)));
    rows
}
