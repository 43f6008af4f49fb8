//! The two-sided change protocol every operator implements.
//!
//! An operator *input* receives schema changes and row add/change/remove
//! batches from the output it is attached to. An operator *output* is
//! reached through an [`OutputHandle`](crate::OutputHandle), which exposes
//! the current schema, the active rowspace and attach/detach.
//!
//! Within one firing a subscriber always observes removes, then adds, then
//! changes. Row ids referenced by a change or remove have always been
//! delivered by a prior add.

use crate::output::OutputHandle;
use alloc::rc::Rc;
use core::cell::RefCell;
use rowflow_core::schema::SchemaRef;
use rowflow_core::{FieldBitSet, RowId};

/// The receiving side of the change protocol.
///
/// `schema_updated(None)` invalidates all previously delivered rows; row
/// ids from before the retraction are meaningless afterwards.
pub trait FlowInput {
    /// Called when this input is attached to (Some) or detached from
    /// (None) a source output.
    fn set_source(&mut self, _source: Option<OutputHandle>) {}

    /// Called when the source publishes or retracts its schema.
    fn schema_updated(&mut self, schema: Option<SchemaRef>);

    /// Called with newly active rows.
    fn rows_added(&mut self, rows: &[RowId]);

    /// Called with rows whose field values changed. `changed_fields` is
    /// batch-wide: it names every field that changed for any row in the
    /// batch.
    fn rows_changed(&mut self, rows: &[RowId], changed_fields: &FieldBitSet);

    /// Called with rows leaving the rowspace. Their ids may be recycled
    /// after this call returns.
    fn rows_removed(&mut self, rows: &[RowId]);
}

/// Shared handle to an attachable input.
pub type InputHandle = Rc<RefCell<dyn FlowInput>>;

/// Wraps a concrete input in an attachable handle.
pub fn input_handle<T: FlowInput + 'static>(input: T) -> Rc<RefCell<T>> {
    Rc::new(RefCell::new(input))
}
