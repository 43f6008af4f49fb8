//! Output fan-out: subscriber management, replay and multicast.
//!
//! Every operator owns one `OutputManager` per output. The manager tracks
//! the published schema, the active rowspace and the attached inputs, and
//! multicasts notifications in attachment order. Newly attached inputs are
//! synchronously replayed (`set_source`, then `schema_updated` and
//! `rows_added` for the current state) so they reach parity with existing
//! subscribers without missing history.

use crate::port::InputHandle;
use alloc::rc::{Rc, Weak};
use alloc::vec::Vec;
use core::cell::RefCell;
use rowflow_core::schema::SchemaRef;
use rowflow_core::{BitSet, FieldBitSet, RowId};

struct OutputState {
    schema: Option<SchemaRef>,
    active: BitSet,
    inputs: Vec<InputHandle>,
}

impl OutputState {
    fn snapshot_inputs(&self) -> Vec<InputHandle> {
        // defensive copy: an input may attach or detach inputs on this
        // same output while being notified
        self.inputs.clone()
    }
}

/// Fan-out hub for one operator output.
#[derive(Clone)]
pub struct OutputManager {
    state: Rc<RefCell<OutputState>>,
}

impl Default for OutputManager {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputManager {
    /// Creates a manager with no schema, no rows and no subscribers.
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(OutputState {
                schema: None,
                active: BitSet::new(),
                inputs: Vec::new(),
            })),
        }
    }

    /// Returns a weak handle to this output for downstream consumers.
    pub fn output(&self) -> OutputHandle {
        OutputHandle {
            state: Rc::downgrade(&self.state),
        }
    }

    /// Returns the currently published schema.
    pub fn schema(&self) -> Option<SchemaRef> {
        self.state.borrow().schema.clone()
    }

    /// Returns a snapshot of the active row ids, ascending.
    pub fn row_ids(&self) -> Vec<RowId> {
        self.state.borrow().active.to_vec()
    }

    /// Returns the number of active rows.
    pub fn row_count(&self) -> usize {
        self.state.borrow().active.len()
    }

    /// Returns the number of attached inputs.
    pub fn input_count(&self) -> usize {
        self.state.borrow().inputs.len()
    }

    /// Publishes or retracts the schema and notifies all subscribers.
    ///
    /// Any schema update clears the active rowspace: row ids published
    /// under the previous schema are meaningless afterwards, whether the
    /// schema is retracted or replaced.
    pub fn update_schema(&self, schema: Option<SchemaRef>) {
        let inputs = {
            let mut state = self.state.borrow_mut();
            state.schema = schema.clone();
            state.active.clear();
            state.snapshot_inputs()
        };
        for input in inputs {
            input.borrow_mut().schema_updated(schema.clone());
        }
    }

    /// Multicasts added rows. The rows become part of the active rowspace.
    pub fn notify_adds(&self, rows: &[RowId]) {
        let inputs = {
            let mut state = self.state.borrow_mut();
            assert_schema(&state.schema);
            for &row in rows {
                state.active.insert(row);
            }
            state.snapshot_inputs()
        };
        for input in inputs {
            input.borrow_mut().rows_added(rows);
        }
    }

    /// Multicasts changed rows with their batch-wide changed-field set.
    pub fn notify_changes(&self, rows: &[RowId], changed_fields: &FieldBitSet) {
        let inputs = {
            let state = self.state.borrow();
            assert_schema(&state.schema);
            state.snapshot_inputs()
        };
        for input in inputs {
            input.borrow_mut().rows_changed(rows, changed_fields);
        }
    }

    /// Multicasts removed rows. The rows leave the active rowspace before
    /// subscribers are notified, so a subscriber consulting the rowspace
    /// mid-notification no longer sees them.
    pub fn notify_removes(&self, rows: &[RowId]) {
        let inputs = {
            let mut state = self.state.borrow_mut();
            assert_schema(&state.schema);
            for &row in rows {
                state.active.remove(row);
            }
            state.snapshot_inputs()
        };
        for input in inputs {
            input.borrow_mut().rows_removed(rows);
        }
    }
}

fn assert_schema(schema: &Option<SchemaRef>) {
    if schema.is_none() {
        panic!("Attempted notification before a schema was published");
    }
}

fn attach_to(state_rc: &Rc<RefCell<OutputState>>, input: InputHandle) {
    {
        let mut state = state_rc.borrow_mut();
        if state.inputs.iter().any(|i| Rc::ptr_eq(i, &input)) {
            return;
        }
        state.inputs.push(input.clone());
    }
    let handle = OutputHandle {
        state: Rc::downgrade(state_rc),
    };
    input.borrow_mut().set_source(Some(handle));
    let (schema, rows) = {
        let state = state_rc.borrow();
        (state.schema.clone(), state.active.to_vec())
    };
    if let Some(schema) = schema {
        input.borrow_mut().schema_updated(Some(schema));
        if !rows.is_empty() {
            input.borrow_mut().rows_added(&rows);
        }
    }
}

fn detach_from(state_rc: &Rc<RefCell<OutputState>>, input: &InputHandle) {
    let found = {
        let mut state = state_rc.borrow_mut();
        let before = state.inputs.len();
        state.inputs.retain(|i| !Rc::ptr_eq(i, input));
        state.inputs.len() != before
    };
    if found {
        input.borrow_mut().schema_updated(None);
        input.borrow_mut().set_source(None);
    }
}

/// Weak handle to an operator output.
///
/// Downstream operators hold this as their source reference; it does not
/// keep the upstream operator alive. All operations are no-ops (or empty
/// results) once the upstream operator has been dropped.
#[derive(Clone)]
pub struct OutputHandle {
    state: Weak<RefCell<OutputState>>,
}

impl OutputHandle {
    /// Returns the currently published schema.
    pub fn schema(&self) -> Option<SchemaRef> {
        self.state
            .upgrade()
            .and_then(|state| state.borrow().schema.clone())
    }

    /// Returns a snapshot of the active row ids, ascending.
    pub fn row_ids(&self) -> Vec<RowId> {
        self.state
            .upgrade()
            .map(|state| state.borrow().active.to_vec())
            .unwrap_or_default()
    }

    /// Calls `f` with each active row id, iterating over a snapshot so the
    /// callback may freely read fields or stage changes.
    pub fn for_each_row(&self, mut f: impl FnMut(RowId)) {
        for row in self.row_ids() {
            f(row);
        }
    }

    /// Attaches an input, synchronously replaying source, schema and
    /// current rows to it.
    pub fn attach(&self, input: InputHandle) {
        if let Some(state) = self.state.upgrade() {
            attach_to(&state, input);
        }
    }

    /// Detaches an input, delivering `schema_updated(None)` then
    /// `set_source(None)` to it alone.
    pub fn detach(&self, input: &InputHandle) {
        if let Some(state) = self.state.upgrade() {
            detach_from(&state, input);
        }
    }
}
