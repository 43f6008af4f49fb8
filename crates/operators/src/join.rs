//! Join: correlates two inputs on equal key values.
//!
//! Each outbound row is either a (left, right) pair of matched inbound
//! rows or, in left-outer mode, a bare left row with no match whose
//! right-side fields read as type defaults. Outbound ids come from a
//! free-list allocator so the id space stays compact as matches come and
//! go; a removed id is not reused until after its remove has fired.
//!
//! The output schema is unavailable until both sides have published a
//! schema. Once both are bound, the active rows of each side are replayed
//! through the match index and the initial matches fire as one batch.
//! Either side retracting its schema tears the output down.
//!
//! A change touching a key field re-evaluates that row's match set: stale
//! pairs are removed and fresh ones added, with bare rows converted in
//! left-outer mode. Non-key changes are forwarded to the affected pairs
//! with the changed-field set translated into outbound ids.

use crate::table::check_naming_rules;
use alloc::format;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::mem;
use hashbrown::HashMap;
use rowflow_core::schema::{
    Field, FieldMapping, FieldSource, SchemaBuilder, SchemaRef,
};
use rowflow_core::{Error, FieldBitSet, Result, RowId, Value};
use rowflow_dataflow::{
    input_handle, FlowInput, OutputHandle, OutputManager, StateChangeSet,
};

/// Which rows appear in the output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinMode {
    /// Only matched (left, right) pairs.
    Inner,
    /// Matched pairs plus unmatched left rows with default right fields.
    LeftOuter,
}

/// What to do when both sides define a field with the same name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NameCollision {
    /// Keep the left field, drop the right one.
    KeepLeft,
    /// Keep the right field, drop the left one.
    KeepRight,
    /// Keep both, prefixing the right field's name.
    RenameRight(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

impl Side {
    fn other(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// What an outbound row is backed by.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum OutSrc {
    Pair(RowId, RowId),
    Bare(RowId),
    Free,
}

/// Per-side match index and schema binding.
struct SideState {
    schema: Option<SchemaRef>,
    key_fields: Vec<Field>,
    key_deps: FieldBitSet,
    keys_of_row: HashMap<RowId, Vec<Value>>,
    by_key: HashMap<Vec<Value>, Vec<RowId>>,
    map: FieldMapping,
    source: Option<OutputHandle>,
}

impl SideState {
    fn new() -> Self {
        Self {
            schema: None,
            key_fields: Vec::new(),
            key_deps: FieldBitSet::new(),
            keys_of_row: HashMap::new(),
            by_key: HashMap::new(),
            map: FieldMapping::default(),
            source: None,
        }
    }
}

struct JoinState {
    name: String,
    manager: OutputManager,
    mode: JoinMode,
    collision: NameCollision,
    keys: Vec<(String, String)>,
    left: SideState,
    right: SideState,
    out_src: Vec<OutSrc>,
    free: Vec<RowId>,
    retired: Vec<RowId>,
    pair_out: HashMap<(RowId, RowId), RowId>,
    bare_out: HashMap<RowId, RowId>,
    change: StateChangeSet,
}

impl JoinState {
    fn side(&self, side: Side) -> &SideState {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut SideState {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }

    fn read_key(&self, side: Side, row: RowId) -> Vec<Value> {
        self.side(side)
            .key_fields
            .iter()
            .map(|field| field.value_at(row))
            .collect()
    }

    fn alloc_out(&mut self, src: OutSrc) -> RowId {
        match self.free.pop() {
            Some(out) => {
                self.out_src[out] = src;
                out
            }
            None => {
                self.out_src.push(src);
                self.out_src.len() - 1
            }
        }
    }

    fn add_pair(&mut self, left: RowId, right: RowId) {
        let out = self.alloc_out(OutSrc::Pair(left, right));
        self.pair_out.insert((left, right), out);
        self.change.add_row(out);
    }

    fn add_bare(&mut self, left: RowId) {
        let out = self.alloc_out(OutSrc::Bare(left));
        self.bare_out.insert(left, out);
        self.change.add_row(out);
    }

    /// Stages a remove and parks the outbound id until the firing is done;
    /// consumers reading the removed row mid-notification still resolve it.
    fn stage_remove(&mut self, out: RowId) {
        self.change.remove_row(out);
        self.retired.push(out);
    }

    fn add_row(&mut self, side: Side, row: RowId) {
        if self.side(side).keys_of_row.contains_key(&row) {
            return; // already indexed, e.g. replayed twice during attach
        }
        let key = self.read_key(side, row);
        {
            let own = self.side_mut(side);
            own.keys_of_row.insert(row, key.clone());
            own.by_key.entry(key.clone()).or_default().push(row);
        }
        let matches: Vec<RowId> = self
            .side(side.other())
            .by_key
            .get(&key)
            .cloned()
            .unwrap_or_default();
        match side {
            Side::Left => {
                if matches.is_empty() {
                    if self.mode == JoinMode::LeftOuter {
                        self.add_bare(row);
                    }
                } else {
                    for right in matches {
                        self.add_pair(row, right);
                    }
                }
            }
            Side::Right => {
                for left in matches {
                    if let Some(out) = self.bare_out.remove(&left) {
                        self.stage_remove(out);
                    }
                    self.add_pair(left, row);
                }
            }
        }
    }

    fn remove_row(&mut self, side: Side, row: RowId) {
        let key = {
            let own = self.side_mut(side);
            let key = match own.keys_of_row.remove(&row) {
                Some(key) => key,
                None => return,
            };
            if let Some(rows) = own.by_key.get_mut(&key) {
                rows.retain(|&r| r != row);
                if rows.is_empty() {
                    own.by_key.remove(&key);
                }
            }
            key
        };
        let matches: Vec<RowId> = self
            .side(side.other())
            .by_key
            .get(&key)
            .cloned()
            .unwrap_or_default();
        match side {
            Side::Left => {
                if let Some(out) = self.bare_out.remove(&row) {
                    self.stage_remove(out);
                }
                for right in matches {
                    if let Some(out) = self.pair_out.remove(&(row, right)) {
                        self.stage_remove(out);
                    }
                }
            }
            Side::Right => {
                let orphaned = self.mode == JoinMode::LeftOuter
                    && !self.right.by_key.contains_key(&key);
                for left in matches {
                    if let Some(out) = self.pair_out.remove(&(left, row)) {
                        self.stage_remove(out);
                    }
                    if orphaned {
                        self.add_bare(left);
                    }
                }
            }
        }
    }

    fn stage_changes(&mut self, side: Side, row: RowId) {
        let key = match self.side(side).keys_of_row.get(&row) {
            Some(key) => key.clone(),
            None => return,
        };
        let matches: Vec<RowId> = self
            .side(side.other())
            .by_key
            .get(&key)
            .cloned()
            .unwrap_or_default();
        match side {
            Side::Left => {
                if let Some(&out) = self.bare_out.get(&row) {
                    self.change.change_row_if_not_added(out);
                }
                for right in matches {
                    if let Some(&out) = self.pair_out.get(&(row, right)) {
                        self.change.change_row_if_not_added(out);
                    }
                }
            }
            Side::Right => {
                for left in matches {
                    if let Some(&out) = self.pair_out.get(&(left, row)) {
                        self.change.change_row_if_not_added(out);
                    }
                }
            }
        }
    }

    fn key_moved(&self, side: Side, row: RowId) -> bool {
        match self.side(side).keys_of_row.get(&row) {
            Some(cached) => *cached != self.read_key(side, row),
            None => false,
        }
    }

    fn clear_rowspace(&mut self) {
        self.out_src.clear();
        self.free.clear();
        self.retired.clear();
        self.pair_out.clear();
        self.bare_out.clear();
        self.left.keys_of_row.clear();
        self.left.by_key.clear();
        self.right.keys_of_row.clear();
        self.right.by_key.clear();
        self.change = StateChangeSet::new();
    }
}

/// Reads one side's inbound field through an outbound row.
struct JoinField {
    state: Rc<RefCell<JoinState>>,
    side: Side,
    field: Field,
}

impl FieldSource for JoinField {
    fn value_at(&self, row: RowId) -> Value {
        let src = {
            let state = self.state.borrow();
            state.out_src.get(row).copied().unwrap_or(OutSrc::Free)
        };
        match (src, self.side) {
            (OutSrc::Pair(left, _), Side::Left) => self.field.value_at(left),
            (OutSrc::Pair(_, right), Side::Right) => self.field.value_at(right),
            (OutSrc::Bare(left), Side::Left) => self.field.value_at(left),
            _ => Value::default_for_type(self.field.field_type()),
        }
    }
}

/// One attachable side of a join.
pub struct JoinPort {
    state: Rc<RefCell<JoinState>>,
    side: Side,
}

impl FlowInput for JoinPort {
    fn set_source(&mut self, source: Option<OutputHandle>) {
        self.state.borrow_mut().side_mut(self.side).source = source;
    }

    fn schema_updated(&mut self, schema: Option<SchemaRef>) {
        let manager = self.state.borrow().manager.clone();
        match schema {
            Some(schema) => {
                if manager.schema().is_some() {
                    // one side replaced its schema; tear down before rebinding
                    self.state.borrow_mut().clear_rowspace();
                    manager.update_schema(None);
                }
                let both = {
                    let mut state = self.state.borrow_mut();
                    let mut key_fields = Vec::new();
                    let mut key_deps = FieldBitSet::new();
                    for (left_name, right_name) in &state.keys {
                        let name = match self.side {
                            Side::Left => left_name,
                            Side::Right => right_name,
                        };
                        match schema.field(name) {
                            Ok(sf) => {
                                key_deps.field_changed(sf.id());
                                key_fields.push(sf.field().clone());
                            }
                            Err(err) => panic!("Failed to bind join key: {}", err),
                        }
                    }
                    let side = state.side_mut(self.side);
                    side.schema = Some(schema.clone());
                    side.key_fields = key_fields;
                    side.key_deps = key_deps;
                    state.left.schema.is_some() && state.right.schema.is_some()
                };
                if both {
                    establish(&self.state);
                }
            }
            None => {
                let established = manager.schema().is_some();
                {
                    let mut state = self.state.borrow_mut();
                    state.clear_rowspace();
                    let side = state.side_mut(self.side);
                    side.schema = None;
                    side.key_fields.clear();
                    side.key_deps.clear();
                    side.map = FieldMapping::default();
                }
                if established {
                    manager.update_schema(None);
                }
            }
        }
    }

    fn rows_added(&mut self, rows: &[RowId]) {
        {
            let mut state = self.state.borrow_mut();
            if state.manager.schema().is_none() {
                return; // rows replay again when both sides are bound
            }
            for &row in rows {
                state.add_row(self.side, row);
            }
        }
        fire(&self.state);
    }

    fn rows_changed(&mut self, rows: &[RowId], changed: &FieldBitSet) {
        {
            let mut state = self.state.borrow_mut();
            if state.manager.schema().is_none() {
                return;
            }
            let rematch = state.side(self.side).key_deps.intersects(changed);
            let out_changed = state.side(self.side).map.translate(changed);
            if !rematch && out_changed.is_empty() {
                return;
            }
            for &row in rows {
                if rematch && state.key_moved(self.side, row) {
                    state.remove_row(self.side, row);
                    state.add_row(self.side, row);
                } else if !out_changed.is_empty() {
                    state.stage_changes(self.side, row);
                }
            }
            state.change.changed_fields_mut().union_with(&out_changed);
        }
        fire(&self.state);
    }

    fn rows_removed(&mut self, rows: &[RowId]) {
        {
            let mut state = self.state.borrow_mut();
            if state.manager.schema().is_none() {
                return;
            }
            for &row in rows {
                state.remove_row(self.side, row);
            }
        }
        fire(&self.state);
    }
}

fn fire(state: &Rc<RefCell<JoinState>>) {
    let (manager, mut change) = {
        let mut st = state.borrow_mut();
        (st.manager.clone(), mem::take(&mut st.change))
    };
    change.fire_and_release(&manager, |_| {});
    let mut st = state.borrow_mut();
    let retired = mem::take(&mut st.retired);
    for out in retired {
        st.out_src[out] = OutSrc::Free;
        st.free.push(out);
    }
}

fn establish(state: &Rc<RefCell<JoinState>>) {
    let (schema, left_map, right_map) = build_out_schema(state);
    let manager = {
        let mut st = state.borrow_mut();
        st.left.map = left_map;
        st.right.map = right_map;
        st.manager.clone()
    };
    manager.update_schema(Some(schema));
    let (left_rows, right_rows) = {
        let st = state.borrow();
        (
            st.left.source.as_ref().map(|s| s.row_ids()).unwrap_or_default(),
            st.right.source.as_ref().map(|s| s.row_ids()).unwrap_or_default(),
        )
    };
    {
        let mut st = state.borrow_mut();
        for row in left_rows {
            st.add_row(Side::Left, row);
        }
        for row in right_rows {
            st.add_row(Side::Right, row);
        }
    }
    fire(state);
}

fn build_out_schema(
    state: &Rc<RefCell<JoinState>>,
) -> (SchemaRef, FieldMapping, FieldMapping) {
    let st = state.borrow();
    let left_schema = st.left.schema.clone().expect("left side bound");
    let right_schema = st.right.schema.clone().expect("right side bound");
    let mut sb = SchemaBuilder::new(st.name.clone());
    let mut left_map = FieldMapping::with_inbound_size(left_schema.size());
    let mut right_map = FieldMapping::with_inbound_size(right_schema.size());
    for f in left_schema.fields() {
        let collides = right_schema.maybe_field(f.name()).is_some();
        if collides && st.collision == NameCollision::KeepRight {
            continue;
        }
        left_map.map_field(f.id(), sb.len());
        let source = JoinField {
            state: state.clone(),
            side: Side::Left,
            field: f.field().clone(),
        };
        sb.push_field(
            f.descriptor().clone(),
            Field::new(f.descriptor().field_type(), Rc::new(source)),
        );
    }
    for f in right_schema.fields() {
        let descriptor = match left_schema.maybe_field(f.name()) {
            None => f.descriptor().clone(),
            Some(_) => match &st.collision {
                NameCollision::KeepLeft => continue,
                NameCollision::KeepRight => f.descriptor().clone(),
                NameCollision::RenameRight(prefix) => {
                    f.descriptor().renamed(format!("{}{}", prefix, f.name()))
                }
            },
        };
        right_map.map_field(f.id(), sb.len());
        let source = JoinField {
            state: state.clone(),
            side: Side::Right,
            field: f.field().clone(),
        };
        sb.push_field(
            descriptor.clone(),
            Field::new(descriptor.field_type(), Rc::new(source)),
        );
    }
    let schema = match sb.build() {
        Ok(schema) => schema,
        Err(err) => panic!("Failed to build join schema: {}", err),
    };
    (schema, left_map, right_map)
}

/// Correlates two inputs on equal key values.
pub struct Join {
    state: Rc<RefCell<JoinState>>,
    left: Rc<RefCell<JoinPort>>,
    right: Rc<RefCell<JoinPort>>,
}

impl Join {
    /// Returns the join name.
    pub fn name(&self) -> String {
        self.state.borrow().name.clone()
    }

    /// Returns the output to attach downstream inputs to.
    pub fn output(&self) -> OutputHandle {
        self.state.borrow().manager.output()
    }

    /// Returns the published outbound schema, once both sides are bound.
    pub fn schema(&self) -> Option<SchemaRef> {
        self.state.borrow().manager.schema()
    }

    /// Returns the number of outbound rows.
    pub fn row_count(&self) -> usize {
        self.state.borrow().manager.row_count()
    }

    /// Returns the left-side port.
    pub fn left_input(&self) -> Rc<RefCell<JoinPort>> {
        self.left.clone()
    }

    /// Returns the right-side port.
    pub fn right_input(&self) -> Rc<RefCell<JoinPort>> {
        self.right.clone()
    }
}

/// Builder for joins.
pub struct JoinBuilder {
    name: String,
    keys: Vec<(String, String)>,
    mode: JoinMode,
    collision: NameCollision,
}

impl JoinBuilder {
    /// Creates a join builder. The default mode is inner, keeping the left
    /// field on name collisions.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        check_naming_rules(&name)?;
        Ok(Self {
            name,
            keys: Vec::new(),
            mode: JoinMode::Inner,
            collision: NameCollision::KeepLeft,
        })
    }

    /// Adds a key field carried under the same name on both sides.
    pub fn key(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.keys.push((name.clone(), name));
        self
    }

    /// Adds a key field with different names per side.
    pub fn key_pair(mut self, left: impl Into<String>, right: impl Into<String>) -> Self {
        self.keys.push((left.into(), right.into()));
        self
    }

    /// Sets the join mode.
    pub fn mode(mut self, mode: JoinMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the field name collision policy.
    pub fn name_collision(mut self, collision: NameCollision) -> Self {
        self.collision = collision;
        self
    }

    /// Builds the join. At least one key field is required.
    pub fn build(self) -> Result<Join> {
        if self.keys.is_empty() {
            return Err(Error::invalid_operation(
                "join requires at least one key field",
            ));
        }
        let state = Rc::new(RefCell::new(JoinState {
            name: self.name,
            manager: OutputManager::new(),
            mode: self.mode,
            collision: self.collision,
            keys: self.keys,
            left: SideState::new(),
            right: SideState::new(),
            out_src: Vec::new(),
            free: Vec::new(),
            retired: Vec::new(),
            pair_out: HashMap::new(),
            bare_out: HashMap::new(),
            change: StateChangeSet::new(),
        }));
        let left = input_handle(JoinPort {
            state: state.clone(),
            side: Side::Left,
        });
        let right = input_handle(JoinPort {
            state: state.clone(),
            side: Side::Right,
        });
        Ok(Join { state, left, right })
    }
}
