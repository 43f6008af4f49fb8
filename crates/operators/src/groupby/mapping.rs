//! Dense group-id assignment for non-integer group keys.

use alloc::vec::Vec;
use hashbrown::HashMap;
use rowflow_core::Value;

/// Assigns dense integer ids to distinct key values.
///
/// Released ids are reused for keys seen later, so the id space stays
/// compact while groups come and go.
#[derive(Debug, Default)]
pub struct GroupMapping {
    ids: HashMap<Value, usize>,
    keys: Vec<Option<Value>>,
    free: Vec<usize>,
}

impl GroupMapping {
    /// Creates an empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id for a key, assigning a fresh one for unseen keys.
    pub fn id_for(&mut self, key: &Value) -> usize {
        if let Some(&id) = self.ids.get(key) {
            return id;
        }
        let id = match self.free.pop() {
            Some(id) => {
                self.keys[id] = Some(key.clone());
                id
            }
            None => {
                self.keys.push(Some(key.clone()));
                self.keys.len() - 1
            }
        };
        self.ids.insert(key.clone(), id);
        id
    }

    /// Returns the key currently holding an id, if any.
    pub fn key_of(&self, id: usize) -> Option<&Value> {
        self.keys.get(id).and_then(|k| k.as_ref())
    }

    /// Releases an id so its key can be forgotten and the id reused.
    pub fn release(&mut self, id: usize) {
        if let Some(key) = self.keys.get_mut(id).and_then(|k| k.take()) {
            self.ids.remove(&key);
            self.free.push(id);
        }
    }

    /// Returns the number of live assignments.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns true if no key is mapped.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Forgets all assignments.
    pub fn clear(&mut self) {
        self.ids.clear();
        self.keys.clear();
        self.free.clear();
    }
}
