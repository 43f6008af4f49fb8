//! Field id translation between schemas.
//!
//! When an operator republishes a derived schema, a `FieldMapping` records
//! how inbound field ids map to outbound field ids so an inbound
//! changed-field set can be translated without per-row cost.

use crate::bitset::FieldBitSet;
use crate::rows::FieldId;
use alloc::vec::Vec;

/// A translation table from one schema's field ids to another's.
#[derive(Clone, Debug, Default)]
pub struct FieldMapping {
    map: Vec<Option<FieldId>>,
}

impl FieldMapping {
    /// Creates an empty mapping sized for an inbound schema.
    pub fn with_inbound_size(inbound_size: usize) -> Self {
        Self {
            map: alloc::vec![None; inbound_size],
        }
    }

    /// Creates an identity mapping over `size` field ids.
    pub fn identity(size: usize) -> Self {
        Self {
            map: (0..size).map(Some).collect(),
        }
    }

    /// Maps an inbound field id to an outbound field id.
    pub fn map_field(&mut self, inbound: FieldId, outbound: FieldId) {
        if inbound >= self.map.len() {
            self.map.resize(inbound + 1, None);
        }
        self.map[inbound] = Some(outbound);
    }

    /// Returns the outbound id for an inbound id, if mapped.
    pub fn target_of(&self, inbound: FieldId) -> Option<FieldId> {
        self.map.get(inbound).copied().flatten()
    }

    /// Translates an inbound changed-field set into the outbound id space,
    /// marking the result into `out`. Unmapped inbound fields are dropped.
    pub fn translate_into(&self, changed: &FieldBitSet, out: &mut FieldBitSet) {
        changed.for_each(|inbound| {
            if let Some(outbound) = self.target_of(inbound) {
                out.field_changed(outbound);
            }
        });
    }

    /// Translates an inbound changed-field set into a fresh outbound set.
    pub fn translate(&self, changed: &FieldBitSet) -> FieldBitSet {
        let mut out = FieldBitSet::new();
        self.translate_into(changed, &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity() {
        let mapping = FieldMapping::identity(3);
        assert_eq!(mapping.target_of(0), Some(0));
        assert_eq!(mapping.target_of(2), Some(2));
        assert_eq!(mapping.target_of(3), None);
    }

    #[test]
    fn test_translate_drops_unmapped() {
        let mut mapping = FieldMapping::with_inbound_size(4);
        mapping.map_field(1, 0);
        mapping.map_field(3, 2);
        let changed = FieldBitSet::of(&[0, 1, 3]);
        let out = mapping.translate(&changed);
        assert!(out.contains(0));
        assert!(out.contains(2));
        assert!(!out.contains(1));
        assert!(!out.contains(3));
    }

    #[test]
    fn test_translate_empty_when_irrelevant() {
        let mut mapping = FieldMapping::with_inbound_size(4);
        mapping.map_field(2, 5);
        let out = mapping.translate(&FieldBitSet::of(&[0, 1]));
        assert!(out.is_empty());
    }
}
