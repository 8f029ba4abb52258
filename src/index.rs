//! Per-field secondary index over one record list
//!
//! Maps every field value to the positions of the records holding it. The
//! member list of a group is exploded so each member name maps to the groups
//! that list it. An index is always built from a complete record list and
//! never patched afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use crate::record::{MEMBERS_FIELD, Record, RecordType};

/// Value to record-position lookup tables, one per descriptor slot
#[derive(Debug, Default)]
pub struct FieldIndex {
    slots: Vec<HashMap<String, Vec<usize>>>,
}

impl FieldIndex {
    /// Build the index for `records`, which must all be of `record_type`
    pub fn build(record_type: RecordType, records: &[Arc<Record>]) -> Self {
        let descriptor = record_type.descriptor();
        let mut slots: Vec<HashMap<String, Vec<usize>>> =
            vec![HashMap::new(); descriptor.fields.len()];

        for (pos, record) in records.iter().enumerate() {
            debug_assert_eq!(record.record_type(), record_type);

            for (slot, field) in descriptor.fields.iter().enumerate() {
                let value = record.slot(slot);
                if *field == MEMBERS_FIELD {
                    for member in value.split(',') {
                        push_position(&mut slots[slot], member, pos);
                    }
                } else {
                    push_position(&mut slots[slot], value, pos);
                }
            }
        }

        Self { slots }
    }

    /// Positions of records whose field in `slot` holds `value`, in load order
    pub fn get(&self, slot: usize, value: &str) -> &[usize] {
        self.slots
            .get(slot)
            .and_then(|values| values.get(value))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of distinct values indexed for a slot
    pub fn distinct_values(&self, slot: usize) -> usize {
        self.slots.get(slot).map_or(0, HashMap::len)
    }
}

fn push_position(values: &mut HashMap<String, Vec<usize>>, value: &str, pos: usize) {
    match values.get_mut(value) {
        Some(positions) => {
            // A member named twice in one group still maps to it once
            if positions.last() != Some(&pos) {
                positions.push(pos);
            }
        }
        None => {
            values.insert(value.to_string(), vec![pos]);
        }
    }
}
