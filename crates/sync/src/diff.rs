use indexmap::IndexMap;
use std::collections::BTreeSet;

use crate::schema::{DiffOp, ItemRecord};

/// Compare freshly parsed records against the note keys currently in the
/// store.
///
/// Creates and updates come first in `new` order, deletes last in
/// `existing` order.  Without `previous`, every key still present is updated
/// unconditionally; with it, only records whose managed fields changed are.
pub fn compute_diff(
    new: &IndexMap<String, ItemRecord>,
    existing: &BTreeSet<String>,
    previous: Option<&IndexMap<String, ItemRecord>>,
) -> Vec<DiffOp> {
    let mut ops = Vec::new();

    for (key, record) in new {
        if !existing.contains(key) {
            ops.push(DiffOp::Create {
                key: key.clone(),
                record: record.clone(),
            });
            continue;
        }

        let changed = match previous {
            None => true,
            Some(previous) => has_changed(previous.get(key), record),
        };
        if changed {
            ops.push(DiffOp::Update {
                key: key.clone(),
                record: record.clone(),
            });
        }
    }

    for key in existing {
        if !new.contains_key(key) {
            ops.push(DiffOp::Delete { key: key.clone() });
        }
    }

    ops
}

/// Field-wise comparison of the managed metadata.  A record with no previous
/// counterpart is always changed.
pub fn has_changed(previous: Option<&ItemRecord>, updated: &ItemRecord) -> bool {
    let Some(previous) = previous else {
        return true;
    };

    previous.title != updated.title
        || previous.year != updated.year
        || previous.item_type != updated.item_type
        || previous.container != updated.container
        || previous.external_uri != updated.external_uri
        || previous.authors != updated.authors
        || previous.tags != updated.tags
}
