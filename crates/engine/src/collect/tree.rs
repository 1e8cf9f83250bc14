//! Self-reference tree building.
//!
//! Restructures a flat self-referential result set (parent key and own
//! key on the same record) into a rooted forest. Records are linked
//! through an explicit key → index table and assembled via arena
//! slots, so each record is promoted into at most one parent chain and
//! a cyclic parent reference is detected instead of looping.

use std::collections::HashMap;

use crate::collect::key::{Key, normalize_key};
use crate::error::{EngineError, EngineResult};
use crate::schema::Record;

/// Field positions driving the rebuild, resolved once at init time.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SelfRefBinding {
    pub holder: usize,
    pub parent_column: usize,
    pub child_column: usize,
}

/// Rebuild `records` into a forest; returns the root-level records
/// (those whose parent key is null or unmatched) in scan order.
pub(crate) fn build_tree(
    records: Vec<Record>,
    binding: SelfRefBinding,
) -> EngineResult<Vec<Record>> {
    let mut own_keys = Vec::with_capacity(records.len());
    let mut parent_keys = Vec::with_capacity(records.len());
    for record in &records {
        let own = record
            .get_at(binding.child_column)
            .map_or(Ok(Key::Null), normalize_key)?;
        let parent = record
            .get_at(binding.parent_column)
            .map_or(Ok(Key::Null), normalize_key)?;
        own_keys.push(own);
        parent_keys.push(parent);
    }

    // key → arena index, first occurrence wins.
    let mut index: HashMap<&Key, usize> = HashMap::with_capacity(records.len());
    for (i, key) in own_keys.iter().enumerate() {
        if !key.is_null() {
            index.entry(key).or_insert(i);
        }
    }

    let mut children_of: Vec<Vec<usize>> = vec![Vec::new(); records.len()];
    let mut roots = Vec::new();
    for (i, parent_key) in parent_keys.iter().enumerate() {
        match index.get(parent_key) {
            Some(&p) if !parent_key.is_null() => {
                if p == i {
                    return Err(EngineError::CyclicSelfReference(format!("{parent_key:?}")));
                }
                children_of[p].push(i);
            }
            _ => roots.push(i),
        }
    }

    let mut slots: Vec<Option<Record>> = records.into_iter().map(Some).collect();
    let mut out = Vec::with_capacity(roots.len());
    for root in roots {
        out.push(assemble(root, &mut slots, &children_of, binding.holder)?);
    }

    // Any record still in its slot was reachable only through a
    // cyclic parent chain.
    if let Some(stranded) = slots.iter().position(Option::is_some) {
        return Err(EngineError::CyclicSelfReference(format!(
            "{:?}",
            own_keys[stranded]
        )));
    }

    Ok(out)
}

fn assemble(
    idx: usize,
    slots: &mut Vec<Option<Record>>,
    children_of: &[Vec<usize>],
    holder: usize,
) -> EngineResult<Record> {
    let mut record = slots[idx]
        .take()
        .ok_or_else(|| EngineError::Internal(format!("arena slot {idx} taken twice")))?;
    for &child in &children_of[idx] {
        // Idempotent re-parenting: a record already promoted into
        // another chain is skipped.
        if slots[child].is_none() {
            continue;
        }
        let child_record = assemble(child, slots, children_of, holder)?;
        record.attach_child(holder, child_record)?;
    }
    Ok(record)
}
