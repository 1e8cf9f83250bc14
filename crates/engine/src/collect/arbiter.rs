//! Shared merge arbiter.
//!
//! All mutable collector state for one fetch — destination slices,
//! join-key position maps, unmapped-column buffers — lives behind a
//! single mutex shared by the whole collector tree. Multiple `ReadAll`
//! children may append into the same parent slot concurrently, so the
//! critical section spans the tree, not a single node. The arbiter is
//! passed down explicitly to every collector.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::collect::Key;
use crate::schema::Record;
use crate::value::Value;

/// Mutable per-collector state, slot-indexed by the arbiter.
#[derive(Debug, Default)]
pub(crate) struct CollectorState {
    /// Destination slice, in scan order.
    pub dest: Vec<Record>,

    /// join column → key → destination positions, insertion-ordered
    /// per key by scan order.
    pub positions: HashMap<String, HashMap<Key, Vec<usize>>>,

    /// Per-row buffer of scanned columns that are absent from the
    /// schema (kept so join keys can still reference them).
    pub unmapped: Vec<HashMap<String, Value>>,
}

/// One mutex guarding every collector state in a tree.
#[derive(Debug, Default)]
pub struct MergeArbiter {
    states: Mutex<Vec<CollectorState>>,
}

impl MergeArbiter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Allocate a state slot for one collector.
    pub(crate) fn allocate(&self) -> usize {
        let mut states = self.states.lock();
        states.push(CollectorState::default());
        states.len() - 1
    }

    /// Run `f` with exclusive access to one collector's state.
    pub(crate) fn with_state<R>(&self, slot: usize, f: impl FnOnce(&mut CollectorState) -> R) -> R {
        let mut states = self.states.lock();
        f(&mut states[slot])
    }

    /// Run `f` with exclusive access to every state in the tree
    /// (cross-slot merges need the child and parent together).
    pub(crate) fn with_states<R>(&self, f: impl FnOnce(&mut Vec<CollectorState>) -> R) -> R {
        let mut states = self.states.lock();
        f(&mut states)
    }
}
