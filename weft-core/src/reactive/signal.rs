//! Signal store.
//!
//! A Signal is the fundamental reactive primitive: a single mutable value
//! cell with a version counter and a subscriber set. Signals live in a
//! per-session [`SignalStore`]; a [`SignalId`] is only meaningful inside the
//! store that allocated it, so two sessions can never alias each other's
//! state by accident.
//!
//! # How Signals Work
//!
//! 1. When a signal is read through a tracking scope, the reading render
//!    node is inserted into the signal's subscriber set.
//!
//! 2. When a signal's value changes, [`SignalStore::set`] returns the
//!    subscriber set so the scheduler can enqueue the dependents.
//!
//! 3. Writes that do not change the value are complete no-ops: no version
//!    bump, no subscriber wake. Equality is structural value equality on the
//!    JSON representation, which is the single check that keeps idempotent
//!    writes from cascading into redundant re-renders.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::error::{EngineError, Result};
use crate::graph::node::NodeId;

/// Identifier of a signal, unique within one session's store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignalId(u64);

impl SignalId {
    /// Get the raw id value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// One reactive value cell.
#[derive(Debug)]
struct SignalSlot {
    value: Value,
    /// Monotonic, bumped on every successful mutation.
    version: u64,
    /// Exactly the nodes whose most recent evaluation read this signal.
    subscribers: HashSet<NodeId>,
}

/// All signals belonging to one session.
#[derive(Debug, Default)]
pub struct SignalStore {
    slots: HashMap<SignalId, SignalSlot>,
    next_id: u64,
}

impl SignalStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a new signal with the given initial value.
    pub fn create(&mut self, initial: Value) -> SignalId {
        let id = SignalId(self.next_id);
        self.next_id += 1;
        self.slots.insert(
            id,
            SignalSlot {
                value: initial,
                version: 0,
                subscribers: HashSet::new(),
            },
        );
        id
    }

    /// Read the current value without tracking.
    pub fn value(&self, id: SignalId) -> Result<&Value> {
        self.slots
            .get(&id)
            .map(|slot| &slot.value)
            .ok_or(EngineError::UnknownSignal(id))
    }

    /// Current version of a signal.
    pub fn version(&self, id: SignalId) -> Result<u64> {
        self.slots
            .get(&id)
            .map(|slot| slot.version)
            .ok_or(EngineError::UnknownSignal(id))
    }

    /// Write a new value.
    ///
    /// Returns `None` when the new value is structurally equal to the current
    /// one (idempotent-write suppression), otherwise the set of subscribed
    /// nodes that must be enqueued for recomputation.
    pub fn set(&mut self, id: SignalId, value: Value) -> Result<Option<Vec<NodeId>>> {
        let slot = self
            .slots
            .get_mut(&id)
            .ok_or(EngineError::UnknownSignal(id))?;

        if slot.value == value {
            return Ok(None);
        }

        slot.value = value;
        slot.version += 1;
        Ok(Some(slot.subscribers.iter().copied().collect()))
    }

    /// Register a node as a subscriber of a signal.
    pub fn subscribe(&mut self, id: SignalId, node: NodeId) -> Result<()> {
        let slot = self
            .slots
            .get_mut(&id)
            .ok_or(EngineError::UnknownSignal(id))?;
        slot.subscribers.insert(node);
        Ok(())
    }

    /// Drop one subscription edge. Missing edges are ignored.
    pub fn unsubscribe(&mut self, id: SignalId, node: NodeId) {
        if let Some(slot) = self.slots.get_mut(&id) {
            slot.subscribers.remove(&node);
        }
    }

    /// Remove a node from every subscriber set.
    ///
    /// Called when a render node is torn down.
    pub fn remove_node(&mut self, node: NodeId) {
        for slot in self.slots.values_mut() {
            slot.subscribers.remove(&node);
        }
    }

    /// Number of nodes subscribed to a signal. Unknown signals report zero.
    pub fn subscriber_count(&self, id: SignalId) -> usize {
        self.slots
            .get(&id)
            .map(|slot| slot.subscribers.len())
            .unwrap_or(0)
    }

    /// Number of signals in the store.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the store holds no signals.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
