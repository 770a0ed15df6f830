//! Node registry: arena plus stable-key index.
//!
//! The registry owns every render node of one session, in declaration
//! order. Identity is an explicit key-to-arena mapping rather than call
//! order alone, so reordered declarations keep their subscriptions and
//! cached output as long as their keys are stable.
//!
//! # Positional identity policy
//!
//! Nodes registered without a key receive a positional index assigned in
//! declaration order. Positional identity is deterministic but fragile
//! under loops and conditionals:
//!
//! - [`begin_pass`](NodeRegistry::begin_pass) starts a fresh declaration
//!   pass: the positional counter resets and all positional nodes become
//!   unclaimed.
//! - Registering at a position that already exists reuses that node's
//!   identity: the render closure is replaced, the cached output and
//!   subscriptions carry over until the next evaluation (positional reuse).
//! - [`end_pass`](NodeRegistry::end_pass) removes positional nodes the pass
//!   did not re-register, e.g. when a rendered list shrank.
//!
//! Keyed nodes are unaffected by passes. Registering the same key twice
//! means the last registration wins and a warning is logged, since a silent
//! collision would discard independent widget state.

use std::collections::HashMap;

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::graph::node::{HandlerFn, NodeId, NodeKey, RenderFn, RenderNode};
use crate::protocol::NodeUpdate;
use crate::reactive::signal::SignalStore;

/// All render nodes and event handlers belonging to one session.
#[derive(Default)]
pub struct NodeRegistry {
    /// Insertion order is declaration order; the scheduler relies on it.
    nodes: IndexMap<NodeId, RenderNode>,
    keys: HashMap<NodeKey, NodeId>,
    handlers: HashMap<(NodeId, String), HandlerFn>,
    next_id: u64,
    next_position: u32,
    pass: u64,
}

impl NodeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a render node.
    ///
    /// With `Some(key)` the node has explicit stable identity; with `None`
    /// it falls back to positional identity within the current declaration
    /// pass. Registering an existing identity replaces the render closure
    /// and keeps the node id.
    pub fn register(&mut self, key: Option<&str>, render: RenderFn) -> NodeId {
        let key = match key {
            Some(key) => NodeKey::Keyed(key.to_owned()),
            None => {
                let position = self.next_position;
                self.next_position += 1;
                NodeKey::Positional(position)
            }
        };

        if let Some(&existing) = self.keys.get(&key) {
            match &key {
                NodeKey::Keyed(name) => {
                    warn!(key = %name, node = ?existing, "render node key collision, last registration wins");
                }
                NodeKey::Positional(index) => {
                    debug!(position = index, node = ?existing, "positional node reused");
                }
            }
            // Identity survives: output and subscriptions are replaced on
            // the next evaluation, not here.
            let node = self
                .nodes
                .get_mut(&existing)
                .expect("key index out of sync with arena");
            node.render = render;
            node.dirty = true;
            node.claimed_pass = self.pass;
            return existing;
        }

        let id = NodeId::from_raw(self.next_id);
        self.next_id += 1;
        self.nodes.insert(
            id,
            RenderNode {
                id,
                key: key.clone(),
                render,
                deps: Default::default(),
                output: None,
                dirty: true,
                claimed_pass: self.pass,
            },
        );
        self.keys.insert(key, id);
        id
    }

    /// Attach an event handler to a node for one event kind.
    ///
    /// Re-attaching for the same kind replaces the previous handler.
    pub fn on(&mut self, node: NodeId, kind: &str, handler: HandlerFn) {
        self.handlers.insert((node, kind.to_owned()), handler);
    }

    pub(crate) fn handler_mut(&mut self, node: NodeId, kind: &str) -> Option<&mut HandlerFn> {
        self.handlers.get_mut(&(node, kind.to_owned()))
    }

    /// Resolve a wire identity to a node id.
    pub fn lookup(&self, wire_id: &str) -> Option<NodeId> {
        self.keys.get(&NodeKey::parse(wire_id)).copied()
    }

    /// Start a new declaration pass (positional identity only).
    pub fn begin_pass(&mut self) {
        self.pass += 1;
        self.next_position = 0;
    }

    /// Finish a declaration pass: remove positional nodes the pass did not
    /// claim, dropping their handlers and subscription edges.
    ///
    /// Returns the removed identities so the caller can clear the client
    /// fragments.
    pub fn end_pass(&mut self, signals: &mut SignalStore) -> Vec<(NodeId, NodeKey)> {
        let pass = self.pass;
        let stale: Vec<(NodeId, NodeKey)> = self
            .nodes
            .values()
            .filter(|node| {
                matches!(node.key, NodeKey::Positional(_)) && node.claimed_pass < pass
            })
            .map(|node| (node.id, node.key.clone()))
            .collect();

        for (id, key) in &stale {
            // shift_remove keeps declaration order for the survivors.
            self.nodes.shift_remove(id);
            self.keys.remove(key);
            self.handlers.retain(|(node, _), _| node != id);
            signals.remove_node(*id);
            debug!(node = ?id, key = %key.wire_id(), "stale positional node removed");
        }

        stale
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut RenderNode> {
        self.nodes.get_mut(&id)
    }

    /// Immutable access to a node.
    pub fn get(&self, id: NodeId) -> Option<&RenderNode> {
        self.nodes.get(&id)
    }

    /// Declaration index of a node.
    pub fn order_of(&self, id: NodeId) -> Option<usize> {
        self.nodes.get_index_of(&id)
    }

    /// All node ids in declaration order.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// Build the outbound update for a node from its cached output.
    pub fn update_for(&self, id: NodeId) -> Option<NodeUpdate> {
        let node = self.nodes.get(&id)?;
        Some(NodeUpdate {
            node: node.key.wire_id(),
            fragment: node.output.clone()?,
        })
    }

    /// Number of registered nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_render() -> RenderFn {
        Box::new(|_scope| Ok(String::new()))
    }

    #[test]
    fn keyed_registration_is_stable() {
        let mut registry = NodeRegistry::new();
        let id = registry.register(Some("counter"), noop_render());

        assert_eq!(registry.lookup("counter"), Some(id));
        assert_eq!(registry.order_of(id), Some(0));
    }

    #[test]
    fn keyed_collision_keeps_identity() {
        let mut registry = NodeRegistry::new();
        let first = registry.register(Some("counter"), noop_render());
        let second = registry.register(Some("counter"), noop_render());

        // Last registration wins but the identity is the same node.
        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn positional_ids_follow_declaration_order() {
        let mut registry = NodeRegistry::new();
        let a = registry.register(None, noop_render());
        let b = registry.register(None, noop_render());

        assert_eq!(registry.get(a).unwrap().key(), &NodeKey::Positional(0));
        assert_eq!(registry.get(b).unwrap().key(), &NodeKey::Positional(1));
        assert_eq!(registry.lookup("node-1"), Some(b));
    }

    #[test]
    fn pass_reuses_positions_and_drops_stale_nodes() {
        let mut registry = NodeRegistry::new();
        let mut signals = SignalStore::new();

        registry.begin_pass();
        let a = registry.register(None, noop_render());
        let b = registry.register(None, noop_render());
        let c = registry.register(None, noop_render());
        registry.end_pass(&mut signals);
        assert_eq!(registry.len(), 3);

        // List shrinks from three items to two: positions 0 and 1 are
        // reused, position 2 is removed.
        registry.begin_pass();
        let a2 = registry.register(None, noop_render());
        let b2 = registry.register(None, noop_render());
        let removed = registry.end_pass(&mut signals);

        assert_eq!(a2, a);
        assert_eq!(b2, b);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].0, c);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.lookup("node-2"), None);
    }

    #[test]
    fn end_pass_keeps_keyed_nodes() {
        let mut registry = NodeRegistry::new();
        let mut signals = SignalStore::new();

        let keyed = registry.register(Some("header"), noop_render());

        registry.begin_pass();
        registry.register(None, noop_render());
        let removed = registry.end_pass(&mut signals);

        assert!(removed.is_empty());
        assert_eq!(registry.lookup("header"), Some(keyed));
    }
}
