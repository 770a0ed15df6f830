//! Render nodes.
//!
//! A render node is one reusable unit of UI output: a render closure, the
//! dependency set captured by its most recent evaluation, and the cached
//! last-produced fragment. Identity is stable across re-renders, derived
//! from an explicit key or from declaration order, never from content.

use std::collections::HashSet;

use crate::error::Result;
use crate::reactive::signal::SignalId;
use crate::session::scope::RenderScope;

/// A serialized UI fragment, ready to be pushed to the client.
pub type Fragment = String;

/// Render closure: reads signals through the scope, produces a fragment.
///
/// Reads may be conditional; the dependency set always reflects only the
/// most recent evaluation's actual reads.
pub type RenderFn = Box<dyn FnMut(&mut RenderScope<'_>) -> Result<Fragment> + Send>;

/// Event handler closure attached to a node for one event kind.
pub type HandlerFn = Box<dyn FnMut(&mut crate::session::scope::UpdateScope<'_>, serde_json::Value) -> Result<()> + Send>;

/// Arena identifier of a render node, unique within one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw id value.
    pub fn raw(&self) -> u64 {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn test(raw: u64) -> Self {
        Self(raw)
    }
}

/// Stable identity of a render node.
///
/// Explicit keys are the robust choice; positional identity is a documented
/// fallback that reuses node slots by declaration index and can collide when
/// declarations reorder. Keys beginning with `node-` are reserved for the
/// positional wire encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKey {
    /// Identity chosen by the caller.
    Keyed(String),
    /// Identity derived from declaration order within a pass.
    Positional(u32),
}

impl NodeKey {
    /// The identity string used on the wire and in the client DOM.
    pub fn wire_id(&self) -> String {
        match self {
            NodeKey::Keyed(key) => key.clone(),
            NodeKey::Positional(index) => format!("node-{index}"),
        }
    }

    /// Parse a wire identity back into a key.
    pub fn parse(raw: &str) -> Self {
        if let Some(rest) = raw.strip_prefix("node-") {
            if let Ok(index) = rest.parse::<u32>() {
                return NodeKey::Positional(index);
            }
        }
        NodeKey::Keyed(raw.to_owned())
    }
}

/// One render node in the session's graph.
pub struct RenderNode {
    pub(crate) id: NodeId,
    pub(crate) key: NodeKey,
    pub(crate) render: RenderFn,
    /// Signal ids read during the last evaluation.
    pub(crate) deps: HashSet<SignalId>,
    /// Last produced output; `None` before the first evaluation.
    pub(crate) output: Option<Fragment>,
    pub(crate) dirty: bool,
    /// Declaration pass that last claimed this node (positional reuse).
    pub(crate) claimed_pass: u64,
}

impl RenderNode {
    /// The node's arena id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The node's stable key.
    pub fn key(&self) -> &NodeKey {
        &self.key
    }

    /// Last produced fragment, if the node has evaluated at least once.
    pub fn output(&self) -> Option<&Fragment> {
        self.output.as_ref()
    }

    /// Signals the most recent evaluation read.
    pub fn deps(&self) -> &HashSet<SignalId> {
        &self.deps
    }

    /// Whether the node awaits recomputation.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

impl std::fmt::Debug for RenderNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderNode")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("deps", &self.deps.len())
            .field("dirty", &self.dirty)
            .field("has_output", &self.output.is_some())
            .finish()
    }
}
