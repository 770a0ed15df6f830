//! Update scheduler.
//!
//! The scheduler runs one update cycle at a time through the phases
//! `Idle -> Collecting -> Recomputing -> Flushing -> Idle`:
//!
//! 1. *Collecting*: one event's callback runs; every signal write funnels
//!    its woken subscribers into a single de-duplicated dirty queue, so a
//!    callback mutating five signals still produces one coherent pass.
//!
//! 2. *Recomputing*: the dirty queue is drained in declaration order, each
//!    node evaluated at most once per pass. Writes performed during
//!    evaluation refill the queue for the next pass (cascading reactivity).
//!    The pass count is bounded; exceeding the bound aborts the cycle with
//!    a cycle-detection error instead of looping forever.
//!
//! 3. *Flushing*: nodes whose output actually changed contribute one
//!    fragment each, keyed by stable identity and in declaration order.
//!    Nodes that recomputed to identical output contribute nothing, which
//!    keeps flush cost proportional to what changed, not to UI size.
//!
//! A render closure failing is contained to its node: the last good output
//! is retained, the error is logged, and the rest of the cycle proceeds.

use std::collections::HashSet;

use indexmap::IndexSet;
use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::graph::node::NodeId;
use crate::graph::registry::NodeRegistry;
use crate::protocol::NodeUpdate;
use crate::reactive::signal::{SignalId, SignalStore};
use crate::reactive::tracker::DependencyTracker;
use crate::session::scope::RenderScope;

/// Phases of the per-session update cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Collecting,
    Recomputing,
    Flushing,
}

/// De-duplicated set of nodes awaiting recomputation.
///
/// A node enqueued twice collapses to one entry; draining orders by
/// declaration index so sibling-ordering-dependent layouts stay stable.
#[derive(Debug, Default)]
pub struct DirtyQueue {
    set: IndexSet<NodeId>,
}

impl DirtyQueue {
    pub fn insert(&mut self, node: NodeId) {
        self.set.insert(node);
    }

    pub fn extend(&mut self, nodes: impl IntoIterator<Item = NodeId>) {
        self.set.extend(nodes);
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn clear(&mut self) {
        self.set.clear();
    }

    /// Take the current batch in declaration order, leaving the queue empty
    /// for cascades produced while the batch evaluates.
    fn drain_ordered(&mut self, nodes: &NodeRegistry) -> Vec<NodeId> {
        let mut batch: Vec<NodeId> = self.set.drain(..).collect();
        batch.sort_by_key(|id| nodes.order_of(*id).unwrap_or(usize::MAX));
        batch
    }
}

/// Outcome of evaluating one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EvalOutcome {
    /// Output differs from the cached fragment.
    Changed,
    /// Recomputed to identical output; dependency edges were still updated.
    Unchanged,
}

/// Per-session update cycle driver.
pub struct Scheduler {
    phase: Phase,
    pub(crate) dirty: DirtyQueue,
    max_passes: usize,
}

impl Scheduler {
    pub fn new(max_passes: usize) -> Self {
        Self {
            phase: Phase::Idle,
            dirty: DirtyQueue::default(),
            max_passes,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Enter the collecting phase for one event dispatch.
    pub(crate) fn begin_collect(&mut self) {
        debug_assert_eq!(self.phase, Phase::Idle, "update cycles never overlap");
        self.phase = Phase::Collecting;
    }

    /// Enqueue every registered node, e.g. for a theme change or the
    /// initial render.
    pub fn mark_all(&mut self, nodes: &NodeRegistry) {
        self.dirty.extend(nodes.ids());
    }

    /// Recompute everything dirty, then build the flush payload.
    ///
    /// On cycle detection the dirty queue is discarded and the scheduler
    /// returns to idle; the session survives for the next event.
    pub fn run_cycle(
        &mut self,
        nodes: &mut NodeRegistry,
        signals: &mut SignalStore,
        tracker: &mut DependencyTracker,
    ) -> Result<Vec<NodeUpdate>> {
        self.phase = Phase::Recomputing;

        let mut changed: IndexSet<NodeId> = IndexSet::new();
        let mut passes = 0usize;

        while !self.dirty.is_empty() {
            passes += 1;
            if passes > self.max_passes {
                self.dirty.clear();
                self.phase = Phase::Idle;
                return Err(EngineError::CycleDetected {
                    passes: self.max_passes,
                });
            }

            for id in self.dirty.drain_ordered(nodes) {
                match evaluate(nodes, signals, tracker, &mut self.dirty, id) {
                    Ok(EvalOutcome::Changed) => {
                        changed.insert(id);
                    }
                    Ok(EvalOutcome::Unchanged) => {}
                    Err(EngineError::UnknownNode(_)) => {
                        // Removed mid-cycle by a declaration pass.
                        debug!(node = ?id, "dirty node vanished before evaluation");
                    }
                    Err(err) => {
                        // Last good output survives and the cycle goes on.
                        // If an earlier pass already recomputed this node,
                        // that output is the last good one and still needs
                        // flushing, so `changed` is left alone.
                        warn!(node = ?id, %err, "render failed, keeping previous fragment");
                    }
                }
            }
        }

        self.phase = Phase::Flushing;
        let mut ids: Vec<NodeId> = changed.into_iter().collect();
        ids.sort_by_key(|id| nodes.order_of(*id).unwrap_or(usize::MAX));
        let updates: Vec<NodeUpdate> = ids
            .into_iter()
            .filter_map(|id| nodes.update_for(id))
            .collect();

        self.phase = Phase::Idle;
        Ok(updates)
    }
}

/// Evaluate one node: track its reads, replace its dependency edges, and
/// compare the fresh output against the cached fragment.
fn evaluate(
    nodes: &mut NodeRegistry,
    signals: &mut SignalStore,
    tracker: &mut DependencyTracker,
    dirty: &mut DirtyQueue,
    id: NodeId,
) -> Result<EvalOutcome> {
    let node = nodes.get_mut(id).ok_or(EngineError::UnknownNode(id))?;

    tracker.begin(id);
    let rendered = {
        let mut scope = RenderScope::new(signals, tracker, dirty);
        (node.render)(&mut scope)
    };
    let reads = tracker.end(id);

    // Re-evaluation fully replaces the edge set: prune edges the closure no
    // longer reads, keep the fresh ones registered by the scope.
    let new_deps: HashSet<SignalId> = reads.into_iter().collect();
    for stale in node.deps.difference(&new_deps) {
        signals.unsubscribe(*stale, id);
    }
    node.deps = new_deps;
    node.dirty = false;

    let fragment = rendered.map_err(|err| EngineError::Render {
        node: id,
        message: err.to_string(),
    })?;

    if node.output.as_deref() == Some(fragment.as_str()) {
        Ok(EvalOutcome::Unchanged)
    } else {
        node.output = Some(fragment);
        Ok(EvalOutcome::Changed)
    }
}
