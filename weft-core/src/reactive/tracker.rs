//! Dependency tracker.
//!
//! The tracker records which signals a render node reads while it is being
//! evaluated. It is a push-down stack: evaluating a node pushes a frame,
//! every signal read before the matching pop attributes to the innermost
//! frame, and the pop returns the collected reads so the evaluator can
//! replace the node's dependency set.
//!
//! Each session owns its tracker outright. There is no thread-local and no
//! process-global here, so concurrent sessions cannot cross-contaminate
//! tracking state no matter how the runtime schedules them.
//!
//! Nesting is permitted: a node whose evaluation triggers evaluation of
//! another node gets correct attribution, because reads always land on the
//! top of the stack.

use smallvec::SmallVec;

use crate::graph::node::NodeId;
use crate::reactive::signal::SignalId;

/// Reads collected for one node evaluation. Most nodes touch a handful of
/// signals, so the storage is inline.
pub type ReadSet = SmallVec<[SignalId; 8]>;

#[derive(Debug)]
struct Frame {
    node: NodeId,
    reads: ReadSet,
}

/// Session-scoped recording context for dependency capture.
#[derive(Debug, Default)]
pub struct DependencyTracker {
    stack: Vec<Frame>,
}

impl DependencyTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a tracking frame for the given node.
    ///
    /// Every [`record`](Self::record) call until the matching
    /// [`end`](Self::end) attributes to this node.
    pub fn begin(&mut self, node: NodeId) {
        self.stack.push(Frame {
            node,
            reads: ReadSet::new(),
        });
    }

    /// Record a signal read.
    ///
    /// Returns the node the read attributes to (the innermost frame), or
    /// `None` when no tracking frame is active. Repeat reads of the same
    /// signal within one frame collapse to a single entry.
    pub fn record(&mut self, signal: SignalId) -> Option<NodeId> {
        let frame = self.stack.last_mut()?;
        if !frame.reads.contains(&signal) {
            frame.reads.push(signal);
        }
        Some(frame.node)
    }

    /// Pop the innermost frame and return the reads it collected.
    ///
    /// `node` must match the frame pushed by the corresponding
    /// [`begin`](Self::begin); a mismatch indicates unbalanced begin/end
    /// calls in the evaluator.
    pub fn end(&mut self, node: NodeId) -> ReadSet {
        match self.stack.pop() {
            Some(frame) => {
                debug_assert_eq!(
                    frame.node, node,
                    "tracker frame mismatch: expected {:?}, got {:?}",
                    node, frame.node
                );
                frame.reads
            }
            None => ReadSet::new(),
        }
    }

    /// The node currently being tracked, if any.
    pub fn current(&self) -> Option<NodeId> {
        self.stack.last().map(|frame| frame.node)
    }

    /// Whether any tracking frame is active.
    pub fn is_tracking(&self) -> bool {
        !self.stack.is_empty()
    }

    /// Current nesting depth.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(store: &mut crate::reactive::signal::SignalStore) -> SignalId {
        store.create(serde_json::json!(0))
    }

    #[test]
    fn records_attribute_to_current_frame() {
        let mut store = crate::reactive::signal::SignalStore::new();
        let s1 = signal(&mut store);
        let s2 = signal(&mut store);
        let node = NodeId::test(1);

        let mut tracker = DependencyTracker::new();
        assert!(!tracker.is_tracking());
        assert!(tracker.record(s1).is_none());

        tracker.begin(node);
        assert_eq!(tracker.record(s1), Some(node));
        assert_eq!(tracker.record(s2), Some(node));

        let reads = tracker.end(node);
        assert_eq!(reads.as_slice(), &[s1, s2]);
        assert!(!tracker.is_tracking());
    }

    #[test]
    fn duplicate_reads_collapse() {
        let mut store = crate::reactive::signal::SignalStore::new();
        let s = signal(&mut store);
        let node = NodeId::test(1);

        let mut tracker = DependencyTracker::new();
        tracker.begin(node);
        tracker.record(s);
        tracker.record(s);
        tracker.record(s);

        assert_eq!(tracker.end(node).len(), 1);
    }

    #[test]
    fn nested_frames_attribute_to_innermost() {
        let mut store = crate::reactive::signal::SignalStore::new();
        let outer_sig = signal(&mut store);
        let inner_sig = signal(&mut store);
        let outer = NodeId::test(1);
        let inner = NodeId::test(2);

        let mut tracker = DependencyTracker::new();
        tracker.begin(outer);
        tracker.record(outer_sig);

        tracker.begin(inner);
        assert_eq!(tracker.depth(), 2);
        assert_eq!(tracker.current(), Some(inner));
        assert_eq!(tracker.record(inner_sig), Some(inner));
        let inner_reads = tracker.end(inner);
        assert_eq!(inner_reads.as_slice(), &[inner_sig]);

        // Back in the outer frame: reads attribute to the outer node again.
        assert_eq!(tracker.current(), Some(outer));
        let outer_reads = tracker.end(outer);
        assert_eq!(outer_reads.as_slice(), &[outer_sig]);
    }

    #[test]
    fn end_without_begin_is_empty() {
        let mut tracker = DependencyTracker::new();
        assert!(tracker.end(NodeId::test(9)).is_empty());
    }
}
