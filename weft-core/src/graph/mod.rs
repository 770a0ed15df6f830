//! Render graph.
//!
//! Server-side views are render nodes: closures producing an HTML fragment
//! whose signal reads are observed so the scheduler knows exactly which
//! fragments a state change invalidates. The [`registry`] owns node
//! identity (explicit keys plus positional fallback) and the [`scheduler`]
//! drives the batched recompute-and-flush cycle.

pub mod node;
pub mod registry;
pub mod scheduler;

pub use node::{Fragment, HandlerFn, NodeId, NodeKey, RenderFn, RenderNode};
pub use registry::NodeRegistry;
pub use scheduler::{DirtyQueue, Phase, Scheduler};
