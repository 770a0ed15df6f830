//! Reactive primitives.
//!
//! This module implements the core of the fine-grained reactive system:
//! signal cells and the dependency tracker that captures which signals a
//! render node reads during one evaluation.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal is read through
//! a tracking scope, the currently evaluating render node is registered as a
//! subscriber. When the signal's value changes, the subscriber set is handed
//! to the scheduler so exactly the dependent nodes recompute.
//!
//! ## Dependency tracking
//!
//! Tracking is implicit from the render closure's reads: the evaluator
//! pushes a frame on the session's [`DependencyTracker`], the closure reads
//! whatever signals its control flow happens to touch, and the popped frame
//! becomes the node's new dependency set. Re-evaluation fully replaces the
//! edge set, so a branch not taken this time drops its stale subscriptions.
//!
//! This approach (sometimes called "automatic dependency tracking" or
//! "transparent reactivity") is used by SolidJS, Vue 3, and Leptos. Unlike
//! those, the tracking context here is owned by the session rather than
//! being thread-local, since sessions migrate freely across runtime worker
//! threads.

pub mod signal;
pub mod tracker;

pub use signal::{SignalId, SignalStore};
pub use tracker::{DependencyTracker, ReadSet};
