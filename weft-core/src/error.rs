//! Error types for the engine.
//!
//! The taxonomy follows the failure semantics of the update cycle: render
//! failures are recoverable per node, cycle detection aborts a single update
//! cycle, and transport failures suspend the session rather than killing it.

use thiserror::Error;

use crate::graph::node::NodeId;
use crate::reactive::signal::SignalId;

/// All errors the engine can produce.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A render closure failed. The node keeps its last good output.
    #[error("render failed for node {node:?}: {message}")]
    Render { node: NodeId, message: String },

    /// The dirty set did not stabilize within the pass bound.
    /// Fatal to the current update cycle only; the session stays alive.
    #[error("update cycle did not stabilize after {passes} passes")]
    CycleDetected { passes: usize },

    #[error("unknown render node {0:?}")]
    UnknownNode(NodeId),

    #[error("unknown signal {0:?}")]
    UnknownSignal(SignalId),

    #[error("transport channel closed")]
    TransportClosed,

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("websocket error: {0}")]
    WebSocket(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EngineError>;
