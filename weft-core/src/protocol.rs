//! Wire protocol between the engine and the display client.
//!
//! Messages are JSON objects tagged with a `type` field. The encoding is an
//! implementation detail of this transport; the contract is ordering and
//! completeness, not the byte format.
//!
//! # Sequencing
//!
//! Outbound `Update` messages carry a per-session flush sequence number and
//! are retained by the transport until the client acknowledges them, which
//! gives at-least-once delivery with ordered replay. Inbound `Event` messages
//! carry a client-side sequence number so a replayed duplicate is applied at
//! most once (`seq == 0` means unsequenced, always applied).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An inbound interaction event: target node, triggered callback kind, and
/// an optional payload such as a new widget value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    /// Stable wire identity of the target render node.
    pub node: String,
    /// Callback identifier, e.g. `"click"` or `"value_change"`.
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub seq: u64,
}

/// Messages sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// First message on every connection. A known session token resumes the
    /// suspended session; anything else starts a fresh one.
    Hello {
        #[serde(default)]
        session: Option<String>,
    },
    Event(EventMessage),
    /// Acknowledge all updates up to and including `seq`.
    Ack { seq: u64 },
}

/// One changed fragment within a flush, keyed by stable node identity.
/// An empty fragment clears the node on the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeUpdate {
    pub node: String,
    pub fragment: String,
}

/// Messages sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome { session: String, resumed: bool },
    /// One flush: every fragment that changed in one update cycle, in
    /// declaration order. Never coalesced with other flushes.
    Update { seq: u64, updates: Vec<NodeUpdate> },
    /// A broadcast domain event, fanned out across sessions.
    Notify { event: String, payload: Value },
    Error { message: String },
}
