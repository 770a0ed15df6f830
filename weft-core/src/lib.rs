//! Weft Core
//!
//! This crate provides the core runtime for the Weft server-driven UI
//! engine. It implements:
//!
//! - Reactive primitives (signals, implicit dependency tracking)
//! - Render nodes with stable identity and fragment diff suppression
//! - A batched update scheduler with cycle detection
//! - Per-session workers and a WebSocket transport with poll fallback
//!
//! State lives on the server; clients send DOM events and receive HTML
//! fragments for exactly the nodes whose output changed.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Signal store and dependency tracking
//! - `graph`: Render nodes, node registry, and the update scheduler
//! - `session`: Per-client sessions, scopes, and worker tasks
//! - `transport`: The ordered push channel and the WebSocket server
//! - `broadcast`: Opt-in cross-session notifications and shared signals
//! - `protocol`: The JSON wire messages
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use serde_json::json;
//! use weft_core::config::EngineConfig;
//! use weft_core::transport::ws::Server;
//!
//! let server = Server::bind(
//!     EngineConfig::default(),
//!     Arc::new(|session| {
//!         let count = session.signal(json!(0));
//!         let node = session.register_node(Some("counter"), Box::new(move |scope| {
//!             Ok(format!("<button>{}</button>", scope.read(count)?))
//!         }));
//!         session.on_event(node, "click", Box::new(move |scope, _| {
//!             let n = scope.read(count)?.as_i64().unwrap_or(0);
//!             scope.write(count, json!(n + 1))
//!         }));
//!         Ok(())
//!     }),
//! )
//! .await?;
//! server.run().await?;
//! ```

pub mod broadcast;
pub mod config;
pub mod error;
pub mod graph;
pub mod protocol;
pub mod reactive;
pub mod session;
pub mod transport;

pub use broadcast::{Broadcaster, SharedSignal};
pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use graph::{NodeId, NodeKey};
pub use protocol::{ClientMessage, EventMessage, NodeUpdate, ServerMessage};
pub use reactive::SignalId;
pub use session::scope::{RenderScope, UpdateScope};
pub use session::worker::{SessionCommand, SessionHandle, SessionRegistry};
pub use session::{Session, SessionId};
pub use transport::ws::{Server, SetupFn};
pub use transport::Outbound;
