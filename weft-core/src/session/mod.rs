//! Sessions.
//!
//! A session is one connected client's complete reactive graph: its signal
//! store, its render nodes, its dependency tracker, and the ordered
//! outbound channel. Sessions own all of it exclusively; two sessions never
//! share signal or node identity, so nothing leaks between users unless the
//! application opts into the [`broadcast`](crate::broadcast) layer.
//!
//! The session is logically single-threaded: all mutation goes through one
//! `&mut Session`, and the [`worker`] module serializes commands so one
//! update cycle always completes before the next begins.

pub mod scope;
pub mod worker;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;
use tracing::{debug, error, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::graph::node::{HandlerFn, NodeId, RenderFn};
use crate::graph::registry::NodeRegistry;
use crate::graph::scheduler::Scheduler;
use crate::protocol::{EventMessage, NodeUpdate, ServerMessage};
use crate::reactive::signal::{SignalId, SignalStore};
use crate::reactive::tracker::DependencyTracker;
use crate::session::scope::UpdateScope;
use crate::transport::Outbound;

/// Connection-scoped session token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh token, unique within this process.
    ///
    /// Tokens identify a session across reconnects; they are not an
    /// authentication scheme, which stays a user-level concern.
    pub fn generate() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        Self(format!("{nanos:x}-{n:x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

/// One client's isolated reactive graph plus its push channel.
pub struct Session {
    id: SessionId,
    signals: SignalStore,
    tracker: DependencyTracker,
    nodes: NodeRegistry,
    scheduler: Scheduler,
    outbound: Outbound,
    /// Implicit session-wide signal every theme-aware render may read.
    theme: SignalId,
    flush_seq: u64,
    last_event_seq: u64,
}

impl Session {
    /// Create an empty session.
    pub fn new(id: SessionId, config: &EngineConfig) -> Self {
        let mut signals = SignalStore::new();
        let theme = signals.create(Value::String("default".to_owned()));
        Self {
            id,
            signals,
            tracker: DependencyTracker::new(),
            nodes: NodeRegistry::new(),
            scheduler: Scheduler::new(config.max_cycle_passes),
            outbound: Outbound::new(),
            theme,
            flush_seq: 0,
            last_event_seq: 0,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// The implicit theme signal; render closures may read it through their
    /// scope like any other signal.
    pub fn theme_signal(&self) -> SignalId {
        self.theme
    }

    /// Sequence number of the last flush pushed to the client.
    pub fn flush_seq(&self) -> u64 {
        self.flush_seq
    }

    /// Create a reactive state cell.
    pub fn signal(&mut self, initial: Value) -> SignalId {
        self.signals.create(initial)
    }

    /// Read a signal without tracking (the engine-level `readSignal`).
    pub fn read_signal(&self, signal: SignalId) -> Result<Value> {
        Ok(self.signals.value(signal)?.clone())
    }

    /// Register a render node; `None` key falls back to positional
    /// identity (see [`NodeRegistry`] for the collision policy).
    pub fn register_node(&mut self, key: Option<&str>, render: RenderFn) -> NodeId {
        self.nodes.register(key, render)
    }

    /// Attach an event handler to a node.
    pub fn on_event(&mut self, node: NodeId, kind: &str, handler: HandlerFn) {
        self.nodes.on(node, kind, handler);
    }

    /// Mutate a signal from outside any event handler, e.g. when background
    /// work completes. Runs a full update cycle.
    pub fn write_signal(&mut self, signal: SignalId, value: Value) -> Result<()> {
        if let Some(woken) = self.signals.set(signal, value)? {
            self.scheduler.dirty.extend(woken);
        }
        self.cycle_and_flush()
    }

    /// Dispatch one inbound event: run its callback, recompute affected
    /// nodes exactly once, flush the changed fragments.
    ///
    /// Duplicate deliveries (same or older `seq`) are dropped, which makes
    /// at-least-once transports safe. An unknown target or missing handler
    /// is logged and ignored so a stale client cannot wedge the session.
    pub fn dispatch(&mut self, event: EventMessage) -> Result<()> {
        if event.seq != 0 && event.seq <= self.last_event_seq {
            debug!(session = %self.id, seq = event.seq, "duplicate event dropped");
            return Ok(());
        }

        let Some(target) = self.nodes.lookup(&event.node) else {
            warn!(session = %self.id, node = %event.node, "event for unknown node");
            return Ok(());
        };

        self.scheduler.begin_collect();
        {
            let Self {
                signals,
                nodes,
                scheduler,
                ..
            } = self;
            match nodes.handler_mut(target, &event.kind) {
                Some(handler) => {
                    let mut scope = UpdateScope::new(signals, &mut scheduler.dirty);
                    if let Err(err) = handler(&mut scope, event.payload) {
                        // Mutations already applied still take effect below.
                        error!(session = %self.id, node = %event.node, kind = %event.kind, %err, "event handler failed");
                    }
                }
                None => {
                    warn!(session = %self.id, node = %event.node, kind = %event.kind, "no handler for event");
                }
            }
        }

        if event.seq != 0 {
            self.last_event_seq = event.seq;
        }
        self.cycle_and_flush()
    }

    /// Apply a theme session-wide: one mutation of the implicit theme
    /// signal followed by an invalidate-all, so every node re-renders its
    /// presentation in a single cycle. Re-applying the current theme is
    /// suppressed like any other idempotent write.
    pub fn apply_theme(&mut self, name: &str) -> Result<()> {
        match self
            .signals
            .set(self.theme, Value::String(name.to_owned()))?
        {
            None => Ok(()),
            Some(_) => {
                self.scheduler.mark_all(&self.nodes);
                self.cycle_and_flush()
            }
        }
    }

    /// Evaluate every node and flush the result. Used for the first render
    /// after a client attaches.
    pub fn full_render(&mut self) -> Result<()> {
        self.scheduler.mark_all(&self.nodes);
        self.cycle_and_flush()
    }

    /// Start a declaration pass for positional nodes.
    pub fn begin_pass(&mut self) {
        self.nodes.begin_pass();
    }

    /// Finish a declaration pass; client fragments of removed nodes are
    /// cleared in the next flush.
    pub fn end_pass(&mut self) -> Result<()> {
        let removed = self.nodes.end_pass(&mut self.signals);
        if removed.is_empty() {
            return Ok(());
        }
        let updates = removed
            .into_iter()
            .map(|(_, key)| NodeUpdate {
                node: key.wire_id(),
                fragment: String::new(),
            })
            .collect();
        self.flush(updates);
        Ok(())
    }

    /// Access the outbound channel, e.g. to attach a transport sink.
    pub fn outbound_mut(&mut self) -> &mut Outbound {
        &mut self.outbound
    }

    pub fn outbound(&self) -> &Outbound {
        &self.outbound
    }

    fn cycle_and_flush(&mut self) -> Result<()> {
        let cycle = {
            let Self {
                signals,
                tracker,
                nodes,
                scheduler,
                ..
            } = self;
            scheduler.run_cycle(nodes, signals, tracker)
        };

        let updates = match cycle {
            Ok(updates) => updates,
            Err(err @ EngineError::CycleDetected { .. }) => {
                // Fatal to this cycle only; the interaction simply has no
                // visible effect.
                error!(session = %self.id, %err, "update cycle aborted");
                self.outbound.send(ServerMessage::Error {
                    message: err.to_string(),
                });
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        self.flush(updates);
        Ok(())
    }

    fn flush(&mut self, updates: Vec<NodeUpdate>) {
        if updates.is_empty() {
            return;
        }
        self.flush_seq += 1;
        self.outbound.send(ServerMessage::Update {
            seq: self.flush_seq,
            updates,
        });
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("signals", &self.signals.len())
            .field("nodes", &self.nodes.len())
            .field("flush_seq", &self.flush_seq)
            .finish()
    }
}
