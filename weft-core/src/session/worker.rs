//! Per-session worker tasks.
//!
//! Every session gets one tokio task owning the [`Session`] outright and
//! draining a command channel. The channel is the session's serialization
//! point: events, signal writes, theme changes, and transport attachment
//! all arrive as [`SessionCommand`]s and are processed strictly in arrival
//! order, so one update cycle always finishes before the next begins and
//! no lock ever guards the reactive graph.
//!
//! A detached session (client gone, maybe reconnecting) survives for the
//! configured grace period, then tears itself down and drops out of the
//! [`SessionRegistry`].

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info};

use crate::protocol::{EventMessage, ServerMessage};
use crate::reactive::signal::SignalId;
use crate::session::{Session, SessionId};

/// Commands a session worker processes in arrival order.
pub enum SessionCommand {
    /// One inbound client event to dispatch.
    Event(EventMessage),
    /// Client acknowledged flushes up to `seq`.
    Ack { seq: u64 },
    /// A transport connected; queued flushes replay through `sink`.
    Attach {
        sink: mpsc::UnboundedSender<ServerMessage>,
    },
    /// The transport went away; start the reconnect grace timer. Ignored
    /// if `sink` is no longer the attached one (a newer connection won).
    Detach {
        sink: mpsc::UnboundedSender<ServerMessage>,
    },
    /// Server-side signal mutation (background work, shared state).
    SignalWrite { signal: SignalId, value: Value },
    /// Session-wide theme switch.
    ApplyTheme { name: String },
    /// Out-of-band notification to push as-is.
    Notify { event: String, payload: Value },
    /// Poll-mode drain: ack up to `acked`, reply with everything pending.
    Poll {
        acked: u64,
        reply: oneshot::Sender<Vec<ServerMessage>>,
    },
    /// Tear the session down now.
    Shutdown,
}

/// Cheap clonable handle for sending commands to a session worker.
#[derive(Clone)]
pub struct SessionHandle {
    id: SessionId,
    tx: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Queue a command; returns `false` if the worker already exited.
    pub fn send(&self, command: SessionCommand) -> bool {
        self.tx.send(command).is_ok()
    }
}

/// All live sessions in the process, keyed by session token.
///
/// Shared between the transport (resume lookups) and the broadcast layer
/// (fan-out), hence the concurrent map.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<DashMap<String, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, token: &str) -> Option<SessionHandle> {
        self.inner.get(token).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Snapshot of every live handle, for fan-out.
    pub fn handles(&self) -> Vec<SessionHandle> {
        self.inner
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    fn insert(&self, handle: SessionHandle) {
        self.inner.insert(handle.id.as_str().to_owned(), handle);
    }

    fn remove(&self, token: &str) {
        self.inner.remove(token);
    }
}

/// Spawn the worker task for `session` and register its handle.
pub fn spawn(session: Session, registry: &SessionRegistry, grace: Duration) -> SessionHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = SessionHandle {
        id: session.id().clone(),
        tx,
    };
    registry.insert(handle.clone());
    tokio::spawn(run(session, rx, registry.clone(), grace));
    handle
}

async fn run(
    mut session: Session,
    mut rx: mpsc::UnboundedReceiver<SessionCommand>,
    registry: SessionRegistry,
    grace: Duration,
) {
    let mut attached = false;
    let mut deadline = Instant::now() + grace;

    loop {
        let command = if attached {
            rx.recv().await
        } else {
            tokio::select! {
                command = rx.recv() => command,
                _ = sleep_until(deadline) => {
                    info!(session = %session.id(), "reconnect grace expired");
                    break;
                }
            }
        };
        let Some(command) = command else {
            // Every handle dropped.
            break;
        };

        match command {
            SessionCommand::Event(event) => {
                if let Err(err) = session.dispatch(event) {
                    error!(session = %session.id(), %err, "event dispatch failed");
                }
            }
            SessionCommand::Ack { seq } => {
                session.outbound_mut().ack(seq);
            }
            SessionCommand::Attach { sink } => {
                session.outbound_mut().attach(sink);
                attached = true;
                if session.flush_seq() == 0 {
                    // First attachment renders the whole tree; resumed
                    // sessions already replayed their unacked flushes.
                    if let Err(err) = session.full_render() {
                        error!(session = %session.id(), %err, "initial render failed");
                    }
                }
            }
            SessionCommand::Detach { sink } => {
                session.outbound_mut().detach_if(&sink);
                if !session.outbound().is_attached() {
                    attached = false;
                    deadline = Instant::now() + grace;
                    debug!(session = %session.id(), "transport detached");
                }
            }
            SessionCommand::SignalWrite { signal, value } => {
                if let Err(err) = session.write_signal(signal, value) {
                    error!(session = %session.id(), %err, "signal write failed");
                }
            }
            SessionCommand::ApplyTheme { name } => {
                if let Err(err) = session.apply_theme(&name) {
                    error!(session = %session.id(), %err, "theme change failed");
                }
            }
            SessionCommand::Notify { event, payload } => {
                session
                    .outbound_mut()
                    .send(ServerMessage::Notify { event, payload });
            }
            SessionCommand::Poll { acked, reply } => {
                if session.flush_seq() == 0 {
                    if let Err(err) = session.full_render() {
                        error!(session = %session.id(), %err, "initial render failed");
                    }
                }
                session.outbound_mut().ack(acked);
                // A poll counts as liveness even without a push sink.
                deadline = Instant::now() + grace;
                let _ = reply.send(session.outbound().pending());
            }
            SessionCommand::Shutdown => break,
        }
    }

    registry.remove(session.id().as_str());
    info!(session = %session.id(), "session torn down");
}
