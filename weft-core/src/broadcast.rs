//! Cross-session state, opt-in.
//!
//! Sessions are isolated by construction; the two primitives here are the
//! only sanctioned ways to cross that boundary, and both stay inside the
//! per-session sequencing: nothing here touches another session's graph
//! directly, it only queues commands on that session's worker.
//!
//! - [`Broadcaster`] pushes an out-of-band notification to every live
//!   session.
//! - [`SharedSignal`] holds one process-wide value and mirrors it into a
//!   per-session signal in every session that attached, so a write fans
//!   out as an ordinary reactive update in each of them.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::reactive::signal::SignalId;
use crate::session::worker::{SessionCommand, SessionRegistry};
use crate::session::{Session, SessionId};

/// Fan-out of out-of-band notifications to every live session.
#[derive(Clone)]
pub struct Broadcaster {
    sessions: SessionRegistry,
}

impl Broadcaster {
    pub fn new(sessions: SessionRegistry) -> Self {
        Self { sessions }
    }

    /// Push `event` to every session, optionally skipping the originator.
    ///
    /// Returns how many sessions accepted the notification.
    pub fn notify_all(&self, event: &str, payload: Value, exclude: Option<&SessionId>) -> usize {
        let mut delivered = 0;
        for handle in self.sessions.handles() {
            if exclude.is_some_and(|id| id == handle.id()) {
                continue;
            }
            if handle.send(SessionCommand::Notify {
                event: event.to_owned(),
                payload: payload.clone(),
            }) {
                delivered += 1;
            }
        }
        debug!(event, delivered, "notification broadcast");
        delivered
    }
}

/// One process-wide value mirrored into attached sessions.
///
/// Each attached session gets its own ordinary signal seeded with the
/// current value; [`set`](SharedSignal::set) updates the canonical copy and
/// queues a signal write on every attached session's worker. Within each
/// session the write behaves like any local mutation, idempotent-write
/// suppression included.
#[derive(Clone)]
pub struct SharedSignal {
    value: Arc<Mutex<Value>>,
    mirrors: Arc<Mutex<Vec<(String, SignalId)>>>,
    sessions: SessionRegistry,
}

impl SharedSignal {
    pub fn new(sessions: SessionRegistry, initial: Value) -> Self {
        Self {
            value: Arc::new(Mutex::new(initial)),
            mirrors: Arc::new(Mutex::new(Vec::new())),
            sessions,
        }
    }

    /// Current canonical value.
    pub fn get(&self) -> Value {
        self.value.lock().clone()
    }

    /// Mirror into `session`, returning the session-local signal its render
    /// nodes should read. Meant to be called from the session setup
    /// closure, before the worker starts.
    pub fn attach(&self, session: &mut Session) -> SignalId {
        let local = session.signal(self.get());
        self.mirrors
            .lock()
            .push((session.id().as_str().to_owned(), local));
        local
    }

    /// Update the canonical value and fan it out to every attached session.
    ///
    /// Mirrors whose session has been torn down are dropped on the way.
    pub fn set(&self, value: Value) {
        *self.value.lock() = value.clone();
        self.mirrors.lock().retain(|(token, signal)| {
            let Some(handle) = self.sessions.get(token) else {
                debug!(session = %token, "shared signal mirror pruned");
                return false;
            };
            handle.send(SessionCommand::SignalWrite {
                signal: *signal,
                value: value.clone(),
            })
        });
    }

    /// Number of live mirrors.
    pub fn mirror_count(&self) -> usize {
        self.mirrors.lock().len()
    }
}
