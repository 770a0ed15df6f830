//! Transport: the per-session push channel.
//!
//! Each session owns exactly one [`Outbound`] handle. Messages flow through
//! it in flush order; it never reorders and never coalesces across flushes.
//! Two delivery modes share the same handle:
//!
//! - *Push* (preferred): a websocket sink is attached and every message is
//!   forwarded immediately (see [`ws`]).
//! - *Pull* (fallback): no sink is attached; the client periodically drains
//!   [`Outbound::pending`] through the session worker's poll command.
//!
//! Either way, `Update` messages stay in the unacknowledged outbox until the
//! client acks their sequence number. Attaching a sink replays the outbox
//! first, which gives at-least-once delivery with ordered replay after a
//! reconnect; the inbound event sequence numbers make the replays idempotent
//! on the other side of the loop.

pub mod ws;

use std::collections::VecDeque;

use tokio::sync::mpsc;
use tracing::debug;

use crate::protocol::ServerMessage;

/// Ordered outbound channel with an unacknowledged-update outbox.
#[derive(Debug, Default)]
pub struct Outbound {
    sink: Option<mpsc::UnboundedSender<ServerMessage>>,
    /// `Update` messages awaiting acknowledgment, oldest first.
    outbox: VecDeque<ServerMessage>,
    acked: u64,
}

impl Outbound {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a live sink is attached.
    pub fn is_attached(&self) -> bool {
        self.sink.is_some()
    }

    /// Attach a sink, replaying every unacknowledged update in order first.
    pub fn attach(&mut self, sink: mpsc::UnboundedSender<ServerMessage>) {
        for msg in &self.outbox {
            if sink.send(msg.clone()).is_err() {
                debug!("outbound sink closed during replay");
                return;
            }
        }
        self.sink = Some(sink);
    }

    /// Drop the sink if `sink` is the one attached; updates keep
    /// accumulating in the outbox for a possible reconnect. A connection
    /// tearing down after its replacement already attached must not take
    /// the replacement's sink with it.
    pub fn detach_if(&mut self, sink: &mpsc::UnboundedSender<ServerMessage>) {
        if self
            .sink
            .as_ref()
            .is_some_and(|current| current.same_channel(sink))
        {
            self.sink = None;
        }
    }

    /// Send a message. Updates are retained until acknowledged; transient
    /// messages (welcome, notify, error) are fire-and-forget.
    pub fn send(&mut self, msg: ServerMessage) {
        if matches!(msg, ServerMessage::Update { .. }) {
            self.outbox.push_back(msg.clone());
        }
        if let Some(sink) = &self.sink {
            if sink.send(msg).is_err() {
                // Peer went away without a close frame.
                self.sink = None;
            }
        }
    }

    /// Acknowledge all updates up to and including `seq`.
    pub fn ack(&mut self, seq: u64) {
        if seq <= self.acked {
            return;
        }
        self.acked = seq;
        self.outbox.retain(|msg| match msg {
            ServerMessage::Update { seq: s, .. } => *s > seq,
            _ => true,
        });
    }

    /// Snapshot of the unacknowledged outbox, for pull-mode clients.
    pub fn pending(&self) -> Vec<ServerMessage> {
        self.outbox.iter().cloned().collect()
    }

    /// Highest acknowledged update sequence.
    pub fn acked(&self) -> u64 {
        self.acked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::NodeUpdate;

    fn update(seq: u64) -> ServerMessage {
        ServerMessage::Update {
            seq,
            updates: vec![NodeUpdate {
                node: "n".into(),
                fragment: format!("<div>{seq}</div>"),
            }],
        }
    }

    #[test]
    fn detached_updates_buffer_until_ack() {
        let mut out = Outbound::new();
        out.send(update(1));
        out.send(update(2));
        out.send(update(3));

        assert_eq!(out.pending().len(), 3);

        out.ack(2);
        let pending = out.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0], update(3));
    }

    #[test]
    fn attach_replays_outbox_in_order() {
        let mut out = Outbound::new();
        out.send(update(1));
        out.send(update(2));

        let (tx, mut rx) = mpsc::unbounded_channel();
        out.attach(tx);
        assert!(out.is_attached());

        assert_eq!(rx.try_recv().unwrap(), update(1));
        assert_eq!(rx.try_recv().unwrap(), update(2));
        assert!(rx.try_recv().is_err());

        // New traffic flows straight through.
        out.send(update(3));
        assert_eq!(rx.try_recv().unwrap(), update(3));
    }

    #[test]
    fn transient_messages_are_not_retained() {
        let mut out = Outbound::new();
        out.send(ServerMessage::Error {
            message: "oops".into(),
        });
        assert!(out.pending().is_empty());
    }

    #[test]
    fn matching_detach_suspends_delivery() {
        let mut out = Outbound::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        out.attach(tx.clone());
        out.detach_if(&tx);
        assert!(!out.is_attached());

        // Suspended: updates buffer instead of flowing to the old sink.
        out.send(update(1));
        assert!(rx.try_recv().is_err());
        assert_eq!(out.pending().len(), 1);
    }

    #[test]
    fn stale_detach_keeps_newer_sink() {
        let mut out = Outbound::new();
        let (old, _old_rx) = mpsc::unbounded_channel();
        let (new, mut new_rx) = mpsc::unbounded_channel();

        out.attach(old.clone());
        out.attach(new);
        out.detach_if(&old);
        assert!(out.is_attached());

        out.send(update(1));
        assert_eq!(new_rx.try_recv().unwrap(), update(1));
    }

    #[test]
    fn stale_ack_is_ignored() {
        let mut out = Outbound::new();
        out.send(update(1));
        out.send(update(2));
        out.ack(2);
        out.ack(1);
        assert_eq!(out.acked(), 2);
        assert!(out.pending().is_empty());
    }
}
