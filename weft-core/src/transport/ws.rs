//! WebSocket push transport.
//!
//! One TCP listener, one spawned task per connection. A connection opens
//! with a `hello` handshake: a blank hello creates a fresh session (the
//! application's setup closure declares its signals and nodes), a hello
//! carrying a known token resumes the matching session and replays every
//! unacknowledged flush. After the handshake the connection is a plain
//! pump: inbound frames become [`SessionCommand`]s, outbound
//! [`ServerMessage`]s serialize onto the socket from a dedicated writer
//! task so a slow client never blocks the session worker.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::session::worker::{self, SessionCommand, SessionRegistry};
use crate::session::{Session, SessionId};

/// Closure that declares a fresh session's signals, nodes, and handlers.
pub type SetupFn = Arc<dyn Fn(&mut Session) -> Result<()> + Send + Sync>;

/// WebSocket server hosting one session per client.
pub struct Server {
    config: EngineConfig,
    listener: TcpListener,
    sessions: SessionRegistry,
    setup: SetupFn,
}

impl Server {
    /// Bind the listener. `setup` runs once for every new session.
    pub async fn bind(config: EngineConfig, setup: SetupFn) -> Result<Self> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        Ok(Self {
            config,
            listener,
            sessions: SessionRegistry::new(),
            setup,
        })
    }

    /// The bound address, useful when the port was `0`.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Registry of live sessions, for broadcast and poll-mode access.
    pub fn sessions(&self) -> SessionRegistry {
        self.sessions.clone()
    }

    /// Accept connections forever.
    pub async fn run(self) -> Result<()> {
        info!(addr = %self.config.bind_addr, "listening");
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    debug!(%addr, "connection accepted");
                    let config = self.config.clone();
                    let sessions = self.sessions.clone();
                    let setup = Arc::clone(&self.setup);
                    tokio::spawn(async move {
                        if let Err(err) = handle_connection(stream, config, sessions, setup).await
                        {
                            error!(%addr, %err, "connection failed");
                        }
                    });
                }
                Err(err) => {
                    error!(%err, "accept failed");
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    config: EngineConfig,
    sessions: SessionRegistry,
    setup: SetupFn,
) -> Result<()> {
    let ws_config = WebSocketConfig {
        max_message_size: Some(config.max_message_size),
        ..Default::default()
    };
    let ws = tokio_tungstenite::accept_async_with_config(stream, Some(ws_config))
        .await
        .map_err(|err| EngineError::WebSocket(err.to_string()))?;
    let (mut write, mut read) = ws.split();

    // Handshake: the first frame must be a hello.
    let requested = loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Hello { session }) => break session,
                Ok(_) => {
                    warn!("frame before hello, closing");
                    return Err(EngineError::TransportClosed);
                }
                Err(err) => {
                    warn!(%err, "malformed hello");
                    return Err(EngineError::Serialization(err));
                }
            },
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(_)) | None => return Err(EngineError::TransportClosed),
            Some(Err(err)) => return Err(EngineError::WebSocket(err.to_string())),
        }
    };

    let (handle, resumed) = match requested.as_deref().and_then(|token| sessions.get(token)) {
        Some(handle) => (handle, true),
        None => {
            let mut session = Session::new(SessionId::generate(), &config);
            setup(&mut session)?;
            let handle = worker::spawn(session, &sessions, config.reconnect_grace);
            (handle, false)
        }
    };
    let token = handle.id().as_str().to_owned();
    info!(session = %token, resumed, "client attached");

    // Writer task: serializes session pushes onto the socket.
    let (sink, mut outbound) = mpsc::unbounded_channel::<ServerMessage>();
    let writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(err) => {
                    error!(%err, "unserializable server message");
                    continue;
                }
            };
            if write.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = write.close().await;
    });

    // Welcome goes out first; the attach then replays unacked flushes (or
    // first-renders a fresh session).
    let _ = sink.send(ServerMessage::Welcome {
        session: token.clone(),
        resumed,
    });
    handle.send(SessionCommand::Attach { sink: sink.clone() });

    while let Some(frame) = read.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Event(event)) => {
                    if !handle.send(SessionCommand::Event(event)) {
                        break;
                    }
                }
                Ok(ClientMessage::Ack { seq }) => {
                    handle.send(SessionCommand::Ack { seq });
                }
                Ok(ClientMessage::Hello { .. }) => {
                    debug!(session = %token, "redundant hello ignored");
                }
                Err(err) => {
                    warn!(session = %token, %err, "malformed frame");
                    let _ = sink.send(ServerMessage::Error {
                        message: format!("malformed message: {err}"),
                    });
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_)) => {}
            Err(err) => {
                debug!(session = %token, %err, "read error");
                break;
            }
        }
    }

    handle.send(SessionCommand::Detach { sink });
    writer.abort();
    info!(session = %token, "client detached");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::EventMessage;
    use serde_json::{json, Value};
    use tokio_tungstenite::connect_async;

    fn counter_setup() -> SetupFn {
        Arc::new(|session: &mut Session| {
            let count = session.signal(json!(0));
            let node = session.register_node(
                Some("counter"),
                Box::new(move |scope| Ok(format!("<b>{}</b>", scope.read(count)?))),
            );
            session.on_event(
                node,
                "click",
                Box::new(move |scope, _| {
                    let v = scope.read(count)?.as_i64().unwrap_or(0);
                    scope.write(count, json!(v + 1))
                }),
            );
            Ok(())
        })
    }

    async fn start_server() -> (SocketAddr, SessionRegistry) {
        let mut config = EngineConfig::default();
        config.bind_addr = "127.0.0.1:0".parse().unwrap();
        let server = Server::bind(config, counter_setup()).await.unwrap();
        let addr = server.local_addr().unwrap();
        let sessions = server.sessions();
        tokio::spawn(server.run());
        (addr, sessions)
    }

    async fn recv_json(
        ws: &mut (impl StreamExt<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>>
              + Unpin),
    ) -> Value {
        loop {
            match ws.next().await.expect("connection open").unwrap() {
                Message::Text(text) => return serde_json::from_str(&text).unwrap(),
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn hello_welcome_and_initial_render() {
        let (addr, _) = start_server().await;
        let (mut ws, _) = connect_async(format!("ws://{addr}")).await.unwrap();

        ws.send(Message::Text(r#"{"type":"hello"}"#.into()))
            .await
            .unwrap();

        let welcome = recv_json(&mut ws).await;
        assert_eq!(welcome["type"], "welcome");
        assert_eq!(welcome["resumed"], false);
        assert!(welcome["session"].as_str().is_some());

        let update = recv_json(&mut ws).await;
        assert_eq!(update["type"], "update");
        assert_eq!(update["seq"], 1);
        assert_eq!(update["updates"][0]["node"], "counter");
        assert_eq!(update["updates"][0]["fragment"], "<b>0</b>");
    }

    #[tokio::test]
    async fn click_round_trip() {
        let (addr, _) = start_server().await;
        let (mut ws, _) = connect_async(format!("ws://{addr}")).await.unwrap();

        ws.send(Message::Text(r#"{"type":"hello"}"#.into()))
            .await
            .unwrap();
        recv_json(&mut ws).await; // welcome
        recv_json(&mut ws).await; // initial render

        let event = serde_json::to_string(&ClientMessage::Event(EventMessage {
            node: "counter".into(),
            kind: "click".into(),
            payload: Value::Null,
            seq: 1,
        }))
        .unwrap();
        ws.send(Message::Text(event)).await.unwrap();

        let update = recv_json(&mut ws).await;
        assert_eq!(update["updates"][0]["fragment"], "<b>1</b>");
    }

    #[tokio::test]
    async fn resume_replays_unacked_flushes() {
        let (addr, sessions) = start_server().await;
        let (mut ws, _) = connect_async(format!("ws://{addr}")).await.unwrap();

        ws.send(Message::Text(r#"{"type":"hello"}"#.into()))
            .await
            .unwrap();
        let welcome = recv_json(&mut ws).await;
        let token = welcome["session"].as_str().unwrap().to_owned();
        recv_json(&mut ws).await; // initial render, never acked

        // Drop the socket without acking; the session lingers in grace.
        drop(ws);
        assert!(sessions.get(&token).is_some());

        let (mut ws, _) = connect_async(format!("ws://{addr}")).await.unwrap();
        let hello = format!(r#"{{"type":"hello","session":"{token}"}}"#);
        ws.send(Message::Text(hello)).await.unwrap();

        let welcome = recv_json(&mut ws).await;
        assert_eq!(welcome["resumed"], true);
        assert_eq!(welcome["session"], token.as_str());

        // The unacked seq-1 flush comes back, not a fresh render.
        let replayed = recv_json(&mut ws).await;
        assert_eq!(replayed["type"], "update");
        assert_eq!(replayed["seq"], 1);
        assert_eq!(replayed["updates"][0]["fragment"], "<b>0</b>");
    }

    #[tokio::test]
    async fn acked_flushes_are_not_replayed() {
        let (addr, _) = start_server().await;
        let (mut ws, _) = connect_async(format!("ws://{addr}")).await.unwrap();

        ws.send(Message::Text(r#"{"type":"hello"}"#.into()))
            .await
            .unwrap();
        let welcome = recv_json(&mut ws).await;
        let token = welcome["session"].as_str().unwrap().to_owned();
        recv_json(&mut ws).await;

        ws.send(Message::Text(r#"{"type":"ack","seq":1}"#.into()))
            .await
            .unwrap();
        // Let the ack land before reconnecting.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        drop(ws);

        let (mut ws, _) = connect_async(format!("ws://{addr}")).await.unwrap();
        let hello = format!(r#"{{"type":"hello","session":"{token}"}}"#);
        ws.send(Message::Text(hello)).await.unwrap();

        let welcome = recv_json(&mut ws).await;
        assert_eq!(welcome["resumed"], true);

        // Nothing pending: a follow-up click produces the next frame.
        let event = serde_json::to_string(&ClientMessage::Event(EventMessage {
            node: "counter".into(),
            kind: "click".into(),
            payload: Value::Null,
            seq: 1,
        }))
        .unwrap();
        ws.send(Message::Text(event)).await.unwrap();
        let update = recv_json(&mut ws).await;
        assert_eq!(update["seq"], 2);
        assert_eq!(update["updates"][0]["fragment"], "<b>1</b>");
    }

    #[tokio::test]
    async fn unknown_token_gets_a_fresh_session() {
        let (addr, _) = start_server().await;
        let (mut ws, _) = connect_async(format!("ws://{addr}")).await.unwrap();

        ws.send(Message::Text(
            r#"{"type":"hello","session":"no-such-token"}"#.into(),
        ))
        .await
        .unwrap();

        let welcome = recv_json(&mut ws).await;
        assert_eq!(welcome["resumed"], false);
        assert_ne!(welcome["session"], "no-such-token");
    }
}
