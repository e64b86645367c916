//! Websocket-backed channel transport.
//!
//! Speaks a small JSON protocol to a room server: the client joins a room,
//! the server relays membership events and per-peer signal payloads. One
//! writer task drains the outbound queue, one reader task fans server
//! messages into the event stream, and a heartbeat task keeps intermediaries
//! from reaping the connection.

use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;
use uuid::Uuid;

use super::{ChannelEvent, ChannelTransport, TransportError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Join { room: String, peer_id: String },
    Leave,
    Signal { to_peer: String, payload: String },
    Ping,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    JoinSuccess {
        room: String,
        peer_id: String,
        peers: Vec<String>,
    },
    JoinError {
        reason: String,
    },
    MemberJoined {
        peer_id: String,
    },
    MemberLeft {
        peer_id: String,
    },
    Signal {
        from_peer: String,
        payload: String,
    },
    Pong,
    Error {
        message: String,
    },
}

pub struct WebSocketChannel {
    peer_id: String,
    send_tx: mpsc::UnboundedSender<ClientMessage>,
    events_rx: AsyncMutex<Option<mpsc::UnboundedReceiver<ChannelEvent>>>,
    join_waiter: AsyncMutex<Option<oneshot::Sender<Result<(), String>>>>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl WebSocketChannel {
    /// Connect to the room server. No room is joined yet; call
    /// [`ChannelTransport::join`] once the event stream has a consumer.
    pub async fn connect(url: &str) -> Result<Arc<Self>, TransportError> {
        let ws_url = derive_websocket_url(url)?;
        let (ws_stream, _) = connect_async(ws_url.as_str())
            .await
            .map_err(|err| TransportError::Setup(format!("websocket connect failed: {err}")))?;
        tracing::debug!(target = "transport", url = %ws_url, "room server websocket connected");
        let (mut ws_write, mut ws_read) = ws_stream.split();

        let (send_tx, mut send_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (events_tx, events_rx) = mpsc::unbounded_channel::<ChannelEvent>();

        let channel = Arc::new(Self {
            peer_id: Uuid::new_v4().to_string(),
            send_tx,
            events_rx: AsyncMutex::new(Some(events_rx)),
            join_waiter: AsyncMutex::new(None),
            tasks: Mutex::new(Vec::new()),
        });

        let writer_handle = tokio::spawn(async move {
            while let Some(message) = send_rx.recv().await {
                if let Ok(text) = serde_json::to_string(&message) {
                    if ws_write.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            }
        });

        let reader_channel = Arc::clone(&channel);
        let reader_handle = tokio::spawn(async move {
            while let Some(msg) = ws_read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if let Ok(server_msg) = serde_json::from_str::<ServerMessage>(&text) {
                            handle_server_message(&reader_channel, server_msg, &events_tx).await;
                        }
                    }
                    Ok(Message::Binary(data)) => {
                        if let Ok(text) = String::from_utf8(data) {
                            if let Ok(server_msg) = serde_json::from_str::<ServerMessage>(&text) {
                                handle_server_message(&reader_channel, server_msg, &events_tx)
                                    .await;
                            }
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        tracing::warn!(target = "transport", "room server websocket error: {err}");
                        break;
                    }
                }
            }
        });

        let heartbeat_tx = channel.send_tx.clone();
        let heartbeat_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(30));
            loop {
                ticker.tick().await;
                if heartbeat_tx.send(ClientMessage::Ping).is_err() {
                    break;
                }
            }
        });

        {
            let mut guard = channel
                .tasks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.push(writer_handle);
            guard.push(reader_handle);
            guard.push(heartbeat_handle);
        }

        Ok(channel)
    }
}

#[async_trait]
impl ChannelTransport for WebSocketChannel {
    fn peer_id(&self) -> &str {
        &self.peer_id
    }

    async fn join(&self, room: &str) -> Result<(), TransportError> {
        let (tx, rx) = oneshot::channel();
        *self.join_waiter.lock().await = Some(tx);
        self.send_tx
            .send(ClientMessage::Join {
                room: room.to_string(),
                peer_id: self.peer_id.clone(),
            })
            .map_err(|_| TransportError::ChannelClosed)?;
        match rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(TransportError::Setup(format!("join rejected: {reason}"))),
            Err(_) => Err(TransportError::ChannelClosed),
        }
    }

    async fn leave(&self) -> Result<(), TransportError> {
        self.send_tx
            .send(ClientMessage::Leave)
            .map_err(|_| TransportError::ChannelClosed)
    }

    async fn send_to_peer(&self, peer_id: &str, payload: String) -> Result<(), TransportError> {
        self.send_tx
            .send(ClientMessage::Signal {
                to_peer: peer_id.to_string(),
                payload,
            })
            .map_err(|_| TransportError::ChannelClosed)
    }

    async fn events(&self) -> Result<mpsc::UnboundedReceiver<ChannelEvent>, TransportError> {
        let mut guard = self.events_rx.lock().await;
        guard
            .take()
            .ok_or_else(|| TransportError::Setup("event stream already taken".into()))
    }
}

impl Drop for WebSocketChannel {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for handle in tasks.drain(..) {
                handle.abort();
            }
        }
    }
}

async fn handle_server_message(
    channel: &Arc<WebSocketChannel>,
    message: ServerMessage,
    events_tx: &mpsc::UnboundedSender<ChannelEvent>,
) {
    match message {
        ServerMessage::JoinSuccess { room, peers, .. } => {
            tracing::debug!(
                target = "transport",
                room = %room,
                members = peers.len(),
                "joined room"
            );
            if let Some(tx) = channel.join_waiter.lock().await.take() {
                let _ = tx.send(Ok(()));
            }
        }
        ServerMessage::JoinError { reason } => {
            if let Some(tx) = channel.join_waiter.lock().await.take() {
                let _ = tx.send(Err(reason));
            }
        }
        ServerMessage::MemberJoined { peer_id } => {
            let _ = events_tx.send(ChannelEvent::MemberJoined { peer_id });
        }
        ServerMessage::MemberLeft { peer_id } => {
            let _ = events_tx.send(ChannelEvent::MemberLeft { peer_id });
        }
        ServerMessage::Signal { from_peer, payload } => {
            let _ = events_tx.send(ChannelEvent::Message {
                peer_id: from_peer,
                payload,
            });
        }
        ServerMessage::Pong => {}
        ServerMessage::Error { message } => {
            tracing::warn!(target = "transport", "room server error: {message}");
        }
    }
}

fn derive_websocket_url(raw: &str) -> Result<Url, TransportError> {
    let mut url = Url::parse(raw)
        .map_err(|err| TransportError::Setup(format!("invalid room server url {raw}: {err}")))?;
    let scheme = match url.scheme() {
        "ws" | "wss" => return Ok(url),
        "http" => "ws",
        "https" => "wss",
        other => {
            return Err(TransportError::Setup(format!(
                "unsupported room server scheme {other}"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| TransportError::Setup("invalid websocket scheme".into()))?;
    Ok(url)
}
