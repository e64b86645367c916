//! Channel transport: presence plus unicast messaging for a named room.
//!
//! The transport knows nothing about signaling semantics; it delivers opaque
//! text payloads and membership events in the order the room server emits
//! them.

pub mod mock;
pub mod websocket;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport setup failed: {0}")]
    Setup(String),
    #[error("signaling channel closed")]
    ChannelClosed,
    #[error("unknown peer {0}")]
    UnknownPeer(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    MemberJoined { peer_id: String },
    MemberLeft { peer_id: String },
    Message { peer_id: String, payload: String },
}

#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Local identity on the channel.
    fn peer_id(&self) -> &str;

    /// Join the named room; membership events start flowing afterwards.
    async fn join(&self, room: &str) -> Result<(), TransportError>;

    async fn leave(&self) -> Result<(), TransportError>;

    /// Unicast an opaque text payload to one member of the room.
    async fn send_to_peer(&self, peer_id: &str, payload: String) -> Result<(), TransportError>;

    /// Take the inbound event stream. Single consumer; a second call fails.
    async fn events(&self) -> Result<mpsc::UnboundedReceiver<ChannelEvent>, TransportError>;
}
