//! Connection primitive seam.
//!
//! A [`PeerConnector`] acquires one [`PeerHandle`] per remote peer. The
//! handle exposes exactly the negotiation surface the signaling layer needs;
//! everything transport-level (ICE gathering, DTLS, RTP) stays behind it.

pub mod mock;
pub mod rtc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::media::RemoteTrack;
use crate::protocol::{IceCandidate, SessionDescription};

#[derive(Debug, Error)]
pub enum PrimitiveError {
    /// The primitive could not be acquired at all. Negotiation for the peer
    /// aborts and no session survives.
    #[error("connection primitive unavailable: {0}")]
    Unavailable(String),
    /// An operation on an acquired primitive failed.
    #[error("connection primitive operation failed: {0}")]
    Operation(String),
}

/// Events surfaced asynchronously by an acquired primitive.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// A locally gathered ICE candidate to relay to the remote peer.
    LocalCandidate(IceCandidate),
    /// A remote media track became available.
    RemoteTrack(RemoteTrack),
}

#[async_trait]
pub trait PeerHandle: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, PrimitiveError>;

    async fn create_answer(&self) -> Result<SessionDescription, PrimitiveError>;

    async fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), PrimitiveError>;

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), PrimitiveError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PrimitiveError>;

    /// Release the primitive. Safe to call at most once per handle; the
    /// session layer guarantees it is.
    async fn close(&self) -> Result<(), PrimitiveError>;
}

#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Acquire a fresh primitive for `peer_id`. Asynchronous events from the
    /// primitive flow through `events` until the handle is closed.
    async fn connect(
        &self,
        peer_id: &str,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Box<dyn PeerHandle>, PrimitiveError>;
}
