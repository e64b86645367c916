//! Signaling orchestration: per-peer negotiation sessions, the registry that
//! owns them, and the router that drives everything off the channel event
//! stream.

mod registry;
mod router;
mod session;

use thiserror::Error;

use crate::connection::PrimitiveError;
use crate::protocol::EnvelopeError;
use crate::transport::TransportError;

pub use registry::{SessionRegistry, SharedSession};
pub use router::{CallEvent, EventRouter};
pub use session::{Role, SignalingSession};

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error(transparent)]
    Primitive(#[from] PrimitiveError),
    /// An operation arrived in a state that cannot accept it.
    #[error("invalid signaling state: {0}")]
    InvalidState(&'static str),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}
