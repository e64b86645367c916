//! Wire format for signaling envelopes exchanged through the channel
//! transport.
//!
//! The envelope is JSON carried in the transport's opaque text payload: a
//! union tagged by `type` plus an explicit `v` schema version. Payloads that
//! omit `v` decode as version 1 so peers running the unversioned schema keep
//! interoperating.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Current envelope schema version.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unsupported envelope version {0}")]
    UnsupportedVersion(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// A session description produced or consumed by the connection primitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// One ICE candidate in transit between peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u32>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Signal {
    Offer { offer: SessionDescription },
    Answer { answer: SessionDescription },
    Candidate { candidate: IceCandidate },
}

/// The unit sent through the channel transport. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalEnvelope {
    #[serde(rename = "v", default = "default_version")]
    pub version: u32,
    #[serde(flatten)]
    pub signal: Signal,
}

fn default_version() -> u32 {
    SCHEMA_VERSION
}

impl SignalEnvelope {
    pub fn new(signal: Signal) -> Self {
        Self {
            version: SCHEMA_VERSION,
            signal,
        }
    }

    pub fn offer(offer: SessionDescription) -> Self {
        Self::new(Signal::Offer { offer })
    }

    pub fn answer(answer: SessionDescription) -> Self {
        Self::new(Signal::Answer { answer })
    }

    pub fn candidate(candidate: IceCandidate) -> Self {
        Self::new(Signal::Candidate { candidate })
    }

    pub fn encode(&self) -> Result<String, EnvelopeError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self, EnvelopeError> {
        let envelope: Self = serde_json::from_str(text)?;
        if envelope.version > SCHEMA_VERSION {
            return Err(EnvelopeError::UnsupportedVersion(envelope.version));
        }
        Ok(envelope)
    }
}
