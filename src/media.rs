//! Local and remote media track handles.
//!
//! Device capture is out of scope; `LocalMedia` owns tracks that were built
//! elsewhere and hands them to every connection the call opens.

use std::fmt;
use std::sync::Arc;

use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// The local capture tracks shared by every outgoing connection.
///
/// The set is read-only once the call starts; each connector acquisition
/// registers every track on the fresh peer connection.
#[derive(Clone, Default)]
pub struct LocalMedia {
    tracks: Vec<Arc<dyn TrackLocal + Send + Sync>>,
}

impl LocalMedia {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_track(mut self, track: Arc<dyn TrackLocal + Send + Sync>) -> Self {
        self.tracks.push(track);
        self
    }

    pub fn tracks(&self) -> &[Arc<dyn TrackLocal + Send + Sync>] {
        &self.tracks
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

/// A media track received from the remote peer.
#[derive(Clone)]
pub struct RemoteTrack {
    kind: MediaKind,
    ssrc: u32,
    source: Option<Arc<TrackRemote>>,
}

impl RemoteTrack {
    pub(crate) fn from_rtc(track: Arc<TrackRemote>) -> Self {
        let kind = match track.kind() {
            RTPCodecType::Audio => MediaKind::Audio,
            _ => MediaKind::Video,
        };
        Self {
            kind,
            ssrc: track.ssrc(),
            source: Some(track),
        }
    }

    /// A detached track used by the in-memory connection double.
    pub fn detached(kind: MediaKind) -> Self {
        Self {
            kind,
            ssrc: 0,
            source: None,
        }
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// The underlying RTP track, absent for detached tracks.
    pub fn source(&self) -> Option<&Arc<TrackRemote>> {
        self.source.as_ref()
    }
}

impl fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("kind", &self.kind)
            .field("ssrc", &self.ssrc)
            .finish()
    }
}
