//! Connection primitive backed by the `webrtc` crate.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use webrtc::api::API;
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::media::{LocalMedia, RemoteTrack};
use crate::protocol::{IceCandidate, SdpKind, SessionDescription};

use super::{PeerConnector, PeerEvent, PeerHandle, PrimitiveError};

/// Acquires real peer connections, one per remote peer, with the shared
/// local tracks attached.
pub struct RtcConnector {
    api: API,
    ice_servers: Vec<String>,
    media: LocalMedia,
}

impl RtcConnector {
    pub fn new(ice_servers: Vec<String>, media: LocalMedia) -> Result<Self, PrimitiveError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(to_unavailable)?;
        let registry =
            register_default_interceptors(Registry::new(), &mut media_engine).map_err(to_unavailable)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();
        Ok(Self {
            api,
            ice_servers,
            media,
        })
    }
}

#[async_trait]
impl PeerConnector for RtcConnector {
    async fn connect(
        &self,
        peer_id: &str,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Box<dyn PeerHandle>, PrimitiveError> {
        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let pc = Arc::new(
            self.api
                .new_peer_connection(config)
                .await
                .map_err(to_unavailable)?,
        );

        for track in self.media.tracks() {
            pc.add_track(Arc::clone(track)).await.map_err(to_unavailable)?;
        }

        let candidate_events = events.clone();
        let candidate_peer = peer_id.to_string();
        pc.on_ice_candidate(Box::new(move |candidate| {
            let events = candidate_events.clone();
            let peer_id = candidate_peer.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(json) => {
                        let _ = events.send(PeerEvent::LocalCandidate(IceCandidate {
                            candidate: json.candidate,
                            sdp_mid: json.sdp_mid,
                            sdp_mline_index: json.sdp_mline_index.map(u32::from),
                        }));
                    }
                    Err(err) => {
                        tracing::warn!(
                            target = "connection",
                            peer_id = %peer_id,
                            "failed to serialize local candidate: {err}"
                        );
                    }
                }
            })
        }));

        let track_events = events;
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let events = track_events.clone();
            Box::pin(async move {
                let _ = events.send(PeerEvent::RemoteTrack(RemoteTrack::from_rtc(track)));
            })
        }));

        tracing::debug!(target = "connection", peer_id = %peer_id, "peer connection acquired");
        Ok(Box::new(RtcHandle { pc }))
    }
}

struct RtcHandle {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerHandle for RtcHandle {
    async fn create_offer(&self) -> Result<SessionDescription, PrimitiveError> {
        let offer = self.pc.create_offer(None).await.map_err(to_operation)?;
        from_rtc_description(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, PrimitiveError> {
        let answer = self.pc.create_answer(None).await.map_err(to_operation)?;
        from_rtc_description(answer)
    }

    async fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), PrimitiveError> {
        let desc = to_rtc_description(desc)?;
        self.pc
            .set_local_description(desc)
            .await
            .map_err(to_operation)
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), PrimitiveError> {
        let desc = to_rtc_description(desc)?;
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(to_operation)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PrimitiveError> {
        let init = webrtc::ice_transport::ice_candidate::RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index.map(|i| i as u16),
            username_fragment: None,
        };
        self.pc.add_ice_candidate(init).await.map_err(to_operation)
    }

    async fn close(&self) -> Result<(), PrimitiveError> {
        self.pc.close().await.map_err(to_operation)
    }
}

fn to_rtc_description(desc: SessionDescription) -> Result<RTCSessionDescription, PrimitiveError> {
    match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp).map_err(to_operation),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp).map_err(to_operation),
    }
}

fn from_rtc_description(desc: RTCSessionDescription) -> Result<SessionDescription, PrimitiveError> {
    let kind = match desc.sdp_type {
        RTCSdpType::Offer => SdpKind::Offer,
        RTCSdpType::Answer => SdpKind::Answer,
        other => {
            return Err(PrimitiveError::Operation(format!(
                "unexpected sdp type {other}"
            )));
        }
    };
    Ok(SessionDescription {
        kind,
        sdp: desc.sdp,
    })
}

fn to_unavailable(err: webrtc::Error) -> PrimitiveError {
    PrimitiveError::Unavailable(err.to_string())
}

fn to_operation(err: webrtc::Error) -> PrimitiveError {
    PrimitiveError::Operation(err.to_string())
}
