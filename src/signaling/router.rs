//! Event router: drives sessions from the channel event stream.
//!
//! Events are processed inline in delivery order, so everything the channel
//! says about one peer is applied in the order it arrived. Asynchronous
//! primitive events (local candidates, remote tracks) are pumped per session
//! by a forwarding task.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::connection::{PeerConnector, PeerEvent};
use crate::media::RemoteTrack;
use crate::protocol::{IceCandidate, SessionDescription, Signal, SignalEnvelope};
use crate::transport::{ChannelEvent, ChannelTransport};

use super::registry::SessionRegistry;
use super::session::Role;
use super::SignalingError;

/// Call-level events surfaced to the application.
#[derive(Debug, Clone)]
pub enum CallEvent {
    RemoteTrack { peer_id: String, track: RemoteTrack },
    PeerLeft { peer_id: String },
}

pub struct EventRouter {
    transport: Arc<dyn ChannelTransport>,
    connector: Arc<dyn PeerConnector>,
    registry: Arc<SessionRegistry>,
    call_events: mpsc::UnboundedSender<CallEvent>,
}

impl EventRouter {
    pub fn new(
        transport: Arc<dyn ChannelTransport>,
        connector: Arc<dyn PeerConnector>,
        registry: Arc<SessionRegistry>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<CallEvent>) {
        let (call_events, call_events_rx) = mpsc::unbounded_channel();
        let router = Arc::new(Self {
            transport,
            connector,
            registry,
            call_events,
        });
        (router, call_events_rx)
    }

    /// Consume the channel event stream until it ends, then tear down every
    /// live session.
    pub async fn run(&self) -> Result<(), SignalingError> {
        let mut events = self.transport.events().await?;
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        tracing::info!(target = "signaling", "channel stream ended, tearing down sessions");
        self.registry.remove_all().await;
        Ok(())
    }

    /// Apply one channel event. `run` loops this over the live stream; it is
    /// also callable directly when the stream is driven externally.
    pub async fn handle_event(&self, event: ChannelEvent) {
        match event {
            ChannelEvent::MemberJoined { peer_id } => self.on_member_joined(peer_id).await,
            ChannelEvent::MemberLeft { peer_id } => self.on_member_left(peer_id).await,
            ChannelEvent::Message { peer_id, payload } => self.on_message(peer_id, payload).await,
        }
    }

    async fn on_member_joined(&self, peer_id: String) {
        tracing::info!(target = "signaling", peer_id = %peer_id, "member joined, initiating offer");
        let (session, fresh) = self.registry.get_or_create(&peer_id, Role::Offerer).await;
        if !fresh {
            tracing::debug!(
                target = "signaling",
                peer_id = %peer_id,
                "negotiation already underway, ignoring duplicate join"
            );
            return;
        }
        let events = self.spawn_peer_event_pump(peer_id.clone());
        let result = session
            .lock()
            .await
            .start_as_offerer(self.connector.as_ref(), events)
            .await;
        self.finish_negotiation_step(&peer_id, result).await;
    }

    async fn on_message(&self, peer_id: String, payload: String) {
        let envelope = match SignalEnvelope::decode(&payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!(
                    target = "signaling",
                    peer_id = %peer_id,
                    "dropping undecodable envelope: {err}"
                );
                return;
            }
        };
        match envelope.signal {
            Signal::Offer { offer } => self.on_offer(peer_id, offer).await,
            Signal::Answer { answer } => self.on_answer(peer_id, answer).await,
            Signal::Candidate { candidate } => self.on_candidate(peer_id, candidate).await,
        }
    }

    async fn on_offer(&self, peer_id: String, offer: SessionDescription) {
        tracing::info!(target = "signaling", peer_id = %peer_id, "offer received, answering");
        let (session, fresh) = self.registry.get_or_create(&peer_id, Role::Answerer).await;
        if !fresh {
            tracing::debug!(
                target = "signaling",
                peer_id = %peer_id,
                "duplicate offer ignored"
            );
            return;
        }
        let events = self.spawn_peer_event_pump(peer_id.clone());
        let result = session
            .lock()
            .await
            .start_as_answerer(self.connector.as_ref(), events, offer)
            .await;
        self.finish_negotiation_step(&peer_id, result).await;
    }

    async fn on_answer(&self, peer_id: String, answer: SessionDescription) {
        let Some(session) = self.registry.get(&peer_id).await else {
            tracing::debug!(
                target = "signaling",
                peer_id = %peer_id,
                "dropping answer for unknown peer"
            );
            return;
        };
        match session.lock().await.apply_remote_answer(answer).await {
            Ok(true) => {
                tracing::info!(target = "signaling", peer_id = %peer_id, "negotiation complete");
            }
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(
                    target = "signaling",
                    peer_id = %peer_id,
                    "failed to apply remote answer: {err}"
                );
            }
        }
    }

    async fn on_candidate(&self, peer_id: String, candidate: IceCandidate) {
        let Some(session) = self.registry.get(&peer_id).await else {
            tracing::debug!(
                target = "signaling",
                peer_id = %peer_id,
                "dropping candidate for unknown peer"
            );
            return;
        };
        if let Err(err) = session.lock().await.add_remote_candidate(candidate).await {
            tracing::warn!(
                target = "signaling",
                peer_id = %peer_id,
                "failed to apply remote candidate: {err}"
            );
        }
    }

    async fn on_member_left(&self, peer_id: String) {
        if self.registry.remove(&peer_id).await {
            tracing::info!(target = "signaling", peer_id = %peer_id, "member left, session removed");
        }
        let _ = self.call_events.send(CallEvent::PeerLeft { peer_id });
    }

    /// After a session start: send the produced envelope, or unwind the
    /// session so no half-negotiated state survives.
    async fn finish_negotiation_step(
        &self,
        peer_id: &str,
        result: Result<SignalEnvelope, SignalingError>,
    ) {
        let envelope = match result {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!(
                    target = "signaling",
                    peer_id = %peer_id,
                    "negotiation failed: {err}"
                );
                self.registry.remove(peer_id).await;
                return;
            }
        };
        if let Err(err) = self.send_envelope(peer_id, &envelope).await {
            tracing::warn!(
                target = "signaling",
                peer_id = %peer_id,
                "failed to send signal, removing session: {err}"
            );
            self.registry.remove(peer_id).await;
        }
    }

    async fn send_envelope(
        &self,
        peer_id: &str,
        envelope: &SignalEnvelope,
    ) -> Result<(), SignalingError> {
        let payload = envelope.encode()?;
        self.transport.send_to_peer(peer_id, payload).await?;
        Ok(())
    }

    /// Forwarding task between one primitive's event stream and the outside
    /// world: local candidates go out as envelopes, remote tracks surface as
    /// call events. The task ends when the primitive drops its sender.
    fn spawn_peer_event_pump(&self, peer_id: String) -> mpsc::UnboundedSender<PeerEvent> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let transport = Arc::clone(&self.transport);
        let call_events = self.call_events.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    PeerEvent::LocalCandidate(candidate) => {
                        let envelope = SignalEnvelope::candidate(candidate);
                        let payload = match envelope.encode() {
                            Ok(payload) => payload,
                            Err(err) => {
                                tracing::warn!(
                                    target = "signaling",
                                    peer_id = %peer_id,
                                    "failed to encode candidate: {err}"
                                );
                                continue;
                            }
                        };
                        if let Err(err) = transport.send_to_peer(&peer_id, payload).await {
                            tracing::debug!(
                                target = "signaling",
                                peer_id = %peer_id,
                                "candidate not delivered: {err}"
                            );
                        }
                    }
                    PeerEvent::RemoteTrack(track) => {
                        let delivered = call_events.send(CallEvent::RemoteTrack {
                            peer_id: peer_id.clone(),
                            track,
                        });
                        if delivered.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        tx
    }
}
