//! Per-peer negotiation state machine.
//!
//! A session owns the primitive handle for exactly one remote peer and
//! enforces the SDP ordering rules: the local description is produced and
//! applied before it is sent, candidates received before the remote
//! description are buffered and flushed in arrival order right after it is
//! set, and a duplicate remote answer is absorbed without touching the
//! primitive again.

use std::mem;

use tokio::sync::mpsc;

use crate::connection::{PeerConnector, PeerEvent, PeerHandle};
use crate::protocol::{IceCandidate, SdpKind, SessionDescription, SignalEnvelope};

use super::SignalingError;

/// Which side of the offer/answer exchange this session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Saw the peer join and initiates with an offer.
    Offerer,
    /// Received an offer and responds with an answer.
    Answerer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LocalSdp {
    Unset,
    Pending,
    Set,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RemoteSdp {
    Unset,
    Set,
}

pub struct SignalingSession {
    peer_id: String,
    role: Role,
    local_sdp: LocalSdp,
    remote_sdp: RemoteSdp,
    pending_candidates: Vec<IceCandidate>,
    handle: Option<Box<dyn PeerHandle>>,
}

impl SignalingSession {
    pub fn new(peer_id: impl Into<String>, role: Role) -> Self {
        Self {
            peer_id: peer_id.into(),
            role,
            local_sdp: LocalSdp::Unset,
            remote_sdp: RemoteSdp::Unset,
            pending_candidates: Vec::new(),
            handle: None,
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    fn handle(&self) -> Result<&dyn PeerHandle, SignalingError> {
        self.handle
            .as_deref()
            .ok_or(SignalingError::InvalidState("no primitive acquired"))
    }

    /// Acquire the primitive and produce the outbound offer. The local
    /// description is applied before the envelope is returned for sending.
    pub async fn start_as_offerer(
        &mut self,
        connector: &dyn PeerConnector,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<SignalEnvelope, SignalingError> {
        if self.role != Role::Offerer {
            return Err(SignalingError::InvalidState("session is not the offerer"));
        }
        if self.handle.is_some() || self.local_sdp != LocalSdp::Unset {
            return Err(SignalingError::InvalidState("negotiation already started"));
        }
        let handle = connector.connect(&self.peer_id, events).await?;
        self.handle = Some(handle);
        let offer = self.handle()?.create_offer().await?;
        self.local_sdp = LocalSdp::Pending;
        self.handle()?.set_local_description(offer.clone()).await?;
        self.local_sdp = LocalSdp::Set;
        Ok(SignalEnvelope::offer(offer))
    }

    /// Acquire the primitive, apply the remote offer, and produce the
    /// outbound answer. Candidates buffered before the call are flushed as
    /// soon as the remote description lands.
    pub async fn start_as_answerer(
        &mut self,
        connector: &dyn PeerConnector,
        events: mpsc::UnboundedSender<PeerEvent>,
        offer: SessionDescription,
    ) -> Result<SignalEnvelope, SignalingError> {
        if self.role != Role::Answerer {
            return Err(SignalingError::InvalidState("session is not the answerer"));
        }
        if self.handle.is_some() || self.local_sdp != LocalSdp::Unset {
            return Err(SignalingError::InvalidState("negotiation already started"));
        }
        if offer.kind != SdpKind::Offer {
            return Err(SignalingError::InvalidState("expected an offer description"));
        }
        let handle = connector.connect(&self.peer_id, events).await?;
        self.handle = Some(handle);
        self.handle()?.set_remote_description(offer).await?;
        self.remote_sdp = RemoteSdp::Set;
        self.drain_pending().await?;
        let answer = self.handle()?.create_answer().await?;
        self.local_sdp = LocalSdp::Pending;
        self.handle()?.set_local_description(answer.clone()).await?;
        self.local_sdp = LocalSdp::Set;
        Ok(SignalEnvelope::answer(answer))
    }

    /// Apply the remote answer on an offerer session. Returns false when the
    /// answer is a duplicate, which is absorbed without any primitive call.
    pub async fn apply_remote_answer(
        &mut self,
        answer: SessionDescription,
    ) -> Result<bool, SignalingError> {
        if self.role != Role::Offerer {
            return Err(SignalingError::InvalidState(
                "answer received on answerer session",
            ));
        }
        if answer.kind != SdpKind::Answer {
            return Err(SignalingError::InvalidState(
                "expected an answer description",
            ));
        }
        if self.remote_sdp == RemoteSdp::Set {
            tracing::debug!(
                target = "signaling",
                peer_id = %self.peer_id,
                "duplicate remote answer ignored"
            );
            return Ok(false);
        }
        self.handle()?.set_remote_description(answer).await?;
        self.remote_sdp = RemoteSdp::Set;
        self.drain_pending().await?;
        Ok(true)
    }

    /// Feed a remote candidate in. Buffered until the remote description is
    /// set, then forwarded immediately.
    pub async fn add_remote_candidate(
        &mut self,
        candidate: IceCandidate,
    ) -> Result<(), SignalingError> {
        if self.remote_sdp == RemoteSdp::Unset {
            tracing::trace!(
                target = "signaling",
                peer_id = %self.peer_id,
                buffered = self.pending_candidates.len() + 1,
                "buffering candidate until remote description is set"
            );
            self.pending_candidates.push(candidate);
            return Ok(());
        }
        self.handle()?.add_ice_candidate(candidate).await?;
        Ok(())
    }

    async fn drain_pending(&mut self) -> Result<(), SignalingError> {
        let pending = mem::take(&mut self.pending_candidates);
        for candidate in pending {
            self.handle()?.add_ice_candidate(candidate).await?;
        }
        Ok(())
    }

    /// Release the primitive. Idempotent: the handle is surrendered on the
    /// first call, so later calls touch nothing.
    pub async fn teardown(&mut self) {
        self.pending_candidates.clear();
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.close().await {
                tracing::debug!(
                    target = "signaling",
                    peer_id = %self.peer_id,
                    "primitive close failed: {err}"
                );
            }
            tracing::debug!(target = "signaling", peer_id = %self.peer_id, "session torn down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::mock::{MockConnector, PrimitiveOp};
    use crate::protocol::Signal;

    fn events() -> mpsc::UnboundedSender<PeerEvent> {
        mpsc::unbounded_channel().0
    }

    #[tokio::test]
    async fn offerer_applies_local_description_before_sending() {
        let connector = MockConnector::new();
        let mut session = SignalingSession::new("peer", Role::Offerer);

        let envelope = session
            .start_as_offerer(connector.as_ref(), events())
            .await
            .unwrap();

        let Signal::Offer { offer } = envelope.signal else {
            panic!("expected offer envelope");
        };
        assert_eq!(offer.sdp, "sdp-offer-peer");
        assert_eq!(
            connector.ops_for("peer"),
            vec![
                PrimitiveOp::CreateOffer,
                PrimitiveOp::SetLocal(SessionDescription::offer("sdp-offer-peer")),
            ]
        );
    }

    #[tokio::test]
    async fn answerer_flushes_buffered_candidates_after_remote_description() {
        let connector = MockConnector::new();
        let mut session = SignalingSession::new("peer", Role::Answerer);
        session
            .add_remote_candidate(IceCandidate::new("c1"))
            .await
            .unwrap();

        let envelope = session
            .start_as_answerer(
                connector.as_ref(),
                events(),
                SessionDescription::offer("remote-offer"),
            )
            .await
            .unwrap();

        assert!(matches!(envelope.signal, Signal::Answer { .. }));
        assert_eq!(
            connector.ops_for("peer"),
            vec![
                PrimitiveOp::SetRemote(SessionDescription::offer("remote-offer")),
                PrimitiveOp::AddCandidate(IceCandidate::new("c1")),
                PrimitiveOp::CreateAnswer,
                PrimitiveOp::SetLocal(SessionDescription::answer("sdp-answer-peer")),
            ]
        );
    }

    #[tokio::test]
    async fn offerer_buffers_candidates_until_answer_arrives() {
        let connector = MockConnector::new();
        let mut session = SignalingSession::new("peer", Role::Offerer);
        session
            .start_as_offerer(connector.as_ref(), events())
            .await
            .unwrap();

        session
            .add_remote_candidate(IceCandidate::new("c1"))
            .await
            .unwrap();
        session
            .add_remote_candidate(IceCandidate::new("c2"))
            .await
            .unwrap();
        let applied = session
            .apply_remote_answer(SessionDescription::answer("remote-answer"))
            .await
            .unwrap();
        assert!(applied);

        let tail: Vec<_> = connector.ops_for("peer").split_off(2);
        assert_eq!(
            tail,
            vec![
                PrimitiveOp::SetRemote(SessionDescription::answer("remote-answer")),
                PrimitiveOp::AddCandidate(IceCandidate::new("c1")),
                PrimitiveOp::AddCandidate(IceCandidate::new("c2")),
            ]
        );
    }

    #[tokio::test]
    async fn duplicate_answer_is_absorbed() {
        let connector = MockConnector::new();
        let mut session = SignalingSession::new("peer", Role::Offerer);
        session
            .start_as_offerer(connector.as_ref(), events())
            .await
            .unwrap();

        let answer = SessionDescription::answer("remote-answer");
        assert!(session.apply_remote_answer(answer.clone()).await.unwrap());
        assert!(!session.apply_remote_answer(answer.clone()).await.unwrap());

        let set_remotes = connector
            .ops_for("peer")
            .into_iter()
            .filter(|op| matches!(op, PrimitiveOp::SetRemote(_)))
            .count();
        assert_eq!(set_remotes, 1);
    }

    #[tokio::test]
    async fn teardown_releases_primitive_exactly_once() {
        let connector = MockConnector::new();
        let mut session = SignalingSession::new("peer", Role::Offerer);
        session
            .start_as_offerer(connector.as_ref(), events())
            .await
            .unwrap();

        session.teardown().await;
        session.teardown().await;

        assert_eq!(connector.close_count(), 1);
    }

    #[tokio::test]
    async fn unavailable_primitive_aborts_negotiation_cleanly() {
        let connector = MockConnector::new();
        connector.fail_next_connects();
        let mut session = SignalingSession::new("peer", Role::Offerer);

        let err = session
            .start_as_offerer(connector.as_ref(), events())
            .await
            .expect_err("connect should fail");
        assert!(matches!(err, SignalingError::Primitive(_)));

        session.teardown().await;
        assert_eq!(connector.close_count(), 0);
    }

    #[tokio::test]
    async fn answerer_rejects_non_offer_description() {
        let connector = MockConnector::new();
        let mut session = SignalingSession::new("peer", Role::Answerer);
        let err = session
            .start_as_answerer(
                connector.as_ref(),
                events(),
                SessionDescription::answer("not-an-offer"),
            )
            .await
            .expect_err("answer in place of offer should be rejected");
        assert!(matches!(err, SignalingError::InvalidState(_)));
        assert_eq!(connector.connect_count(), 0);
    }
}
