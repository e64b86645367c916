//! Scripted connection primitive for tests.
//!
//! Every handle records the operations applied to it in order, so tests can
//! assert on negotiation sequencing without a network stack.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::protocol::{IceCandidate, SessionDescription};

use super::{PeerConnector, PeerEvent, PeerHandle, PrimitiveError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimitiveOp {
    CreateOffer,
    CreateAnswer,
    SetLocal(SessionDescription),
    SetRemote(SessionDescription),
    AddCandidate(IceCandidate),
    Close,
}

type OpLog = Arc<Mutex<Vec<(String, PrimitiveOp)>>>;

#[derive(Default)]
pub struct MockConnector {
    log: OpLog,
    fail_connect: AtomicBool,
    connect_count: AtomicUsize,
    close_count: Arc<AtomicUsize>,
    events: Mutex<HashMap<String, mpsc::UnboundedSender<PeerEvent>>>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every subsequent `connect` fail with `Unavailable`.
    pub fn fail_next_connects(&self) {
        self.fail_connect.store(true, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.connect_count.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }

    /// Operations recorded for one peer, in application order.
    pub fn ops_for(&self, peer_id: &str) -> Vec<PrimitiveOp> {
        self.log
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .filter(|(peer, _)| peer == peer_id)
            .map(|(_, op)| op.clone())
            .collect()
    }

    /// Push an event through the primitive acquired for `peer_id`. Returns
    /// false when no live handle exists for that peer.
    pub fn emit(&self, peer_id: &str, event: PeerEvent) -> bool {
        let events = self.events.lock().unwrap_or_else(|p| p.into_inner());
        match events.get(peer_id) {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl PeerConnector for MockConnector {
    async fn connect(
        &self,
        peer_id: &str,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Box<dyn PeerHandle>, PrimitiveError> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(PrimitiveError::Unavailable("scripted failure".into()));
        }
        self.connect_count.fetch_add(1, Ordering::SeqCst);
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(peer_id.to_string(), events);
        Ok(Box::new(MockHandle {
            peer_id: peer_id.to_string(),
            log: Arc::clone(&self.log),
            close_count: Arc::clone(&self.close_count),
        }))
    }
}

struct MockHandle {
    peer_id: String,
    log: OpLog,
    close_count: Arc<AtomicUsize>,
}

impl MockHandle {
    fn record(&self, op: PrimitiveOp) {
        self.log
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((self.peer_id.clone(), op));
    }
}

#[async_trait]
impl PeerHandle for MockHandle {
    async fn create_offer(&self) -> Result<SessionDescription, PrimitiveError> {
        self.record(PrimitiveOp::CreateOffer);
        Ok(SessionDescription::offer(format!(
            "sdp-offer-{}",
            self.peer_id
        )))
    }

    async fn create_answer(&self) -> Result<SessionDescription, PrimitiveError> {
        self.record(PrimitiveOp::CreateAnswer);
        Ok(SessionDescription::answer(format!(
            "sdp-answer-{}",
            self.peer_id
        )))
    }

    async fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), PrimitiveError> {
        self.record(PrimitiveOp::SetLocal(desc));
        Ok(())
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), PrimitiveError> {
        self.record(PrimitiveOp::SetRemote(desc));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PrimitiveError> {
        self.record(PrimitiveOp::AddCandidate(candidate));
        Ok(())
    }

    async fn close(&self) -> Result<(), PrimitiveError> {
        self.record(PrimitiveOp::Close);
        self.close_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
