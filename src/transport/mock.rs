//! In-memory channel transport for tests.
//!
//! A [`MockHub`] plays the role of the room server: channels created from the
//! same hub and joined to the same room see each other's membership events and
//! can unicast payloads directly.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{Mutex as AsyncMutex, mpsc};

use super::{ChannelEvent, ChannelTransport, TransportError};

struct Member {
    peer_id: String,
    events: mpsc::UnboundedSender<ChannelEvent>,
}

#[derive(Default)]
pub struct MockHub {
    rooms: Mutex<HashMap<String, Vec<Member>>>,
}

impl MockHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a channel bound to this hub with a fixed peer id.
    pub fn channel(self: &Arc<Self>, peer_id: impl Into<String>) -> MockChannel {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        MockChannel {
            hub: Arc::clone(self),
            peer_id: peer_id.into(),
            room: Mutex::new(None),
            events_tx,
            events_rx: AsyncMutex::new(Some(events_rx)),
        }
    }

    fn join(&self, room: &str, member: Member) {
        let mut rooms = self.rooms.lock().unwrap_or_else(|p| p.into_inner());
        let members = rooms.entry(room.to_string()).or_default();
        for existing in members.iter() {
            let _ = existing.events.send(ChannelEvent::MemberJoined {
                peer_id: member.peer_id.clone(),
            });
        }
        members.push(member);
    }

    fn leave(&self, room: &str, peer_id: &str) {
        let mut rooms = self.rooms.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(members) = rooms.get_mut(room) {
            members.retain(|m| m.peer_id != peer_id);
            for remaining in members.iter() {
                let _ = remaining.events.send(ChannelEvent::MemberLeft {
                    peer_id: peer_id.to_string(),
                });
            }
        }
    }

    fn deliver(
        &self,
        room: &str,
        from_peer: &str,
        to_peer: &str,
        payload: String,
    ) -> Result<(), TransportError> {
        let rooms = self.rooms.lock().unwrap_or_else(|p| p.into_inner());
        let target = rooms
            .get(room)
            .and_then(|members| members.iter().find(|m| m.peer_id == to_peer))
            .ok_or_else(|| TransportError::UnknownPeer(to_peer.to_string()))?;
        target
            .events
            .send(ChannelEvent::Message {
                peer_id: from_peer.to_string(),
                payload,
            })
            .map_err(|_| TransportError::ChannelClosed)
    }
}

pub struct MockChannel {
    hub: Arc<MockHub>,
    peer_id: String,
    room: Mutex<Option<String>>,
    events_tx: mpsc::UnboundedSender<ChannelEvent>,
    events_rx: AsyncMutex<Option<mpsc::UnboundedReceiver<ChannelEvent>>>,
}

impl MockChannel {
    fn current_room(&self) -> Option<String> {
        self.room.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait]
impl ChannelTransport for MockChannel {
    fn peer_id(&self) -> &str {
        &self.peer_id
    }

    async fn join(&self, room: &str) -> Result<(), TransportError> {
        *self.room.lock().unwrap_or_else(|p| p.into_inner()) = Some(room.to_string());
        self.hub.join(
            room,
            Member {
                peer_id: self.peer_id.clone(),
                events: self.events_tx.clone(),
            },
        );
        Ok(())
    }

    async fn leave(&self) -> Result<(), TransportError> {
        if let Some(room) = self.room.lock().unwrap_or_else(|p| p.into_inner()).take() {
            self.hub.leave(&room, &self.peer_id);
        }
        Ok(())
    }

    async fn send_to_peer(&self, peer_id: &str, payload: String) -> Result<(), TransportError> {
        let room = self
            .current_room()
            .ok_or_else(|| TransportError::Setup("not joined to a room".into()))?;
        self.hub.deliver(&room, &self.peer_id, peer_id, payload)
    }

    async fn events(&self) -> Result<mpsc::UnboundedReceiver<ChannelEvent>, TransportError> {
        let mut guard = self.events_rx.lock().await;
        guard
            .take()
            .ok_or_else(|| TransportError::Setup("event stream already taken".into()))
    }
}
