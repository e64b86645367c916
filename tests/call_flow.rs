//! End-to-end signaling scenarios over the in-memory hub and the scripted
//! connection primitive.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use huddle::connection::mock::{MockConnector, PrimitiveOp};
use huddle::connection::PeerEvent;
use huddle::media::{MediaKind, RemoteTrack};
use huddle::protocol::{IceCandidate, SessionDescription, Signal, SignalEnvelope};
use huddle::signaling::{CallEvent, EventRouter, SessionRegistry};
use huddle::transport::mock::{MockChannel, MockHub};
use huddle::transport::{ChannelEvent, ChannelTransport};

const WAIT: Duration = Duration::from_secs(2);

async fn wait_until<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        if check().await {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn recv_within<T>(rx: &mut mpsc::UnboundedReceiver<T>, what: &str) -> T {
    match timeout(WAIT, rx.recv()).await {
        Ok(Some(value)) => value,
        Ok(None) => panic!("channel closed waiting for {what}"),
        Err(_) => panic!("timed out waiting for {what}"),
    }
}

struct Fixture {
    router: Arc<EventRouter>,
    transport: Arc<dyn ChannelTransport>,
    registry: Arc<SessionRegistry>,
    connector: Arc<MockConnector>,
    call_events: mpsc::UnboundedReceiver<CallEvent>,
}

/// Router for peer `a` on a fresh hub. The caller decides whether to spawn
/// `run` or feed events through `handle_event`.
fn fixture(hub: &Arc<MockHub>) -> Fixture {
    let transport: Arc<dyn ChannelTransport> = Arc::new(hub.channel("a"));
    let connector = MockConnector::new();
    let registry = Arc::new(SessionRegistry::new());
    let (router, call_events) = EventRouter::new(
        transport.clone(),
        connector.clone() as Arc<dyn huddle::connection::PeerConnector>,
        registry.clone(),
    );
    Fixture {
        router,
        transport,
        registry,
        connector,
        call_events,
    }
}

/// A hand-driven remote peer: joins the room and exchanges raw envelopes.
struct Puppet {
    channel: MockChannel,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
}

impl Puppet {
    async fn join(hub: &Arc<MockHub>, peer_id: &str, room: &str) -> Self {
        let channel = hub.channel(peer_id);
        let events = channel.events().await.unwrap();
        channel.join(room).await.unwrap();
        Puppet { channel, events }
    }

    async fn send(&self, to_peer: &str, envelope: SignalEnvelope) {
        self.channel
            .send_to_peer(to_peer, envelope.encode().unwrap())
            .await
            .unwrap();
    }

    async fn recv_envelope(&mut self) -> SignalEnvelope {
        loop {
            match recv_within(&mut self.events, "envelope").await {
                ChannelEvent::Message { payload, .. } => {
                    return SignalEnvelope::decode(&payload).unwrap();
                }
                _ => continue,
            }
        }
    }
}

#[tokio::test]
async fn join_triggers_full_offer_answer_handshake() {
    let hub = MockHub::new();

    let transport_a: Arc<dyn ChannelTransport> = Arc::new(hub.channel("a"));
    let transport_b: Arc<dyn ChannelTransport> = Arc::new(hub.channel("b"));
    let conn_a = MockConnector::new();
    let conn_b = MockConnector::new();
    let registry_a = Arc::new(SessionRegistry::new());
    let registry_b = Arc::new(SessionRegistry::new());
    let (router_a, _events_a) = EventRouter::new(
        transport_a.clone(),
        conn_a.clone() as Arc<dyn huddle::connection::PeerConnector>,
        registry_a.clone(),
    );
    let (router_b, _events_b) = EventRouter::new(
        transport_b.clone(),
        conn_b.clone() as Arc<dyn huddle::connection::PeerConnector>,
        registry_b.clone(),
    );

    let run_a = router_a.clone();
    tokio::spawn(async move { run_a.run().await });
    let run_b = router_b.clone();
    tokio::spawn(async move { run_b.run().await });

    transport_a.join("room").await.unwrap();
    transport_b.join("room").await.unwrap();

    wait_until("offerer to apply the remote answer", || {
        let conn_a = conn_a.clone();
        async move {
            conn_a
                .ops_for("b")
                .iter()
                .any(|op| matches!(op, PrimitiveOp::SetRemote(_)))
        }
    })
    .await;

    assert_eq!(
        conn_a.ops_for("b"),
        vec![
            PrimitiveOp::CreateOffer,
            PrimitiveOp::SetLocal(SessionDescription::offer("sdp-offer-b")),
            PrimitiveOp::SetRemote(SessionDescription::answer("sdp-answer-a")),
        ]
    );
    assert_eq!(
        conn_b.ops_for("a"),
        vec![
            PrimitiveOp::SetRemote(SessionDescription::offer("sdp-offer-b")),
            PrimitiveOp::CreateAnswer,
            PrimitiveOp::SetLocal(SessionDescription::answer("sdp-answer-a")),
        ]
    );
    assert_eq!(registry_a.len().await, 1);
    assert_eq!(registry_b.len().await, 1);
}

#[tokio::test]
async fn candidates_arriving_before_answer_apply_after_it_in_order() {
    let hub = MockHub::new();
    let fx = fixture(&hub);
    let router = fx.router.clone();
    tokio::spawn(async move { router.run().await });
    fx.transport.join("room").await.unwrap();

    let mut puppet = Puppet::join(&hub, "b", "room").await;

    let offer = puppet.recv_envelope().await;
    assert!(matches!(offer.signal, Signal::Offer { .. }));

    puppet
        .send("a", SignalEnvelope::candidate(IceCandidate::new("c1")))
        .await;
    puppet
        .send("a", SignalEnvelope::candidate(IceCandidate::new("c2")))
        .await;
    puppet
        .send(
            "a",
            SignalEnvelope::answer(SessionDescription::answer("remote-answer")),
        )
        .await;

    wait_until("buffered candidates to flush", || {
        let conn = fx.connector.clone();
        async move { conn.ops_for("b").len() >= 5 }
    })
    .await;

    assert_eq!(
        fx.connector.ops_for("b").split_off(2),
        vec![
            PrimitiveOp::SetRemote(SessionDescription::answer("remote-answer")),
            PrimitiveOp::AddCandidate(IceCandidate::new("c1")),
            PrimitiveOp::AddCandidate(IceCandidate::new("c2")),
        ]
    );
}

#[tokio::test]
async fn duplicate_answer_touches_the_primitive_once() {
    let hub = MockHub::new();
    let fx = fixture(&hub);
    fx.transport.join("room").await.unwrap();
    let puppet = Puppet::join(&hub, "b", "room").await;

    fx.router
        .handle_event(ChannelEvent::MemberJoined { peer_id: "b".into() })
        .await;
    let answer = SignalEnvelope::answer(SessionDescription::answer("remote-answer"));
    fx.router
        .handle_event(ChannelEvent::Message {
            peer_id: "b".into(),
            payload: answer.encode().unwrap(),
        })
        .await;
    fx.router
        .handle_event(ChannelEvent::Message {
            peer_id: "b".into(),
            payload: answer.encode().unwrap(),
        })
        .await;

    let set_remotes = fx
        .connector
        .ops_for("b")
        .into_iter()
        .filter(|op| matches!(op, PrimitiveOp::SetRemote(_)))
        .count();
    assert_eq!(set_remotes, 1);
    drop(puppet);
}

#[tokio::test]
async fn departure_tears_down_and_orphan_signals_are_dropped() {
    let hub = MockHub::new();
    let mut fx = fixture(&hub);
    fx.transport.join("room").await.unwrap();
    let puppet = Puppet::join(&hub, "b", "room").await;

    fx.router
        .handle_event(ChannelEvent::MemberJoined { peer_id: "b".into() })
        .await;
    fx.router
        .handle_event(ChannelEvent::MemberLeft { peer_id: "b".into() })
        .await;

    // Signals straggling in after departure must not revive anything.
    fx.router
        .handle_event(ChannelEvent::Message {
            peer_id: "b".into(),
            payload: SignalEnvelope::candidate(IceCandidate::new("late"))
                .encode()
                .unwrap(),
        })
        .await;
    fx.router
        .handle_event(ChannelEvent::Message {
            peer_id: "b".into(),
            payload: SignalEnvelope::answer(SessionDescription::answer("late"))
                .encode()
                .unwrap(),
        })
        .await;

    assert_eq!(fx.connector.close_count(), 1);
    assert!(fx.registry.is_empty().await);
    assert!(matches!(
        recv_within(&mut fx.call_events, "peer left event").await,
        CallEvent::PeerLeft { .. }
    ));
    drop(puppet);
}

#[tokio::test]
async fn unavailable_primitive_leaves_no_session_and_sends_nothing() {
    let hub = MockHub::new();
    let fx = fixture(&hub);
    fx.connector.fail_next_connects();
    fx.transport.join("room").await.unwrap();
    let mut puppet = Puppet::join(&hub, "b", "room").await;

    fx.router
        .handle_event(ChannelEvent::MemberJoined { peer_id: "b".into() })
        .await;

    assert!(fx.registry.is_empty().await);
    assert!(puppet.events.try_recv().is_err());
}

#[tokio::test]
async fn malformed_envelope_is_dropped_without_side_effects() {
    let hub = MockHub::new();
    let fx = fixture(&hub);
    fx.transport.join("room").await.unwrap();
    let puppet = Puppet::join(&hub, "b", "room").await;

    fx.router
        .handle_event(ChannelEvent::MemberJoined { peer_id: "b".into() })
        .await;
    fx.router
        .handle_event(ChannelEvent::Message {
            peer_id: "b".into(),
            payload: "{not json".into(),
        })
        .await;
    fx.router
        .handle_event(ChannelEvent::Message {
            peer_id: "b".into(),
            payload: r#"{"v":9,"type":"offer","offer":{"kind":"offer","sdp":"x"}}"#.into(),
        })
        .await;

    // Only the outbound offer touched the primitive.
    assert_eq!(fx.connector.ops_for("b").len(), 2);
    assert_eq!(fx.registry.len().await, 1);
    drop(puppet);
}

#[tokio::test]
async fn local_candidates_are_relayed_to_the_peer() {
    let hub = MockHub::new();
    let fx = fixture(&hub);
    fx.transport.join("room").await.unwrap();
    let mut puppet = Puppet::join(&hub, "b", "room").await;

    fx.router
        .handle_event(ChannelEvent::MemberJoined { peer_id: "b".into() })
        .await;
    let offer = puppet.recv_envelope().await;
    assert!(matches!(offer.signal, Signal::Offer { .. }));

    assert!(fx.connector.emit(
        "b",
        PeerEvent::LocalCandidate(IceCandidate::new("host-candidate"))
    ));

    let relayed = puppet.recv_envelope().await;
    assert_eq!(
        relayed.signal,
        Signal::Candidate {
            candidate: IceCandidate::new("host-candidate")
        }
    );
}

#[tokio::test]
async fn remote_tracks_surface_as_call_events() {
    let hub = MockHub::new();
    let mut fx = fixture(&hub);
    fx.transport.join("room").await.unwrap();
    let puppet = Puppet::join(&hub, "b", "room").await;

    fx.router
        .handle_event(ChannelEvent::MemberJoined { peer_id: "b".into() })
        .await;
    assert!(fx
        .connector
        .emit("b", PeerEvent::RemoteTrack(RemoteTrack::detached(MediaKind::Video))));

    match recv_within(&mut fx.call_events, "remote track event").await {
        CallEvent::RemoteTrack { peer_id, track } => {
            assert_eq!(peer_id, "b");
            assert_eq!(track.kind(), MediaKind::Video);
        }
        other => panic!("unexpected call event: {other:?}"),
    }
    drop(puppet);
}
