use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use huddle::config::CallConfig;
use huddle::connection::rtc::RtcConnector;
use huddle::media::LocalMedia;
use huddle::signaling::{CallEvent, EventRouter, SessionRegistry};
use huddle::transport::ChannelTransport;
use huddle::transport::websocket::WebSocketChannel;

#[derive(Debug, Parser)]
#[command(name = "huddle", about = "Peer-to-peer video call client")]
struct Cli {
    /// Room to join.
    #[arg(long, env = "HUDDLE_ROOM", default_value = "main")]
    room: String,

    /// Room server websocket endpoint.
    #[arg(long, env = "HUDDLE_SIGNALING_URL", default_value = "ws://127.0.0.1:8080")]
    signaling_url: String,

    /// STUN/TURN server url; repeat to supply several.
    #[arg(long = "ice-server")]
    ice_servers: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let mut config = CallConfig::new(cli.room, cli.signaling_url);
    if !cli.ice_servers.is_empty() {
        config = config.with_ice_servers(cli.ice_servers);
    }

    let media = placeholder_media();
    let connector = Arc::new(
        RtcConnector::new(config.ice_servers.clone(), media)
            .context("building webrtc connector")?,
    );

    let transport = WebSocketChannel::connect(&config.signaling_url)
        .await
        .context("connecting to room server")?;
    tracing::info!(peer_id = %transport.peer_id(), room = %config.room, "joining room");

    let registry = Arc::new(SessionRegistry::new());
    let (router, mut call_events) =
        EventRouter::new(transport.clone() as Arc<dyn ChannelTransport>, connector, registry.clone());

    let events_task = tokio::spawn(async move {
        while let Some(event) = call_events.recv().await {
            match event {
                CallEvent::RemoteTrack { peer_id, track } => {
                    tracing::info!(
                        peer_id = %peer_id,
                        kind = %track.kind(),
                        ssrc = track.ssrc(),
                        "remote track available"
                    );
                }
                CallEvent::PeerLeft { peer_id } => {
                    tracing::info!(peer_id = %peer_id, "peer left the call");
                }
            }
        }
    });

    transport
        .join(&config.room)
        .await
        .context("joining room")?;

    tokio::select! {
        result = router.run() => {
            result.context("event router stopped")?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
        }
    }

    registry.remove_all().await;
    let _ = transport.leave().await;
    events_task.abort();
    Ok(())
}

/// Silent placeholder tracks so negotiation carries audio and video m-lines.
/// Real capture feeds samples into these once a device pipeline exists.
fn placeholder_media() -> LocalMedia {
    let audio = Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            ..Default::default()
        },
        "audio".to_owned(),
        "huddle".to_owned(),
    ));
    let video = Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_owned(),
            ..Default::default()
        },
        "video".to_owned(),
        "huddle".to_owned(),
    ));
    LocalMedia::new().with_track(audio).with_track(video)
}
