//! webrtc-rs backed peer connections and sample-fed local tracks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::error::Result;
use crate::media::{LocalStream, MediaDevices, MediaTrack, RemoteTrack, TrackKind};
use crate::models::{CallMedium, IceCandidate, SdpKind, SessionDescription, TurnCredentials};
use crate::negotiation::{ConnectionState, PeerConnection, PeerConnectionFactory, PeerEvent};

pub const DEFAULT_STUN: &str = "stun:stun.l.google.com:19302";

// ============================================================================
// ICE configuration
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct IceConfig {
    servers: Vec<RTCIceServer>,
}

impl IceConfig {
    pub fn stun(urls: &[String]) -> Self {
        let urls = if urls.is_empty() {
            vec![DEFAULT_STUN.to_string()]
        } else {
            urls.to_vec()
        };
        Self {
            servers: vec![RTCIceServer {
                urls,
                ..Default::default()
            }],
        }
    }

    pub fn with_turn(mut self, creds: &TurnCredentials) -> Self {
        self.servers.push(RTCIceServer {
            urls: creds.urls.clone(),
            username: creds.username.clone(),
            credential: creds.credential.clone(),
            ..Default::default()
        });
        self
    }

    pub fn servers(&self) -> &[RTCIceServer] {
        &self.servers
    }
}

// ============================================================================
// Peer connections
// ============================================================================

pub struct RtcConnector {
    api: API,
    ice: IceConfig,
}

impl RtcConnector {
    pub fn new(ice: IceConfig) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self { api, ice })
    }
}

#[async_trait]
impl PeerConnectionFactory for RtcConnector {
    async fn create(&self, events: mpsc::UnboundedSender<PeerEvent>) -> Result<Arc<dyn PeerConnection>> {
        let config = RTCConfiguration {
            ice_servers: self.ice.servers().to_vec(),
            ..Default::default()
        };
        let pc = Arc::new(self.api.new_peer_connection(config).await?);

        let tx = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let tx = tx.clone();
            Box::pin(async move {
                // None marks the end of gathering.
                let Some(candidate) = candidate else { return };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = tx.send(PeerEvent::LocalCandidate(from_init(init)));
                    }
                    Err(e) => log::warn!("Unserializable local candidate: {}", e),
                }
            })
        }));

        let tx = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let tx = tx.clone();
            Box::pin(async move {
                if let Some(state) = map_state(state) {
                    let _ = tx.send(PeerEvent::StateChanged(state));
                }
            })
        }));

        let tx = events;
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let tx = tx.clone();
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Video => TrackKind::Video,
                    _ => TrackKind::Audio,
                };
                let stream_id = Some(track.stream_id()).filter(|s| !s.is_empty());
                let mut remote = RemoteTrack::new(track.id(), kind, stream_id);
                remote.handle = Some(track);
                let _ = tx.send(PeerEvent::RemoteTrack(remote));
            })
        }));

        Ok(Arc::new(RtcPeerConnection { pc }))
    }
}

struct RtcPeerConnection {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerConnection for RtcPeerConnection {
    async fn add_local_stream(&self, stream: &LocalStream) -> Result<()> {
        for track in stream.tracks() {
            if let Some(rtc) = track.rtc_track() {
                self.pc.add_track(rtc).await?;
            }
        }
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self.pc.create_offer(None).await?;
        self.pc.set_local_description(offer.clone()).await?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self.pc.create_answer(None).await?;
        self.pc.set_local_description(answer.clone()).await?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let remote = match description.kind {
            SdpKind::Offer => RTCSessionDescription::offer(description.sdp)?,
            SdpKind::Answer => RTCSessionDescription::answer(description.sdp)?,
        };
        self.pc.set_remote_description(remote).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.pc.add_ice_candidate(to_init(candidate)).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pc.close().await?;
        Ok(())
    }
}

fn map_state(state: RTCPeerConnectionState) -> Option<ConnectionState> {
    match state {
        RTCPeerConnectionState::New => Some(ConnectionState::New),
        RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
        _ => None,
    }
}

fn from_init(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

fn to_init(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_mline_index,
        username_fragment: candidate.username_fragment,
    }
}

// ============================================================================
// Local tracks
// ============================================================================

/// Outbound track fed with encoded samples by the platform capture layer.
///
/// While disabled or stopped, samples are dropped instead of sent.
pub struct RtcLocalTrack {
    kind: TrackKind,
    track: Arc<TrackLocalStaticSample>,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

impl RtcLocalTrack {
    pub fn new(kind: TrackKind, stream_id: &str) -> Arc<Self> {
        let (mime_type, id) = match kind {
            TrackKind::Audio => (MIME_TYPE_OPUS, "audio"),
            TrackKind::Video => (MIME_TYPE_VP8, "video"),
        };
        let track = TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_owned(),
                ..Default::default()
            },
            id.to_owned(),
            stream_id.to_owned(),
        );

        Arc::new(Self {
            kind,
            track: Arc::new(track),
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        })
    }

    pub async fn write_sample(&self, sample: &Sample) -> Result<()> {
        if !self.is_enabled() || self.is_stopped() {
            return Ok(());
        }
        self.track.write_sample(sample).await?;
        Ok(())
    }
}

impl MediaTrack for RtcLocalTrack {
    fn id(&self) -> &str {
        self.track.id()
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn rtc_track(&self) -> Option<Arc<dyn TrackLocal + Send + Sync>> {
        Some(self.track.clone())
    }
}

/// Capture source handing out sample-fed tracks. The most recent stream's
/// tracks stay reachable through `current` so the capture layer can feed
/// them.
#[derive(Default)]
pub struct RtcMediaDevices {
    current: parking_lot::Mutex<Vec<Arc<RtcLocalTrack>>>,
}

impl RtcMediaDevices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Vec<Arc<RtcLocalTrack>> {
        self.current
            .lock()
            .iter()
            .filter(|t| !t.is_stopped())
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MediaDevices for RtcMediaDevices {
    async fn acquire(&self, medium: CallMedium) -> Result<LocalStream> {
        let stream_id = format!("local-{}", uuid::Uuid::new_v4());

        let mut tracks = vec![RtcLocalTrack::new(TrackKind::Audio, &stream_id)];
        if medium.has_video() {
            tracks.push(RtcLocalTrack::new(TrackKind::Video, &stream_id));
        }
        *self.current.lock() = tracks.clone();
        Ok(LocalStream::new(
            tracks.into_iter().map(|t| t as Arc<dyn MediaTrack>).collect(),
        ))
    }
}
