//! In-process fakes for the signaling channel, capture devices and peer
//! connections.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

use crate::error::{Error, Result};
use crate::media::{LocalStream, MediaDevices, MediaTrack, TrackKind};
use crate::models::{CallMedium, IceCandidate, SessionDescription};
use crate::negotiation::{PeerConnection, PeerConnectionFactory, PeerEvent};
use crate::protocol::Signal;
use crate::signaling::SignalingChannel;

// ============================================================================
// Signaling
// ============================================================================

pub struct FakeSignaling {
    sent: Mutex<Vec<Signal>>,
    connected: AtomicBool,
    reconnects: AtomicUsize,
}

impl FakeSignaling {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
            reconnects: AtomicUsize::new(0),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn reconnects(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<Signal> {
        self.sent.lock().clone()
    }

    pub fn take_sent(&self) -> Vec<Signal> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub fn sent_kinds(&self) -> Vec<&'static str> {
        self.sent.lock().iter().map(|s| s.kind()).collect()
    }
}

#[async_trait]
impl SignalingChannel for FakeSignaling {
    async fn send(&self, signal: Signal) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        self.sent.lock().push(signal);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn reconnect(&self) -> Result<()> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        self.set_connected(true);
        Ok(())
    }
}

// ============================================================================
// Media
// ============================================================================

pub struct FakeTrack {
    id: String,
    kind: TrackKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

impl FakeTrack {
    pub fn new(id: &str, kind: TrackKind) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        })
    }
}

impl MediaTrack for FakeTrack {
    fn id(&self) -> &str {
        &self.id
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
}

/// Capture devices that can fail, or hold an acquisition open until the
/// test releases it.
pub struct FakeDevices {
    tracks: Mutex<Vec<Arc<FakeTrack>>>,
    acquisitions: AtomicUsize,
    fail: AtomicBool,
    gate: Mutex<Option<Arc<Notify>>>,
    pub started: Notify,
}

impl FakeDevices {
    pub fn new() -> Self {
        Self {
            tracks: Mutex::new(Vec::new()),
            acquisitions: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            gate: Mutex::new(None),
            started: Notify::new(),
        }
    }

    pub fn fail_next(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    /// Makes the next acquisitions wait until the returned handle is notified.
    pub fn hold(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock() = Some(gate.clone());
        gate
    }

    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    pub fn tracks(&self) -> Vec<Arc<FakeTrack>> {
        self.tracks.lock().clone()
    }

    pub fn all_stopped(&self) -> bool {
        self.tracks.lock().iter().all(|t| t.is_stopped())
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn acquire(&self, medium: CallMedium) -> Result<LocalStream> {
        self.started.notify_one();

        let gate = self.gate.lock().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if self.fail.swap(false, Ordering::SeqCst) {
            return Err(Error::Media("permission denied".into()));
        }

        let n = self.acquisitions.fetch_add(1, Ordering::SeqCst);
        let mut tracks = vec![FakeTrack::new(&format!("mic-{}", n), TrackKind::Audio)];
        if medium.has_video() {
            tracks.push(FakeTrack::new(&format!("cam-{}", n), TrackKind::Video));
        }
        self.tracks.lock().extend(tracks.iter().cloned());

        Ok(LocalStream::new(
            tracks.into_iter().map(|t| t as Arc<dyn MediaTrack>).collect(),
        ))
    }
}

// ============================================================================
// Peer connections
// ============================================================================

pub struct FakePeerConnection {
    events: mpsc::UnboundedSender<PeerEvent>,
    remote: Mutex<Vec<SessionDescription>>,
    candidates: Mutex<Vec<IceCandidate>>,
    local_tracks: AtomicUsize,
    closed: AtomicBool,
    fail_remote: AtomicBool,
    gather: bool,
}

impl FakePeerConnection {
    pub fn emit(&self, event: PeerEvent) {
        let _ = self.events.send(event);
    }

    pub fn remote_descriptions(&self) -> Vec<SessionDescription> {
        self.remote.lock().clone()
    }

    pub fn candidates(&self) -> Vec<IceCandidate> {
        self.candidates.lock().clone()
    }

    pub fn local_tracks(&self) -> usize {
        self.local_tracks.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Gathering starts once a local description is applied.
    fn start_gathering(&self) {
        if self.gather {
            self.emit(PeerEvent::LocalCandidate(IceCandidate::new("candidate:host")));
        }
    }
}

#[async_trait]
impl PeerConnection for FakePeerConnection {
    async fn add_local_stream(&self, stream: &LocalStream) -> Result<()> {
        self.local_tracks.fetch_add(stream.tracks().len(), Ordering::SeqCst);
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        self.start_gathering();
        Ok(SessionDescription::offer("v=0 fake-offer"))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.start_gathering();
        Ok(SessionDescription::answer("v=0 fake-answer"))
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        if self.fail_remote.load(Ordering::SeqCst) {
            return Err(Error::Negotiation("malformed remote description".into()));
        }
        self.remote.lock().push(description);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.candidates.lock().push(candidate);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeConnector {
    created: Mutex<Vec<Arc<FakePeerConnection>>>,
    fail_remote: AtomicBool,
    gather: AtomicBool,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self {
            created: Mutex::new(Vec::new()),
            fail_remote: AtomicBool::new(false),
            gather: AtomicBool::new(false),
        }
    }

    /// Connections created from now on emit a host candidate as soon as
    /// they apply a local description.
    pub fn gather_candidates(&self) {
        self.gather.store(true, Ordering::SeqCst);
    }

    /// Connections created from now on reject remote descriptions.
    pub fn fail_remote_descriptions(&self) {
        self.fail_remote.store(true, Ordering::SeqCst);
    }

    pub fn created(&self) -> usize {
        self.created.lock().len()
    }

    pub fn last(&self) -> Arc<FakePeerConnection> {
        self.created
            .lock()
            .last()
            .cloned()
            .expect("no peer connection created")
    }
}

#[async_trait]
impl PeerConnectionFactory for FakeConnector {
    async fn create(&self, events: mpsc::UnboundedSender<PeerEvent>) -> Result<Arc<dyn PeerConnection>> {
        let pc = Arc::new(FakePeerConnection {
            events,
            remote: Mutex::new(Vec::new()),
            candidates: Mutex::new(Vec::new()),
            local_tracks: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            fail_remote: AtomicBool::new(self.fail_remote.load(Ordering::SeqCst)),
            gather: self.gather.load(Ordering::SeqCst),
        });
        self.created.lock().push(pc.clone());
        Ok(pc)
    }
}
