//! Negotiation engine: one peer connection per call, plus the plumbing
//! around it (candidate forwarding and buffering, remote tracks, connection
//! state reporting).

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::media::{LocalStream, RemoteStream, RemoteTrack};
use crate::models::{CallId, IceCandidate, Identity, SessionDescription};
use crate::protocol::Signal;
use crate::signaling::{self, SignalingChannel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// Disconnected, failed and closed all end the call.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected | ConnectionState::Failed | ConnectionState::Closed
        )
    }
}

/// Callback output of a peer connection.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    LocalCandidate(IceCandidate),
    RemoteTrack(RemoteTrack),
    StateChanged(ConnectionState),
}

/// The negotiation primitive the platform provides.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn add_local_stream(&self, stream: &LocalStream) -> Result<()>;

    /// Creates an offer and applies it as the local description.
    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Creates an answer and applies it as the local description.
    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    /// Creates a connection reporting its callbacks on `events`.
    async fn create(&self, events: mpsc::UnboundedSender<PeerEvent>) -> Result<Arc<dyn PeerConnection>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationOutcome {
    Connected,
    Ended(ConnectionState),
}

/// Connection-level news for the call state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationEvent {
    pub call_id: CallId,
    pub outcome: NegotiationOutcome,
}

#[derive(Default)]
struct CandidateBuffer {
    remote_described: bool,
    pending: Vec<IceCandidate>,
}

/// Local candidates wait here until our offer or answer has been handed to
/// the signaling channel, so the peer never sees ICE ahead of the
/// description it belongs to.
#[derive(Default)]
struct OutboundGate {
    open: bool,
    held: Vec<IceCandidate>,
}

/// What the pump needs to forward local candidates.
struct CandidateRoute {
    call_id: CallId,
    peer: Identity,
    channel: Arc<dyn SignalingChannel>,
    gate: Mutex<OutboundGate>,
}

impl CandidateRoute {
    async fn forward(&self, candidate: IceCandidate) {
        let signal = Signal::ice(self.call_id.clone(), candidate, self.peer.clone());
        if let Err(e) = signaling::deliver(self.channel.as_ref(), signal).await {
            log::warn!("Failed to forward ICE candidate for call {}: {}", self.call_id, e);
        }
    }
}

pub struct NegotiationEngine {
    call_id: CallId,
    connection: Arc<dyn PeerConnection>,
    remote_stream: Arc<RemoteStream>,
    candidates: Mutex<CandidateBuffer>,
    route: Arc<CandidateRoute>,
    pump: JoinHandle<()>,
}

impl NegotiationEngine {
    pub async fn open(
        factory: &dyn PeerConnectionFactory,
        call_id: CallId,
        peer: Identity,
        signaling: Arc<dyn SignalingChannel>,
        notify: mpsc::UnboundedSender<NegotiationEvent>,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = factory.create(tx).await?;
        let remote_stream = Arc::new(RemoteStream::new());

        let route = Arc::new(CandidateRoute {
            call_id: call_id.clone(),
            peer,
            channel: signaling,
            gate: Mutex::new(OutboundGate::default()),
        });

        let pump = tokio::spawn(pump_events(rx, route.clone(), remote_stream.clone(), notify));

        log::debug!("Negotiation engine opened for call {}", call_id);

        Ok(Self {
            call_id,
            connection,
            remote_stream,
            candidates: Mutex::new(CandidateBuffer::default()),
            route,
            pump,
        })
    }

    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    pub fn remote_stream(&self) -> Arc<RemoteStream> {
        self.remote_stream.clone()
    }

    pub async fn attach(&self, stream: &LocalStream) -> Result<()> {
        self.connection.add_local_stream(stream).await
    }

    pub async fn create_offer(&self) -> Result<SessionDescription> {
        self.connection.create_offer().await
    }

    /// Applies the peer's offer and produces our answer.
    pub async fn accept_offer(&self, offer: SessionDescription) -> Result<SessionDescription> {
        self.apply_remote(offer).await?;
        self.connection.create_answer().await
    }

    pub async fn apply_answer(&self, answer: SessionDescription) -> Result<()> {
        self.apply_remote(answer).await
    }

    /// Adds a peer candidate, holding it back until a remote description
    /// exists. Candidates are order-independent once one does.
    pub async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<()> {
        {
            let mut buffer = self.candidates.lock();
            if !buffer.remote_described {
                buffer.pending.push(candidate);
                return Ok(());
            }
        }
        self.connection.add_ice_candidate(candidate).await
    }

    /// Starts forwarding local candidates, flushing the ones gathered so
    /// far. Call once the local description has gone out.
    pub async fn release_local_candidates(&self) {
        let held = {
            let mut gate = self.route.gate.lock();
            gate.open = true;
            std::mem::take(&mut gate.held)
        };

        if !held.is_empty() {
            log::debug!("Releasing {} held candidates for call {}", held.len(), self.call_id);
        }
        for candidate in held {
            self.route.forward(candidate).await;
        }
    }

    pub async fn close(&self) {
        self.pump.abort();
        if let Err(e) = self.connection.close().await {
            log::warn!("Closing peer connection for call {} failed: {}", self.call_id, e);
        }
    }

    async fn apply_remote(&self, description: SessionDescription) -> Result<()> {
        self.connection.set_remote_description(description).await?;

        let pending = {
            let mut buffer = self.candidates.lock();
            buffer.remote_described = true;
            std::mem::take(&mut buffer.pending)
        };

        for candidate in pending {
            if let Err(e) = self.connection.add_ice_candidate(candidate).await {
                log::warn!("Buffered candidate rejected for call {}: {}", self.call_id, e);
            }
        }

        Ok(())
    }
}

impl Drop for NegotiationEngine {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

async fn pump_events(
    mut events: mpsc::UnboundedReceiver<PeerEvent>,
    route: Arc<CandidateRoute>,
    remote_stream: Arc<RemoteStream>,
    notify: mpsc::UnboundedSender<NegotiationEvent>,
) {
    let call_id = route.call_id.clone();
    while let Some(event) = events.recv().await {
        match event {
            PeerEvent::LocalCandidate(candidate) => {
                {
                    let mut gate = route.gate.lock();
                    if !gate.open {
                        gate.held.push(candidate);
                        continue;
                    }
                }
                route.forward(candidate).await;
            }
            PeerEvent::RemoteTrack(track) => {
                log::debug!("Remote {:?} track {} for call {}", track.kind, track.id, call_id);
                remote_stream.add_track(track);
            }
            PeerEvent::StateChanged(state) => {
                log::debug!("Peer connection for call {} is {:?}", call_id, state);
                let outcome = match state {
                    ConnectionState::Connected => NegotiationOutcome::Connected,
                    s if s.is_terminal() => NegotiationOutcome::Ended(s),
                    _ => continue,
                };
                let event = NegotiationEvent {
                    call_id: call_id.clone(),
                    outcome,
                };
                if notify.send(event).is_err() {
                    break;
                }
            }
        }
    }
}
