//! Call state machine.
//!
//! One `CallController` per participant tracks the single call that
//! participant may be in. Call state lives only here: the relay forwards
//! signals without knowing what they mean.
//!
//! ```text
//!   idle ──start_call──▶ calling ──answer──▶ connecting ──connected──▶ in-call
//!     │                                          ▲
//!     └──offer──▶ ringing ──accept───────────────┘
//! ```
//!
//! Every path back to idle goes through `release`, which stops the local
//! capture tracks before the idle session is published.
//!
//! Async operations re-check, after each suspension point, that the call
//! they started for is still the current one. Anything acquired for a call
//! that ended in the meantime is released on the spot and nothing is sent.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::contacts::ContactBook;
use crate::error::{Error, Result};
use crate::media::{LocalStream, MediaDevices, RemoteStream, TrackKind};
use crate::models::{
    CallId, CallMedium, CallPeer, CallSession, CallStatus, IceCandidate, Identity, SessionDescription,
};
use crate::negotiation::{
    NegotiationEngine, NegotiationEvent, NegotiationOutcome, PeerConnectionFactory,
};
use crate::protocol::{PeerInfo, Signal};
use crate::signaling::SignalingChannel;

const STRAY_CALL_LIMIT: usize = 8;
const STRAY_CANDIDATE_LIMIT: usize = 32;
const STRAY_TTL: Duration = Duration::from_secs(30);

/// Candidates for call ids we have not seen an offer for yet. The relay
/// does not order a peer's ICE behind its offer, so these are kept for a
/// short while instead of being dropped.
#[derive(Default)]
struct StrayCandidates {
    calls: HashMap<CallId, (Instant, Vec<IceCandidate>)>,
}

impl StrayCandidates {
    fn push(&mut self, call_id: CallId, candidate: IceCandidate) {
        let now = Instant::now();
        self.calls.retain(|_, (seen, _)| now.duration_since(*seen) < STRAY_TTL);

        if !self.calls.contains_key(&call_id) && self.calls.len() >= STRAY_CALL_LIMIT {
            let oldest = self
                .calls
                .iter()
                .min_by_key(|(_, (seen, _))| *seen)
                .map(|(id, _)| id.clone());
            if let Some(oldest) = oldest {
                self.calls.remove(&oldest);
            }
        }

        let (_, queued) = self.calls.entry(call_id).or_insert_with(|| (now, Vec::new()));
        if queued.len() < STRAY_CANDIDATE_LIMIT {
            queued.push(candidate);
        }
    }

    fn take(&mut self, call_id: &CallId) -> Vec<IceCandidate> {
        match self.calls.remove(call_id) {
            Some((seen, queued)) if seen.elapsed() < STRAY_TTL => queued,
            _ => Vec::new(),
        }
    }
}

/// Resources tied to the current call.
#[derive(Default)]
struct ActiveCall {
    session: CallSession,
    engine: Option<Arc<NegotiationEngine>>,
    local_stream: Option<Arc<LocalStream>>,
    pending_offer: Option<SessionDescription>,
    /// Peer candidates that arrived before the engine existed.
    early_candidates: Vec<IceCandidate>,
    /// Survives `release`: a peer's ICE may beat its offer to us.
    stray: StrayCandidates,
}

pub struct CallController {
    me: PeerInfo,
    signaling: Arc<dyn SignalingChannel>,
    devices: Arc<dyn MediaDevices>,
    connector: Arc<dyn PeerConnectionFactory>,
    contacts: Arc<ContactBook>,
    active: Mutex<ActiveCall>,
    session_tx: watch::Sender<CallSession>,
    negotiation_tx: mpsc::UnboundedSender<NegotiationEvent>,
    negotiation_rx: Mutex<Option<mpsc::UnboundedReceiver<NegotiationEvent>>>,
}

impl CallController {
    pub fn new(
        me: PeerInfo,
        signaling: Arc<dyn SignalingChannel>,
        devices: Arc<dyn MediaDevices>,
        connector: Arc<dyn PeerConnectionFactory>,
        contacts: Arc<ContactBook>,
    ) -> Self {
        let (session_tx, _) = watch::channel(CallSession::default());
        let (negotiation_tx, negotiation_rx) = mpsc::unbounded_channel();

        Self {
            me,
            signaling,
            devices,
            connector,
            contacts,
            active: Mutex::new(ActiveCall::default()),
            session_tx,
            negotiation_tx,
            negotiation_rx: Mutex::new(Some(negotiation_rx)),
        }
    }

    // ========================================================================
    // Observation
    // ========================================================================

    pub fn session(&self) -> CallSession {
        self.active.lock().session.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CallSession> {
        self.session_tx.subscribe()
    }

    pub fn remote_stream(&self) -> Option<Arc<RemoteStream>> {
        self.active.lock().engine.as_ref().map(|e| e.remote_stream())
    }

    pub fn has_local_media(&self) -> bool {
        self.active.lock().local_stream.is_some()
    }

    // ========================================================================
    // User intents
    // ========================================================================

    /// Places a call to `peer`.
    ///
    /// On failure the session is already back to idle; the error only says
    /// why the call did not go out.
    pub async fn start_call(&self, peer: CallPeer, medium: CallMedium) -> Result<CallId> {
        let call_id = CallId::generate();
        {
            let mut active = self.active.lock();
            if !active.session.is_idle() {
                return Err(Error::CallInProgress);
            }
            active.session = CallSession {
                status: CallStatus::Calling,
                medium: Some(medium),
                peer: Some(peer.clone()),
                call_id: Some(call_id.clone()),
                ..Default::default()
            };
            self.publish(&active);
        }

        log::info!("Calling {} ({:?}), call {}", peer.id, medium, call_id);

        match self.originate(&call_id, &peer.id, medium).await {
            Ok(()) => Ok(call_id),
            Err(e) => {
                log::warn!("Outgoing call {} failed: {}", call_id, e);
                // No call id reached the peer yet, so there is no one to tell.
                self.end_call(&call_id, None).await;
                Err(e)
            }
        }
    }

    /// Answers the ringing call.
    pub async fn accept(&self) -> Result<()> {
        let (call_id, medium, peer, offer) = {
            let mut active = self.active.lock();
            if active.session.status != CallStatus::Ringing {
                return Err(Error::NoIncomingCall);
            }
            let (Some(call_id), Some(medium), Some(peer), Some(offer)) = (
                active.session.call_id.clone(),
                active.session.medium,
                active.session.peer.clone(),
                active.pending_offer.take(),
            ) else {
                return Err(Error::NoIncomingCall);
            };
            active.session.status = CallStatus::Connecting;
            self.publish(&active);
            (call_id, medium, peer, offer)
        };

        log::info!("Accepting call {} from {}", call_id, peer.id);

        match self.answer(&call_id, &peer.id, medium, offer).await {
            Ok(()) => Ok(()),
            Err(Error::CallEnded) => Err(Error::CallEnded),
            Err(e) => {
                log::warn!("Accepting call {} failed: {}", call_id, e);
                let reject = Signal::reject(call_id.clone(), peer.id.clone());
                self.end_call(&call_id, Some(reject)).await;
                Err(e)
            }
        }
    }

    /// Declines the ringing call. No-op in any other state.
    pub async fn reject(&self) {
        let (call_id, peer, engine) = {
            let mut active = self.active.lock();
            if active.session.status != CallStatus::Ringing {
                return;
            }
            let call_id = active.session.call_id.clone();
            let peer = active.session.peer.as_ref().map(|p| p.id.clone());
            (call_id, peer, self.release(&mut active))
        };

        close_engine(engine).await;
        if let (Some(call_id), Some(peer)) = (call_id, peer) {
            log::info!("Rejected call {} from {}", call_id, peer);
            self.send(Signal::reject(call_id, peer)).await;
        }
    }

    /// Ends the current call from this side, whatever its stage.
    ///
    /// Idempotent: hanging up while idle does nothing.
    pub async fn hangup(&self) {
        let (call_id, peer, engine) = {
            let mut active = self.active.lock();
            if active.session.is_idle() {
                return;
            }
            let call_id = active.session.call_id.clone();
            let peer = active.session.peer.as_ref().map(|p| p.id.clone());
            (call_id, peer, self.release(&mut active))
        };

        close_engine(engine).await;
        if let (Some(call_id), Some(peer)) = (call_id, peer) {
            log::info!("Hung up call {} with {}", call_id, peer);
            self.send(Signal::hangup(call_id, peer)).await;
        }
    }

    /// Teardown of the owning component (window closed, user logged out).
    pub async fn shutdown(&self) {
        self.hangup().await;
    }

    /// Returns the resulting mute state.
    pub fn toggle_mute(&self) -> bool {
        let mut active = self.active.lock();
        let toggled = active
            .local_stream
            .as_ref()
            .and_then(|stream| stream.toggle(TrackKind::Audio));
        if let Some(enabled) = toggled {
            active.session.is_muted = !enabled;
            self.publish(&active);
        }
        active.session.is_muted
    }

    /// Returns the resulting camera-off state.
    pub fn toggle_camera(&self) -> bool {
        let mut active = self.active.lock();
        let toggled = active
            .local_stream
            .as_ref()
            .and_then(|stream| stream.toggle(TrackKind::Video));
        if let Some(enabled) = toggled {
            active.session.is_camera_off = !enabled;
            self.publish(&active);
        }
        active.session.is_camera_off
    }

    // ========================================================================
    // Inbound events
    // ========================================================================

    /// Processes relayed signals and connection events until `signals`
    /// closes, then tears down whatever call is left.
    pub async fn run(&self, mut signals: mpsc::UnboundedReceiver<Signal>) {
        let Some(mut negotiation) = self.negotiation_rx.lock().take() else {
            log::warn!("Call controller is already running");
            return;
        };

        loop {
            tokio::select! {
                signal = signals.recv() => match signal {
                    Some(signal) => self.handle_signal(signal).await,
                    None => break,
                },
                Some(event) = negotiation.recv() => self.handle_negotiation(event).await,
            }
        }

        self.shutdown().await;
        *self.negotiation_rx.lock() = Some(negotiation);
    }

    pub async fn handle_signal(&self, signal: Signal) {
        match signal {
            Signal::Offer(payload) => {
                let Some(from) = payload.route.from else {
                    log::debug!("Dropping offer {} without sender", payload.call_id);
                    return;
                };
                self.on_offer(payload.call_id, payload.medium, payload.offer, from)
                    .await
            }
            Signal::Answer(payload) => self.on_answer(payload.call_id, payload.answer).await,
            Signal::Ice(payload) => self.on_ice(payload.call_id, payload.candidate).await,
            Signal::Reject(payload) => self.on_remote_end(payload.call_id, "rejected").await,
            Signal::Hangup(payload) => self.on_remote_end(payload.call_id, "hung up").await,
            Signal::Busy(payload) => self.on_remote_end(payload.call_id, "busy").await,
        }
    }

    pub async fn handle_negotiation(&self, event: NegotiationEvent) {
        match event.outcome {
            NegotiationOutcome::Connected => {
                let mut active = self.active.lock();
                if !active.session.matches(&event.call_id) {
                    return;
                }
                // Connected can fire more than once; only the first one counts.
                if active.session.status == CallStatus::Connecting {
                    active.session.status = CallStatus::InCall;
                    active.session.connected_at = Some(chrono::Utc::now());
                    self.publish(&active);
                    log::info!("Call {} connected", event.call_id);
                }
            }
            NegotiationOutcome::Ended(state) => {
                if self.end_call(&event.call_id, None).await {
                    log::info!("Call {} ended: connection {:?}", event.call_id, state);
                }
            }
        }
    }

    async fn on_offer(
        &self,
        call_id: CallId,
        medium: CallMedium,
        offer: SessionDescription,
        from: PeerInfo,
    ) {
        let busy = {
            let mut active = self.active.lock();
            if active.session.is_idle() {
                let peer = self.resolve_peer(&from);
                log::info!("Incoming {:?} call {} from {}", medium, call_id, peer.id);
                active.session = CallSession {
                    status: CallStatus::Ringing,
                    medium: Some(medium),
                    peer: Some(peer),
                    call_id: Some(call_id.clone()),
                    ..Default::default()
                };
                active.pending_offer = Some(offer);
                active.early_candidates = active.stray.take(&call_id);
                self.publish(&active);
                false
            } else if active.session.matches(&call_id) {
                log::debug!("Duplicate offer for call {}", call_id);
                return;
            } else {
                active.stray.take(&call_id);
                true
            }
        };

        if busy {
            log::info!("Busy: declining call {} from {}", call_id, from.id);
            self.send(Signal::busy(call_id, from.id)).await;
        }
    }

    async fn on_answer(&self, call_id: CallId, answer: SessionDescription) {
        let engine = {
            let mut active = self.active.lock();
            if !active.session.matches(&call_id) {
                log::debug!("Dropping answer for stale call {}", call_id);
                return;
            }
            if active.session.status != CallStatus::Calling {
                return;
            }
            active.session.status = CallStatus::Connecting;
            self.publish(&active);
            active.engine.clone()
        };

        let result = match engine {
            Some(engine) => engine.apply_answer(answer).await,
            None => Err(Error::Negotiation("no peer connection for answer".into())),
        };

        if let Err(e) = result {
            log::warn!("Applying answer for call {} failed: {}", call_id, e);
            self.end_call(&call_id, None).await;
        }
    }

    async fn on_ice(&self, call_id: CallId, candidate: IceCandidate) {
        let engine = {
            let mut active = self.active.lock();
            if !active.session.matches(&call_id) {
                log::debug!("Holding candidate for unknown call {}", call_id);
                active.stray.push(call_id, candidate);
                return;
            }
            match active.engine.clone() {
                Some(engine) => engine,
                None => {
                    active.early_candidates.push(candidate);
                    return;
                }
            }
        };

        if let Err(e) = engine.add_remote_candidate(candidate).await {
            log::warn!("Remote candidate rejected for call {}: {}", call_id, e);
        }
    }

    async fn on_remote_end(&self, call_id: CallId, reason: &str) {
        self.active.lock().stray.take(&call_id);
        if self.end_call(&call_id, None).await {
            log::info!("Call {} ended: peer {}", call_id, reason);
        } else {
            log::debug!("Ignoring {} for inactive call {}", reason, call_id);
        }
    }

    // ========================================================================
    // Flows
    // ========================================================================

    async fn originate(&self, call_id: &CallId, peer: &Identity, medium: CallMedium) -> Result<()> {
        let stream = self.devices.acquire(medium).await?;
        let stream = self.adopt_stream(call_id, stream)?;

        let engine = self.open_engine(call_id, peer).await?;
        engine.attach(&stream).await?;
        self.ensure_current(call_id)?;

        let offer = engine.create_offer().await?;
        self.ensure_current(call_id)?;

        self.signaling
            .send(Signal::offer(call_id.clone(), medium, offer, self.me.clone(), peer.clone()))
            .await?;
        engine.release_local_candidates().await;
        Ok(())
    }

    async fn answer(
        &self,
        call_id: &CallId,
        peer: &Identity,
        medium: CallMedium,
        offer: SessionDescription,
    ) -> Result<()> {
        let stream = self.devices.acquire(medium).await?;
        let stream = self.adopt_stream(call_id, stream)?;

        let engine = self.open_engine(call_id, peer).await?;
        engine.attach(&stream).await?;
        self.ensure_current(call_id)?;

        let answer = engine.accept_offer(offer).await?;
        self.ensure_current(call_id)?;

        self.signaling
            .send(Signal::answer(call_id.clone(), answer, peer.clone()))
            .await?;
        engine.release_local_candidates().await;
        Ok(())
    }

    /// Hands a freshly acquired stream to the call, or stops it if the call
    /// is gone.
    fn adopt_stream(&self, call_id: &CallId, stream: LocalStream) -> Result<Arc<LocalStream>> {
        let mut active = self.active.lock();
        if !active.session.matches(call_id) {
            stream.stop_all();
            return Err(Error::CallEnded);
        }

        let stream = Arc::new(stream);
        active.session.is_muted = false;
        active.session.is_camera_off = false;
        active.local_stream = Some(stream.clone());
        self.publish(&active);
        Ok(stream)
    }

    async fn open_engine(&self, call_id: &CallId, peer: &Identity) -> Result<Arc<NegotiationEngine>> {
        let engine = Arc::new(
            NegotiationEngine::open(
                self.connector.as_ref(),
                call_id.clone(),
                peer.clone(),
                self.signaling.clone(),
                self.negotiation_tx.clone(),
            )
            .await?,
        );

        let early = {
            let mut active = self.active.lock();
            if active.session.matches(call_id) {
                active.engine = Some(engine.clone());
                Some(std::mem::take(&mut active.early_candidates))
            } else {
                None
            }
        };

        let Some(early) = early else {
            engine.close().await;
            return Err(Error::CallEnded);
        };

        for candidate in early {
            engine.add_remote_candidate(candidate).await?;
        }
        Ok(engine)
    }

    fn ensure_current(&self, call_id: &CallId) -> Result<()> {
        if self.active.lock().session.matches(call_id) {
            Ok(())
        } else {
            Err(Error::CallEnded)
        }
    }

    /// Tears down `call_id` if it is still the current call, then sends
    /// `notify`. Returns whether anything was torn down.
    async fn end_call(&self, call_id: &CallId, notify: Option<Signal>) -> bool {
        let engine = {
            let mut active = self.active.lock();
            if !active.session.matches(call_id) {
                return false;
            }
            self.release(&mut active)
        };

        close_engine(engine).await;
        if let Some(signal) = notify {
            self.send(signal).await;
        }
        true
    }

    /// Stops capture, drops per-call state and publishes the idle session.
    /// The engine is handed back so it can be closed outside the lock.
    fn release(&self, active: &mut ActiveCall) -> Option<Arc<NegotiationEngine>> {
        if let Some(stream) = active.local_stream.take() {
            stream.stop_all();
        }
        if let (Some(call_id), Some(secs)) = (&active.session.call_id, active.session.duration_secs()) {
            log::info!("Call {} lasted {}s", call_id, secs);
        }
        active.pending_offer = None;
        active.early_candidates.clear();
        active.session = CallSession::default();
        self.publish(active);
        active.engine.take()
    }

    fn publish(&self, active: &ActiveCall) {
        self.session_tx.send_replace(active.session.clone());
    }

    fn resolve_peer(&self, from: &PeerInfo) -> CallPeer {
        let known = self.contacts.lookup(&from.id);
        let name = from
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .or_else(|| known.as_ref().map(|p| p.name.clone()));

        match name {
            Some(name) => CallPeer {
                id: from.id.clone(),
                name,
                avatar: from
                    .avatar
                    .clone()
                    .or_else(|| known.and_then(|p| p.avatar)),
            },
            None => CallPeer::placeholder(from.id.clone()),
        }
    }

    async fn send(&self, signal: Signal) {
        let kind = signal.kind();
        if let Err(e) = self.signaling.send(signal).await {
            log::warn!("Failed to send {}: {}", kind, e);
        }
    }
}

async fn close_engine(engine: Option<Arc<NegotiationEngine>>) {
    if let Some(engine) = engine {
        log::debug!("Closing negotiation for call {}", engine.call_id());
        engine.close().await;
    }
}
