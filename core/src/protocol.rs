//! Realtime wire protocol shared with the relay server.
//!
//! Every frame is a JSON text message of the form
//! `{"type": "...", "payload": {...}}`. Signaling payloads carry routing
//! fields next to their body: `to` on the way out, `from` (stamped by the
//! server) on the way in.

use serde::{Deserialize, Serialize};

use crate::models::{CallId, CallMedium, IceCandidate, Identity, Notification, SessionDescription};

// ============================================================================
// Routing
// ============================================================================

/// Sender metadata as stamped by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: Identity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl PeerInfo {
    pub fn new(id: impl Into<Identity>) -> Self {
        Self {
            id: id.into(),
            name: None,
            avatar: None,
        }
    }

    pub fn named(id: impl Into<Identity>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: Some(name.into()),
            avatar: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Identity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<PeerInfo>,
}

impl Route {
    pub fn to(recipient: Identity) -> Self {
        Self {
            to: Some(recipient),
            from: None,
        }
    }
}

// ============================================================================
// Signaling payloads
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferPayload {
    pub call_id: CallId,
    pub medium: CallMedium,
    pub offer: SessionDescription,
    #[serde(flatten)]
    pub route: Route,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerPayload {
    pub call_id: CallId,
    pub answer: SessionDescription,
    #[serde(flatten)]
    pub route: Route,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IcePayload {
    pub call_id: CallId,
    pub candidate: IceCandidate,
    #[serde(flatten)]
    pub route: Route,
}

/// Payload of the body-less kinds (reject, hangup, busy).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRef {
    pub call_id: CallId,
    #[serde(flatten)]
    pub route: Route,
}

/// One of the six call signaling messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Signal {
    #[serde(rename = "call:offer")]
    Offer(OfferPayload),

    #[serde(rename = "call:answer")]
    Answer(AnswerPayload),

    #[serde(rename = "call:ice")]
    Ice(IcePayload),

    #[serde(rename = "call:reject")]
    Reject(CallRef),

    #[serde(rename = "call:hangup")]
    Hangup(CallRef),

    #[serde(rename = "call:busy")]
    Busy(CallRef),
}

impl Signal {
    pub fn offer(
        call_id: CallId,
        medium: CallMedium,
        offer: SessionDescription,
        from: PeerInfo,
        to: Identity,
    ) -> Self {
        Signal::Offer(OfferPayload {
            call_id,
            medium,
            offer,
            route: Route {
                to: Some(to),
                from: Some(from),
            },
        })
    }

    pub fn answer(call_id: CallId, answer: SessionDescription, to: Identity) -> Self {
        Signal::Answer(AnswerPayload {
            call_id,
            answer,
            route: Route::to(to),
        })
    }

    pub fn ice(call_id: CallId, candidate: IceCandidate, to: Identity) -> Self {
        Signal::Ice(IcePayload {
            call_id,
            candidate,
            route: Route::to(to),
        })
    }

    pub fn reject(call_id: CallId, to: Identity) -> Self {
        Signal::Reject(CallRef {
            call_id,
            route: Route::to(to),
        })
    }

    pub fn hangup(call_id: CallId, to: Identity) -> Self {
        Signal::Hangup(CallRef {
            call_id,
            route: Route::to(to),
        })
    }

    pub fn busy(call_id: CallId, to: Identity) -> Self {
        Signal::Busy(CallRef {
            call_id,
            route: Route::to(to),
        })
    }

    pub fn call_id(&self) -> &CallId {
        match self {
            Signal::Offer(p) => &p.call_id,
            Signal::Answer(p) => &p.call_id,
            Signal::Ice(p) => &p.call_id,
            Signal::Reject(p) | Signal::Hangup(p) | Signal::Busy(p) => &p.call_id,
        }
    }

    pub fn route(&self) -> &Route {
        match self {
            Signal::Offer(p) => &p.route,
            Signal::Answer(p) => &p.route,
            Signal::Ice(p) => &p.route,
            Signal::Reject(p) | Signal::Hangup(p) | Signal::Busy(p) => &p.route,
        }
    }

    pub fn route_mut(&mut self) -> &mut Route {
        match self {
            Signal::Offer(p) => &mut p.route,
            Signal::Answer(p) => &mut p.route,
            Signal::Ice(p) => &mut p.route,
            Signal::Reject(p) | Signal::Hangup(p) | Signal::Busy(p) => &mut p.route,
        }
    }

    /// Wire name of this signal kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Signal::Offer(_) => "call:offer",
            Signal::Answer(_) => "call:answer",
            Signal::Ice(_) => "call:ice",
            Signal::Reject(_) => "call:reject",
            Signal::Hangup(_) => "call:hangup",
            Signal::Busy(_) => "call:busy",
        }
    }

    /// Returns the signal as the relay would deliver it: stamped with `from`.
    pub fn stamped(mut self, from: PeerInfo) -> Self {
        self.route_mut().from = Some(from);
        self
    }
}

// ============================================================================
// Frames
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientControl {
    #[serde(rename = "notification:ack")]
    AcknowledgeNotifications { ids: Vec<String> },

    #[serde(rename = "ping")]
    Ping,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerControl {
    #[serde(rename = "notification")]
    Notification(Notification),

    #[serde(rename = "error")]
    Error { code: String, message: String },

    #[serde(rename = "pong")]
    Pong,
}

/// Frame sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientFrame {
    Signal(Signal),
    Control(ClientControl),
}

/// Frame received from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerEvent {
    Signal(Signal),
    Control(ServerControl),
}
