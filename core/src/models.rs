//! Data models for Callwire

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Identity
// ============================================================================

/// Authenticated user identity. The only value usable as a routing address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Identity {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ============================================================================
// User
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: Identity,
    pub display_name: Option<String>,
    pub avatar: Option<String>,
}

// ============================================================================
// Calls
// ============================================================================

/// Token identifying one call attempt end-to-end. Never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallMedium {
    Audio,
    Video,
}

impl CallMedium {
    pub fn has_video(self) -> bool {
        matches!(self, CallMedium::Video)
    }
}

/// The remote participant as shown to the user. Presentational only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallPeer {
    pub id: Identity,
    pub name: String,
    pub avatar: Option<String>,
}

impl CallPeer {
    pub const PLACEHOLDER_NAME: &'static str = "Unknown caller";

    pub fn new(id: impl Into<Identity>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            avatar: None,
        }
    }

    pub fn placeholder(id: Identity) -> Self {
        Self {
            id,
            name: Self::PLACEHOLDER_NAME.to_string(),
            avatar: None,
        }
    }

    pub fn with_avatar(mut self, avatar: impl Into<String>) -> Self {
        self.avatar = Some(avatar.into());
        self
    }
}

impl From<&User> for CallPeer {
    fn from(user: &User) -> Self {
        Self {
            id: user.user_id.clone(),
            name: user
                .display_name
                .clone()
                .unwrap_or_else(|| user.user_id.to_string()),
            avatar: user.avatar.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallStatus {
    #[default]
    Idle,
    Calling,
    Ringing,
    Connecting,
    InCall,
}

/// Per-participant view of the one call this client may be part of.
///
/// Owned by the call controller and handed out as snapshots; it never
/// leaves the process.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CallSession {
    pub status: CallStatus,
    pub medium: Option<CallMedium>,
    pub peer: Option<CallPeer>,
    pub call_id: Option<CallId>,
    pub is_muted: bool,
    pub is_camera_off: bool,
    pub connected_at: Option<DateTime<Utc>>,
}

impl CallSession {
    pub fn is_idle(&self) -> bool {
        self.status == CallStatus::Idle
    }

    /// True when this session is non-idle and tracks `call_id`.
    pub fn matches(&self, call_id: &CallId) -> bool {
        !self.is_idle() && self.call_id.as_ref() == Some(call_id)
    }

    /// Seconds since the media path came up, while in a call.
    pub fn duration_secs(&self) -> Option<i64> {
        self.connected_at
            .map(|start| (Utc::now() - start).num_seconds())
    }
}

// ============================================================================
// Negotiation payloads
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SdpKind {
    Offer,
    Answer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default)]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

// ============================================================================
// Notifications
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub recipient: Identity,
    pub sender: Identity,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub link: Option<String>,
    pub created_at: i64,
}

// ============================================================================
// Session / TURN
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnCredentials {
    pub urls: Vec<String>,
    pub username: String,
    pub credential: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_ids_are_unique() {
        let a = CallId::generate();
        let b = CallId::generate();
        assert_ne!(a, b);
        assert!(!a.as_str().is_empty());
    }

    #[test]
    fn test_session_matches_only_when_active() {
        let call_id = CallId::from("c1");
        let mut session = CallSession {
            call_id: Some(call_id.clone()),
            ..Default::default()
        };
        assert!(!session.matches(&call_id));

        session.status = CallStatus::Ringing;
        assert!(session.matches(&call_id));
        assert!(!session.matches(&CallId::from("c2")));
    }

    #[test]
    fn test_duration_counts_from_connection() {
        let mut session = CallSession {
            status: CallStatus::Connecting,
            ..Default::default()
        };
        assert_eq!(session.duration_secs(), None);

        session.status = CallStatus::InCall;
        session.connected_at = Some(Utc::now() - chrono::Duration::seconds(90));
        let secs = session.duration_secs().unwrap();
        assert!((90..=91).contains(&secs));
    }

    #[test]
    fn test_ice_candidate_uses_browser_field_names() {
        let json = r#"{"candidate":"candidate:1 1 udp 2122260223 10.0.0.2 54321 typ host","sdpMid":"0","sdpMLineIndex":0}"#;
        let candidate: IceCandidate = serde_json::from_str(json).unwrap();
        assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
        assert_eq!(candidate.sdp_mline_index, Some(0));
        assert!(candidate.username_fragment.is_none());
    }
}
