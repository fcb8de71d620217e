//! Data models for Callwire Server

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// User Models
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub user_id: String,
    pub display_name: Option<String>,
    pub avatar: Option<String>,
    pub created_at: i64,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub display_name: Option<String>,
    pub avatar: Option<String>,
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        Self {
            user_id: user.user_id,
            display_name: user.display_name,
            avatar: user.avatar,
        }
    }
}

// ============================================================================
// Notification Models
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct NotificationRecord {
    pub id: String,
    pub recipient: String,
    pub sender: String,
    pub message: String,
    pub kind: String,
    pub link: Option<String>,
    pub created_at: i64,
    pub expires_at: i64,
    pub delivered: bool,
}

/// Notification as sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationView {
    pub id: String,
    pub recipient: String,
    pub sender: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub link: Option<String>,
    pub created_at: i64,
}

impl From<NotificationRecord> for NotificationView {
    fn from(record: NotificationRecord) -> Self {
        Self {
            id: record.id,
            recipient: record.recipient,
            sender: record.sender,
            message: record.message,
            kind: record.kind,
            link: record.link,
            created_at: record.created_at,
        }
    }
}

// ============================================================================
// Call Signaling Models
// ============================================================================

/// Sender metadata stamped onto relayed signals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalKind {
    #[serde(rename = "call:offer")]
    Offer,
    #[serde(rename = "call:answer")]
    Answer,
    #[serde(rename = "call:ice")]
    Ice,
    #[serde(rename = "call:reject")]
    Reject,
    #[serde(rename = "call:hangup")]
    Hangup,
    #[serde(rename = "call:busy")]
    Busy,
}

impl SignalKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SignalKind::Offer => "call:offer",
            SignalKind::Answer => "call:answer",
            SignalKind::Ice => "call:ice",
            SignalKind::Reject => "call:reject",
            SignalKind::Hangup => "call:hangup",
            SignalKind::Busy => "call:busy",
        }
    }
}

/// Signal payload. Only the routing fields are interpreted; everything else
/// is carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalPayload {
    #[serde(rename = "callId", default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<PeerInfo>,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalFrame {
    #[serde(rename = "type")]
    pub kind: SignalKind,
    #[serde(default)]
    pub payload: SignalPayload,
}

// ============================================================================
// WebSocket Models
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
    Notification(NotificationView),

    #[serde(rename = "error")]
    Error { code: String, message: String },

    #[serde(rename = "pong")]
    Pong,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WsClientMessage {
    Signal(SignalFrame),
    Control(ClientControl),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WsServerMessage {
    Signal(SignalFrame),
    Control(ServerControl),
}

impl From<SignalFrame> for WsServerMessage {
    fn from(frame: SignalFrame) -> Self {
        WsServerMessage::Signal(frame)
    }
}

impl WsServerMessage {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        WsServerMessage::Control(ServerControl::Error {
            code: code.to_string(),
            message: message.into(),
        })
    }
}

// ============================================================================
// API Request/Response Models
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub display_name: Option<String>,
    pub avatar: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateNotificationRequest {
    pub recipient: String,
    pub message: String,
    #[serde(rename = "type", default = "default_notification_kind")]
    pub kind: String,
    #[serde(default)]
    pub link: Option<String>,
}

fn default_notification_kind() -> String {
    "general".to_string()
}

#[derive(Debug, Deserialize)]
pub struct AcknowledgeNotificationsRequest {
    pub ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct PendingNotificationsResponse {
    pub notifications: Vec<NotificationView>,
}

#[derive(Debug, Serialize)]
pub struct TurnCredentialsResponse {
    pub urls: Vec<String>,
    pub username: String,
    pub credential: String,
    pub credential_type: String,
    pub ttl: u64,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub admin_key: String,
    pub user_id: Option<String>,
    pub display_name: Option<String>,
    pub avatar: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateUserResponse {
    pub user_id: String,
    pub token: String,
    pub expires_at: i64,
}

#[derive(Debug, Serialize)]
pub struct ServerStats {
    pub total_users: i64,
    pub active_users: i64,
    pub online_users: usize,
    pub pending_notifications: i64,
}
