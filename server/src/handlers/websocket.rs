//! WebSocket handler for realtime signaling and notification delivery

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use std::collections::HashSet;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::{
    models::*,
    signaling::{route_signal, RouteOutcome},
    AppState,
};

use super::AuthUser;

/// Authentication runs before the upgrade, so an invalid session is a 401
/// and never reaches the router.
pub async fn websocket_handler(
    auth: AuthUser,
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, auth))
}

async fn handle_socket(socket: WebSocket, state: AppState, auth: AuthUser) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Channel for sending messages to this client
    let (tx, mut rx) = mpsc::unbounded_channel::<WsServerMessage>();

    let send_task = tokio::spawn(async move {
        let mut notified = HashSet::new();
        while let Some(msg) = rx.recv().await {
            if !first_delivery(&mut notified, &msg) {
                continue;
            }
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::error!("Failed to encode outbound frame: {}", e),
            }
        }
    });

    let connection_id = state.presence.join(&auth.user_id, tx.clone());
    deliver_pending(&state, &auth, &tx).await;

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => handle_text(&state, &auth, &tx, &text).await,
            Ok(Message::Close(_)) => break,
            // Binary frames are not part of the protocol; ping/pong is handled by axum
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("WebSocket error: user={}: {}", auth.user_id, e);
                break;
            }
        }
    }

    state.presence.leave(connection_id);
    send_task.abort();
}

/// A notification created while the backlog loads reaches the connection
/// both live and from storage; only the first copy goes out.
fn first_delivery(notified: &mut HashSet<String>, msg: &WsServerMessage) -> bool {
    match msg {
        WsServerMessage::Control(ServerControl::Notification(view)) => notified.insert(view.id.clone()),
        _ => true,
    }
}

async fn deliver_pending(state: &AppState, auth: &AuthUser, tx: &mpsc::UnboundedSender<WsServerMessage>) {
    match state.storage.pending_notifications(&auth.user_id).await {
        Ok(pending) => {
            if !pending.is_empty() {
                tracing::info!("Delivering {} pending notifications to {}", pending.len(), auth.user_id);
            }
            for record in pending {
                let _ = tx.send(WsServerMessage::Control(ServerControl::Notification(record.into())));
            }
        }
        Err(e) => tracing::error!("Failed to load pending notifications for {}: {}", auth.user_id, e),
    }
}

/// Just enough of a frame to tell signals from control messages.
#[derive(Deserialize)]
struct FrameKind {
    #[serde(rename = "type")]
    kind: String,
}

fn is_signal_frame(text: &str) -> bool {
    serde_json::from_str::<FrameKind>(text)
        .map(|frame| frame.kind.starts_with("call:"))
        .unwrap_or(false)
}

async fn handle_text(state: &AppState, auth: &AuthUser, tx: &mpsc::UnboundedSender<WsServerMessage>, text: &str) {
    let message = match serde_json::from_str::<WsClientMessage>(text) {
        Ok(message) => message,
        Err(e) if is_signal_frame(text) => {
            tracing::debug!("Malformed signal from {} dropped: {}", auth.user_id, e);
            return;
        }
        Err(e) => {
            tracing::warn!("Failed to parse WebSocket message from {}: {}", auth.user_id, e);
            let _ = tx.send(WsServerMessage::error("PARSE_ERROR", format!("Invalid message format: {}", e)));
            return;
        }
    };

    match message {
        WsClientMessage::Signal(frame) => {
            if let RouteOutcome::Dropped(reason) = route_signal(&state.presence, auth, frame) {
                tracing::debug!("Signal from {} dropped: {:?}", auth.user_id, reason);
            }
        }

        WsClientMessage::Control(ClientControl::AcknowledgeNotifications { ids }) => {
            match state.storage.acknowledge_notifications(&auth.user_id, &ids).await {
                Ok(count) => tracing::debug!("{} acknowledged {} notifications", auth.user_id, count),
                Err(e) => tracing::error!("Failed to acknowledge notifications for {}: {}", auth.user_id, e),
            }
        }

        WsClientMessage::Control(ClientControl::Ping) => {
            let _ = tx.send(WsServerMessage::Control(ServerControl::Pong));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification(id: &str) -> WsServerMessage {
        WsServerMessage::Control(ServerControl::Notification(NotificationView {
            id: id.to_string(),
            recipient: "bob".to_string(),
            sender: "alice".to_string(),
            message: "Missed call".to_string(),
            kind: "missed_call".to_string(),
            link: None,
            created_at: 0,
        }))
    }

    #[test]
    fn test_notification_goes_out_once_per_connection() {
        let mut notified = HashSet::new();

        assert!(first_delivery(&mut notified, &notification("n1")));
        assert!(!first_delivery(&mut notified, &notification("n1")));
        assert!(first_delivery(&mut notified, &notification("n2")));

        let pong = WsServerMessage::Control(ServerControl::Pong);
        assert!(first_delivery(&mut notified, &pong));
        assert!(first_delivery(&mut notified, &pong));
    }

    #[test]
    fn test_signal_frames_are_recognized_by_type() {
        assert!(is_signal_frame(r#"{"type":"call:offer","payload":{"to":123}}"#));
        assert!(!is_signal_frame(r#"{"type":"ping"}"#));
        assert!(!is_signal_frame("not json"));
        assert!(!is_signal_frame(r#"{"payload":{}}"#));
    }
}
