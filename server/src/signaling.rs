//! Call signaling router
//!
//! Stateless: a frame from an authenticated sender is stamped with the
//! sender's identity and published to the recipient's presence topic.
//! Call legality is never checked here; that lives in the clients.

use crate::handlers::AuthUser;
use crate::models::SignalFrame;
use crate::presence::PresenceRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    MissingRecipient,
    MissingCallId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Number of recipient connections the frame reached (zero if offline).
    Delivered(usize),
    Dropped(DropReason),
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

pub fn route_signal(registry: &PresenceRegistry, sender: &AuthUser, mut frame: SignalFrame) -> RouteOutcome {
    let Some(recipient) = present(&frame.payload.to).map(str::to_string) else {
        tracing::debug!("Dropping {} from {}: no recipient", frame.kind.as_str(), sender.user_id);
        return RouteOutcome::Dropped(DropReason::MissingRecipient);
    };
    if present(&frame.payload.call_id).is_none() {
        tracing::debug!("Dropping {} from {}: no callId", frame.kind.as_str(), sender.user_id);
        return RouteOutcome::Dropped(DropReason::MissingCallId);
    }

    frame.payload.from = Some(sender.peer_info());

    let kind = frame.kind;
    let delivered = registry.publish(&recipient, frame.into());
    tracing::debug!(
        "Relayed {} {} -> {} ({} connections)",
        kind.as_str(),
        sender.user_id,
        recipient,
        delivered
    );

    RouteOutcome::Delivered(delivered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PeerInfo, SignalKind, SignalPayload, WsServerMessage};
    use serde_json::json;
    use tokio::sync::mpsc;

    fn alice() -> AuthUser {
        AuthUser {
            user_id: "alice".into(),
            display_name: Some("Alice".into()),
            avatar: None,
        }
    }

    fn frame(kind: SignalKind, to: Option<&str>, call_id: Option<&str>) -> SignalFrame {
        SignalFrame {
            kind,
            payload: SignalPayload {
                call_id: call_id.map(str::to_string),
                to: to.map(str::to_string),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_stamps_sender_over_spoofed_from() {
        let registry = PresenceRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.join("bob", tx);

        let mut offer = frame(SignalKind::Offer, Some("bob"), Some("c1"));
        offer.payload.from = Some(PeerInfo { id: "mallory".into(), name: None, avatar: None });
        offer.payload.body.insert("medium".into(), json!("audio"));

        assert_eq!(route_signal(&registry, &alice(), offer), RouteOutcome::Delivered(1));

        let WsServerMessage::Signal(relayed) = rx.try_recv().unwrap() else {
            panic!("expected a signal frame");
        };
        let from = relayed.payload.from.unwrap();
        assert_eq!(from.id, "alice");
        assert_eq!(from.name.as_deref(), Some("Alice"));
        assert_eq!(relayed.payload.body["medium"], "audio");
    }

    #[test]
    fn test_drops_frames_without_routing_fields() {
        let registry = PresenceRegistry::new();

        assert_eq!(
            route_signal(&registry, &alice(), frame(SignalKind::Ice, None, Some("c1"))),
            RouteOutcome::Dropped(DropReason::MissingRecipient)
        );
        assert_eq!(
            route_signal(&registry, &alice(), frame(SignalKind::Hangup, Some("  "), Some("c1"))),
            RouteOutcome::Dropped(DropReason::MissingRecipient)
        );
        assert_eq!(
            route_signal(&registry, &alice(), frame(SignalKind::Answer, Some("bob"), Some(""))),
            RouteOutcome::Dropped(DropReason::MissingCallId)
        );
    }

    #[test]
    fn test_offline_recipient_is_delivered_nowhere() {
        let registry = PresenceRegistry::new();
        assert_eq!(
            route_signal(&registry, &alice(), frame(SignalKind::Busy, Some("bob"), Some("c1"))),
            RouteOutcome::Delivered(0)
        );
    }
}
