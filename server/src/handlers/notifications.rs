//! Durable notification handlers

use axum::{extract::State, Json};

use crate::{
    error::{AppError, Result},
    models::*,
    AppState,
};

use super::AuthUser;

/// Store a notification and push it to the recipient if online
pub async fn create_notification(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<CreateNotificationRequest>,
) -> Result<Json<NotificationView>> {
    if req.recipient.trim().is_empty() {
        return Err(AppError::BadRequest("recipient is required".to_string()));
    }

    let record = state
        .storage
        .store_notification(
            req.recipient.trim(),
            &auth.user_id,
            &req,
            state.config.storage.notification_ttl_hours,
        )
        .await?;
    let view = NotificationView::from(record);

    let delivered = state.presence.publish(
        &view.recipient,
        WsServerMessage::Control(ServerControl::Notification(view.clone())),
    );
    tracing::debug!(
        "Notification {} from {} to {} pushed to {} connections",
        view.id,
        auth.user_id,
        view.recipient,
        delivered
    );

    Ok(Json(view))
}

pub async fn pending_notifications(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<PendingNotificationsResponse>> {
    let notifications = state
        .storage
        .pending_notifications(&auth.user_id)
        .await?
        .into_iter()
        .map(NotificationView::from)
        .collect();

    Ok(Json(PendingNotificationsResponse { notifications }))
}

pub async fn acknowledge_notifications(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<AcknowledgeNotificationsRequest>,
) -> Result<Json<serde_json::Value>> {
    let acknowledged = state.storage.acknowledge_notifications(&auth.user_id, &req.ids).await?;
    Ok(Json(serde_json::json!({ "acknowledged": acknowledged })))
}
