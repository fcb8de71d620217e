//! Admin handlers

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;

use crate::{
    crypto,
    error::{AppError, Result},
    models::*,
    AppState,
};

pub const ADMIN_KEY_HEADER: &str = "x-admin-key";

fn verify_admin_key(state: &AppState, provided: &str) -> Result<()> {
    if !state.config.is_admin_key(provided) {
        return Err(AppError::Forbidden);
    }
    Ok(())
}

/// Create a user and issue its first session token (admin only)
pub async fn create_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> Result<Json<CreateUserResponse>> {
    verify_admin_key(&state, &req.admin_key)?;

    let user_id = match req.user_id {
        Some(id) if !id.trim().is_empty() => id.trim().to_string(),
        Some(_) => return Err(AppError::BadRequest("user_id must not be empty".to_string())),
        None => crypto::generate_user_id()?,
    };

    if state.storage.get_user(&user_id).await?.is_some() {
        return Err(AppError::UserAlreadyExists);
    }

    state
        .storage
        .create_user(&user_id, req.display_name.as_deref(), req.avatar.as_deref())
        .await?;
    let (token, expires_at) = state
        .storage
        .create_session(&user_id, state.config.storage.session_ttl_hours)
        .await?;

    tracing::info!("Admin created user: {}", user_id);

    Ok(Json(CreateUserResponse {
        user_id,
        token,
        expires_at,
    }))
}

#[derive(Debug, Deserialize)]
pub struct AdminKeyQuery {
    pub admin_key: Option<String>,
}

/// Get server statistics (admin only)
pub async fn get_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AdminKeyQuery>,
) -> Result<Json<ServerStats>> {
    let provided = headers
        .get(ADMIN_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or(query.admin_key)
        .unwrap_or_default();
    verify_admin_key(&state, &provided)?;

    let stats = state.storage.get_stats(state.presence.online_user_count()).await?;
    Ok(Json(stats))
}
