//! User profile handlers

use axum::{
    extract::{Path, State},
    Json,
};

use crate::{
    error::{AppError, Result},
    models::*,
    AppState,
};

use super::AuthUser;

fn not_found() -> AppError {
    AppError::NotFound("User not found".to_string())
}

/// Get current user's profile
pub async fn get_current_user(State(state): State<AppState>, auth: AuthUser) -> Result<Json<UserProfile>> {
    let user = state.storage.get_user(&auth.user_id).await?.ok_or_else(not_found)?;
    Ok(Json(user.into()))
}

/// Profile lookup used by callers to resolve a peer's display metadata
pub async fn get_user(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(user_id): Path<String>,
) -> Result<Json<UserProfile>> {
    let user = state
        .storage
        .get_user(&user_id)
        .await?
        .filter(|user| user.is_active)
        .ok_or_else(not_found)?;

    Ok(Json(user.into()))
}

pub async fn update_profile(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<UserProfile>> {
    state
        .storage
        .update_user_profile(&auth.user_id, req.display_name.as_deref(), req.avatar.as_deref())
        .await?;

    let user = state.storage.get_user(&auth.user_id).await?.ok_or_else(not_found)?;
    Ok(Json(user.into()))
}
