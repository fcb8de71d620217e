//! HTTP request handlers for Callwire Server

pub mod admin;
pub mod health;
pub mod notifications;
pub mod turn;
pub mod users;
pub mod websocket;

use axum::{
    extract::{FromRequestParts, Query},
    http::request::Parts,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use serde::Deserialize;

use crate::{error::AppError, models::PeerInfo, AppState};

/// Authenticated user context extracted from request
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub display_name: Option<String>,
    pub avatar: Option<String>,
}

impl AuthUser {
    /// Identity stamped onto relayed signals
    pub fn peer_info(&self) -> PeerInfo {
        PeerInfo {
            id: self.user_id.clone(),
            name: self.display_name.clone(),
            avatar: self.avatar.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Bearer header first, then the `token` query parameter.
async fn session_token(parts: &mut Parts, state: &AppState) -> Option<String> {
    if let Ok(TypedHeader(Authorization(bearer))) =
        TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state).await
    {
        return Some(bearer.token().to_string());
    }

    Query::<TokenQuery>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|Query(query)| query.token)
        .filter(|token| !token.is_empty())
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = session_token(parts, state).await.ok_or(AppError::Unauthorized)?;

        let user = state
            .storage
            .validate_session(&token)
            .await
            .map_err(|e| {
                tracing::warn!("Session lookup failed: {}", e);
                AppError::Unauthorized
            })?
            .ok_or(AppError::Unauthorized)?;

        Ok(AuthUser {
            user_id: user.user_id,
            display_name: user.display_name,
            avatar: user.avatar,
        })
    }
}
