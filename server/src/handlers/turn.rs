//! TURN credentials handler for WebRTC

use axum::{extract::State, Json};

use crate::{crypto, models::TurnCredentialsResponse, AppState};

use super::AuthUser;

/// Time-limited TURN credentials, or an empty server list when TURN is off
pub async fn get_credentials(State(state): State<AppState>, auth: AuthUser) -> Json<TurnCredentialsResponse> {
    let turn = &state.config.turn;

    if !turn.enabled {
        return Json(TurnCredentialsResponse {
            urls: vec![],
            username: String::new(),
            credential: String::new(),
            credential_type: String::new(),
            ttl: 0,
        });
    }

    let (username, credential) = crypto::generate_turn_credentials(&turn.username, &turn.credential, turn.ttl_seconds);
    tracing::debug!("Issued TURN credentials to {}", auth.user_id);

    Json(TurnCredentialsResponse {
        urls: turn.urls.clone(),
        username,
        credential,
        credential_type: turn.credential_type.clone(),
        ttl: turn.ttl_seconds,
    })
}
