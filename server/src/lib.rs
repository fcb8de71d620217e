//! Callwire Server - presence-aware relay for call signaling
//!
//! This server handles:
//! - Session authentication for realtime connections
//! - Presence topics (every live connection of an identity)
//! - Stateless relay of call signaling between two identities
//! - Durable notifications with acknowledgment
//! - Time-limited TURN credentials

pub mod config;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod models;
pub mod presence;
pub mod signaling;
pub mod storage;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::presence::PresenceRegistry;
use crate::storage::Storage;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub storage: Arc<Storage>,
    pub presence: Arc<PresenceRegistry>,
}

impl AppState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let storage = Storage::new(&config.storage.database_path).await?;

        Ok(Self {
            config: Arc::new(config),
            storage: Arc::new(storage),
            presence: Arc::new(PresenceRegistry::new()),
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health::health_check))

        // Realtime connection
        .route("/ws", get(handlers::websocket::websocket_handler))

        // User profiles
        .route("/api/v1/users/me", get(handlers::users::get_current_user))
        .route("/api/v1/users/:user_id", get(handlers::users::get_user))
        .route("/api/v1/users/me/profile", post(handlers::users::update_profile))

        // Notifications
        .route(
            "/api/v1/notifications",
            get(handlers::notifications::pending_notifications).post(handlers::notifications::create_notification),
        )
        .route("/api/v1/notifications/ack", post(handlers::notifications::acknowledge_notifications))

        // TURN credentials
        .route("/api/v1/turn/credentials", get(handlers::turn::get_credentials))

        // Admin routes
        .route("/api/v1/admin/users", post(handlers::admin::create_user))
        .route("/api/v1/admin/stats", get(handlers::admin::get_stats))

        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Periodically drop expired notifications and sessions
pub fn spawn_cleanup(storage: Arc<Storage>, interval_minutes: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_minutes.max(1) * 60));
        loop {
            interval.tick().await;
            match storage.cleanup_expired().await {
                Ok((notifications, sessions)) => {
                    if notifications > 0 || sessions > 0 {
                        tracing::info!("Cleanup: removed {} notifications, {} sessions", notifications, sessions);
                    }
                }
                Err(e) => {
                    tracing::error!("Cleanup failed: {}", e);
                }
            }
        }
    })
}
