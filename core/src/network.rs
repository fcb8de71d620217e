//! Network layer for Callwire - HTTP API and WebSocket client

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

use crate::error::{Error, Result};
use crate::models::*;
use crate::protocol::{ClientControl, ClientFrame, ServerEvent, Signal};
use crate::signaling::SignalingChannel;
use crate::ClientConfig;

// ============================================================================
// HTTP API Client
// ============================================================================

pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Mutex<Option<String>>,
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = Client::builder().build()?;

        Ok(Self {
            client,
            base_url: config.http_url(),
            token: Mutex::new(None),
        })
    }

    pub fn set_token(&self, token: &str) {
        *self.token.lock() = Some(token.to_string());
    }

    fn auth_header(&self) -> Option<String> {
        self.token
            .lock()
            .as_ref()
            .map(|t| format!("Bearer {}", t))
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        let req = self.client.get(format!("{}{}", self.base_url, path));
        match self.auth_header() {
            Some(auth) => req.header("Authorization", auth),
            None => req,
        }
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let req = self.client.post(format!("{}{}", self.base_url, path));
        match self.auth_header() {
            Some(auth) => req.header("Authorization", auth),
            None => req,
        }
    }

    pub async fn get_user(&self, user_id: &Identity) -> Result<User> {
        let resp = self.get(&format!("/api/v1/users/{}", user_id)).send().await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(Error::UserNotFound(user_id.to_string()));
        }

        let user: User = resp.error_for_status()?.json().await?;
        Ok(user)
    }

    pub async fn get_turn_credentials(&self) -> Result<TurnCredentials> {
        let resp = self.get("/api/v1/turn/credentials").send().await?;
        let creds: TurnCredentials = resp.error_for_status()?.json().await?;

        Ok(creds)
    }

    /// Unacknowledged notifications stored for the current user.
    pub async fn pending_notifications(&self) -> Result<Vec<Notification>> {
        let resp = self.get("/api/v1/notifications").send().await?;
        let data: serde_json::Value = resp.error_for_status()?.json().await?;

        Ok(serde_json::from_value(data["notifications"].clone())?)
    }

    pub async fn send_notification(
        &self,
        recipient: &Identity,
        message: &str,
        kind: &str,
        link: Option<&str>,
    ) -> Result<Notification> {
        let resp = self
            .post("/api/v1/notifications")
            .json(&json!({
                "recipient": recipient,
                "message": message,
                "type": kind,
                "link": link,
            }))
            .send()
            .await?;

        let notification: Notification = resp.error_for_status()?.json().await?;
        Ok(notification)
    }

    pub async fn acknowledge_notifications(&self, ids: &[String]) -> Result<()> {
        self.post("/api/v1/notifications/ack")
            .json(&json!({ "ids": ids }))
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }

    pub async fn check_health(&self) -> bool {
        match self.client.get(format!("{}/health", self.base_url)).send().await {
            Ok(r) => r.status().is_success(),
            Err(_) => false,
        }
    }
}

// ============================================================================
// WebSocket Client
// ============================================================================

struct Connection {
    outbound: mpsc::UnboundedSender<String>,
    alive: Arc<AtomicBool>,
}

impl Connection {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && !self.outbound.is_closed()
    }
}

/// Realtime channel to the relay.
///
/// Inbound frames from every underlying socket, including ones opened by
/// `reconnect`, arrive on the single receiver returned by `connect`.
pub struct WebSocketClient {
    url: String,
    token: String,
    connection: Mutex<Option<Connection>>,
    events: mpsc::UnboundedSender<ServerEvent>,
    reconnecting: tokio::sync::Mutex<()>,
}

impl WebSocketClient {
    pub async fn connect(
        config: &ClientConfig,
        token: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ServerEvent>)> {
        let (events, rx) = mpsc::unbounded_channel();
        let client = Self {
            url: config.ws_url(),
            token: token.to_string(),
            connection: Mutex::new(None),
            events,
            reconnecting: tokio::sync::Mutex::new(()),
        };
        client.open().await?;

        Ok((client, rx))
    }

    /// A client that was never connected.
    #[cfg(test)]
    pub(crate) fn detached(config: &ClientConfig) -> Self {
        let (events, _) = mpsc::unbounded_channel();
        Self {
            url: config.ws_url(),
            token: String::new(),
            connection: Mutex::new(None),
            events,
            reconnecting: tokio::sync::Mutex::new(()),
        }
    }

    async fn open(&self) -> Result<()> {
        let mut request = self.url.as_str().into_client_request()?;
        let auth = HeaderValue::from_str(&format!("Bearer {}", self.token))
            .map_err(|e| Error::WebSocket(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, auth);

        let (ws_stream, _) = connect_async(request).await?;
        let (mut write, mut read) = ws_stream.split();

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let alive = Arc::new(AtomicBool::new(true));

        // Receive task
        let events = self.events.clone();
        let reader_alive = alive.clone();
        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(WsMessage::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(event) => {
                            if events.send(event).is_err() {
                                break;
                            }
                        }
                        Err(e) => log::debug!("Ignoring unrecognized frame: {}", e),
                    },
                    Ok(WsMessage::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            reader_alive.store(false, Ordering::SeqCst);
            log::info!("WebSocket connection closed");
        });

        // Send task
        let writer_alive = alive.clone();
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if write.send(WsMessage::Text(msg)).await.is_err() {
                    break;
                }
            }
            writer_alive.store(false, Ordering::SeqCst);
            let _ = write.close().await;
        });

        *self.connection.lock() = Some(Connection { outbound: tx, alive });
        log::info!("WebSocket connected to {}", self.url);

        Ok(())
    }

    pub fn send_frame(&self, frame: &ClientFrame) -> Result<()> {
        let text = serde_json::to_string(frame)?;
        let guard = self.connection.lock();
        let connection = guard.as_ref().filter(|c| c.is_alive()).ok_or(Error::NotConnected)?;

        connection
            .outbound
            .send(text)
            .map_err(|e| Error::WebSocket(e.to_string()))
    }

    pub fn acknowledge(&self, ids: Vec<String>) -> Result<()> {
        self.send_frame(&ClientFrame::Control(ClientControl::AcknowledgeNotifications { ids }))
    }

    pub fn ping(&self) -> Result<()> {
        self.send_frame(&ClientFrame::Control(ClientControl::Ping))
    }

    /// Drops the outbound half; the writer task closes the socket.
    pub fn disconnect(&self) {
        self.connection.lock().take();
    }
}

#[async_trait]
impl SignalingChannel for WebSocketClient {
    async fn send(&self, signal: Signal) -> Result<()> {
        self.send_frame(&ClientFrame::Signal(signal))
    }

    fn is_connected(&self) -> bool {
        self.connection
            .lock()
            .as_ref()
            .map_or(false, |c| c.is_alive())
    }

    async fn reconnect(&self) -> Result<()> {
        let _serial = self.reconnecting.lock().await;
        // Someone else may have reconnected while we waited.
        if self.is_connected() {
            return Ok(());
        }
        self.open().await
    }
}
