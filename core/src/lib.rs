//! Callwire Core Library
//!
//! Client side of one-to-one audio/video calling: the call state machine,
//! peer negotiation, and the realtime channel to the relay server.

pub mod call;
pub mod contacts;
pub mod error;
pub mod media;
pub mod models;
pub mod negotiation;
pub mod network;
pub mod protocol;
pub mod rtc;
pub mod signaling;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub use call::CallController;
pub use contacts::ContactBook;
pub use error::*;
pub use media::{LocalStream, MediaDevices, MediaTrack, RemoteStream, TrackKind};
pub use models::*;
pub use network::{ApiClient, WebSocketClient};
pub use protocol::{PeerInfo, ServerControl, ServerEvent, Signal};
pub use signaling::SignalingChannel;

use negotiation::PeerConnectionFactory;
use rtc::{IceConfig, RtcConnector};

/// Main client instance
pub struct CallClient {
    api: Arc<ApiClient>,
    ws: Arc<WebSocketClient>,
    contacts: Arc<ContactBook>,
    calls: Arc<CallController>,
    notifications: Mutex<Option<mpsc::UnboundedReceiver<Notification>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl CallClient {
    /// Connects as `me` using the webrtc backend for peer connections.
    pub async fn connect(
        config: ClientConfig,
        token: &str,
        me: PeerInfo,
        devices: Arc<dyn MediaDevices>,
    ) -> Result<Self> {
        let api = Arc::new(ApiClient::new(&config)?);
        api.set_token(token);

        let mut ice = IceConfig::stun(&config.ice_servers);
        match api.get_turn_credentials().await {
            Ok(creds) if !creds.urls.is_empty() => ice = ice.with_turn(&creds),
            Ok(_) => log::debug!("Server offers no TURN relay"),
            Err(e) => log::warn!("TURN credentials unavailable, continuing with STUN only: {}", e),
        }

        let connector = Arc::new(RtcConnector::new(ice)?);
        Self::connect_with(config, api, token, me, devices, connector).await
    }

    /// Connects with a caller-supplied peer connection backend.
    pub async fn connect_with(
        config: ClientConfig,
        api: Arc<ApiClient>,
        token: &str,
        me: PeerInfo,
        devices: Arc<dyn MediaDevices>,
        connector: Arc<dyn PeerConnectionFactory>,
    ) -> Result<Self> {
        let (ws, events) = WebSocketClient::connect(&config, token).await?;
        let ws = Arc::new(ws);
        let contacts = Arc::new(ContactBook::new());

        let calls = Arc::new(CallController::new(
            me,
            ws.clone(),
            devices,
            connector,
            contacts.clone(),
        ));

        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let (notifications_tx, notifications_rx) = mpsc::unbounded_channel();

        let runner = {
            let calls = calls.clone();
            tokio::spawn(async move { calls.run(signals_rx).await })
        };
        let dispatcher = tokio::spawn(dispatch(events, ws.clone(), signals_tx, notifications_tx));

        log::info!("Call client ready on {}", config.ws_url());

        Ok(Self {
            api,
            ws,
            contacts,
            calls,
            notifications: Mutex::new(Some(notifications_rx)),
            tasks: vec![runner, dispatcher],
        })
    }

    pub fn calls(&self) -> &Arc<CallController> {
        &self.calls
    }

    pub fn contacts(&self) -> &Arc<ContactBook> {
        &self.contacts
    }

    pub fn api(&self) -> &Arc<ApiClient> {
        &self.api
    }

    /// Notifications pushed over the realtime channel. Can be taken once.
    pub fn take_notifications(&self) -> Option<mpsc::UnboundedReceiver<Notification>> {
        self.notifications.lock().take()
    }

    /// Looks up a user through the API and caches them as a contact.
    pub async fn resolve_peer(&self, id: &Identity) -> Result<CallPeer> {
        if let Some(peer) = self.contacts.lookup(id) {
            return Ok(peer);
        }
        let user = self.api.get_user(id).await?;
        let peer = CallPeer::from(&user);
        self.contacts.remember(peer.clone());
        Ok(peer)
    }

    pub async fn shutdown(&self) {
        self.calls.shutdown().await;
        self.ws.disconnect();
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn dispatch(
    mut events: mpsc::UnboundedReceiver<ServerEvent>,
    ws: Arc<WebSocketClient>,
    signals: mpsc::UnboundedSender<Signal>,
    notifications: mpsc::UnboundedSender<Notification>,
) {
    while let Some(event) = events.recv().await {
        match event {
            ServerEvent::Signal(signal) => {
                if signals.send(signal).is_err() {
                    break;
                }
            }
            ServerEvent::Control(ServerControl::Notification(notification)) => {
                if let Err(e) = ws.acknowledge(vec![notification.id.clone()]) {
                    log::warn!("Failed to acknowledge notification {}: {}", notification.id, e);
                }
                let _ = notifications.send(notification);
            }
            ServerEvent::Control(ServerControl::Error { code, message }) => {
                log::warn!("Server error {}: {}", code, message);
            }
            ServerEvent::Control(ServerControl::Pong) => log::trace!("pong"),
        }
    }
}

/// Client configuration
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub server_host: String,
    pub server_port: u16,
    pub use_tls: bool,
    /// STUN URLs; a public server is used when empty.
    pub ice_servers: Vec<String>,
}

impl ClientConfig {
    pub fn new(host: &str, port: u16, use_tls: bool) -> Self {
        Self {
            server_host: host.to_string(),
            server_port: port,
            use_tls,
            ice_servers: Vec::new(),
        }
    }

    pub fn with_ice_servers(mut self, urls: Vec<String>) -> Self {
        self.ice_servers = urls;
        self
    }

    pub fn http_url(&self) -> String {
        let scheme = if self.use_tls { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.server_host, self.server_port)
    }

    pub fn ws_url(&self) -> String {
        let scheme = if self.use_tls { "wss" } else { "ws" };
        format!("{}://{}:{}/ws", scheme, self.server_host, self.server_port)
    }
}
