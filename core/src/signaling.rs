//! Outbound half of the realtime channel as seen by the call machinery.

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::Signal;

/// A connection able to publish signaling messages through the relay.
///
/// Delivery is best-effort: a successful `send` only means the frame was
/// queued on the live connection.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    async fn send(&self, signal: Signal) -> Result<()>;

    fn is_connected(&self) -> bool;

    async fn reconnect(&self) -> Result<()>;
}

/// Sends `signal`, re-establishing the channel first if it dropped.
pub async fn deliver(channel: &dyn SignalingChannel, signal: Signal) -> Result<()> {
    if !channel.is_connected() {
        log::info!("Signaling channel down, reconnecting before {}", signal.kind());
        channel.reconnect().await?;
    }
    channel.send(signal).await
}
