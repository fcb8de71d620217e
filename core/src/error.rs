//! Error types for Callwire Core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Media error: {0}")]
    Media(String),

    #[error("Negotiation error: {0}")]
    Negotiation(String),

    #[error("Signaling error: {0}")]
    Signaling(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("A call is already in progress")]
    CallInProgress,

    #[error("No incoming call to answer")]
    NoIncomingCall,

    #[error("Call ended before the operation completed")]
    CallEnded,

    #[error("Signaling channel is not connected")]
    NotConnected,

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::WebSocket(e.to_string())
    }
}

impl From<webrtc::Error> for Error {
    fn from(e: webrtc::Error) -> Self {
        Error::Negotiation(e.to_string())
    }
}
