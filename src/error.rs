//! Error types for the chat hub
//!
//! Only transport-level failures are errors here. Protocol violations
//! (acting before joining, messaging an unknown user) are soft: the
//! engine answers them with `system` notices and drops the operation.

use thiserror::Error;

/// Transport-level errors
///
/// Any of these ends the affected connection; none of them is fatal to
/// the server process.
#[derive(Debug, Error)]
pub enum AppError {
    /// WebSocket protocol error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send error (internal channel broken)
    #[error("Channel send error")]
    ChannelSend,
}

/// Event send errors
///
/// Occurs when attempting to push events through closed channels.
#[derive(Debug, Error)]
pub enum SendError {
    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,
}
