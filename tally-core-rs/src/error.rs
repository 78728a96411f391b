//! Error types

use crate::types::StudentId;
use thiserror::Error;

/// Errors surfaced to callers of `submit`
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScoreError {
    #[error("A submission has already been recorded for student {0}")]
    Duplicate(StudentId),

    #[error("Transport was never connected")]
    TransportUnavailable,

    #[error("Scoring node stopped")]
    NodeStopped,
}

/// Inbound message that could not be decoded. Logged and dropped.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No route for topic {0}")]
    UnroutedTopic(String),

    #[error("Unsupported reset signal: type={kind} action={action}")]
    UnsupportedReset { kind: String, action: String },
}

/// Transport failures. Contained inside the connection task and drive reconnect.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out connecting to {0}")]
    ConnectTimeout(String),

    #[error("Invalid broker URL: {0}")]
    InvalidUrl(String),

    #[error("Frame encoding error: {0}")]
    Frame(#[from] serde_json::Error),
}
