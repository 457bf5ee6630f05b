//! Unified error types for Courier.

use thiserror::Error;

/// Result type alias using CourierError.
pub type Result<T> = std::result::Result<T, CourierError>;

#[derive(Error, Debug)]
pub enum CourierError {
    // Caller errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // Channel errors
    #[error("Channel unavailable: {0}")]
    ChannelUnavailable(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    // Persistence errors
    #[error("Storage error: {0}")]
    Storage(String),

    // Config errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Lifecycle errors
    #[error("Shutting down: {0}")]
    Shutdown(String),

    // General errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CourierError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn channel(msg: impl Into<String>) -> Self {
        Self::Channel(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
