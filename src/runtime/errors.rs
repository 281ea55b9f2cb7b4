//! Error types for packet delivery and decoder plugins

use crossbeam_channel::SendError;

/// Error type for channel operations between a capture source and the feed
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Failed to send to feed channel: {0}")]
    SendError(String),

    #[error("Shutdown signal received")]
    Shutdown,
}

impl<T> From<SendError<T>> for DeliveryError {
    fn from(e: SendError<T>) -> Self {
        DeliveryError::SendError(format!("{}", e))
    }
}

/// Result type for channel operations
pub type DeliveryResult<T = ()> = Result<T, DeliveryError>;

/// Error type returned by protocol decoder implementations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("Invalid value '{value}' for option '{key}'")]
    InvalidOption { key: String, value: String },

    #[error("Required probe '{0}' is not assigned")]
    MissingProbe(String),

    #[error("Probe '{probe}' mapped to lane {lane}, but only {available} lanes are enabled")]
    ProbeOutOfRange {
        probe: String,
        lane: usize,
        available: usize,
    },

    #[error("Decoder not started")]
    NotStarted,

    #[error("{0}")]
    Failed(String),
}

/// Result type for decoder operations
pub type DecodeResult<T = ()> = Result<T, DecodeError>;
