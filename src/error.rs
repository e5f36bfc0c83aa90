//! Error types shared across the capture pipeline

use std::io;

use thiserror::Error;

/// Rejected bridge configuration; fatal before any frame is processed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("buffer budget must be positive, got {0} bytes")]
    InvalidBudget(u64),
}

/// Failures reported by a capture session backend.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("capture session already started")]
    AlreadyStarted,

    #[error("failed to spawn capture thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("capture device error: {0}")]
    Device(String),

    #[error("capture thread panicked")]
    ThreadPanicked,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Errors from opening a capture.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("invalid bridge configuration: {0}")]
    Config(#[from] BridgeError),

    #[error("capture session failed: {0}")]
    Session(#[from] SessionError),
}

/// Errors from loading or validating [`crate::Config`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
