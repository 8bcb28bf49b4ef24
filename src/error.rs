//! Error types for the transport-stream output stage

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Output error: {0}")]
    Output(#[from] OutputError),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Transport socket and destination errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Invalid destination: {0}")]
    InvalidDestination(String),

    #[error("Could not resolve {host}: {reason}")]
    ResolutionFailed { host: String, reason: String },

    #[error("Socket setup failed: {0}")]
    SocketFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Invalid RTP packet")]
    InvalidPacket,
}

impl NetworkError {
    /// Wrap an OS error raised while configuring a socket.
    pub(crate) fn socket(step: &str, err: std::io::Error) -> Self {
        NetworkError::SocketFailed(format!("{}: {}", step, err))
    }
}

/// Output pacer and queue errors
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Buffer allocation failed: {0}")]
    AllocationFailed(String),

    #[error("Invalid multiplexed data: {0}")]
    InvalidMuxedData(String),

    #[error("Output queue closed")]
    QueueClosed,

    #[error("Failed to spawn output thread: {0}")]
    ThreadSpawn(String),

    #[error("Output thread panicked")]
    ThreadPanicked,
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
