//! Error types for Chaski

use thiserror::Error;

/// Main error type for Chaski
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type alias for Chaski
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "CONFIG_ERROR",
            Error::Protocol(_) => "PROTOCOL_ERROR",
            Error::Storage(_) => "STORAGE_ERROR",
            Error::Transport(_) => "TRANSPORT_ERROR",
            Error::Io(_) => "IO_ERROR",
        }
    }
}
