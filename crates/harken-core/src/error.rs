//! Error types for the harken workspace.

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Engine error kinds
#[derive(Error, Debug)]
pub enum Error {
    // Conditioning errors
    #[error("malformed PCM buffer: {len} bytes is not a whole number of 16-bit frames")]
    MalformedPcm { len: usize },

    #[error("analysis window too short: have {have} samples, need {need}")]
    WindowTooShort { have: usize, need: usize },

    #[error("unsupported sample rate: {sr} Hz is not an integer multiple of 44100 Hz")]
    UnsupportedRate { sr: u32 },

    // Decoder errors
    #[error("audio decode failed: {0}")]
    Decode(String),

    // Index errors
    #[error("index failure: {0}")]
    Index(#[from] rusqlite::Error),

    #[error("recording {id} not found")]
    NotFound { id: u32 },

    // Stream errors
    #[error("stream failure: {0}")]
    Stream(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        Error::Decode(msg.into())
    }

    /// Create a stream error
    pub fn stream(msg: impl Into<String>) -> Self {
        Error::Stream(msg.into())
    }

    /// Returns true if a match in progress may skip the affected candidate
    /// and continue
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}
