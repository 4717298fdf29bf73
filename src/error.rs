//! Error types for the playback proxy

use std::io;
use std::path::PathBuf;

use hyper::StatusCode;
use thiserror::Error;

/// Result type for playback operations
pub type Result<T> = std::result::Result<T, PlaybackError>;

/// Errors that can occur while recording, replaying or steering the proxy
#[derive(Debug, Error)]
pub enum PlaybackError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Unknown mode string
    #[error("\"{0}\" is not a valid playback mode. It must be either \"record\", \"replay\", or \"auto\"")]
    InvalidMode(String),

    /// Cassette root does not exist
    #[error("the directory \"{}\" does not exist. Please create it, then try again", .0.display())]
    DirectoryNotFound(PathBuf),

    /// Cassette root exists but is a file
    #[error("the path \"{}\" is not a directory", .0.display())]
    NotADirectory(PathBuf),

    /// Cassette path rejected before touching the disk
    #[error("{0}")]
    InvalidCassettePath(String),

    /// Required query parameter absent
    #[error("\"{0}\" query param must be present")]
    MissingQueryParam(&'static str),

    /// Control endpoint called with an unsupported method
    #[error("method {method} is not allowed on {path}")]
    MethodNotAllowed {
        /// Method used by the caller
        method: String,
        /// Endpoint path
        path: String,
    },

    /// Traffic arrived before a cassette was loaded
    #[error("no cassette is loaded")]
    NoCassetteLoaded,

    /// Eject called with nothing loaded
    #[error("tried to eject when no cassette is loaded")]
    NothingToEject,

    /// Cassette file could not be opened for replay
    #[error("error opening cassette file \"{}\": {source}", path.display())]
    CassetteOpen {
        /// Absolute path of the cassette
        path: PathBuf,
        /// Underlying I/O error
        source: io::Error,
    },

    /// Cassette file could not be created for recording
    #[error("error creating cassette file \"{}\": {source}", path.display())]
    CassetteCreate {
        /// Absolute path of the cassette
        path: PathBuf,
        /// Underlying I/O error
        source: io::Error,
    },

    /// Cassette bytes are malformed
    #[error("error parsing cassette file: {0}")]
    Decode(String),

    /// Cassette could not be encoded
    #[error("error encoding cassette: {0}")]
    Encode(String),

    /// Persisting the recorded cassette failed
    #[error("unexpected error when writing cassette. It may have failed to write properly: {0}")]
    CassetteWrite(String),

    /// Replay found nothing acceptable in the remaining cassette
    #[error("no matching events")]
    NoMatchingEvents,

    /// Forwarding to a remote endpoint failed
    #[error("error forwarding request to {url}: {reason}")]
    Transport {
        /// Destination URL
        url: String,
        /// Failure description
        reason: String,
    },

    /// Forwarding to a remote endpoint exceeded the timeout
    #[error("request to {url} timed out after {secs}s")]
    Timeout {
        /// Destination URL
        url: String,
        /// Timeout that elapsed
        secs: u64,
    },

    /// TLS backend could not be initialized
    #[error("TLS setup failed: {0}")]
    Tls(String),

    /// Request body exceeded the configured limit
    #[error("Data too large: {size} bytes exceeds limit of {limit} bytes")]
    DataTooLarge {
        /// Actual size
        size: usize,
        /// Size limit
        limit: usize,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl PlaybackError {
    /// HTTP status reported to the caller for this failure
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidMode(_)
            | Self::DirectoryNotFound(_)
            | Self::NotADirectory(_)
            | Self::InvalidCassettePath(_)
            | Self::MissingQueryParam(_)
            | Self::NoCassetteLoaded
            | Self::NothingToEject
            | Self::ConfigError(_) => StatusCode::BAD_REQUEST,
            Self::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Self::DataTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Io(_)
            | Self::CassetteOpen { .. }
            | Self::CassetteCreate { .. }
            | Self::Decode(_)
            | Self::Encode(_)
            | Self::CassetteWrite(_)
            | Self::NoMatchingEvents
            | Self::Transport { .. }
            | Self::Timeout { .. }
            | Self::Tls(_)
            | Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
