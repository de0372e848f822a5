//! Error types for the sarathi runtime

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Runtime error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error from the underlying transport
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport reported itself closed
    #[error("Transport closed")]
    TransportClosed,

    /// Operation timed out
    #[error("Operation timed out")]
    Timeout,

    /// Malformed or out-of-range packet contents
    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    /// Invalid parameter passed to an API call
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Configuration failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be parsed
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration could not be serialized
    #[error("Config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    /// Engine is not running
    #[error("Engine not running")]
    NotRunning,

    /// Engine is already running
    #[error("Engine already running")]
    AlreadyRunning,

    /// A background thread panicked
    #[error("Thread panicked: {0}")]
    ThreadPanic(&'static str),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}
