//! Error types for DishaIO

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// DishaIO error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection closed by the peer
    #[error("Connection closed by broker")]
    ConnectionClosed,

    /// Broker refused the connect handshake
    #[error("Connection refused by broker (return code {0:#04x})")]
    ConnectionRefused(u8),

    /// Broker rejected the subscription
    #[error("Subscription rejected by broker")]
    SubscribeRejected,

    /// No broker traffic within the keep-alive window
    #[error("Keep-alive timeout")]
    KeepAliveTimeout,

    /// Communication timeout
    #[error("Communication timeout")]
    Timeout,

    /// Operation requires an active connection
    #[error("Not connected")]
    NotConnected,

    /// Malformed or unexpected protocol data
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Operation not supported
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Reconnect attempts exhausted
    #[error("Reconnect failed after {0} attempts")]
    ReconnectExhausted(u32),

    /// Config file could not be parsed
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Config could not be serialized
    #[error("Config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    /// A shared mutex was poisoned by a panicking thread
    #[error("Mutex poisoned: {0}")]
    MutexPoisoned(String),

    /// A worker thread panicked
    #[error("Thread panicked: {0}")]
    ThreadPanic(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

/// Payload decode failures.
///
/// These are recoverable: the listener logs the failure, keeps the previous
/// orientation value, and moves on to the next message. Only transport and
/// protocol errors (`Error`) can terminate the listener.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Zero-length message body
    #[error("Empty payload")]
    EmptyPayload,

    /// Token does not parse as a floating-point literal
    #[error("Malformed number {token:?}")]
    MalformedNumber {
        /// The offending token
        token: String,
        /// Parse failure from the numeric primitive
        #[source]
        source: std::num::ParseFloatError,
    },

    /// Fewer than three comma-separated components
    #[error("Insufficient components: expected 3, found {found}")]
    InsufficientComponents {
        /// Number of components present
        found: usize,
    },
}
