//! Error types for callsink
//!
//! Centralized error handling using thiserror. Each layer has its own enum
//! (connection, handler, storage) and `CallsinkError` wraps them for callers
//! that cross layers.

use thiserror::Error;

/// Failures opening, authenticating, or talking to the event socket.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Address could not be split into host and port
    #[error("Invalid event socket address '{addr}': {reason}")]
    InvalidAddress { addr: String, reason: String },

    /// Socket-level failure
    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),

    /// Connect or command did not complete in time
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Server refused the shared secret
    #[error("Authentication rejected: {0}")]
    AuthRejected(String),

    /// Server answered a command with -ERR
    #[error("Command rejected: {0}")]
    CommandRejected(String),

    /// The handle has been closed or its reader stopped
    #[error("Connection closed")]
    Closed,

    /// Unexpected frame sequence from the server
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Validation failures local to a single event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// Event-Date-Timestamp header absent or empty
    #[error("Event-Date-Timestamp is missing for {event}")]
    MissingTimestamp { event: String },

    /// Event-Date-Timestamp not an integer
    #[error("Invalid Event-Date-Timestamp '{value}'")]
    InvalidTimestamp { value: String },

    /// Some other required header is absent
    #[error("Required header {header} is missing for {event}")]
    MissingHeader { header: String, event: String },
}

/// Storage collaborator failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A call with this uuid already exists
    #[error("Call already recorded: {0}")]
    Duplicate(String),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Stored value could not be decoded
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// Connection mutex poisoned by a panicking writer
    #[error("Store lock poisoned")]
    Poisoned,

    /// Blocking storage task panicked or was cancelled
    #[error("Storage task failed: {0}")]
    Task(String),
}

/// All error types that can occur in callsink
#[derive(Debug, Error)]
pub enum CallsinkError {
    /// Event socket error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Event handling error
    #[error(transparent)]
    Handler(#[from] HandlerError),

    /// Storage error
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML config parse error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias for callsink operations
pub type Result<T> = std::result::Result<T, CallsinkError>;
