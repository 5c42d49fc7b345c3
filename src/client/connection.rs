//! Connection seam between the ingestion core and the event-socket transport.
//!
//! A `Connector` makes exactly one connection attempt per `open()` call; retry
//! policy lives in the reconnection manager. The handle it returns is the only
//! thing the rest of the client reads events through.

use async_trait::async_trait;

use crate::error::ConnectionError;
use crate::esl::EslMessage;

/// Event encoding requested from the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFormat {
    Json,
    Plain,
}

impl EventFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventFormat::Json => "json",
            EventFormat::Plain => "plain",
        }
    }
}

/// The `event <format> <names>` subscription sent after connecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSubscription {
    pub format: EventFormat,
    pub events: Vec<String>,
}

impl EventSubscription {
    /// Every event kind, structured encoding.
    pub fn all_json() -> Self {
        Self {
            format: EventFormat::Json,
            events: vec!["ALL".to_string()],
        }
    }

    /// Wire command for this subscription.
    pub fn command(&self) -> String {
        format!("event {} {}", self.format.as_str(), self.events.join(" "))
    }
}

impl Default for EventSubscription {
    fn default() -> Self {
        Self::all_json()
    }
}

/// A live session with the event source.
#[async_trait]
pub trait EventHandle: Send + Sync + 'static {
    /// Send the event subscription command and wait for the server's reply.
    async fn subscribe(&self, subscription: &EventSubscription) -> Result<(), ConnectionError>;

    /// Pull the next event. Fails once the session is gone.
    async fn read_message(&self) -> Result<EslMessage, ConnectionError>;

    /// Release the session. Idempotent.
    async fn close(&self);

    /// Cheap health check used by the liveness tick.
    fn is_open(&self) -> bool {
        true
    }
}

/// Opens sessions against one remote address.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Handle: EventHandle;

    /// Single connection attempt, including authentication.
    async fn open(&self) -> Result<Self::Handle, ConnectionError>;

    /// Remote address, for logs.
    fn remote(&self) -> &str;
}
