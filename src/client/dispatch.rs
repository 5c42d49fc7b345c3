//! Event Dispatcher - routes one raw event to its lifecycle handler.
//!
//! Nothing here fails: every problem with a single event is logged and
//! reported as a `DispatchOutcome`, and the event loop moves on.

use std::sync::Arc;

use crate::client::handlers::{handle_call_end, handle_call_start};
use crate::error::HandlerError;
use crate::esl::EslMessage;
use crate::store::CallStore;

pub const EVENT_NAME: &str = "Event-Name";
pub const UNIQUE_ID: &str = "Unique-ID";

/// Event kinds the client acts on. Everything else is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    ChannelCreate,
    ChannelHangup,
}

impl EventKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "CHANNEL_CREATE" => Some(Self::ChannelCreate),
            "CHANNEL_HANGUP" => Some(Self::ChannelHangup),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChannelCreate => "CHANNEL_CREATE",
            Self::ChannelHangup => "CHANNEL_HANGUP",
        }
    }
}

/// What happened to one dispatched event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Call-start stored under this row id
    CallStarted { id: i64 },
    /// Call-start for a uuid that is already stored
    DuplicateStart,
    /// Call-end applied
    CallEnded,
    /// Call-end for a uuid with no stored call
    NoMatchingCall,
    /// No Unique-ID; `logged` is true for the lifecycle kinds
    MissingCallId { logged: bool },
    /// Kind this client doesn't handle
    Ignored,
    /// Event failed validation and never reached storage
    Rejected(HandlerError),
    /// Storage call failed
    StorageFailed,
}

impl DispatchOutcome {
    /// Whether handling this event produced an error-level log entry.
    pub fn is_elevated(&self) -> bool {
        matches!(
            self,
            Self::MissingCallId { logged: true } | Self::Rejected(_) | Self::StorageFailed
        )
    }
}

/// Routes events by `Event-Name` to the handlers, sharing one store.
pub struct Dispatcher<S: CallStore + ?Sized> {
    store: Arc<S>,
}

impl<S: CallStore + ?Sized> Clone for Dispatcher<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: CallStore + ?Sized> Dispatcher<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Examine one event and hand it to its handler.
    pub async fn dispatch(&self, event: &EslMessage) -> DispatchOutcome {
        let name = event.header(EVENT_NAME).unwrap_or_default();
        let kind = EventKind::from_name(name);

        let Some(uuid) = event.non_empty_header(UNIQUE_ID) else {
            if let Some(kind) = kind {
                tracing::error!(event = kind.as_str(), "Lifecycle event without Unique-ID, dropping");
                return DispatchOutcome::MissingCallId { logged: true };
            }
            return DispatchOutcome::MissingCallId { logged: false };
        };

        match kind {
            Some(EventKind::ChannelCreate) => handle_call_start(self.store.as_ref(), uuid, event).await,
            Some(EventKind::ChannelHangup) => handle_call_end(self.store.as_ref(), uuid, event).await,
            None => {
                tracing::trace!(event = name, uuid, "Ignoring event");
                DispatchOutcome::Ignored
            }
        }
    }
}
