//! Reconnect signal - single-slot, non-blocking wakeup for the reconnection manager.
//!
//! At most one request is ever pending. Raising while a request is already
//! queued drops the new one; the pending request already covers it.

use std::fmt;

use tokio::sync::mpsc;

/// Why a reconnect was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalSource {
    /// Initial connection on startup
    Startup,
    /// The event loop failed to read from the session with this generation
    ReadFailure { generation: u64 },
    /// A previous attempt failed and its retry delay elapsed
    RetryAfterFailure,
    /// The liveness tick found no session
    Liveness,
}

impl fmt::Display for SignalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Startup => write!(f, "startup"),
            Self::ReadFailure { generation } => write!(f, "read_failure(gen={})", generation),
            Self::RetryAfterFailure => write!(f, "retry"),
            Self::Liveness => write!(f, "liveness"),
        }
    }
}

/// Sending side, cloned freely by anything that can detect a failure.
#[derive(Debug, Clone)]
pub struct ReconnectSignal {
    tx: mpsc::Sender<SignalSource>,
}

/// Receiving side, owned by the reconnection manager.
#[derive(Debug)]
pub struct ReconnectReceiver {
    rx: mpsc::Receiver<SignalSource>,
}

/// Create a connected signal pair with capacity one.
pub fn reconnect_signal() -> (ReconnectSignal, ReconnectReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (ReconnectSignal { tx }, ReconnectReceiver { rx })
}

impl ReconnectSignal {
    /// Request a reconnect. Returns false when a request was already pending
    /// (or the manager is gone) and this one was dropped.
    pub fn raise(&self, source: SignalSource) -> bool {
        match self.tx.try_send(source) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!(source = %source, "Reconnect already pending, dropping signal");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Whether a request is queued and not yet picked up.
    pub fn is_pending(&self) -> bool {
        self.tx.capacity() == 0
    }
}

impl ReconnectReceiver {
    /// Wait for the next request. None once every sender is dropped.
    pub async fn recv(&mut self) -> Option<SignalSource> {
        self.rx.recv().await
    }

    /// Take a pending request without waiting.
    pub fn try_recv(&mut self) -> Option<SignalSource> {
        self.rx.try_recv().ok()
    }
}
