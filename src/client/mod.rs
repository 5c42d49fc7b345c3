//! Resilient event-ingestion client.
//!
//! Wires the pieces together:
//! - `ReconnectManager` owns the session and republishes it after failures
//! - `EventLoop` reads from whatever session is current
//! - `Dispatcher` routes each event to the call lifecycle handlers
//!
//! # Example
//!
//! ```ignore
//! let connector = EslConnector::new(EslConnectorConfig::new("127.0.0.1:8021", "ClueCon"));
//! let client = EslClient::new(connector, store, ClientConfig::default());
//! let running = client.start(token.clone());
//! // ...
//! let report = running.close().await;
//! ```

pub mod connection;
pub mod dispatch;
pub mod event_loop;
pub mod handlers;
#[cfg(test)]
pub(crate) mod mock;
pub mod reconnect;
pub mod signal;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub use connection::{Connector, EventFormat, EventHandle, EventSubscription};
pub use dispatch::{DispatchOutcome, Dispatcher, EventKind};
pub use event_loop::{EventLoop, EventLoopConfig, EventLoopStats};
pub use handlers::{handle_call_end, handle_call_start, parse_event_timestamp};
pub use reconnect::{ConnectionState, ReconnectConfig, ReconnectManager, ReconnectStats, Session};
pub use signal::{ReconnectReceiver, ReconnectSignal, SignalSource, reconnect_signal};

use crate::store::CallStore;

/// Everything the ingestion client needs besides the connector and store.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub reconnect: ReconnectConfig,
    pub event_loop: EventLoopConfig,
    /// How long `close` waits for in-flight dispatches
    pub shutdown_grace: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            event_loop: EventLoopConfig::default(),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Ingestion client, not yet started.
pub struct EslClient<C: Connector, S: CallStore + ?Sized> {
    connector: C,
    store: Arc<S>,
    config: ClientConfig,
}

impl<C: Connector, S: CallStore + ?Sized> EslClient<C, S> {
    pub fn new(connector: C, store: Arc<S>, config: ClientConfig) -> Self {
        Self {
            connector,
            store,
            config,
        }
    }

    /// Spawn the reconnection manager and the event loop.
    ///
    /// Both stop when `token` (or the client's own child of it) is cancelled.
    pub fn start(self, token: CancellationToken) -> RunningClient<C::Handle> {
        let token = token.child_token();
        let tracker = TaskTracker::new();

        let manager = ReconnectManager::new(self.connector, self.config.reconnect);
        let states = manager.states();
        let sessions = manager.sessions();
        let event_loop = EventLoop::new(
            manager.sessions(),
            manager.signal(),
            Dispatcher::new(self.store),
            self.config.event_loop,
            tracker.clone(),
        );

        let manager_task = tokio::spawn(manager.run(token.clone()));
        let event_loop_task = tokio::spawn(event_loop.run(token.clone()));

        RunningClient {
            token,
            states,
            sessions,
            manager: manager_task,
            event_loop: event_loop_task,
            tracker,
            shutdown_grace: self.config.shutdown_grace,
        }
    }
}

/// What `close` observed while shutting down.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub reconnect: ReconnectStats,
    pub events: EventLoopStats,
    /// False when in-flight dispatches were still running at the deadline
    pub drained: bool,
}

/// A started client.
pub struct RunningClient<H> {
    token: CancellationToken,
    states: watch::Receiver<ConnectionState>,
    sessions: watch::Receiver<Option<Session<H>>>,
    manager: JoinHandle<ReconnectStats>,
    event_loop: JoinHandle<EventLoopStats>,
    tracker: TaskTracker,
    shutdown_grace: Duration,
}

impl<H: EventHandle> RunningClient<H> {
    pub fn state(&self) -> ConnectionState {
        *self.states.borrow()
    }

    /// Watch connection state changes.
    pub fn states(&self) -> watch::Receiver<ConnectionState> {
        self.states.clone()
    }

    /// Generation of the published session, if any.
    pub fn generation(&self) -> Option<u64> {
        self.sessions.borrow().as_ref().map(|s| s.generation)
    }

    /// Stop intake, close the session, and give in-flight dispatches up to
    /// the grace period to finish.
    pub async fn close(self) -> ShutdownReport {
        tracing::info!("Closing event-socket client");
        self.token.cancel();

        let events = match self.event_loop.await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::error!(error = %e, "Event loop task failed");
                EventLoopStats::default()
            }
        };
        let reconnect = match self.manager.await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::error!(error = %e, "Reconnection manager task failed");
                ReconnectStats::default()
            }
        };

        self.tracker.close();
        let pending = self.tracker.len();
        let drained = tokio::time::timeout(self.shutdown_grace, self.tracker.wait()).await.is_ok();
        if drained {
            tracing::info!(pending, "All in-flight events handled");
        } else {
            tracing::warn!(
                remaining = self.tracker.len(),
                grace = ?self.shutdown_grace,
                "Shutdown grace elapsed with events still in flight"
            );
        }

        ShutdownReport {
            reconnect,
            events,
            drained,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::dispatch::{EVENT_NAME, UNIQUE_ID};
    use crate::client::handlers::{EVENT_DATE_TIMESTAMP, HANGUP_CAUSE};
    use crate::client::mock::{Attempt, MockConnector, SlowStore};
    use crate::esl::EslMessage;
    use crate::store::MemoryCallStore;

    fn event(name: &str, uuid: &str, ts: &str) -> EslMessage {
        EslMessage::new()
            .with_header(EVENT_NAME, name)
            .with_header(UNIQUE_ID, uuid)
            .with_header(EVENT_DATE_TIMESTAMP, ts)
            .with_header(HANGUP_CAUSE, "NORMAL_CLEARING")
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..1000 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met");
    }

    async fn connected<H: EventHandle>(running: &RunningClient<H>) {
        let mut states = running.states();
        tokio::time::timeout(
            Duration::from_secs(60),
            states.wait_for(|s| *s == ConnectionState::Connected),
        )
        .await
        .unwrap()
        .unwrap();
    }

    #[test]
    fn test_client_config_default() {
        let config = ClientConfig::default();
        assert_eq!(config.shutdown_grace, Duration::from_secs(5));
        assert_eq!(config.reconnect.retry_delay, Duration::from_secs(5));
        assert_eq!(config.event_loop.max_in_flight, 256);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ingests_across_reconnect() {
        let connector = MockConnector::new();
        let store = Arc::new(MemoryCallStore::new());
        let client = EslClient::new(connector.clone(), Arc::clone(&store), ClientConfig::default());
        let running = client.start(CancellationToken::new());

        connected(&running).await;
        assert_eq!(running.generation(), Some(1));

        let first = connector.session(0).unwrap();
        first.push(event("CHANNEL_CREATE", "abc", "1000000"));
        first.fail_read();

        // Read failure on generation 1 brings up generation 2
        eventually(|| connector.sessions().len() == 2).await;
        connected(&running).await;
        eventually(|| running.generation() == Some(2)).await;
        assert!(first.is_closed());

        connector
            .session(1)
            .unwrap()
            .push(event("CHANNEL_HANGUP", "abc", "5000000"));
        eventually(|| {
            store
                .ops()
                .iter()
                .any(|op| matches!(op, crate::store::StoreOp::UpdateEnd { .. }))
        })
        .await;

        let report = running.close().await;
        assert!(report.drained);
        assert_eq!(report.reconnect.attempts, 2);
        assert_eq!(report.events.events, 2);
        assert_eq!(report.events.read_failures, 1);
        assert!(connector.session(1).unwrap().is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_source_keeps_retrying() {
        let connector = MockConnector::new().with_script([Attempt::FailOpen; 4]);
        let store = Arc::new(MemoryCallStore::new());
        let running = EslClient::new(connector.clone(), store, ClientConfig::default()).start(CancellationToken::new());

        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(connector.attempts(), 3);
        assert_eq!(running.state(), ConnectionState::Disconnected);

        connected(&running).await;
        assert_eq!(connector.attempts(), 5);
        running.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_waits_for_in_flight_dispatch() {
        let connector = MockConnector::new();
        let store = Arc::new(SlowStore::new(Duration::from_secs(2)));
        let running =
            EslClient::new(connector.clone(), Arc::clone(&store), ClientConfig::default()).start(CancellationToken::new());
        connected(&running).await;

        let session = connector.session(0).unwrap();
        for uuid in ["a", "b", "c"] {
            session.push(event("CHANNEL_CREATE", uuid, "1000000"));
        }
        eventually(|| store.running() == 3).await;

        let report = running.close().await;
        assert!(report.drained);
        assert_eq!(store.stored(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_gives_up_after_grace() {
        let connector = MockConnector::new();
        let store = Arc::new(SlowStore::new(Duration::from_secs(600)));
        let config = ClientConfig {
            shutdown_grace: Duration::from_secs(1),
            ..Default::default()
        };
        let running = EslClient::new(connector.clone(), Arc::clone(&store), config).start(CancellationToken::new());
        connected(&running).await;

        connector
            .session(0)
            .unwrap()
            .push(event("CHANNEL_CREATE", "slow", "1000000"));
        eventually(|| store.running() == 1).await;

        let report = running.close().await;
        assert!(!report.drained);
        assert_eq!(store.stored(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_token_stops_client() {
        let connector = MockConnector::new();
        let parent = CancellationToken::new();
        let running = EslClient::new(connector.clone(), Arc::new(MemoryCallStore::new()), ClientConfig::default())
            .start(parent.clone());
        connected(&running).await;

        parent.cancel();
        let mut states = running.states();
        tokio::time::timeout(
            Duration::from_secs(5),
            states.wait_for(|s| *s == ConnectionState::Disconnected),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(connector.session(0).unwrap().is_closed());
        running.close().await;
    }
}
