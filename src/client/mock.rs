//! Test doubles for the client: a scripted connector, a slow store and a
//! log capture.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::{Layer, Registry};

use crate::client::connection::{Connector, EventHandle, EventSubscription};
use crate::error::{ConnectionError, StoreError};
use crate::esl::EslMessage;
use crate::store::{CallRecord, CallStore, MemoryCallStore, NewCall};

/// Scripted result of one `open()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    Succeed,
    FailOpen,
    FailSubscribe,
}

#[derive(Default)]
struct ConnectorState {
    script: Mutex<VecDeque<Attempt>>,
    sessions: Mutex<Vec<Arc<SessionState>>>,
    attempts: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Connector that follows a script; attempts past the end succeed.
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<ConnectorState>,
    open_delay: Duration,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(self, attempts: impl IntoIterator<Item = Attempt>) -> Self {
        if let Ok(mut script) = self.state.script.lock() {
            script.extend(attempts);
        }
        self
    }

    /// How long each `open()` takes.
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    pub fn attempts(&self) -> usize {
        self.state.attempts.load(Ordering::SeqCst)
    }

    /// Most `open()` calls ever running at once.
    pub fn max_concurrent_attempts(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    /// Every handle handed out, oldest first.
    pub fn sessions(&self) -> Vec<MockSession> {
        self.state
            .sessions
            .lock()
            .map(|s| s.iter().cloned().map(|state| MockSession { state }).collect())
            .unwrap_or_default()
    }

    pub fn session(&self, index: usize) -> Option<MockSession> {
        self.sessions().into_iter().nth(index)
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Handle = MockHandle;

    async fn open(&self) -> Result<MockHandle, ConnectionError> {
        self.state.attempts.fetch_add(1, Ordering::SeqCst);
        let now = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.open_delay.is_zero() {
            tokio::time::sleep(self.open_delay).await;
        }

        let attempt = self
            .state
            .script
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .unwrap_or(Attempt::Succeed);
        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);

        if attempt == Attempt::FailOpen {
            return Err(ConnectionError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "scripted refusal",
            )));
        }

        let state = Arc::new(SessionState::new(attempt != Attempt::FailSubscribe));
        if let Ok(mut sessions) = self.state.sessions.lock() {
            sessions.push(Arc::clone(&state));
        }
        Ok(MockHandle { state })
    }

    fn remote(&self) -> &str {
        "mock:8021"
    }
}

struct SessionState {
    tx: mpsc::UnboundedSender<Result<EslMessage, ConnectionError>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<EslMessage, ConnectionError>>>,
    closed: CancellationToken,
    subscribe_ok: bool,
    subscribed: AtomicBool,
    reads: AtomicUsize,
}

impl SessionState {
    fn new(subscribe_ok: bool) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            closed: CancellationToken::new(),
            subscribe_ok,
            subscribed: AtomicBool::new(false),
            reads: AtomicUsize::new(0),
        }
    }
}

/// Test-side view of a handle the connector gave out.
#[derive(Clone)]
pub struct MockSession {
    state: Arc<SessionState>,
}

impl MockSession {
    /// Queue an event for `read_message`.
    pub fn push(&self, event: EslMessage) {
        let _ = self.state.tx.send(Ok(event));
    }

    /// Make the next read fail.
    pub fn fail_read(&self) {
        let _ = self.state.tx.send(Err(ConnectionError::Closed));
    }

    /// Kill the session from the far side without telling anyone.
    pub fn sever(&self) {
        self.state.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.is_cancelled()
    }

    pub fn is_subscribed(&self) -> bool {
        self.state.subscribed.load(Ordering::SeqCst)
    }

    /// Completed `read_message` calls.
    pub fn reads(&self) -> usize {
        self.state.reads.load(Ordering::SeqCst)
    }
}

pub struct MockHandle {
    state: Arc<SessionState>,
}

#[async_trait]
impl EventHandle for MockHandle {
    async fn subscribe(&self, subscription: &EventSubscription) -> Result<(), ConnectionError> {
        if !self.state.subscribe_ok {
            return Err(ConnectionError::CommandRejected(format!("-ERR {}", subscription.command())));
        }
        self.state.subscribed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn read_message(&self) -> Result<EslMessage, ConnectionError> {
        if self.state.closed.is_cancelled() {
            return Err(ConnectionError::Closed);
        }
        let mut rx = self.state.rx.lock().await;
        let result = tokio::select! {
            _ = self.state.closed.cancelled() => Err(ConnectionError::Closed),
            next = rx.recv() => next.unwrap_or(Err(ConnectionError::Closed)),
        };
        self.state.reads.fetch_add(1, Ordering::SeqCst);
        result
    }

    async fn close(&self) {
        self.state.closed.cancel();
    }

    fn is_open(&self) -> bool {
        !self.state.closed.is_cancelled()
    }
}

/// Store whose inserts take `delay`, tracking how many run at once.
pub struct SlowStore {
    inner: MemoryCallStore,
    delay: Duration,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl SlowStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MemoryCallStore::new(),
            delay,
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Inserts currently sleeping.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Calls actually written.
    pub fn stored(&self) -> usize {
        self.inner.len()
    }
}

#[async_trait]
impl CallStore for SlowStore {
    async fn create_call(&self, call: &NewCall) -> Result<i64, StoreError> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.inner.create_call(call).await
    }

    async fn update_call_end(&self, uuid: &str, end_time: DateTime<Utc>, status: &str) -> Result<u64, StoreError> {
        self.inner.update_call_end(uuid, end_time, status).await
    }

    async fn list_calls(&self, limit: u32, offset: u32) -> Result<Vec<CallRecord>, StoreError> {
        self.inner.list_calls(limit, offset).await
    }

    async fn get_call(&self, uuid: &str) -> Result<Option<CallRecord>, StoreError> {
        self.inner.get_call(uuid).await
    }
}

/// Records the level of every tracing event emitted on this thread while the
/// guard from `install` is alive.
#[derive(Clone, Default)]
pub struct LogCapture {
    levels: Arc<Mutex<Vec<Level>>>,
}

impl LogCapture {
    pub fn install() -> (Self, DefaultGuard) {
        let capture = Self::default();
        let subscriber = Registry::default().with(capture.clone());
        let guard = tracing::subscriber::set_default(subscriber);
        (capture, guard)
    }

    /// Events at exactly `level`.
    pub fn count(&self, level: Level) -> usize {
        self.levels
            .lock()
            .map(|l| l.iter().filter(|&&seen| seen == level).count())
            .unwrap_or(0)
    }

    /// Events at WARN or ERROR.
    pub fn warnings_or_worse(&self) -> usize {
        self.count(Level::WARN) + self.count(Level::ERROR)
    }

    pub fn clear(&self) {
        if let Ok(mut levels) = self.levels.lock() {
            levels.clear();
        }
    }
}

impl<S: tracing::Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        if let Ok(mut levels) = self.levels.lock() {
            levels.push(*event.metadata().level());
        }
    }
}
