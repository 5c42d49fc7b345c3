//! Reconnection Manager - owns the live session and every transition of it.
//!
//! The manager is one task. It wakes on:
//! - a reconnect signal (startup, read failure, delayed retry)
//! - the liveness tick, which requests a reconnect when no live session is
//!   published
//! - the retry timer armed after a failed attempt
//!
//! Attempts run inline in that task, so two can never overlap; signals that
//! arrive meanwhile wait in the single slot and are looked at afterwards.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::client::connection::{Connector, EventHandle, EventSubscription};
use crate::client::signal::{ReconnectReceiver, ReconnectSignal, SignalSource, reconnect_signal};
use crate::error::ConnectionError;

/// Lifecycle of the connection as seen by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// A published handle tagged with the attempt that produced it.
pub struct Session<H> {
    pub generation: u64,
    pub handle: Arc<H>,
}

impl<H> Clone for Session<H> {
    fn clone(&self) -> Self {
        Self {
            generation: self.generation,
            handle: Arc::clone(&self.handle),
        }
    }
}

impl<H> fmt::Debug for Session<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("generation", &self.generation).finish()
    }
}

/// Timing for the reconnection manager.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Wait after a failed attempt before signalling again
    pub retry_delay: Duration,
    /// How often to check that a session exists
    pub liveness_interval: Duration,
    /// Subscription sent on every new session
    pub subscription: EventSubscription,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(5),
            liveness_interval: Duration::from_secs(15),
            subscription: EventSubscription::all_json(),
        }
    }
}

impl ReconnectConfig {
    pub fn new(retry_delay: Duration, liveness_interval: Duration) -> Self {
        Self {
            retry_delay,
            liveness_interval,
            ..Default::default()
        }
    }
}

/// Counters kept across the manager's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconnectStats {
    pub attempts: u64,
    pub failures: u64,
    pub stale_signals: u64,
}

/// Owns the connector and the session it produced.
pub struct ReconnectManager<C: Connector> {
    connector: C,
    config: ReconnectConfig,
    signal: ReconnectSignal,
    signals: ReconnectReceiver,
    session_tx: watch::Sender<Option<Session<C::Handle>>>,
    state_tx: watch::Sender<ConnectionState>,
    generation: u64,
    retry_at: Option<Instant>,
    stats: ReconnectStats,
}

impl<C: Connector> ReconnectManager<C> {
    pub fn new(connector: C, config: ReconnectConfig) -> Self {
        let (signal, signals) = reconnect_signal();
        let (session_tx, _) = watch::channel(None);
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector,
            config,
            signal,
            signals,
            session_tx,
            state_tx,
            generation: 0,
            retry_at: None,
            stats: ReconnectStats::default(),
        }
    }

    /// Sender for reconnect requests.
    pub fn signal(&self) -> ReconnectSignal {
        self.signal.clone()
    }

    /// Current session; changes whenever a handle is published or withdrawn.
    pub fn sessions(&self) -> watch::Receiver<Option<Session<C::Handle>>> {
        self.session_tx.subscribe()
    }

    pub fn states(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Drive the state machine until cancelled. The first connection attempt
    /// is made right away.
    pub async fn run(mut self, token: CancellationToken) -> ReconnectStats {
        tracing::info!(remote = self.connector.remote(), "Reconnection manager started");
        self.signal.raise(SignalSource::Startup);

        let mut liveness = tokio::time::interval_at(
            Instant::now() + self.config.liveness_interval,
            self.config.liveness_interval,
        );
        liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let retry_at = self.retry_at;
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                Some(source) = self.signals.recv() => self.on_signal(source, &token).await,
                _ = liveness.tick() => self.on_liveness(),
                _ = sleep_until_some(retry_at) => {
                    self.retry_at = None;
                    self.signal.raise(SignalSource::RetryAfterFailure);
                }
            }
        }

        self.release_stale().await;
        tracing::info!(
            attempts = self.stats.attempts,
            failures = self.stats.failures,
            "Reconnection manager stopped"
        );
        self.stats
    }

    fn current_generation(&self) -> Option<u64> {
        self.session_tx.borrow().as_ref().map(|s| s.generation)
    }

    async fn on_signal(&mut self, source: SignalSource, token: &CancellationToken) {
        let current = self.current_generation();
        match source {
            SignalSource::ReadFailure { generation } if current != Some(generation) => {
                self.stats.stale_signals += 1;
                tracing::debug!(
                    source = %source,
                    current = ?current,
                    "Ignoring read failure for a session that is already gone"
                );
                return;
            }
            SignalSource::ReadFailure { .. } => {}
            _ if self.has_live_session() => {
                tracing::debug!(source = %source, "Already connected, dropping reconnect request");
                return;
            }
            _ => {}
        }

        tracing::info!(source = %source, "Reconnect requested");
        self.reconnect(token).await;
    }

    /// Whether a published session is still usable.
    fn has_live_session(&self) -> bool {
        self.session_tx.borrow().as_ref().is_some_and(|s| s.handle.is_open())
    }

    /// Request a reconnect when no usable session is published.
    fn on_liveness(&self) {
        if self.has_live_session() {
            return;
        }
        tracing::info!("Liveness check found no live session");
        self.signal.raise(SignalSource::Liveness);
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            tracing::debug!(from = %current, to = %state, "Connection state changed");
            *current = state;
            true
        });
    }

    /// Withdraw and close the published session, if any.
    async fn release_stale(&mut self) {
        let stale = self.session_tx.send_replace(None);
        self.set_state(ConnectionState::Disconnected);
        if let Some(session) = stale {
            tracing::debug!(generation = session.generation, "Closing stale session");
            session.handle.close().await;
        }
    }

    async fn reconnect(&mut self, token: &CancellationToken) {
        self.release_stale().await;
        self.retry_at = None;
        self.set_state(ConnectionState::Connecting);
        self.stats.attempts += 1;

        let result = tokio::select! {
            _ = token.cancelled() => {
                self.set_state(ConnectionState::Disconnected);
                return;
            }
            result = self.attempt() => result,
        };

        match result {
            Ok(handle) => {
                self.generation += 1;
                self.session_tx.send_replace(Some(Session {
                    generation: self.generation,
                    handle: Arc::new(handle),
                }));
                self.set_state(ConnectionState::Connected);
                tracing::info!(
                    remote = self.connector.remote(),
                    generation = self.generation,
                    "Connected and subscribed"
                );
            }
            Err(e) => {
                self.stats.failures += 1;
                self.set_state(ConnectionState::Disconnected);
                self.retry_at = Some(Instant::now() + self.config.retry_delay);
                tracing::warn!(
                    remote = self.connector.remote(),
                    error = %e,
                    retry_in = ?self.config.retry_delay,
                    "Connection attempt failed"
                );
            }
        }
    }

    /// One open plus subscribe. A handle whose subscription fails is closed.
    async fn attempt(&self) -> Result<C::Handle, ConnectionError> {
        let handle = self.connector.open().await?;
        if let Err(e) = handle.subscribe(&self.config.subscription).await {
            handle.close().await;
            return Err(e);
        }
        Ok(handle)
    }
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
