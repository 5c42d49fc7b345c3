//! Event Loop - pulls events off the live session and fans them out.
//!
//! One task for the lifetime of the cancellation token. It never owns the
//! session: each read works on a snapshot taken from the manager's watch
//! channel, so a replaced handle is picked up on the next iteration.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::client::connection::EventHandle;
use crate::client::dispatch::Dispatcher;
use crate::client::reconnect::Session;
use crate::client::signal::{ReconnectSignal, SignalSource};
use crate::store::CallStore;

/// Configuration for the event loop.
#[derive(Debug, Clone)]
pub struct EventLoopConfig {
    /// Pause after a failed read before trying again
    pub read_failure_pause: Duration,
    /// Upper bound on waiting for a session before re-checking
    pub idle_poll: Duration,
    /// Dispatches allowed to run at once; intake waits beyond this
    pub max_in_flight: usize,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self {
            read_failure_pause: Duration::from_secs(1),
            idle_poll: Duration::from_secs(5),
            max_in_flight: 256,
        }
    }
}

/// Counters returned when the loop stops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventLoopStats {
    pub events: u64,
    pub read_failures: u64,
}

pub struct EventLoop<H: EventHandle, S: CallStore + ?Sized> {
    sessions: watch::Receiver<Option<Session<H>>>,
    signal: ReconnectSignal,
    dispatcher: Dispatcher<S>,
    config: EventLoopConfig,
    tracker: TaskTracker,
    permits: Arc<Semaphore>,
}

impl<H: EventHandle, S: CallStore + ?Sized> EventLoop<H, S> {
    pub fn new(
        sessions: watch::Receiver<Option<Session<H>>>,
        signal: ReconnectSignal,
        dispatcher: Dispatcher<S>,
        config: EventLoopConfig,
        tracker: TaskTracker,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
        Self {
            sessions,
            signal,
            dispatcher,
            config,
            tracker,
            permits,
        }
    }

    /// Read and dispatch until cancelled.
    pub async fn run(mut self, token: CancellationToken) -> EventLoopStats {
        let mut stats = EventLoopStats::default();
        tracing::info!(max_in_flight = self.config.max_in_flight, "Event loop started");

        while !token.is_cancelled() {
            let current = self.sessions.borrow_and_update().clone();
            let Some(session) = current else {
                if !self.wait_for_session(&token).await {
                    break;
                }
                continue;
            };

            let read = tokio::select! {
                _ = token.cancelled() => break,
                read = session.handle.read_message() => read,
            };

            let event = match read {
                Ok(event) => event,
                Err(e) => {
                    stats.read_failures += 1;
                    tracing::warn!(generation = session.generation, error = %e, "Event read failed");
                    self.signal.raise(SignalSource::ReadFailure {
                        generation: session.generation,
                    });
                    drop(session);
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(self.config.read_failure_pause) => {}
                    }
                    continue;
                }
            };
            stats.events += 1;

            let permit = tokio::select! {
                _ = token.cancelled() => break,
                permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let dispatcher = self.dispatcher.clone();
            self.tracker.spawn(async move {
                let outcome = dispatcher.dispatch(&event).await;
                tracing::trace!(outcome = ?outcome, "Event dispatched");
                drop(permit);
            });
        }

        tracing::info!(events = stats.events, read_failures = stats.read_failures, "Event loop stopped");
        stats
    }

    /// Wait for the manager to publish a session, at most `idle_poll`.
    /// False when the loop should stop.
    async fn wait_for_session(&mut self, token: &CancellationToken) -> bool {
        tokio::select! {
            _ = token.cancelled() => false,
            changed = tokio::time::timeout(self.config.idle_poll, self.sessions.changed()) => match changed {
                Ok(Err(_)) => {
                    tracing::debug!("Session publisher gone, stopping event loop");
                    false
                }
                _ => true,
            },
        }
    }
}
