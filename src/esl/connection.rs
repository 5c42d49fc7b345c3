//! TCP event-socket connection.
//!
//! Provides the concrete `Connector` for FreeSWITCH's inbound event socket:
//! - Address parsing and connect with timeout
//! - Shared-secret authentication handshake
//! - Background reader task that splits command replies from events
//! - Command/reply round-trips for subscription

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::client::connection::{Connector, EventHandle, EventSubscription};
use crate::error::ConnectionError;
use crate::esl::codec::EslCodec;
use crate::esl::message::{EslMessage, content_type};

/// Configuration for the event-socket connector.
#[derive(Debug, Clone)]
pub struct EslConnectorConfig {
    /// Remote address as `host:port`.
    pub addr: String,
    /// Shared secret sent with `auth`.
    pub password: String,
    /// Dial plus authentication deadline.
    pub connect_timeout: Duration,
    /// How long to wait for a command reply.
    pub command_timeout: Duration,
    /// Events buffered between the reader task and the event loop.
    pub event_buffer: usize,
}

impl Default for EslConnectorConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8021".to_string(),
            password: "ClueCon".to_string(),
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(5),
            event_buffer: 1024,
        }
    }
}

impl EslConnectorConfig {
    /// Create config for an address and secret.
    pub fn new(addr: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            password: password.into(),
            ..Default::default()
        }
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Split `host:port`, accepting bracketed IPv6 hosts.
pub fn parse_addr(addr: &str) -> Result<(String, u16), ConnectionError> {
    let invalid = |reason: &str| ConnectionError::InvalidAddress {
        addr: addr.to_string(),
        reason: reason.to_string(),
    };

    let (host, port) = addr.rsplit_once(':').ok_or_else(|| invalid("expected host:port"))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(invalid("empty host"));
    }
    let port = port.parse::<u16>().map_err(|_| invalid("port is not a number in 0-65535"))?;
    Ok((host.to_string(), port))
}

/// Opens authenticated sessions to one event socket.
#[derive(Debug, Clone)]
pub struct EslConnector {
    config: EslConnectorConfig,
}

impl EslConnector {
    pub fn new(config: EslConnectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EslConnectorConfig {
        &self.config
    }

    async fn dial_and_auth(&self) -> Result<EslHandle, ConnectionError> {
        let (host, port) = parse_addr(&self.config.addr)?;
        let stream = TcpStream::connect((host.as_str(), port)).await?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        let mut reader = FramedRead::new(read_half, EslCodec::new());
        let mut writer = FramedWrite::new(write_half, EslCodec::new());

        let greeting = next_frame(&mut reader).await?;
        if greeting.content_type() != Some(content_type::AUTH_REQUEST) {
            return Err(ConnectionError::Protocol(format!(
                "Expected auth/request, got {:?}",
                greeting.content_type()
            )));
        }

        writer.send(format!("auth {}", self.config.password)).await?;

        let reply = next_frame(&mut reader).await?;
        if !reply.is_ok_reply() {
            return Err(ConnectionError::AuthRejected(reply.reply_text().to_string()));
        }

        Ok(EslHandle::spawn(reader, writer, &self.config))
    }
}

async fn next_frame(reader: &mut FramedRead<OwnedReadHalf, EslCodec>) -> Result<EslMessage, ConnectionError> {
    match reader.next().await {
        Some(Ok(frame)) => Ok(frame),
        Some(Err(e)) => Err(ConnectionError::Io(e)),
        None => Err(ConnectionError::Closed),
    }
}

#[async_trait]
impl Connector for EslConnector {
    type Handle = EslHandle;

    async fn open(&self) -> Result<EslHandle, ConnectionError> {
        match tokio::time::timeout(self.config.connect_timeout, self.dial_and_auth()).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Timeout(format!(
                "connecting to {} took longer than {:?}",
                self.config.addr, self.config.connect_timeout
            ))),
        }
    }

    fn remote(&self) -> &str {
        &self.config.addr
    }
}

/// A live, authenticated event-socket session.
pub struct EslHandle {
    writer: Mutex<FramedWrite<OwnedWriteHalf, EslCodec>>,
    replies: Mutex<mpsc::Receiver<EslMessage>>,
    events: Mutex<mpsc::Receiver<EslMessage>>,
    reader_task: JoinHandle<()>,
    closed: AtomicBool,
    command_timeout: Duration,
}

impl std::fmt::Debug for EslHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EslHandle")
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl EslHandle {
    fn spawn(
        reader: FramedRead<OwnedReadHalf, EslCodec>,
        writer: FramedWrite<OwnedWriteHalf, EslCodec>,
        config: &EslConnectorConfig,
    ) -> Self {
        let (reply_tx, reply_rx) = mpsc::channel(8);
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer.max(1));
        let reader_task = tokio::spawn(read_frames(reader, reply_tx, event_tx));

        Self {
            writer: Mutex::new(writer),
            replies: Mutex::new(reply_rx),
            events: Mutex::new(event_rx),
            reader_task,
            closed: AtomicBool::new(false),
            command_timeout: config.command_timeout,
        }
    }

    /// Whether `close` has been called or the reader has stopped.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.reader_task.is_finished()
    }

    /// Events decoded by the reader and not yet handed out. A read in
    /// progress holds the queue, so that counts as pending too.
    fn has_pending_events(&self) -> bool {
        match self.events.try_lock() {
            Ok(events) => !events.is_empty(),
            Err(_) => true,
        }
    }

    /// Send a command and wait for its reply.
    pub async fn command(&self, command: &str) -> Result<EslMessage, ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }

        // Hold the reply receiver for the whole round-trip so replies pair with commands
        let mut replies = self.replies.lock().await;
        while let Ok(stale) = replies.try_recv() {
            tracing::debug!(reply = stale.reply_text(), "Discarding reply to an abandoned command");
        }
        {
            let mut writer = self.writer.lock().await;
            writer.send(command.to_string()).await?;
        }

        match tokio::time::timeout(self.command_timeout, replies.recv()).await {
            Ok(Some(reply)) if reply.is_ok_reply() => Ok(reply),
            Ok(Some(reply)) => Err(ConnectionError::CommandRejected(reply.reply_text().to_string())),
            Ok(None) => Err(ConnectionError::Closed),
            Err(_) => Err(ConnectionError::Timeout(format!("no reply to '{}'", command))),
        }
    }
}

#[async_trait]
impl EventHandle for EslHandle {
    async fn subscribe(&self, subscription: &EventSubscription) -> Result<(), ConnectionError> {
        self.command(&subscription.command()).await.map(|_| ())
    }

    async fn read_message(&self) -> Result<EslMessage, ConnectionError> {
        let mut events = self.events.lock().await;
        // Once closed, hand out what was already received but never wait
        if self.closed.load(Ordering::SeqCst) {
            return events.try_recv().map_err(|_| ConnectionError::Closed);
        }
        events.recv().await.ok_or(ConnectionError::Closed)
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut writer = self.writer.lock().await;
            let _ = writer.send("exit".to_string()).await;
            let _ = writer.get_mut().shutdown().await;
        }
        self.reader_task.abort();
    }

    fn is_open(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        !self.reader_task.is_finished() || self.has_pending_events()
    }
}

impl Drop for EslHandle {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

/// Background reader: routes replies and events until the socket ends.
async fn read_frames(
    mut reader: FramedRead<OwnedReadHalf, EslCodec>,
    reply_tx: mpsc::Sender<EslMessage>,
    event_tx: mpsc::Sender<EslMessage>,
) {
    while let Some(frame) = reader.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "Event socket read failed, stopping reader");
                break;
            }
        };

        match frame.content_type() {
            Some(content_type::COMMAND_REPLY) | Some(content_type::API_RESPONSE) => {
                if reply_tx.send(frame).await.is_err() {
                    break;
                }
            }
            Some(content_type::EVENT_JSON) | Some(content_type::EVENT_PLAIN) => match frame.into_event() {
                Ok(event) => {
                    if event_tx.send(event).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping undecodable event");
                }
            },
            Some(content_type::DISCONNECT_NOTICE) => {
                tracing::info!("Event socket sent disconnect notice");
                break;
            }
            other => {
                tracing::debug!(content_type = ?other, "Ignoring unsolicited frame");
            }
        }
    }
}
