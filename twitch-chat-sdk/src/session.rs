//! Chat session: handshake, receive loop, liveness probe.
//!
//! A session runs three tasks:
//!
//! - the **writer**, which owns the transport sink and writes queued commands;
//! - the **receive loop**, which reads lines, answers server `PING`s inline,
//!   records `PONG`s, and queues decoded events;
//! - the **dispatcher** (see [`crate::handler`]), which runs the handlers.
//!
//! Only `connect*` and [`Session::ping`] wait on the server. Everything else
//! queues a command for the writer and returns.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::channel::Channel;
use crate::config::{ConnectConfig, Credentials};
use crate::error::{Error, Result};
use crate::event::{normalize_channel, Event};
use crate::handler::{spawn_dispatcher, Handlers};
use crate::irc::{Command, Line};
use crate::transport::{LineSink, LineStream, Transport};

/// How long the writer waits for the transport to close cleanly.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Prefix of the token carried by our `PING`s and echoed in `PONG`s.
const PING_TOKEN_PREFIX: &str = "twitch-chat-sdk-";

/// State shared by the session, its channel handles and its tasks.
#[derive(Default)]
struct Shared {
    /// Set by `Session::disconnect`.
    disconnected: AtomicBool,
    /// Stops the writer and the receive loop.
    shutdown: CancellationToken,
    /// Cancelled by the receive loop once the writer has finished.
    closed: CancellationToken,
    /// Sequence number of the last `PING` sent.
    ping_seq: AtomicU64,
}

impl Shared {
    /// Error for an operation on a session that can no longer send.
    fn unusable(&self) -> Option<Error> {
        if self.disconnected.load(Ordering::Acquire) {
            Some(Error::Disconnected)
        } else if self.shutdown.is_cancelled() {
            Some(Error::Closed)
        } else {
            None
        }
    }
}

/// Send side of a session, shared with its channel handles.
#[derive(Clone)]
pub(crate) struct Outbound {
    tx: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
}

impl Outbound {
    /// Fail if the session was disconnected or the connection is gone.
    pub(crate) fn check(&self) -> Result<()> {
        match self.shared.unusable() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Queue a command for the writer.
    pub(crate) fn send(&self, command: Command) -> Result<()> {
        self.check()?;
        self.tx.send(command).map_err(|_| Error::Closed)
    }
}

/// A connection to the chat server.
///
/// Dropping the session disconnects it.
pub struct Session {
    username: String,
    guest: bool,
    outbound: Outbound,
    /// Highest acknowledged `PING` sequence number.
    pong: watch::Receiver<u64>,
}

impl Session {
    /// Log in as `username` with an OAuth token (with or without the
    /// `oauth:` prefix) using the default configuration.
    pub async fn connect(username: &str, oauth_token: &str, handlers: Handlers) -> Result<Self> {
        Self::connect_with_config(
            Credentials::oauth(username, oauth_token),
            handlers,
            ConnectConfig::default(),
        )
        .await
    }

    /// Connect anonymously. Guest sessions can join channels and receive
    /// events, but [`Channel::send`] drops messages locally.
    pub async fn connect_as_guest(handlers: Handlers) -> Result<Self> {
        Self::connect_with_config(Credentials::guest(), handlers, ConnectConfig::default()).await
    }

    /// Open `config.url` and connect.
    pub async fn connect_with_config(
        credentials: Credentials,
        handlers: Handlers,
        config: ConnectConfig,
    ) -> Result<Self> {
        let transport = Transport::open(&config.url).await?;
        Self::connect_with_transport(transport, credentials, handlers, config).await
    }

    /// Connect over an already-open transport.
    ///
    /// Sends the handshake and waits until the server sends its first line.
    pub async fn connect_with_transport(
        transport: Transport,
        credentials: Credentials,
        handlers: Handlers,
        config: ConnectConfig,
    ) -> Result<Self> {
        let Transport { lines, sink } = transport;
        let shared = Arc::new(Shared::default());

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(config.event_queue_capacity.max(1));
        let (established_tx, established_rx) = oneshot::channel();
        let (pong_tx, pong_rx) = watch::channel(0u64);

        let outbound = Outbound {
            tx: cmd_tx,
            shared: shared.clone(),
        };

        spawn_dispatcher(handlers.clone(), event_rx, config.max_concurrent_handlers);
        let writer = tokio::spawn(write_loop(sink, cmd_rx, shared.shutdown.clone()));
        tokio::spawn(
            ReceiveLoop {
                lines,
                writer,
                outbound: outbound.clone(),
                handlers,
                events: event_tx,
                established: Some(established_tx),
                pong: pong_tx,
                shared,
            }
            .run(),
        );

        let session = Session {
            username: credentials.username().to_string(),
            guest: credentials.is_guest(),
            outbound,
            pong: pong_rx,
        };

        if !config.capabilities.is_empty() {
            session.outbound.send(Command::CapReq(config.capabilities.clone()))?;
        }
        session.outbound.send(Command::Pass(credentials.password().to_string()))?;
        session.outbound.send(Command::Nick(session.username.clone()))?;
        session.outbound.send(Command::User(session.username.clone()))?;

        let established = match config.handshake_timeout {
            Some(limit) => tokio::time::timeout(limit, established_rx)
                .await
                .map_err(|_| Error::HandshakeTimeout)?,
            None => established_rx.await,
        };
        established.map_err(|_| Error::HandshakeFailed)?;

        tracing::info!(username = %session.username, guest = session.guest, "Connected");
        Ok(session)
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn is_guest(&self) -> bool {
        self.guest
    }

    /// Join `channel` (with or without the leading `#`, any case).
    ///
    /// Returns as soon as the `JOIN` is queued; the server confirms
    /// membership asynchronously.
    pub fn join(&self, channel: &str) -> Result<Channel> {
        let name = normalize_channel(channel);
        if name.is_empty() || name.contains(|c: char| c.is_whitespace() || c == ',') {
            return Err(Error::InvalidChannel(channel.to_string()));
        }
        self.outbound.send(Command::Join(name.clone()))?;
        tracing::debug!(channel = %name, "Joining");
        Ok(Channel::new(name, self.outbound.clone(), self.guest))
    }

    /// Send a `PING` and wait for the server's `PONG`.
    ///
    /// Returns `Ok(false)` if `timeout` elapses first. With no timeout, waits
    /// until a `PONG` arrives or the connection ends.
    ///
    /// Each `PING` carries a sequence token the server echoes back, so a late
    /// `PONG` for an earlier, timed-out ping does not answer this one. A
    /// `PONG` answers its own ping and every earlier one. A `PONG` without
    /// a recognizable token answers every ping sent so far.
    pub async fn ping(&self, timeout: Option<Duration>) -> Result<bool> {
        let mut pong = self.pong.clone();
        let seq = self.outbound.shared.ping_seq.fetch_add(1, Ordering::AcqRel) + 1;
        self.outbound.send(Command::Ping(format!("{PING_TOKEN_PREFIX}{seq}")))?;

        let wait = pong.wait_for(|acked| *acked >= seq);
        let received = match timeout {
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(received) => received,
                Err(_) => return Ok(false),
            },
            None => wait.await,
        };
        received
            .map(|_| true)
            .map_err(|_| self.outbound.shared.unusable().unwrap_or(Error::Closed))
    }

    /// Close the connection. Every later operation on this session or its
    /// channels fails with [`Error::Disconnected`].
    pub fn disconnect(&self) -> Result<()> {
        let shared = &self.outbound.shared;
        if shared.disconnected.swap(true, Ordering::AcqRel) {
            return Err(Error::Disconnected);
        }
        tracing::info!(username = %self.username, "Disconnecting");
        shared.shutdown.cancel();
        Ok(())
    }

    /// Whether the receive loop has exited, after [`Session::disconnect`] or
    /// because the server closed the connection.
    pub fn is_closed(&self) -> bool {
        self.outbound.shared.closed.is_cancelled()
    }

    /// Wait until the receive loop has exited.
    pub async fn closed(&self) {
        self.outbound.shared.closed.cancelled().await
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.outbound.shared.shutdown.cancel();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("username", &self.username)
            .field("guest", &self.guest)
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn write_loop(
    mut sink: LineSink,
    mut commands: mpsc::UnboundedReceiver<Command>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            // Drain queued commands (e.g. a PART) before honoring shutdown.
            biased;
            command = commands.recv() => {
                let Some(command) = command else { break };
                tracing::trace!("-> {command:?}");
                if let Err(e) = sink.send(command.to_string()).await {
                    tracing::warn!("Write error: {e}");
                    break;
                }
            }
            _ = shutdown.cancelled() => break,
        }
    }

    // A dead writer means a dead connection.
    shutdown.cancel();
    match tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!("Close error: {e}"),
        Err(_) => tracing::debug!("Transport did not close in time"),
    }
}

struct ReceiveLoop {
    lines: LineStream,
    writer: JoinHandle<()>,
    outbound: Outbound,
    handlers: Handlers,
    events: mpsc::Sender<Event>,
    /// Fired by the first inbound line.
    established: Option<oneshot::Sender<()>>,
    /// Bumped on every `PONG`.
    pong: watch::Sender<u64>,
    shared: Arc<Shared>,
}

impl ReceiveLoop {
    async fn run(mut self) {
        loop {
            let next = tokio::select! {
                _ = self.shared.shutdown.cancelled() => break,
                next = self.lines.next() => next,
            };
            let line = match next {
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    tracing::warn!("Read error: {e}");
                    break;
                }
                None => {
                    tracing::debug!("Server closed the connection");
                    break;
                }
            };

            if let Some(established) = self.established.take() {
                let _ = established.send(());
            }
            tracing::trace!("<- {line}");
            self.handle_line(&line).await;
        }

        let ReceiveLoop {
            writer,
            pong,
            events,
            established,
            shared,
            ..
        } = self;
        shared.shutdown.cancel();
        drop((pong, events, established));
        // Queued lines (e.g. a final PART) are flushed before we report closed.
        if let Err(e) = writer.await {
            tracing::warn!("Writer task failed: {e}");
        }
        shared.closed.cancel();
        tracing::info!("Connection closed");
    }

    async fn handle_line(&mut self, raw: &str) {
        let Some(line) = Line::parse(raw) else {
            return;
        };

        match line.command {
            "PING" => {
                let token = line.params.first().copied().unwrap_or_default();
                if let Err(e) = self.outbound.send(Command::Pong(token.to_string())) {
                    tracing::debug!("Could not answer PING: {e}");
                }
            }
            "PONG" => {
                let acked = line
                    .params
                    .last()
                    .and_then(|token| token.strip_prefix(PING_TOKEN_PREFIX))
                    .and_then(|seq| seq.parse::<u64>().ok())
                    .unwrap_or_else(|| self.shared.ping_seq.load(Ordering::Acquire));
                self.pong.send_if_modified(|current| {
                    let newer = acked > *current;
                    if newer {
                        *current = acked;
                    }
                    newer
                });
            }
            command => {
                let Some(event) = Event::decode(&line) else {
                    tracing::trace!(command, "Ignoring line");
                    return;
                };
                if !self.handlers.accepts(&event) {
                    return;
                }
                tokio::select! {
                    _ = self.events.send(event) => {}
                    _ = self.shared.shutdown.cancelled() => {}
                }
            }
        }
    }
}
