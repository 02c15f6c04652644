#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt as _, StreamExt as _};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Sleep, sleep, timeout};
use tokio_tungstenite::tungstenite::{self, Message};

use super::config::ClientConfig;
use super::error::WsError;
use super::keepalive::{Keepalive, Heartbeat};
use super::reconnect::ReconnectScheduler;
use super::transport::{self, HttpProxy, WsStream};
use crate::Result;
use crate::endpoint::correlator::Correlator;
use crate::endpoint::normalize::normalize;
use crate::endpoint::types::response::{parse_inbound, protocol_error};
use crate::error::Error;

/// Broadcast channel capacity for client events.
const BROADCAST_CAPACITY: usize = 1024;

/// Close code reported when the transport ended without a close handshake.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Close code reported when the close frame carried no status.
pub const NO_STATUS_RECEIVED: u16 = 1005;

/// Connection state tracking.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport and no attempt in flight
    #[default]
    Disconnected,
    /// TCP, TLS or WebSocket handshake in progress
    Connecting,
    /// Transport is open; messages are written only in this state
    Open,
    /// Caller-initiated close is waiting for the server's close frame
    Closing,
}

impl ConnectionState {
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }
}

/// Close code and reason of a finished transport.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}

impl CloseInfo {
    #[must_use]
    pub fn abnormal() -> Self {
        Self {
            code: ABNORMAL_CLOSURE,
            reason: String::new(),
        }
    }
}

/// Events emitted by the client.
///
/// Every connection attempt that fails or ends produces exactly one `Close`.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The transport opened
    Open,
    /// The transport closed
    Close(CloseInfo),
    /// Transport or protocol error; the client keeps running
    Error(Arc<Error>),
    /// A decoded, value-normalized server message
    Event(Value),
}

pub(crate) enum Command {
    Connect,
    Close,
    Send(String),
    /// Registers `tag` with the correlator, then sends `text`
    Request {
        text: String,
        tag: String,
        param: Value,
        /// `None` uses the configured request timeout
        timeout: Option<Duration>,
        reply: oneshot::Sender<Result<Value>>,
    },
    Reconfigure(Box<ClientConfig>),
}

/// Handle to the connection driver task.
///
/// The driver owns the transport, timers and pending requests; this handle only
/// submits commands and observes events and state.
#[derive(Clone)]
pub(crate) struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<ClientEvent>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl ConnectionManager {
    /// Spawns the driver task. Must be called from within a tokio runtime.
    pub(crate) fn new(config: ClientConfig) -> Self {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let driver = ConnectionDriver {
            keepalive: Keepalive::new(config.ping_interval),
            reconnect: ReconnectScheduler::new(config.reconnect),
            config,
            commands: commands_rx,
            events: events.clone(),
            state: state_tx,
            transport: None,
            connecting: None,
            closing_deadline: None,
            closed_by_user: false,
            close_frame: None,
            correlator: Correlator::default(),
        };
        tokio::spawn(driver.run());

        Self {
            commands,
            events,
            state_rx,
        }
    }

    pub(crate) fn command(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_e| WsError::ConnectionClosed)?;
        Ok(())
    }

    #[must_use]
    pub(crate) fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    #[must_use]
    pub(crate) fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    #[must_use]
    pub(crate) fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    #[cfg(test)]
    pub(crate) fn publish(&self, event: ClientEvent) {
        _ = self.events.send(event);
    }
}

type FrameResult = std::result::Result<Message, tungstenite::Error>;

/// An open transport: the driver reads, a writer task owns the sink.
///
/// Writes never block the driver. Dropping the transport aborts the writer, which
/// releases the socket even while a flush is stuck on a peer that stopped reading.
struct Transport {
    reader: SplitStream<WsStream>,
    outbound: mpsc::UnboundedSender<Message>,
    /// `None` once the writer finished
    writer: Option<JoinHandle<std::result::Result<(), tungstenite::Error>>>,
}

impl Transport {
    fn new(ws: WsStream) -> Self {
        let (sink, reader) = ws.split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        Self {
            reader,
            outbound,
            writer: Some(tokio::spawn(write_frames(sink, outbound_rx))),
        }
    }

    /// Queues `message` behind everything written before; `false` once the writer is gone.
    fn queue(&self, message: Message) -> bool {
        self.outbound.send(message).is_ok()
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if let Some(writer) = &self.writer {
            writer.abort();
        }
    }
}

/// Writes queued frames in order; stops after a close frame or the first write error.
async fn write_frames(
    mut sink: SplitSink<WsStream, Message>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
) -> std::result::Result<(), tungstenite::Error> {
    while let Some(message) = outbound.recv().await {
        let closing = matches!(message, Message::Close(_));
        sink.send(message).await?;
        if closing {
            break;
        }
    }
    Ok(())
}

struct ConnectionDriver {
    config: ClientConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    events: broadcast::Sender<ClientEvent>,
    state: watch::Sender<ConnectionState>,
    transport: Option<Transport>,
    connecting: Option<BoxFuture<'static, Result<WsStream>>>,
    closing_deadline: Option<Pin<Box<Sleep>>>,
    /// Set by `close()`, cleared by `connect()`; gates every reconnect
    closed_by_user: bool,
    /// Close frame received from the server, reported once the stream ends
    close_frame: Option<CloseInfo>,
    keepalive: Keepalive,
    reconnect: ReconnectScheduler,
    correlator: Correlator,
}

impl ConnectionDriver {
    /// Serializes every state change; runs until all handles are dropped.
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
                result = until_connected(&mut self.connecting) => {
                    self.connecting = None;
                    self.on_connected(result);
                }
                event = next_transport_event(&mut self.transport) => match event {
                    TransportEvent::Frame(frame) => self.on_frame(frame),
                    TransportEvent::WriterDone(written) => self.on_writer_done(written),
                },
                () = self.keepalive.tick() => self.on_keepalive_tick(),
                () = self.reconnect.fired() => {
                    if !self.closed_by_user {
                        #[cfg(feature = "tracing")]
                        tracing::debug!("Reconnecting");
                        self.connect();
                    }
                }
                tag = self.correlator.next_expired() => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(%tag, "Request timed out");
                    self.correlator.expire(&tag);
                }
                () = until_deadline(&mut self.closing_deadline) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Close handshake timed out, terminating transport");
                    let info = self.close_frame.take().unwrap_or_else(CloseInfo::abnormal);
                    self.finalize_close(info);
                }
            }
        }

        if let Some(mut transport) = self.transport.take() {
            transport.queue(Message::Close(None));
            if let Some(writer) = transport.writer.take() {
                let abort = writer.abort_handle();
                if timeout(self.config.close_timeout, writer).await.is_err() {
                    abort.abort();
                }
            }
        }
        #[cfg(feature = "tracing")]
        tracing::debug!("Connection driver stopped");
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Connect => self.connect(),
            Command::Close => self.close(),
            Command::Send(text) => self.send_text(text),
            Command::Request {
                text,
                tag,
                param,
                timeout,
                reply,
            } => {
                let timeout = timeout.unwrap_or(self.config.request_timeout);
                self.correlator.register(tag, &param, timeout, reply);
                #[cfg(feature = "tracing")]
                tracing::trace!(pending = self.correlator.len(), "Registered request");
                self.send_text(text);
            }
            Command::Reconfigure(config) => {
                self.keepalive.set_period(config.ping_interval);
                self.reconnect.reconfigure(config.reconnect);
                self.config = *config;
            }
        }
    }

    fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn emit(&self, event: ClientEvent) {
        _ = self.events.send(event);
    }

    fn emit_error(&self, error: Error) {
        #[cfg(feature = "tracing")]
        tracing::warn!(error = %error, "Client error");
        self.emit(ClientEvent::Error(Arc::new(error)));
    }

    fn connect(&mut self) {
        self.closed_by_user = false;
        self.reconnect.cancel();

        match self.current_state() {
            ConnectionState::Open | ConnectionState::Connecting => return,
            ConnectionState::Closing => {
                let info = self.close_frame.take().unwrap_or_else(CloseInfo::abnormal);
                self.teardown(info);
            }
            ConnectionState::Disconnected => {}
        }

        let proxy = match self.config.env_proxy.then(HttpProxy::from_env).flatten() {
            Some(Ok(proxy)) => Some(proxy),
            Some(Err(e)) => {
                self.emit_error(e);
                None
            }
            None => None,
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(
            host = %self.config.host,
            port = self.config.port,
            ssl = self.config.ssl,
            proxy = proxy.is_some(),
            "Connecting"
        );
        self.set_state(ConnectionState::Connecting);
        self.connecting = Some(Box::pin(transport::open(self.config.clone(), proxy)));
    }

    fn on_connected(&mut self, result: Result<WsStream>) {
        match result {
            Ok(ws) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("Connection open");
                self.transport = Some(Transport::new(ws));
                self.close_frame = None;
                self.set_state(ConnectionState::Open);
                self.emit(ClientEvent::Open);
                self.reconnect.reset();
                self.keepalive.start();
            }
            Err(e) => {
                self.emit_error(e);
                self.finalize_close(CloseInfo::abnormal());
            }
        }
    }

    fn close(&mut self) {
        self.closed_by_user = true;
        self.keepalive.stop();
        self.reconnect.cancel();

        match self.current_state() {
            ConnectionState::Connecting => {
                #[cfg(feature = "tracing")]
                tracing::debug!("Connection attempt aborted");
                self.connecting = None;
                self.set_state(ConnectionState::Disconnected);
            }
            ConnectionState::Open => {
                self.set_state(ConnectionState::Closing);
                let queued = self
                    .transport
                    .as_ref()
                    .is_some_and(|transport| transport.queue(Message::Close(None)));
                if queued {
                    self.closing_deadline = Some(Box::pin(sleep(self.config.close_timeout)));
                } else {
                    self.finalize_close(CloseInfo::abnormal());
                }
            }
            ConnectionState::Closing | ConnectionState::Disconnected => {}
        }
    }

    /// Queues `text` for writing when open; otherwise it is dropped.
    fn send_text(&mut self, text: String) {
        let transport = match self.transport.as_ref() {
            Some(transport) if self.current_state().is_open() => transport,
            _ => {
                #[cfg(feature = "tracing")]
                tracing::debug!(%text, "Dropping outbound message, connection not open");
                return;
            }
        };

        #[cfg(feature = "tracing")]
        tracing::trace!(%text, "Sending text frame");
        if !transport.queue(Message::Text(text.into())) {
            #[cfg(feature = "tracing")]
            tracing::debug!("Writer stopped, outbound message dropped");
        }
    }

    fn on_frame(&mut self, frame: Option<FrameResult>) {
        match frame {
            Some(Ok(Message::Text(text))) => self.on_text(text.as_str()),
            Some(Ok(Message::Binary(bytes))) => self.on_text(&String::from_utf8_lossy(&bytes)),
            Some(Ok(Message::Pong(_))) => self.keepalive.pong_received(),
            Some(Ok(Message::Close(frame))) => {
                let info = frame.map_or(
                    CloseInfo {
                        code: NO_STATUS_RECEIVED,
                        reason: String::new(),
                    },
                    |frame| CloseInfo {
                        code: frame.code.into(),
                        reason: frame.reason.as_str().to_owned(),
                    },
                );
                #[cfg(feature = "tracing")]
                tracing::debug!(code = info.code, reason = %info.reason, "Close frame received");
                self.close_frame = Some(info);
            }
            // tungstenite answers pings itself
            Some(Ok(Message::Ping(_) | Message::Frame(_))) => {}
            Some(Err(e)) => {
                self.emit_transport_error(e);
                let info = self.close_frame.take().unwrap_or_else(CloseInfo::abnormal);
                self.finalize_close(info);
            }
            None => {
                let info = self.close_frame.take().unwrap_or_else(CloseInfo::abnormal);
                self.finalize_close(info);
            }
        }
    }

    /// A failed write ends the transport; a finished one (after a close frame) does not.
    fn on_writer_done(&mut self, written: std::result::Result<(), tungstenite::Error>) {
        if let Some(transport) = self.transport.as_mut() {
            transport.writer = None;
        }
        if let Err(e) = written {
            self.emit_transport_error(e);
            let info = self.close_frame.take().unwrap_or_else(CloseInfo::abnormal);
            self.finalize_close(info);
        }
    }

    fn emit_transport_error(&self, e: tungstenite::Error) {
        if !matches!(
            e,
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed
        ) {
            self.emit_error(e.into());
        }
    }

    fn on_text(&mut self, text: &str) {
        #[cfg(feature = "tracing")]
        tracing::trace!(%text, "Received text frame");

        let mut payload = parse_inbound(text);

        if let Some(error) = protocol_error(&payload) {
            let matched = self
                .correlator
                .settle(&payload, || Err(error.clone().into()));
            #[cfg(feature = "tracing")]
            tracing::debug!(code = %error.code, ?matched, "Error response");
            #[cfg(not(feature = "tracing"))]
            let _ = &matched;
            self.emit_error(error.into());
            return;
        }

        if let Some(data) = payload.get_mut("data") {
            normalize(data, self.config.fold_booleans);
        }
        self.correlator.settle(&payload, || Ok(payload.clone()));
        self.emit(ClientEvent::Event(payload));
    }

    /// A ping still queued behind a stuck write cannot be answered either, so it reads as
    /// stalled on the next tick like any other missing pong.
    fn on_keepalive_tick(&mut self) {
        if !self.current_state().is_open() {
            return;
        }
        let Some(transport) = self.transport.as_ref() else {
            return;
        };

        match self.keepalive.beat() {
            Heartbeat::Stalled => {
                #[cfg(feature = "tracing")]
                tracing::warn!("No pong since the last ping, terminating connection");
                self.finalize_close(CloseInfo::abnormal());
            }
            Heartbeat::Ping => {
                transport.queue(Message::Ping(Vec::new().into()));
            }
        }
    }

    /// Drops the transport and reports the close, without scheduling a reconnect.
    fn teardown(&mut self, info: CloseInfo) {
        self.transport = None;
        self.closing_deadline = None;
        self.keepalive.stop();
        self.set_state(ConnectionState::Disconnected);
        #[cfg(feature = "tracing")]
        tracing::debug!(code = info.code, reason = %info.reason, "Connection closed");
        self.emit(ClientEvent::Close(info));
    }

    fn finalize_close(&mut self, info: CloseInfo) {
        self.teardown(info);
        if !self.closed_by_user {
            let delay = self.reconnect.schedule();
            #[cfg(feature = "tracing")]
            tracing::debug!(?delay, "Reconnect scheduled");
            #[cfg(not(feature = "tracing"))]
            let _ = &delay;
        }
    }
}

async fn until_connected(
    connecting: &mut Option<BoxFuture<'static, Result<WsStream>>>,
) -> Result<WsStream> {
    match connecting {
        Some(attempt) => attempt.await,
        None => pending().await,
    }
}

enum TransportEvent {
    Frame(Option<FrameResult>),
    WriterDone(std::result::Result<(), tungstenite::Error>),
}

async fn next_transport_event(transport: &mut Option<Transport>) -> TransportEvent {
    let Some(transport) = transport else {
        return pending().await;
    };
    let reader = &mut transport.reader;

    match transport.writer.as_mut() {
        Some(writer) => tokio::select! {
            frame = reader.next() => TransportEvent::Frame(frame),
            // the writer is only aborted together with its transport
            written = writer => TransportEvent::WriterDone(written.unwrap_or(Ok(()))),
        },
        None => TransportEvent::Frame(reader.next().await),
    }
}

async fn until_deadline(deadline: &mut Option<Pin<Box<Sleep>>>) {
    match deadline {
        Some(sleep) => sleep.await,
        None => pending().await,
    }
}
