use std::time::Duration;

use async_stream::stream;
use futures::Stream;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, oneshot, watch};

use super::correlator::PendingResponse;
use super::types::request::{CallRequest, Envelope, SelectRequest};
use crate::Result;
use crate::error::Error;
use crate::ws::WsError;
use crate::ws::config::ClientConfig;
use crate::ws::connection::{ClientEvent, Command, ConnectionManager, ConnectionState};
use crate::ws::transport::tls_connector;

/// Client for a Gira endpoint WebSocket server.
///
/// The client keeps one connection alive once [`Client::connect`] was called: it answers
/// stalled keepalives by reconnecting, reconnects with backoff after every unexpected close,
/// and correlates tagged requests with their responses. Everything happens on a single
/// background task; clones share that task, which stops once the last clone is dropped.
///
/// # Examples
///
/// ```rust, no_run
/// use gira_endpoint_client::endpoint::{CallRequest, Client};
/// use gira_endpoint_client::ws::ClientEvent;
/// use gira_endpoint_client::ws::config::ClientConfig;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = ClientConfig::builder()
///         .host("192.168.0.10")
///         .username("admin")
///         .password("secret")
///         .build();
///     let client = Client::new(config)?;
///     let mut events = client.events();
///
///     client.connect()?;
///     client.subscribe(&["CO@1"])?;
///
///     let state = CallRequest::builder().key("CO@1").method("get").tag("get-1").build();
///     if let Some(response) = client.call(state)? {
///         println!("CO@1: {}", response.await?);
///     }
///
///     while let Ok(event) = events.recv().await {
///         if let ClientEvent::Event(payload) = event {
///             println!("{payload}");
///         }
///     }
///
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    connection: ConnectionManager,
}

impl Client {
    /// Validates `config` and starts the background task, without connecting.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn new(config: ClientConfig) -> Result<Self> {
        check(&config)?;

        Ok(Self {
            connection: ConnectionManager::new(config),
        })
    }

    /// Opens the connection. A no-op while already connecting or open.
    ///
    /// Cancels a scheduled reconnect and re-enables automatic reconnection after
    /// [`Client::close`].
    pub fn connect(&self) -> Result<()> {
        self.connection.command(Command::Connect)
    }

    /// Closes the connection and stops reconnecting until the next [`Client::connect`].
    pub fn close(&self) -> Result<()> {
        self.connection.command(Command::Close)
    }

    /// Replaces the configuration; it applies from the next connection attempt on.
    pub fn reconfigure(&self, config: ClientConfig) -> Result<()> {
        check(&config)?;
        self.connection
            .command(Command::Reconfigure(Box::new(config)))
    }

    /// Serializes `message` to JSON and sends it.
    ///
    /// Messages are only written while the connection is open and are dropped otherwise.
    pub fn send<R: Serialize>(&self, message: &R) -> Result<()> {
        let text = serde_json::to_string(message)?;
        self.connection.command(Command::Send(text))
    }

    /// Sends `text` as-is, with the same delivery rules as [`Client::send`].
    pub fn send_raw<S: Into<String>>(&self, text: S) -> Result<()> {
        self.connection.command(Command::Send(text.into()))
    }

    /// Sends `{type: "subscribe", param: {keys}}`.
    pub fn subscribe<K: AsRef<str>>(&self, keys: &[K]) -> Result<()> {
        self.send(&Envelope::subscribe(keys))
    }

    /// Sends `{type: "unsubscribe", param: {keys}}`.
    pub fn unsubscribe<K: AsRef<str>>(&self, keys: &[K]) -> Result<()> {
        self.send(&Envelope::unsubscribe(keys))
    }

    /// Sends a `call`.
    ///
    /// Returns `None` for untagged requests. A tagged request yields a [`PendingResponse`]
    /// that settles with the matching response, the matching error response, or a timeout
    /// after `request.timeout` (the configured request timeout by default).
    pub fn call(&self, request: CallRequest) -> Result<Option<PendingResponse>> {
        self.dispatch(request.envelope(), request.timeout)
    }

    /// Sends a `select`; correlation works as for [`Client::call`].
    pub fn select(&self, request: SelectRequest) -> Result<Option<PendingResponse>> {
        self.dispatch(request.envelope(), request.timeout)
    }

    fn dispatch(
        &self,
        envelope: Envelope,
        timeout: Option<Duration>,
    ) -> Result<Option<PendingResponse>> {
        let text = serde_json::to_string(&envelope)?;
        let Some(tag) = envelope.tag else {
            self.connection.command(Command::Send(text))?;
            return Ok(None);
        };

        let (reply, rx) = oneshot::channel();
        self.connection.command(Command::Request {
            text,
            tag,
            param: envelope.param,
            timeout,
            reply,
        })?;
        Ok(Some(PendingResponse::new(rx)))
    }

    /// Subscribes to client events.
    ///
    /// Each call returns an independent receiver that sees events emitted from now on.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.connection.events()
    }

    /// Client events as a stream.
    ///
    /// A receiver that falls behind yields [`WsError::Lagged`] once and then continues with
    /// the oldest retained event. The stream ends when the client shuts down.
    pub fn event_stream(&self) -> impl Stream<Item = Result<ClientEvent>> + use<> {
        let mut rx = self.connection.events();

        stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield Ok(event),
                    Err(RecvError::Lagged(n)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("Event stream lagged, missed {n} events");
                        yield Err(Error::from(WsError::Lagged { count: n }));
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Watches connection state changes, e.g. to re-subscribe after a reconnect.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.connection.state_receiver()
    }
}

fn check(config: &ClientConfig) -> Result<()> {
    config.validate()?;
    tls_connector(&config.tls)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use futures::StreamExt as _;
    use serde_json::json;

    use super::*;
    use crate::error::Kind;
    use crate::ws::config::{ReconnectConfig, TlsConfig};

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let config = ClientConfig::builder()
            .host("gira.local")
            .reconnect(
                ReconnectConfig::builder()
                    .min_delay(Duration::from_secs(2))
                    .max_delay(Duration::from_secs(1))
                    .build(),
            )
            .build();

        let error = Client::new(config).err().unwrap();

        assert_eq!(error.kind(), Kind::Validation);
    }

    #[tokio::test]
    async fn bad_tls_material_is_rejected_up_front() {
        let config = ClientConfig::builder()
            .host("gira.local")
            .ssl(true)
            .tls(TlsConfig::builder().ca("garbage").build())
            .build();

        Client::new(config).err().unwrap();
    }

    #[tokio::test]
    async fn untagged_call_is_fire_and_forget() {
        let client = Client::new(ClientConfig::new("127.0.0.1")).unwrap();

        let pending = client.call(CallRequest::new("CO@1", "get")).unwrap();

        assert!(pending.is_none(), "no result expected without a tag");
    }

    #[tokio::test]
    async fn lagged_event_stream_keeps_going() {
        let client = Client::new(ClientConfig::new("127.0.0.1")).unwrap();
        let mut stream = Box::pin(client.event_stream());

        for i in 0..1500 {
            client.connection.publish(ClientEvent::Event(json!(i)));
        }

        let lagged = stream.next().await.unwrap().unwrap_err();
        assert!(
            matches!(lagged.downcast_ref::<WsError>(), Some(WsError::Lagged { count: 476 })),
            "unexpected error {lagged}"
        );
        let next = stream.next().await.unwrap().unwrap();
        assert!(
            matches!(&next, ClientEvent::Event(value) if *value == json!(476)),
            "unexpected event {next:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn tagged_call_while_disconnected_times_out() {
        let client = Client::new(ClientConfig::new("127.0.0.1")).unwrap();
        let request = SelectRequest::builder()
            .filter(json!({}))
            .tag("s1")
            .timeout(Duration::from_millis(50))
            .build();

        let error = client.select(request).unwrap().unwrap().await.unwrap_err();

        assert_eq!(error.kind(), Kind::Timeout);
    }
}
