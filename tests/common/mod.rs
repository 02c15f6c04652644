#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]
#![allow(
    unused,
    reason = "Not every test binary uses every helper"
)]

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt as _, StreamExt as _};
use gira_endpoint_client::ClientConfig;
use gira_endpoint_client::ws::ClientEvent;
use gira_endpoint_client::ws::config::ReconnectConfig;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;

pub const WAIT: Duration = Duration::from_secs(3);

/// What the server saw during a WebSocket upgrade.
#[derive(Debug, Clone)]
pub struct Handshake {
    /// Path and query
    pub uri: String,
    pub authorization: Option<String>,
}

#[derive(Debug, Clone)]
enum ServerCommand {
    Text(String),
    /// Drop every connection without a close handshake
    Drop,
}

/// Mock endpoint server.
pub struct MockServer {
    pub addr: SocketAddr,
    commands: broadcast::Sender<ServerCommand>,
    inbound: mpsc::UnboundedReceiver<String>,
    handshakes: mpsc::UnboundedReceiver<Handshake>,
}

impl MockServer {
    /// Server that reads client frames, so pings are answered.
    pub async fn start() -> Self {
        Self::spawn(true).await
    }

    /// Server that never reads after the upgrade, so pings go unanswered.
    pub async fn silent() -> Self {
        Self::spawn(false).await
    }

    async fn spawn(reads: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (commands, _) = broadcast::channel::<ServerCommand>(100);
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let (handshake_tx, handshakes) = mpsc::unbounded_channel();
        let server_commands = commands.clone();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };

                let handshake_tx = handshake_tx.clone();
                let record = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                    let authorization = request
                        .headers()
                        .get(AUTHORIZATION)
                        .and_then(|value| value.to_str().ok())
                        .map(str::to_owned);
                    drop(handshake_tx.send(Handshake {
                        uri: request.uri().to_string(),
                        authorization,
                    }));
                    Ok(response)
                };
                let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, record).await else {
                    continue;
                };

                let inbound_tx = inbound_tx.clone();
                let mut commands = server_commands.subscribe();

                tokio::spawn(async move {
                    if !reads {
                        let _ws = ws;
                        std::future::pending::<()>().await;
                        return;
                    }

                    let (mut write, mut read) = ws.split();
                    loop {
                        tokio::select! {
                            frame = read.next() => match frame {
                                Some(Ok(Message::Text(text))) => {
                                    drop(inbound_tx.send(text.to_string()));
                                }
                                Some(Ok(Message::Close(_))) => {
                                    // the close reply is flushed on the next read
                                    drop(read.next().await);
                                    break;
                                }
                                Some(Ok(_)) => {}
                                _ => break,
                            },
                            command = commands.recv() => match command {
                                Ok(ServerCommand::Text(text)) => {
                                    if write.send(Message::Text(text.into())).await.is_err() {
                                        break;
                                    }
                                }
                                Ok(ServerCommand::Drop) | Err(_) => break,
                            },
                        }
                    }
                });
            }
        });

        Self {
            addr,
            commands,
            inbound,
            handshakes,
        }
    }

    /// Client configuration pointing at this server with short reconnect delays.
    pub fn config(&self) -> ClientConfig {
        ClientConfig::builder()
            .host("127.0.0.1")
            .port(self.addr.port())
            .env_proxy(false)
            .reconnect(
                ReconnectConfig::builder()
                    .min_delay(Duration::from_millis(50))
                    .max_delay(Duration::from_millis(100))
                    .build(),
            )
            .build()
    }

    /// Sends `message` to every connected client.
    pub fn send(&self, message: &Value) {
        drop(self.commands.send(ServerCommand::Text(message.to_string())));
    }

    pub fn send_text(&self, text: &str) {
        drop(self.commands.send(ServerCommand::Text(text.to_owned())));
    }

    /// Drops every connection without a close frame.
    pub fn drop_connections(&self) {
        drop(self.commands.send(ServerCommand::Drop));
    }

    /// Next text frame from a client, decoded as JSON.
    pub async fn recv(&mut self) -> Value {
        let text = timeout(WAIT, self.inbound.recv()).await.unwrap().unwrap();
        serde_json::from_str(&text).unwrap()
    }

    /// Whether a client frame arrives within `within`.
    pub async fn received_within(&mut self, within: Duration) -> bool {
        timeout(within, self.inbound.recv()).await.is_ok()
    }

    pub async fn handshake(&mut self) -> Handshake {
        timeout(WAIT, self.handshakes.recv()).await.unwrap().unwrap()
    }
}

/// Next event matching `predicate`, skipping others.
pub async fn wait_for<F>(events: &mut broadcast::Receiver<ClientEvent>, predicate: F) -> ClientEvent
where
    F: Fn(&ClientEvent) -> bool,
{
    timeout(WAIT, async {
        loop {
            let event = events.recv().await.unwrap();
            if predicate(&event) {
                return event;
            }
        }
    })
    .await
    .unwrap()
}

pub async fn wait_open(events: &mut broadcast::Receiver<ClientEvent>) {
    wait_for(events, |event| matches!(event, ClientEvent::Open)).await;
}
