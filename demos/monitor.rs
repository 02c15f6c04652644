//! Watches a set of endpoint keys and logs every state change.
//!
//! Subscriptions are renewed after every (re)connect, so the monitor survives server
//! restarts and network drops.
//!
//! ```sh
//! GIRA_HOST=192.168.0.10 GIRA_USERNAME=admin GIRA_PASSWORD=secret GIRA_KEYS=CO@1,CO@2 \
//!     RUST_LOG=info cargo run --example monitor --features tracing
//! ```

use std::env;

use futures::StreamExt as _;
use gira_endpoint_client::endpoint::{CallRequest, Client, decode_ack_value, extract_updates};
use gira_endpoint_client::ws::ClientEvent;
use gira_endpoint_client::ws::config::ClientConfig;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let host = env::var("GIRA_HOST")?;
    let keys: Vec<String> = env::var("GIRA_KEYS")
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_owned)
        .collect();

    let config = ClientConfig::builder()
        .host(host)
        .maybe_port(env::var("GIRA_PORT").ok().and_then(|port| port.parse().ok()))
        .ssl(env::var("GIRA_SSL").is_ok_and(|ssl| ssl == "1"))
        .username(env::var("GIRA_USERNAME").unwrap_or_default())
        .password(env::var("GIRA_PASSWORD").unwrap_or_default())
        .build();
    let client = Client::new(config)?;
    let mut stream = Box::pin(client.event_stream());

    client.connect()?;

    while let Some(event) = stream.next().await {
        match event {
            Ok(ClientEvent::Open) => {
                info!(keys = ?keys, "Connected, subscribing");
                client.subscribe(&keys)?;

                for key in &keys {
                    let request = CallRequest::builder()
                        .key(key.as_str())
                        .method("get")
                        .tag(format!("get-{key}"))
                        .build();
                    if let Some(pending) = client.call(request)? {
                        match pending.await {
                            Ok(response) => info!(%key, value = %response["data"]["value"], "Initial state"),
                            Err(e) => warn!(%key, error = %e, "Initial state unavailable"),
                        }
                    }
                }
            }
            Ok(ClientEvent::Close(close)) => {
                info!(code = close.code, reason = %close.reason, "Disconnected");
            }
            Ok(ClientEvent::Error(e)) => warn!(error = %e, "Client error"),
            Ok(ClientEvent::Event(payload)) => {
                for update in extract_updates(&payload) {
                    let decoded = decode_ack_value(&update.value, false);
                    info!(
                        key = %update.key,
                        value = %decoded.value,
                        value_type = ?decoded.value_type,
                        "Update"
                    );
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Event stream"),
        }
    }

    Ok(())
}
