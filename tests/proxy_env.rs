#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]

mod common;

use common::{MockServer, wait_for, wait_open};
use gira_endpoint_client::endpoint::Client;
use gira_endpoint_client::error::Kind;
use gira_endpoint_client::ws::{ClientEvent, ConnectionState};

#[tokio::test]
async fn unparsable_env_proxy_is_reported_and_bypassed() {
    // SAFETY: this binary holds a single test and the variable is written before any client
    // thread could read the environment.
    unsafe {
        std::env::set_var("HTTPS_PROXY", "not a proxy url");
    }
    let mut server = MockServer::start().await;
    let mut config = server.config();
    config.env_proxy = true;
    let client = Client::new(config).unwrap();
    let mut events = client.events();

    client.connect().unwrap();

    let event = wait_for(&mut events, |event| {
        matches!(event, ClientEvent::Error(_) | ClientEvent::Open)
    })
    .await;
    let ClientEvent::Error(error) = event else {
        panic!("proxy error expected before open, got {event:?}");
    };
    assert_eq!(error.kind(), Kind::Transport);
    assert!(error.to_string().contains("proxy"), "unexpected error: {error}");

    wait_open(&mut events).await;
    assert_eq!(server.handshake().await.uri, "/");
    assert_eq!(client.state(), ConnectionState::Open);
}
