//! Core WebSocket infrastructure.
//!
//! # Architecture
//!
//! - [`config`]: connection, reconnect and TLS configuration
//! - [`connection`]: the driver task that owns the transport and serializes every state change
//! - `transport`: URL and credential handling, TLS and HTTP proxy tunnelling
//! - `keepalive` and `reconnect`: the ping/pong monitor and the backoff timer used by the driver

pub mod config;
pub mod connection;
pub mod error;
pub(crate) mod keepalive;
pub(crate) mod reconnect;
pub(crate) mod transport;

pub use connection::{ClientEvent, CloseInfo, ConnectionState};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
