#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use bon::Builder;
use secrecy::SecretString;

use crate::Result;
use crate::error::Error;

const DEFAULT_PORT: u16 = 80;
const DEFAULT_PATH: &str = "/";
const DEFAULT_PING_INTERVAL_DURATION: Duration = Duration::from_secs(30);
const DEFAULT_REQUEST_TIMEOUT_DURATION: Duration = Duration::from_secs(10);
const DEFAULT_CLOSE_TIMEOUT_DURATION: Duration = Duration::from_secs(5);
const DEFAULT_MIN_RECONNECT_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Growth factor applied to the reconnect delay after every unexpected close.
pub const BACKOFF_MULTIPLIER: f64 = 1.7;
/// Symmetric jitter applied to every reconnect delay (±20%).
pub const BACKOFF_JITTER: f64 = 0.2;

/// How credentials are delivered during the WebSocket upgrade.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthMode {
    /// `?authorization=<base64(user:pass)>` appended to the URL
    #[default]
    Query,
    /// `Authorization: Basic <base64(user:pass)>` header
    Header,
}

/// Configuration for the endpoint WebSocket client.
///
/// Only `host` is required; everything else has the defaults of the endpoint API.
///
/// ```
/// use std::time::Duration;
///
/// use gira_endpoint_client::ws::config::{AuthMode, ClientConfig};
///
/// let config = ClientConfig::builder()
///     .host("192.168.0.10")
///     .port(443)
///     .ssl(true)
///     .path("/endpoints/ws")
///     .username("admin")
///     .password("secret")
///     .auth_mode(AuthMode::Header)
///     .ping_interval(Duration::from_secs(10))
///     .build();
///
/// assert_eq!(config.scheme(), "wss");
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct ClientConfig {
    /// Host name or IP address of the endpoint server
    #[builder(into)]
    pub host: String,
    #[builder(default = DEFAULT_PORT)]
    pub port: u16,
    /// Use `wss` instead of `ws`
    #[builder(default)]
    pub ssl: bool,
    /// Request path, a leading `/` is added when missing
    #[builder(into, default = DEFAULT_PATH.to_owned())]
    pub path: String,
    /// No authentication is applied when empty
    #[builder(into, default)]
    pub username: String,
    #[builder(into, default = SecretString::from(""))]
    pub password: SecretString,
    #[builder(default)]
    pub auth_mode: AuthMode,
    /// Interval between keepalive pings, [`Duration::ZERO`] disables keepalive
    #[builder(default = DEFAULT_PING_INTERVAL_DURATION)]
    pub ping_interval: Duration,
    #[builder(default)]
    pub reconnect: ReconnectConfig,
    #[builder(default)]
    pub tls: TlsConfig,
    /// Tunnel through the proxy named by `HTTPS_PROXY`/`HTTP_PROXY` when set
    #[builder(default = true)]
    pub env_proxy: bool,
    /// Default timeout for tagged `call`/`select` requests
    #[builder(default = DEFAULT_REQUEST_TIMEOUT_DURATION)]
    pub request_timeout: Duration,
    /// How long `close()` waits for the server's close frame before dropping the transport
    #[builder(default = DEFAULT_CLOSE_TIMEOUT_DURATION)]
    pub close_timeout: Duration,
    /// Collapse normalized `1`/`0` values to `true`/`false`
    #[builder(default = true)]
    pub fold_booleans: bool,
}

impl ClientConfig {
    /// Configuration with all defaults for `host`.
    #[must_use]
    pub fn new<S: Into<String>>(host: S) -> Self {
        Self::builder().host(host).build()
    }

    #[must_use]
    pub const fn scheme(&self) -> &'static str {
        if self.ssl { "wss" } else { "ws" }
    }

    /// Path with a guaranteed leading `/`.
    #[must_use]
    pub fn normalized_path(&self) -> String {
        if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        }
    }

    #[must_use]
    pub fn keepalive_enabled(&self) -> bool {
        !self.ping_interval.is_zero()
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::validation("host must not be empty"));
        }
        self.reconnect.validate()
    }
}

/// Bounds for the reconnect backoff.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Builder)]
pub struct ReconnectConfig {
    /// First delay, and the delay restored after every successful open
    #[builder(default = DEFAULT_MIN_RECONNECT_DELAY)]
    pub min_delay: Duration,
    /// Upper bound for any single delay
    #[builder(default = DEFAULT_MAX_RECONNECT_DELAY)]
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            min_delay: DEFAULT_MIN_RECONNECT_DELAY,
            max_delay: DEFAULT_MAX_RECONNECT_DELAY,
        }
    }
}

impl ReconnectConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_delay.is_zero() {
            return Err(Error::validation("reconnect min_delay must be > 0"));
        }
        if self.max_delay < self.min_delay {
            return Err(Error::validation(
                "reconnect max_delay must be >= reconnect min_delay",
            ));
        }
        Ok(())
    }
}

impl From<ReconnectConfig> for ExponentialBackoff {
    fn from(config: ReconnectConfig) -> Self {
        ExponentialBackoffBuilder::default()
            .with_initial_interval(config.min_delay)
            .with_max_interval(config.max_delay)
            .with_multiplier(BACKOFF_MULTIPLIER)
            .with_randomization_factor(BACKOFF_JITTER)
            .with_max_elapsed_time(None) // reconnection never gives up
            .build()
    }
}

/// TLS material handed to the transport as-is.
///
/// Certificates and keys are PEM text. When `ca` is unset the platform roots are used.
#[non_exhaustive]
#[derive(Debug, Clone, Default, Builder)]
pub struct TlsConfig {
    /// PEM encoded CA certificate(s) used to verify the server
    #[builder(into)]
    pub ca: Option<String>,
    /// PEM encoded client certificate chain
    #[builder(into)]
    pub cert: Option<String>,
    /// PEM encoded client private key
    #[builder(into)]
    pub key: Option<SecretString>,
    /// `Some(false)` disables server certificate verification
    pub reject_unauthorized: Option<bool>,
}

impl TlsConfig {
    #[must_use]
    pub fn verify_peer(&self) -> bool {
        self.reject_unauthorized.unwrap_or(true)
    }

    /// Whether the default connector can be used.
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.ca.is_none() && self.cert.is_none() && self.key.is_none() && self.verify_peer()
    }
}
