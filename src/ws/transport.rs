//! Opening the WebSocket transport: URL, authentication, TLS and proxy tunnelling.

use std::fmt::Write as _;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use secrecy::ExposeSecret as _;
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream, client_async_tls_with_config};
use url::Url;

use super::config::{AuthMode, ClientConfig, TlsConfig};
use super::error::WsError;
use crate::Result;
use crate::error::{Error, Kind};

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Environment variables consulted for an HTTP proxy, in order.
const PROXY_ENV_VARS: [&str; 2] = ["HTTPS_PROXY", "HTTP_PROXY"];

/// Upper bound for the proxy's reply to `CONNECT`.
const MAX_PROXY_RESPONSE_BYTES: usize = 8 * 1024;

const MAX_PROXY_RESPONSE_HEADERS: usize = 32;

/// Base64 of `username:password`, or `None` when no username is configured.
pub(crate) fn auth_token(config: &ClientConfig) -> Option<String> {
    if config.username.is_empty() {
        return None;
    }
    let credentials = format!("{}:{}", config.username, config.password.expose_secret());
    Some(STANDARD.encode(credentials))
}

pub(crate) fn endpoint_url(config: &ClientConfig) -> Result<Url> {
    let host = if config.host.contains(':') && !config.host.starts_with('[') {
        format!("[{}]", config.host)
    } else {
        config.host.clone()
    };
    let mut url = Url::parse(&format!(
        "{}://{}:{}{}",
        config.scheme(),
        host,
        config.port,
        config.normalized_path()
    ))?;

    if config.auth_mode == AuthMode::Query
        && let Some(token) = auth_token(config)
    {
        url.query_pairs_mut().append_pair("authorization", &token);
    }

    Ok(url)
}

pub(crate) fn handshake_request(config: &ClientConfig) -> Result<Request> {
    let mut request = endpoint_url(config)?.as_str().into_client_request()?;

    if config.auth_mode == AuthMode::Header
        && let Some(token) = auth_token(config)
    {
        let value = HeaderValue::from_str(&format!("Basic {token}"))
            .map_err(|e| Error::with_source(Kind::Validation, e))?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }

    Ok(request)
}

/// Builds a rustls connector for non-default TLS material.
///
/// Returns `None` when the transport's default connector (platform roots) applies.
pub(crate) fn tls_connector(tls: &TlsConfig) -> Result<Option<Connector>> {
    if tls.is_default() {
        return Ok(None);
    }

    let builder = if tls.verify_peer() {
        let mut roots = RootCertStore::empty();
        match &tls.ca {
            Some(ca) => {
                for cert in parse_certs(ca, "CA")? {
                    roots
                        .add(cert)
                        .map_err(|e| WsError::Tls(format!("invalid CA certificate: {e}")))?;
                }
            }
            None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
        }
        rustls::ClientConfig::builder().with_root_certificates(roots)
    } else {
        #[cfg(feature = "tracing")]
        tracing::warn!("TLS server certificate verification is disabled");
        rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
    };

    let client_config = match (&tls.cert, &tls.key) {
        (Some(cert), Some(key)) => builder
            .with_client_auth_cert(
                parse_certs(cert, "client")?,
                parse_private_key(key.expose_secret())?,
            )
            .map_err(|e| WsError::Tls(format!("invalid client certificate/key: {e}")))?,
        (None, None) => builder.with_no_client_auth(),
        _ => {
            return Err(Error::validation(
                "TLS client certificate and key must be configured together",
            ));
        }
    };

    Ok(Some(Connector::Rustls(Arc::new(client_config))))
}

fn parse_certs(pem: &str, what: &str) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = pem.as_bytes();
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| WsError::Tls(format!("invalid {what} certificate PEM: {e}")))?;

    if certs.is_empty() {
        return Err(WsError::Tls(format!("no {what} certificate found in PEM")).into());
    }
    Ok(certs)
}

fn parse_private_key(pem: &str) -> Result<PrivateKeyDer<'static>> {
    let mut reader = pem.as_bytes();
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| WsError::Tls(format!("invalid private key PEM: {e}")))?
        .ok_or_else(|| WsError::Tls("no private key found in PEM".to_owned()).into())
}

/// Verifier used when `reject_unauthorized` is `false`.
#[derive(Debug)]
struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

/// HTTP proxy reached with `CONNECT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HttpProxy {
    host: String,
    port: u16,
    /// Base64 `user:pass` for `Proxy-Authorization`
    authorization: Option<String>,
}

impl HttpProxy {
    /// Proxy from `HTTPS_PROXY`/`HTTP_PROXY`, `None` when neither is set.
    pub(crate) fn from_env() -> Option<Result<Self>> {
        let raw = PROXY_ENV_VARS
            .iter()
            .filter_map(|name| std::env::var(name).ok())
            .find(|value| !value.trim().is_empty())?;
        Some(Self::parse(raw.trim()))
    }

    pub(crate) fn parse(raw: &str) -> Result<Self> {
        let url = Url::parse(raw)
            .map_err(|e| WsError::Proxy(format!("invalid proxy URL {raw:?}: {e}")))?;
        if url.scheme() != "http" {
            return Err(WsError::Proxy(format!(
                "unsupported proxy scheme {:?}, only http:// proxies can tunnel",
                url.scheme()
            ))
            .into());
        }
        let host = url
            .host_str()
            .ok_or_else(|| WsError::Proxy(format!("proxy URL {raw:?} has no host")))?
            .to_owned();
        let port = url.port_or_known_default().unwrap_or(80);
        let authorization = (!url.username().is_empty()).then(|| {
            STANDARD.encode(format!(
                "{}:{}",
                url.username(),
                url.password().unwrap_or_default()
            ))
        });

        Ok(Self {
            host,
            port,
            authorization,
        })
    }

    /// Opens a TCP tunnel to `host:port` through the proxy.
    ///
    /// The WebSocket server speaks only after the upgrade request, so any byte following the
    /// proxy's reply is a protocol violation and fails the tunnel instead of being dropped.
    pub(crate) async fn tunnel(&self, host: &str, port: u16) -> Result<TcpStream> {
        let mut stream = TcpStream::connect((self.host.as_str(), self.port)).await?;

        let target = authority(host, port);
        let mut request = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n");
        if let Some(authorization) = &self.authorization {
            _ = write!(request, "Proxy-Authorization: Basic {authorization}\r\n");
        }
        request.push_str("\r\n");
        stream.write_all(request.as_bytes()).await?;

        let mut response = Vec::with_capacity(256);
        let mut buf = [0_u8; 256];
        loop {
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                return Err(WsError::Proxy("proxy closed the connection during CONNECT".to_owned()).into());
            }
            response.extend_from_slice(buf.get(..n).unwrap_or_default());
            if response.len() > MAX_PROXY_RESPONSE_BYTES {
                return Err(WsError::Proxy("oversized CONNECT response".to_owned()).into());
            }

            let mut headers = [httparse::EMPTY_HEADER; MAX_PROXY_RESPONSE_HEADERS];
            let mut reply = httparse::Response::new(&mut headers);
            let head_len = match reply.parse(&response) {
                Ok(httparse::Status::Complete(head_len)) => head_len,
                Ok(httparse::Status::Partial) => continue,
                Err(e) => {
                    return Err(WsError::Proxy(format!("malformed CONNECT response: {e}")).into());
                }
            };

            let code = reply.code.unwrap_or_default();
            if !(200..300).contains(&code) {
                let reason = reply.reason.unwrap_or_default();
                return Err(WsError::Proxy(format!("proxy refused CONNECT: {code} {reason}")).into());
            }
            if response.len() > head_len {
                return Err(WsError::Proxy(
                    "proxy sent data before the tunnel was used".to_owned(),
                )
                .into());
            }
            break;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(proxy = %self.host, %target, "Proxy tunnel established");

        Ok(stream)
    }
}

fn authority(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Performs TCP connect (directly or through `proxy`), TLS and the WebSocket upgrade.
pub(crate) async fn open(config: ClientConfig, proxy: Option<HttpProxy>) -> Result<WsStream> {
    let request = handshake_request(&config)?;
    let connector = if config.ssl {
        tls_connector(&config.tls)?
    } else {
        None
    };
    let host = config.host.trim_start_matches('[').trim_end_matches(']');

    let stream = match proxy {
        Some(proxy) => proxy.tunnel(host, config.port).await?,
        None => TcpStream::connect((host, config.port)).await?,
    };
    stream.set_nodelay(true).ok();

    let (ws, _response) = client_async_tls_with_config(request, stream, None, connector).await?;
    Ok(ws)
}
