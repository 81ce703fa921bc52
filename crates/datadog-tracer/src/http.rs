// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP client adapter used by the agent collector.
//!
//! The collector depends only on the [`HttpClient`] trait: one POST, one
//! eventual outcome, never blocking the caller beyond the await point.
//! [`HyperClient`] is the production implementation, speaking HTTP/1 over
//! either TCP or a unix domain socket. The tokio runtime the request runs
//! on is the shared event loop; any number of requests may be in flight on
//! it concurrently.
//!
//! # Unix domain sockets
//!
//! Agent URLs of the form `unix:///var/run/datadog/apm.socket` (also
//! `http+unix://`, `https+unix://`) connect to the named socket, and the
//! URL seen by the HTTP layer is rewritten to `http://localhost{path}`;
//! the socket file takes the place of the authority.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::HOST;
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};
use tracing::debug;

use crate::error::{Error, ErrorKind};

/// Where the transport connection is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentTarget {
    Tcp { host: String, port: u16 },
    Unix { socket_path: String },
}

/// A parsed agent endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentUrl {
    pub target: AgentTarget,
    /// Authority presented in the `Host` header. `localhost` for unix
    /// sockets, per the URL rewrite.
    pub authority: String,
}

impl AgentUrl {
    /// Parses an agent URL.
    ///
    /// Accepted forms:
    /// - `http://host[:port]` (port defaults to the agent's 8126)
    /// - `unix:///path/to/socket`, `http+unix:///path/to/socket`,
    ///   `https+unix:///path/to/socket`
    ///
    /// Plain `https://` is rejected: the trace agent listens on loopback
    /// HTTP or a unix socket, and this client does not terminate TLS.
    pub fn parse(input: &str) -> Result<Self, Error> {
        let input = input.trim();
        let setup_error =
            |message: String| Error::new(ErrorKind::HttpClientSetupFailed, message);

        let Some((scheme, rest)) = input.split_once("://") else {
            return Err(setup_error(format!(
                "agent URL is missing a scheme: \"{input}\""
            )));
        };

        match scheme {
            "unix" | "http+unix" | "https+unix" => {
                if !rest.starts_with('/') {
                    return Err(setup_error(format!(
                        "unix socket path in agent URL must be absolute: \"{input}\""
                    )));
                }
                Ok(AgentUrl {
                    target: AgentTarget::Unix {
                        socket_path: rest.to_string(),
                    },
                    authority: "localhost".to_string(),
                })
            }
            "http" => {
                let authority = rest.split('/').next().unwrap_or_default();
                if authority.is_empty() {
                    return Err(setup_error(format!(
                        "agent URL has an empty authority: \"{input}\""
                    )));
                }
                let (host, port) = match authority.rsplit_once(':') {
                    Some((host, port)) => {
                        let port = port.parse::<u16>().map_err(|_| {
                            setup_error(format!("invalid port in agent URL: \"{input}\""))
                        })?;
                        (host.to_string(), port)
                    }
                    None => (authority.to_string(), 8126),
                };
                Ok(AgentUrl {
                    target: AgentTarget::Tcp { host, port },
                    authority: authority.to_string(),
                })
            }
            "https" => Err(setup_error(
                "https agent URLs are not supported; use http or a unix socket form".to_string(),
            )),
            other => Err(setup_error(format!(
                "unsupported agent URL scheme \"{other}\" in \"{input}\""
            ))),
        }
    }
}

/// A completed HTTP exchange.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    /// Response headers, keys lower-cased.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The transport seam the agent collector posts through.
///
/// Exactly one of `Ok` (a response arrived, whatever its status) or `Err`
/// (the request never completed) is produced per call.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn post(
        &self,
        url: &AgentUrl,
        path: &str,
        headers: &[(String, String)],
        body: Vec<u8>,
    ) -> Result<HttpResponse, Error>;
}

/// HTTP/1 client over TCP or unix sockets, one connection per request.
///
/// In-flight requests multiplex on the caller's tokio runtime.
pub struct HyperClient {
    request_timeout: Duration,
}

impl HyperClient {
    pub fn new(request_timeout: Duration) -> Self {
        HyperClient { request_timeout }
    }
}

impl Default for HyperClient {
    fn default() -> Self {
        HyperClient::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl HttpClient for HyperClient {
    async fn post(
        &self,
        url: &AgentUrl,
        path: &str,
        headers: &[(String, String)],
        body: Vec<u8>,
    ) -> Result<HttpResponse, Error> {
        let request = build_request(&url.authority, path, headers, body)?;

        let exchange = async {
            match &url.target {
                AgentTarget::Tcp { host, port } => {
                    let stream = TcpStream::connect((host.as_str(), *port))
                        .await
                        .map_err(|io_error| {
                            Error::new(
                                ErrorKind::HttpRequestFailure,
                                format!("failed to connect to {host}:{port}: {io_error}"),
                            )
                        })?;
                    dispatch(stream, request).await
                }
                AgentTarget::Unix { socket_path } => {
                    let stream = UnixStream::connect(socket_path).await.map_err(|io_error| {
                        Error::new(
                            ErrorKind::HttpRequestFailure,
                            format!("failed to connect to unix socket {socket_path}: {io_error}"),
                        )
                    })?;
                    dispatch(stream, request).await
                }
            }
        };

        tokio::time::timeout(self.request_timeout, exchange)
            .await
            .map_err(|_| {
                Error::new(
                    ErrorKind::HttpRequestFailure,
                    format!(
                        "request to {} timed out after {:?}",
                        url.authority, self.request_timeout
                    ),
                )
            })?
    }
}

fn build_request(
    authority: &str,
    path: &str,
    headers: &[(String, String)],
    body: Vec<u8>,
) -> Result<Request<Full<Bytes>>, Error> {
    let mut builder = Request::builder()
        .method(hyper::Method::POST)
        .uri(path)
        .header(HOST, authority);
    for (key, value) in headers {
        builder = builder.header(key.as_str(), value.as_str());
    }
    builder.body(Full::new(Bytes::from(body))).map_err(|build_error| {
        Error::new(
            ErrorKind::HttpClientSetupFailed,
            format!("failed to build request: {build_error}"),
        )
    })
}

async fn dispatch<S>(stream: S, request: Request<Full<Bytes>>) -> Result<HttpResponse, Error>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|handshake_error| {
            Error::new(
                ErrorKind::HttpClientSetupFailed,
                format!("HTTP handshake failed: {handshake_error}"),
            )
        })?;

    // The connection future drives I/O for the request; it ends when the
    // exchange completes or the peer goes away.
    tokio::spawn(async move {
        if let Err(connection_error) = connection.await {
            debug!("agent connection ended with error: {connection_error}");
        }
    });

    let response = sender.send_request(request).await.map_err(|send_error| {
        Error::new(
            ErrorKind::HttpRequestFailure,
            format!("failed to send request: {send_error}"),
        )
    })?;

    let status = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .map(|(key, value)| {
            (
                key.as_str().to_lowercase(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();
    let body = response
        .into_body()
        .collect()
        .await
        .map_err(|body_error| {
            Error::new(
                ErrorKind::HttpRequestFailure,
                format!("failed to read response body: {body_error}"),
            )
        })?
        .to_bytes()
        .to_vec();

    Ok(HttpResponse {
        status,
        headers,
        body,
    })
}
