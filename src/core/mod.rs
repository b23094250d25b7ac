// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Core primitives – errors, bodies, handlers & the shared context.
//!
//! Everything that physically moves through the interception pipeline is
//! defined in this module.  No protocol-level logic lives here; that sits in
//! `server` (listeners), `proxy` (backend IO) and `filters` (behaviour).

#[cfg(test)]
mod tests;

use std::convert::Infallible;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::{Method, Request, Response, StatusCode};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::registry::Registry;
use crate::tls::TlsSettings;

/// Conventional port of an unencrypted container-engine daemon.
pub const DEFAULT_ENGINE_PORT: &str = ":2375";

/// API version advertised when none is configured.
pub const DEFAULT_API_VERSION: &str = "1.16";

/// Errors that can occur while building or running the front door.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP protocol error on either side of the proxy
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// A listener could not be created
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The conventional engine port is taken, most likely by the engine itself
    #[error("{source}: is the container engine already running on this machine? Try using a different port")]
    PortConflict {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Bind spec scheme is neither `tcp` nor `unix`
    #[error("unsupported protocol: {0:?}")]
    UnsupportedProtocol(String),

    /// Filter name outside the known registry
    #[error("unknown filter: {0}")]
    UnknownFilter(String),

    /// Filter construction failed
    #[error("filter error: {0}")]
    FilterError(String),

    /// Backend could not be reached or talked to
    #[error("backend error: {0}")]
    Backend(String),

    /// A service record body could not be decoded
    #[error("malformed service record: {0}")]
    MalformedRecord(String),

    /// External registry failure
    #[error("registry error: {0}")]
    Registry(String),

    /// TLS material or handshake error
    #[error("TLS error: {0}")]
    Tls(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<crate::config::error::ConfigError> for ProxyError {
    fn from(err: crate::config::error::ConfigError) -> Self {
        ProxyError::ConfigError(err.to_string())
    }
}

impl From<rustls::Error> for ProxyError {
    fn from(err: rustls::Error) -> Self {
        ProxyError::Tls(err.to_string())
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        ProxyError::Registry(err.to_string())
    }
}

/// Streaming body used for every request and response in the pipeline.
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// A request as seen by filters and handlers.
pub type ProxyRequest = Request<ProxyBody>;

/// A response as produced by filters and handlers.
pub type ProxyResponse = Response<ProxyBody>;

/// Anything a connection can be carried over: plain TCP, TLS or a unix
/// socket, on either side of the proxy.
pub trait IoStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> IoStream for T {}

/// A type-erased connection.
pub type BoxedStream = Box<dyn IoStream>;

/// The client side of a connection served below HTTP framing.
pub struct RawClient {
    /// Everything read from the client so far, request head included
    pub buffered: Bytes,
    /// The connection, positioned right after `buffered`
    pub stream: BoxedStream,
}

/// Slot holding a [`RawClient`] until a handler takes it over.
///
/// Requests read below hyper carry one in their extensions.  Whoever takes
/// the client out owns the connection; if nobody does, the server writes
/// the handler's response on it and closes it.
#[derive(Clone)]
pub struct ClientConnection(Arc<Mutex<Option<RawClient>>>);

impl ClientConnection {
    pub fn new(buffered: Bytes, stream: BoxedStream) -> Self {
        Self(Arc::new(Mutex::new(Some(RawClient { buffered, stream }))))
    }

    /// Take the connection over.  `None` if it is already gone.
    pub fn take(&self) -> Option<RawClient> {
        self.0.lock().ok().and_then(|mut slot| slot.take())
    }

    /// Hand a connection back, e.g. when the backend could not be reached.
    pub fn restore(&self, client: RawClient) {
        if let Ok(mut slot) = self.0.lock() {
            *slot = Some(client);
        }
    }
}

impl fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let present = self.0.lock().map(|slot| slot.is_some()).unwrap_or(false);
        f.debug_struct("ClientConnection")
            .field("present", &present)
            .finish()
    }
}

/// A body that yields nothing.
pub fn empty_body() -> ProxyBody {
    Empty::<Bytes>::new()
        .map_err(|never: Infallible| match never {})
        .boxed()
}

/// A body holding a single in-memory chunk.
pub fn full_body<T: Into<Bytes>>(chunk: T) -> ProxyBody {
    Full::new(chunk.into())
        .map_err(|never: Infallible| match never {})
        .boxed()
}

/// Build a plain-text response.  Used for errors produced by the front door
/// itself, never for relayed backend responses.
pub fn text_response(status: StatusCode, message: impl Into<String>) -> ProxyResponse {
    let mut response = Response::new(full_body(message.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// Log an HTTP error produced by the front door and turn it into a response.
pub fn http_error(status: StatusCode, err: impl fmt::Display) -> ProxyResponse {
    log::error!("HTTP error (status {}): {}", status.as_u16(), err);
    text_response(status, err.to_string())
}

/// Where the backend daemon lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendAddr {
    /// `host:port` reached over TCP (optionally TLS)
    Tcp(String),
    /// Filesystem path of a local socket
    Unix(PathBuf),
}

impl BackendAddr {
    /// Parse `tcp://host:port`, `unix:///path` or a bare `host:port`.
    pub fn parse(addr: &str) -> Result<Self, ProxyError> {
        match addr.split_once("://") {
            None => Ok(BackendAddr::Tcp(addr.to_string())),
            Some(("tcp", rest)) => Ok(BackendAddr::Tcp(rest.to_string())),
            Some(("unix", rest)) => Ok(BackendAddr::Unix(PathBuf::from(rest))),
            Some((scheme, _)) => Err(ProxyError::UnsupportedProtocol(scheme.to_string())),
        }
    }

    /// Host part used for TLS server-name verification.
    pub fn host(&self) -> Option<&str> {
        match self {
            BackendAddr::Tcp(addr) => {
                let host = addr.rsplit_once(':').map_or(addr.as_str(), |(host, _)| host);
                Some(host.trim_start_matches('[').trim_end_matches(']'))
            }
            BackendAddr::Unix(_) => None,
        }
    }
}

impl fmt::Display for BackendAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendAddr::Tcp(addr) => write!(f, "tcp://{addr}"),
            BackendAddr::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

/// Immutable configuration created once at startup and shared by reference
/// with every concurrent handler.
#[derive(Clone)]
pub struct Context {
    /// Backend daemon address
    pub backend: BackendAddr,
    /// API version string advertised by this front door
    pub api_version: String,
    /// TLS material for listeners and backend dials
    pub tls: TlsSettings,
    /// External service registry
    pub registry: Arc<dyn Registry>,
}

impl Context {
    pub fn new(
        backend: BackendAddr,
        api_version: impl Into<String>,
        tls: TlsSettings,
        registry: Arc<dyn Registry>,
    ) -> Self {
        Self {
            backend,
            api_version: api_version.into(),
            tls,
            registry,
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("backend", &self.backend)
            .field("api_version", &self.api_version)
            .field("tls", &self.tls)
            .finish_non_exhaustive()
    }
}

/// One stage of the request pipeline.
///
/// A handler is handed the shared [`Context`] and the request, and produces
/// exactly one response.  The status code the handler settled on is the
/// status of that response.  Filters are handlers that wrap another handler.
#[async_trait]
pub trait Handler: fmt::Debug + Send + Sync {
    /// Handle one request.
    async fn handle(&self, ctx: &Context, request: ProxyRequest) -> ProxyResponse;

    /// Whether requests for `(method, path)` end up taking the client
    /// connection over.  The server reads those below hyper and attaches a
    /// [`ClientConnection`].  Wrapping handlers delegate to what they wrap.
    fn takes_connection(&self, _method: &Method, _path: &str) -> bool {
        false
    }
}
