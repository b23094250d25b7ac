// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Dialing and talking HTTP/1 to the backend daemon.

use hyper::body::Incoming;
use hyper::client::conn::http1;
use hyper::header::{HOST, HeaderValue};
use hyper::{Request, Response, Uri, Version};
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use tokio::net::TcpStream;

use crate::core::{BackendAddr, BoxedStream, Context, ProxyError, ProxyRequest};
use crate::{debug_fmt, trace_fmt};

/// Open a fresh connection to the backend, wrapped in TLS when a client
/// configuration is present.
pub async fn dial(ctx: &Context) -> Result<BoxedStream, ProxyError> {
    trace_fmt!("Backend", "Dialing {}", ctx.backend);

    match &ctx.backend {
        BackendAddr::Tcp(addr) => {
            let tcp = TcpStream::connect(addr.as_str())
                .await
                .map_err(|e| ProxyError::Backend(format!("dial {}: {e}", ctx.backend)))?;
            tcp.set_nodelay(true)?;

            let Some(connector) = ctx.tls.connector() else {
                return Ok(Box::new(tcp));
            };
            let host = ctx.backend.host().unwrap_or_default().to_string();
            let name = ServerName::try_from(host)
                .map_err(|e| ProxyError::Tls(format!("invalid backend server name: {e}")))?;
            let tls = connector
                .connect(name, tcp)
                .await
                .map_err(|e| ProxyError::Backend(format!("tls handshake with {}: {e}", ctx.backend)))?;
            Ok(Box::new(tls))
        }
        #[cfg(unix)]
        BackendAddr::Unix(path) => {
            let stream = tokio::net::UnixStream::connect(path)
                .await
                .map_err(|e| ProxyError::Backend(format!("dial {}: {e}", ctx.backend)))?;
            Ok(Box::new(stream))
        }
        #[cfg(not(unix))]
        BackendAddr::Unix(_) => Err(ProxyError::UnsupportedProtocol("unix".to_string())),
    }
}

/// Rewrite only what HTTP/1 framing towards the backend requires: an
/// origin-form target, an HTTP/1.x version and a `Host` header.  Method,
/// path, query, the remaining headers and the body pass through untouched.
pub fn outbound(ctx: &Context, request: ProxyRequest) -> ProxyRequest {
    let (mut parts, body) = request.into_parts();

    if let Some(path_and_query) = parts.uri.path_and_query().cloned() {
        parts.uri = Uri::from(path_and_query);
    }
    if parts.version != Version::HTTP_10 {
        parts.version = Version::HTTP_11;
    }
    if !parts.headers.contains_key(HOST) {
        let host = match &ctx.backend {
            BackendAddr::Tcp(addr) => HeaderValue::from_str(addr).ok(),
            BackendAddr::Unix(_) => None,
        };
        parts
            .headers
            .insert(HOST, host.unwrap_or(HeaderValue::from_static("localhost")));
    }

    Request::from_parts(parts, body)
}

/// Send `request` to the backend over a new connection and return the
/// response head with a streaming body.
///
/// The connection is driven with upgrades enabled so a `101` answer can be
/// taken over by the caller.
pub async fn send(ctx: &Context, request: ProxyRequest) -> Result<Response<Incoming>, ProxyError> {
    let stream = dial(ctx).await?;
    let (mut sender, connection) = http1::handshake(TokioIo::new(stream)).await?;

    tokio::spawn(async move {
        if let Err(e) = connection.with_upgrades().await {
            debug_fmt!("Backend", "Backend connection ended: {}", e);
        }
    });

    let request = outbound(ctx, request);
    trace_fmt!(
        "Backend",
        "-> {} {}",
        request.method(),
        request.uri()
    );
    Ok(sender.send_request(request).await?)
}
