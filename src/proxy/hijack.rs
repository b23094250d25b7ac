// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Connection hijacking for attach and exec-start.
//!
//! Engines answer these requests in one of two ways: `101 Switching
//! Protocols` after an `Upgrade` handshake, or a plain `200 OK` with a
//! raw-stream content type followed by raw bytes on the same socket.  Either
//! way nothing after the response head is HTTP any more.
//!
//! When the request arrives with a [`ClientConnection`] (the server read it
//! below hyper), the request bytes are replayed to the backend verbatim and
//! the backend's answer is relayed byte for byte, whatever its status.  A
//! [`HijackSession`] then copies in both directions until either side is
//! done.
//!
//! Requests served by hyper (a hijack route reached later on a keep-alive
//! connection) can only be taken over through a `101`; any other answer is
//! relayed as an ordinary response.

use async_trait::async_trait;
use bytes::BytesMut;
use http_body_util::BodyExt;
use hyper::{Method, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncWriteExt, copy, split};

use super::backend;
use crate::core::{
    BoxedStream, ClientConnection, Context, Handler, ProxyError, ProxyRequest, ProxyResponse,
    empty_body, http_error,
};
use crate::wire;
use crate::{debug_fmt, info_fmt, warn_fmt};

/// Handler for routes whose connection is taken over.
#[derive(Debug, Default, Clone, Copy)]
pub struct Hijacker;

impl Hijacker {
    pub fn new() -> Self {
        Self
    }

    /// Replay the raw request to the backend, relay its answer and start a
    /// session.  Until the backend has answered, the client connection is
    /// left in place so the caller can still respond on it.
    async fn take_over(&self, ctx: &Context, connection: ClientConnection, path: &str) -> ProxyResponse {
        let mut backend = match backend::dial(ctx).await {
            Ok(stream) => stream,
            Err(e) => return http_error(StatusCode::BAD_GATEWAY, e),
        };
        let Some(mut client) = connection.take() else {
            return http_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                ProxyError::Other("client connection already taken".to_string()),
            );
        };

        let mut reply = BytesMut::with_capacity(1024);
        let status = match replay(&mut backend, &client.buffered, &mut reply).await {
            Ok(status) => status,
            Err(e) => {
                connection.restore(client);
                return http_error(StatusCode::BAD_GATEWAY, e);
            }
        };

        if let Err(e) = client.stream.write_all(&reply).await {
            debug_fmt!("Hijack", "Client for {} went away: {}", path, e);
        } else {
            debug_fmt!("Hijack", "Backend answered {} for {}, streaming raw", status, path);
            let path = path.to_string();
            tokio::spawn(async move {
                if let Err(e) = HijackSession::new(client.stream, backend).run().await {
                    debug_fmt!("Hijack", "Session for {} ended with error: {}", path, e);
                }
            });
        }

        let mut response = Response::new(empty_body());
        *response.status_mut() = status;
        response
    }

    /// Take over through hyper's upgrade mechanism; only a `101` qualifies.
    async fn upgrade(&self, ctx: &Context, mut request: ProxyRequest, path: String) -> ProxyResponse {
        let client_upgrade = hyper::upgrade::on(&mut request);

        let mut response = match backend::send(ctx, request).await {
            Ok(response) => response,
            Err(e) => return http_error(StatusCode::BAD_GATEWAY, e),
        };

        if response.status() != StatusCode::SWITCHING_PROTOCOLS {
            debug_fmt!(
                "Hijack",
                "Backend answered {} for {}, relaying",
                response.status(),
                path
            );
            return response.map(|body| body.boxed());
        }

        let backend_conn = match hyper::upgrade::on(&mut response).await {
            Ok(upgraded) => upgraded,
            Err(e) => return http_error(StatusCode::INTERNAL_SERVER_ERROR, ProxyError::from(e)),
        };

        tokio::spawn(async move {
            match client_upgrade.await {
                Ok(client_conn) => {
                    let session = HijackSession::new(
                        Box::new(TokioIo::new(client_conn)),
                        Box::new(TokioIo::new(backend_conn)),
                    );
                    if let Err(e) = session.run().await {
                        debug_fmt!("Hijack", "Session for {} ended with error: {}", path, e);
                    }
                }
                Err(e) => warn_fmt!("Hijack", "Client upgrade for {} failed: {}", path, e),
            }
        });

        let (parts, _) = response.into_parts();
        Response::from_parts(parts, empty_body())
    }
}

/// Send the client's bytes as they are and read the backend's response head.
/// Whatever was read past the head stays in `reply`.
async fn replay(
    backend: &mut BoxedStream,
    request: &[u8],
    reply: &mut BytesMut,
) -> Result<StatusCode, ProxyError> {
    backend.write_all(request).await?;
    wire::read_response_head(backend, reply)
        .await?
        .ok_or_else(|| ProxyError::Backend("backend sent no HTTP response".to_string()))
}

#[async_trait]
impl Handler for Hijacker {
    async fn handle(&self, ctx: &Context, mut request: ProxyRequest) -> ProxyResponse {
        let path = request.uri().path().to_string();
        match request.extensions_mut().remove::<ClientConnection>() {
            Some(connection) => self.take_over(ctx, connection, &path).await,
            None => self.upgrade(ctx, request, path).await,
        }
    }

    fn takes_connection(&self, _method: &Method, _path: &str) -> bool {
        true
    }
}

/// A live raw tunnel between a client and the backend.
///
/// The session owns both connections for its whole lifetime and exposes no
/// way to write an HTTP response.
pub struct HijackSession {
    client: BoxedStream,
    backend: BoxedStream,
}

impl std::fmt::Debug for HijackSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HijackSession").finish_non_exhaustive()
    }
}

impl HijackSession {
    pub fn new(client: BoxedStream, backend: BoxedStream) -> Self {
        Self { client, backend }
    }

    /// Copy bytes both ways until either direction finishes, then close
    /// both connections.
    pub async fn run(self) -> Result<(), ProxyError> {
        let (mut client_read, mut client_write) = split(self.client);
        let (mut backend_read, mut backend_write) = split(self.backend);

        let outcome = tokio::select! {
            sent = copy(&mut client_read, &mut backend_write) => ("client", sent),
            received = copy(&mut backend_read, &mut client_write) => ("backend", received),
        };

        let _ = client_write.shutdown().await;
        let _ = backend_write.shutdown().await;

        match outcome {
            (side, Ok(bytes)) => {
                info_fmt!("Hijack", "Session closed by {} after {} bytes", side, bytes);
                Ok(())
            }
            (_, Err(e)) => Err(e.into()),
        }
    }
}
