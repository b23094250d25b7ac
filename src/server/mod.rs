// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Listener manager.
//!
//! The server is a *thin* wrapper around **hyper-util**.  It owns the
//! listening sockets and hands every request, as a [`ProxyRequest`], to one
//! shared handler (normally the filter chain around the router).
//!
//! **Protocol support**
//! Uses `hyper_util::server::conn::auto::Builder` with upgrades enabled, so
//! HTTP/1.1 connections can be hijacked and HTTP/2 is still accepted.
//!
//! The first request head of each connection is read before hyper sees it.
//! When the handler says that request takes its connection over (attach,
//! exec-start), the connection is served below hyper; see [`crate::wire`].
//!
//! ## Error fan-in
//! Every listener runs in its own task.  Creating the listener happens inside
//! that task, so bind failures travel the same path as everything else: the
//! manager returns the first error any listener reports and aborts the
//! others.  `Ok(())` is returned only when every listener has stopped
//! cleanly, which in practice means a shutdown signal was received.

mod listener;

#[cfg(test)]
mod tests;

pub use listener::{BindSpec, DEFAULT_SCHEME, Listener};

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use http_body_util::BodyExt;
use hyper::Request;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::api;
use crate::core::{
    BackendAddr, BoxedStream, ClientConnection, Context, Handler, ProxyError, empty_body,
};
use crate::filters::{FilterChain, FilterSpec};
use crate::registry::{EtcdRegistry, Registry, spawn_watch};
use crate::tls::TlsSettings;
use crate::wire::{self, PrefixedStream, RequestHead};
use crate::{debug_fmt, error_fmt, info_fmt, warn_fmt};

/// How long open connections get to finish after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Serves one handler on any number of listeners.
#[derive(Debug, Clone)]
pub struct Server {
    ctx: Context,
    handler: Arc<dyn Handler>,
}

/// Where a listener task gets its socket from.
enum Source {
    Spec(BindSpec),
    Bound(Listener),
}

impl Server {
    pub fn new(ctx: Context, handler: Arc<dyn Handler>) -> Self {
        Self { ctx, handler }
    }

    /// Listen on every bind spec and serve until the first failure.
    pub async fn serve(&self, hosts: &[String]) -> Result<(), ProxyError> {
        self.serve_with_shutdown(hosts, std::future::pending()).await
    }

    /// Like [`serve`](Self::serve), but stop every listener once `signal`
    /// resolves.
    pub async fn serve_with_shutdown<F>(&self, hosts: &[String], signal: F) -> Result<(), ProxyError>
    where
        F: Future<Output = ()> + Send,
    {
        let sources = hosts
            .iter()
            .map(|host| Source::Spec(BindSpec::parse(host)))
            .collect();
        self.run(sources, signal).await
    }

    /// Serve on listeners that are already bound.
    pub async fn serve_listeners<F>(&self, listeners: Vec<Listener>, signal: F) -> Result<(), ProxyError>
    where
        F: Future<Output = ()> + Send,
    {
        self.run(listeners.into_iter().map(Source::Bound).collect(), signal)
            .await
    }

    async fn run<F>(&self, sources: Vec<Source>, signal: F) -> Result<(), ProxyError>
    where
        F: Future<Output = ()> + Send,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut listeners = JoinSet::new();

        for source in sources {
            let server = self.clone();
            let shutdown = shutdown_rx.clone();
            listeners.spawn(async move {
                let listener = match source {
                    Source::Spec(spec) => {
                        info_fmt!("Server", "Listening for HTTP on {}", spec);
                        Listener::bind(&spec).await?
                    }
                    Source::Bound(listener) => listener,
                };
                server.accept_loop(listener, shutdown).await
            });
        }

        tokio::pin!(signal);
        let mut signalled = false;

        loop {
            tokio::select! {
                _ = &mut signal, if !signalled => {
                    info_fmt!("Server", "Shutdown requested; stopping {} listener(s)", listeners.len());
                    signalled = true;
                    let _ = shutdown_tx.send(true);
                }
                joined = listeners.join_next() => match joined {
                    None => return Ok(()),
                    Some(Ok(Ok(()))) => continue,
                    Some(Ok(Err(e))) => {
                        error_fmt!("Server", "Listener failed: {}", e);
                        // Dropping the set aborts the remaining listeners.
                        return Err(e);
                    }
                    Some(Err(e)) => {
                        return Err(ProxyError::Other(format!("listener task failed: {e}")));
                    }
                },
            }
        }
    }

    async fn accept_loop(
        &self,
        listener: Listener,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ProxyError> {
        let local = listener.local_addr()?;
        let acceptor = self.ctx.tls.acceptor();
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            error_fmt!("Server", "Accept error on {}: {}", local, e);
                            continue;
                        }
                    };
                    debug_fmt!("Server", "Connection from {} on {}", peer, local);

                    let server = self.clone();
                    let acceptor = acceptor.clone();
                    let shutdown = shutdown.clone();
                    connections.spawn(async move {
                        let stream: BoxedStream = match acceptor {
                            Some(acceptor) => match acceptor.accept(stream).await {
                                Ok(tls) => Box::new(tls),
                                Err(e) => {
                                    warn_fmt!("Server", "TLS handshake with {} failed: {}", peer, e);
                                    return;
                                }
                            },
                            None => stream,
                        };
                        server.serve_connection(stream, shutdown).await;
                    });
                    while connections.try_join_next().is_some() {}
                }
            }
        }

        info_fmt!("Server", "Stopped listening on {}; draining {} connection(s)", local, connections.len());
        let drain = async { while connections.join_next().await.is_some() {} };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            warn_fmt!("Server", "Connections on {} did not drain in time", local);
            connections.shutdown().await;
        }
        Ok(())
    }

    async fn serve_connection(&self, mut stream: BoxedStream, mut shutdown: watch::Receiver<bool>) {
        let mut buffered = BytesMut::with_capacity(1024);
        let head = tokio::select! {
            head = wire::read_request_head(&mut stream, &mut buffered) => head,
            _ = shutdown.changed() => return,
        };
        let head = match head {
            Ok(head) => head,
            Err(e) => {
                debug_fmt!("Server", "Connection closed before a request: {}", e);
                return;
            }
        };

        if let Some(head) = head {
            if self.handler.takes_connection(&head.method, head.uri.path()) {
                self.serve_raw(head, buffered.freeze(), stream).await;
                return;
            }
        }

        let stream: BoxedStream = Box::new(PrefixedStream::new(buffered.freeze(), stream));
        self.serve_http(stream, shutdown).await;
    }

    /// Serve one request whose handler takes the connection over.
    async fn serve_raw(&self, head: RequestHead, buffered: Bytes, stream: BoxedStream) {
        let connection = ClientConnection::new(buffered, stream);

        let mut request = Request::new(empty_body());
        *request.method_mut() = head.method;
        *request.uri_mut() = head.uri;
        *request.version_mut() = head.version;
        *request.headers_mut() = head.headers;
        request.extensions_mut().insert(connection.clone());

        let response = self.handler.handle(&self.ctx, request).await;

        // Nobody took it: answer on the connection and close it.
        if let Some(mut client) = connection.take() {
            if let Err(e) = wire::write_response(&mut client.stream, response).await {
                debug_fmt!("Server", "Failed to write response: {}", e);
            }
        }
    }

    async fn serve_http(&self, stream: BoxedStream, mut shutdown: watch::Receiver<bool>) {
        let ctx = self.ctx.clone();
        let handler = self.handler.clone();
        let service = service_fn(move |request: Request<Incoming>| {
            let ctx = ctx.clone();
            let handler = handler.clone();
            async move {
                let request = request.map(|body| body.boxed());
                Ok::<_, Infallible>(handler.handle(&ctx, request).await)
            }
        });

        let builder = AutoBuilder::new(TokioExecutor::new());
        let connection = builder.serve_connection_with_upgrades(TokioIo::new(stream), service);
        let mut connection = std::pin::pin!(connection);

        let result = tokio::select! {
            result = connection.as_mut() => result,
            _ = shutdown.changed() => {
                connection.as_mut().graceful_shutdown();
                connection.await
            }
        };
        if let Err(e) = result {
            debug_fmt!("Server", "Connection closed with error: {}", e);
        }
    }
}

/// Wire the whole front door together and serve until the first fatal error.
///
/// Builds the shared [`Context`] with an etcd registry client, starts the
/// registry watch in the background, wraps the router in the `log` filter
/// (and `cors` when enabled) and listens on every host.
pub async fn listen_and_serve(
    backend: &str,
    hosts: &[String],
    api_version: &str,
    enable_cors: bool,
    registry_endpoint: &str,
    tls: TlsSettings,
) -> Result<(), ProxyError> {
    let registry: Arc<dyn Registry> = Arc::new(EtcdRegistry::new(registry_endpoint));
    let ctx = Context::new(BackendAddr::parse(backend)?, api_version, tls, registry.clone());
    let server = build(ctx, enable_cors, &[])?;
    spawn_watch(registry);
    server.serve(hosts).await
}

/// Build a [`Server`] for `ctx`: router, default filters plus `extra`.
pub fn build(ctx: Context, enable_cors: bool, extra: &[FilterSpec]) -> Result<Server, ProxyError> {
    let router = api::create_router()?;

    let mut specs = vec![FilterSpec::named("log")];
    if enable_cors {
        specs.push(FilterSpec::named("cors"));
    }
    specs.extend_from_slice(extra);

    let chain = FilterChain::build(&specs, Arc::new(router))?;
    Ok(Server::new(ctx, Arc::new(chain)))
}
