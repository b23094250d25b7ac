// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Common test utilities: a front door on an ephemeral port and raw TCP
//! backends for the hijack tests.

use std::sync::Arc;
use std::time::Duration;

use harbormaster::core::{BackendAddr, Context};
use harbormaster::filters::FilterSpec;
use harbormaster::server::{self, BindSpec, Listener};
use harbormaster::tls::TlsSettings;
use harbormaster::{InMemoryRegistry, ProxyError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Upper bound for anything a test waits on.
#[allow(dead_code)]
pub const WAIT: Duration = Duration::from_secs(5);

/// A running front door backed by an in-memory registry.
#[allow(dead_code)]
pub struct TestFrontDoor {
    pub addr: String,
    pub registry: Arc<InMemoryRegistry>,
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<Result<(), ProxyError>>,
}

#[allow(dead_code)]
impl TestFrontDoor {
    /// Serve on `127.0.0.1:0`, forwarding to `backend`.
    pub async fn start(backend: &str, cors: bool) -> Self {
        Self::start_with(backend, cors, TlsSettings::disabled(), &[]).await
    }

    pub async fn start_with(
        backend: &str,
        cors: bool,
        tls: TlsSettings,
        filters: &[FilterSpec],
    ) -> Self {
        let registry = Arc::new(InMemoryRegistry::new());
        let ctx = Context::new(
            BackendAddr::parse(backend).unwrap(),
            "1.16",
            tls,
            registry.clone(),
        );
        let server = server::build(ctx, cors, filters).unwrap();

        let listener = Listener::bind(&BindSpec::parse("127.0.0.1:0")).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            server
                .serve_listeners(vec![listener], async {
                    let _ = stopped.await;
                })
                .await
        });

        Self {
            addr,
            registry,
            stop: Some(stop),
            handle,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Signal shutdown and wait for the manager's verdict.
    pub async fn stop(mut self) -> Result<(), ProxyError> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        tokio::time::timeout(WAIT, &mut self.handle)
            .await
            .expect("front door did not stop")
            .expect("front door task panicked")
    }
}

/// An address nothing listens on.
#[allow(dead_code)]
pub async fn closed_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);
    addr
}

/// Read from `stream` until the end of an HTTP head; returns the head.
#[allow(dead_code)]
pub async fn read_head<S: AsyncRead + Unpin>(stream: &mut S) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let n = stream.read(&mut byte).await.unwrap();
        assert!(n > 0, "connection closed inside HTTP head");
        head.push(byte[0]);
    }
    String::from_utf8(head).unwrap()
}

/// What the raw hijack backend saw.
#[allow(dead_code)]
pub struct HijackBackend {
    pub addr: String,
    /// Request head the backend received
    pub head: oneshot::Receiver<String>,
    /// Fires when the client side of the tunnel was closed
    pub closed: oneshot::Receiver<()>,
}

/// Backend that switches protocols and answers every `PING` with `PONG`.
/// With `hang_up` it closes the tunnel right after the first `PONG`.
#[allow(dead_code)]
pub async fn hijack_backend(hang_up: bool) -> HijackBackend {
    stream_backend(
        b"HTTP/1.1 101 UPGRADED\r\n\
          Content-Type: application/vnd.docker.raw-stream\r\n\
          Connection: Upgrade\r\n\
          Upgrade: tcp\r\n\r\n",
        hang_up,
    )
    .await
}

/// Backend that answers with `reply` and then treats the socket as a raw
/// stream, the way engines without upgrade support do.
#[allow(dead_code)]
pub async fn stream_backend(reply: &'static [u8], hang_up: bool) -> HijackBackend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let (head_tx, head) = oneshot::channel();
    let (closed_tx, closed) = oneshot::channel();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let _ = head_tx.send(read_head(&mut socket).await);

        socket.write_all(reply).await.unwrap();

        let mut buf = [0u8; 64];
        loop {
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if buf[..n].windows(4).any(|w| w == b"PING") {
                        socket.write_all(b"PONG").await.unwrap();
                        if hang_up {
                            let _ = socket.shutdown().await;
                            return;
                        }
                    }
                }
            }
        }
        let _ = closed_tx.send(());
    });

    HijackBackend { addr, head, closed }
}
