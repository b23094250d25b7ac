// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hyper::StatusCode;

use super::*;
use crate::core::{ProxyRequest, ProxyResponse, text_response};
use crate::registry::InMemoryRegistry;

#[derive(Debug)]
struct Hello;

#[async_trait]
impl Handler for Hello {
    async fn handle(&self, _ctx: &Context, request: ProxyRequest) -> ProxyResponse {
        text_response(StatusCode::OK, format!("hello {}", request.uri().path()))
    }
}

fn test_server() -> Server {
    let ctx = Context::new(
        BackendAddr::Tcp("127.0.0.1:1".to_string()),
        "1.16",
        TlsSettings::disabled(),
        Arc::new(InMemoryRegistry::new()),
    );
    Server::new(ctx, Arc::new(Hello))
}

#[test]
fn test_bind_spec_parse() {
    assert_eq!(
        BindSpec::parse("tcp://0.0.0.0:2376"),
        BindSpec {
            scheme: "tcp".to_string(),
            addr: "0.0.0.0:2376".to_string()
        }
    );
    assert_eq!(BindSpec::parse("127.0.0.1:2376").scheme, DEFAULT_SCHEME);
    assert_eq!(
        BindSpec::parse("unix:///var/run/harbor.sock").addr,
        "/var/run/harbor.sock"
    );
    assert_eq!(BindSpec::parse("foo://bar").scheme, "foo");
    assert_eq!(BindSpec::parse("1.2.3.4:5").to_string(), "tcp://1.2.3.4:5");
}

#[tokio::test]
async fn test_unsupported_scheme() {
    let err = Listener::bind(&BindSpec::parse("foo://bar")).await.unwrap_err();
    assert!(matches!(err, ProxyError::UnsupportedProtocol(ref s) if s == "foo"));
    assert_eq!(err.to_string(), "unsupported protocol: \"foo\"");
}

#[tokio::test]
async fn test_port_conflict_on_engine_port() {
    // Another process may already hold the port; then it is taken either way.
    let _holder = tokio::net::TcpListener::bind("127.0.0.1:2375").await;

    let err = Listener::bind(&BindSpec::parse("tcp://127.0.0.1:2375"))
        .await
        .unwrap_err();
    assert!(matches!(err, ProxyError::PortConflict { .. }));
    assert!(
        err.to_string()
            .contains("is the container engine already running on this machine?")
    );
}

#[tokio::test]
async fn test_plain_bind_error_elsewhere() {
    let holder = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = holder.local_addr().unwrap().to_string();

    let err = Listener::bind(&BindSpec::parse(&addr)).await.unwrap_err();
    assert!(matches!(err, ProxyError::Bind { .. }));
    assert!(!err.to_string().contains("container engine"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_unix_listener_replaces_stale_socket() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("harbor.sock");
    std::fs::write(&path, b"stale").unwrap();

    let spec = BindSpec::parse(&format!("unix://{}", path.display()));
    let listener = Listener::bind(&spec).await.unwrap();
    assert_eq!(listener.local_addr().unwrap(), path.display().to_string());

    let mode = std::fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o660);
}

#[tokio::test]
async fn test_serve_reports_first_listener_error() {
    let server = test_server();
    let hosts = vec!["127.0.0.1:0".to_string(), "foo://bar".to_string()];

    let result = tokio::time::timeout(Duration::from_secs(5), server.serve(&hosts)).await;
    let err = result.expect("manager should return").unwrap_err();
    assert!(matches!(err, ProxyError::UnsupportedProtocol(_)));
}

#[tokio::test]
async fn test_serve_without_hosts_returns_ok() {
    assert!(test_server().serve(&[]).await.is_ok());
}

#[tokio::test]
async fn test_shutdown_signal_stops_every_listener() {
    let server = test_server();
    let hosts = vec!["127.0.0.1:0".to_string(), "127.0.0.1:0".to_string()];

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        server.serve_with_shutdown(&hosts, tokio::time::sleep(Duration::from_millis(50))),
    )
    .await;
    assert!(result.expect("shutdown should finish").is_ok());
}

#[tokio::test]
async fn test_serve_listeners_handles_requests() {
    let listener = Listener::bind(&BindSpec::parse("127.0.0.1:0")).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

    let server = test_server();
    let serving = tokio::spawn(async move {
        server
            .serve_listeners(vec![listener], async {
                let _ = stop_rx.await;
            })
            .await
    });

    let body = reqwest::get(format!("http://{addr}/v1.16/info"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "hello /v1.16/info");

    stop_tx.send(()).unwrap();
    let outcome = tokio::time::timeout(Duration::from_secs(5), serving)
        .await
        .unwrap()
        .unwrap();
    assert!(outcome.is_ok());
}

#[test]
fn test_build_rejects_unknown_filter() {
    let ctx = test_server().ctx;
    let err = build(ctx, true, &[FilterSpec::named("gzip")]).unwrap_err();
    assert!(matches!(err, ProxyError::UnknownFilter(_)));
}
