// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;

use bytes::Bytes;
use http_body_util::BodyExt;

use super::*;
use crate::registry::InMemoryRegistry;

#[test]
fn test_backend_addr_parse() {
    assert_eq!(
        BackendAddr::parse("127.0.0.1:2375").unwrap(),
        BackendAddr::Tcp("127.0.0.1:2375".to_string())
    );
    assert_eq!(
        BackendAddr::parse("tcp://node1:2375").unwrap(),
        BackendAddr::Tcp("node1:2375".to_string())
    );
    assert_eq!(
        BackendAddr::parse("unix:///var/run/docker.sock").unwrap(),
        BackendAddr::Unix(PathBuf::from("/var/run/docker.sock"))
    );

    let err = BackendAddr::parse("udp://node1:2375").unwrap_err();
    assert!(matches!(err, ProxyError::UnsupportedProtocol(ref s) if s == "udp"));
}

#[test]
fn test_backend_addr_host() {
    assert_eq!(
        BackendAddr::parse("tcp://node1:2376").unwrap().host(),
        Some("node1")
    );
    assert_eq!(BackendAddr::parse("[::1]:2376").unwrap().host(), Some("::1"));
    assert_eq!(BackendAddr::parse("node1").unwrap().host(), Some("node1"));
    assert_eq!(BackendAddr::parse("unix:///tmp/d.sock").unwrap().host(), None);
}

#[test]
fn test_backend_addr_display() {
    assert_eq!(
        BackendAddr::parse("node1:2375").unwrap().to_string(),
        "tcp://node1:2375"
    );
    assert_eq!(
        BackendAddr::parse("unix:///tmp/d.sock").unwrap().to_string(),
        "unix:///tmp/d.sock"
    );
}

#[test]
fn test_error_messages() {
    let conflict = ProxyError::PortConflict {
        addr: "0.0.0.0:2375".to_string(),
        source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
    };
    let message = conflict.to_string();
    assert!(message.ends_with(
        "is the container engine already running on this machine? Try using a different port"
    ));

    let bind = ProxyError::Bind {
        addr: "0.0.0.0:80".to_string(),
        source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
    };
    assert!(bind.to_string().starts_with("failed to bind 0.0.0.0:80"));

    assert_eq!(
        ProxyError::UnknownFilter("gzip".to_string()).to_string(),
        "unknown filter: gzip"
    );
}

#[test]
fn test_config_error_converts() {
    let err: ProxyError = crate::config::error::ConfigError::NotFound.into();
    assert!(matches!(err, ProxyError::ConfigError(_)));
}

#[tokio::test]
async fn test_text_response() {
    let response = text_response(StatusCode::BAD_GATEWAY, "dial failed");
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(
        response.headers()[hyper::header::CONTENT_TYPE],
        "text/plain; charset=utf-8"
    );
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"dial failed");
}

#[tokio::test]
async fn test_http_error_uses_error_text() {
    let response = http_error(
        StatusCode::BAD_GATEWAY,
        ProxyError::Backend("connection refused".to_string()),
    );
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"backend error: connection refused");
}

#[tokio::test]
async fn test_bodies() {
    let empty = empty_body().collect().await.unwrap().to_bytes();
    assert!(empty.is_empty());

    let full = full_body("abc").collect().await.unwrap().to_bytes();
    assert_eq!(&full[..], b"abc");
}

#[test]
fn test_context_debug_hides_registry() {
    let ctx = Context::new(
        BackendAddr::Tcp("node1:2375".to_string()),
        DEFAULT_API_VERSION,
        TlsSettings::disabled(),
        Arc::new(InMemoryRegistry::new()),
    );
    let debug = format!("{ctx:?}");
    assert!(debug.contains("node1:2375"));
    assert!(debug.contains("1.16"));
    assert!(!debug.contains("services"));
}

#[tokio::test]
async fn test_client_connection_is_taken_once() {
    let (_peer, stream) = tokio::io::duplex(64);
    let connection =
        ClientConnection::new(Bytes::from_static(b"GET / HTTP/1.1\r\n\r\n"), Box::new(stream));
    let shared = connection.clone();

    let client = shared.take().unwrap();
    assert_eq!(client.buffered, Bytes::from_static(b"GET / HTTP/1.1\r\n\r\n"));
    assert!(connection.take().is_none());
    assert!(format!("{connection:?}").contains("present: false"));

    connection.restore(client);
    assert!(shared.take().is_some());
}
