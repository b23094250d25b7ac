// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use bytes::{Bytes, BytesMut};
use hyper::header::CONTENT_TYPE;
use hyper::{Method, StatusCode, Version};
use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};

use super::*;
use crate::core::{BoxedStream, text_response};

#[test]
fn test_parse_complete_request() {
    let raw = b"POST /v1.16/containers/web/attach?stream=1 HTTP/1.1\r\n\
                Host: localhost\r\n\
                Content-Length: 4\r\n\r\nbody";

    let Parsed::Complete(head) = parse_request(raw) else {
        panic!("request head not parsed");
    };
    assert_eq!(head.method, Method::POST);
    assert_eq!(head.uri.path(), "/v1.16/containers/web/attach");
    assert_eq!(head.uri.query(), Some("stream=1"));
    assert_eq!(head.version, Version::HTTP_11);
    assert_eq!(head.headers["host"], "localhost");
    assert_eq!(head.len, raw.len() - 4);
}

#[test]
fn test_parse_partial_and_foreign_requests() {
    assert!(matches!(
        parse_request(b"GET /_ping HTTP/1.1\r\nHost: loc"),
        Parsed::Partial
    ));
    assert!(matches!(
        parse_request(b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n"),
        Parsed::Invalid
    ));
    assert!(matches!(parse_request(b"\x16\x03\x01\x02\x00"), Parsed::Invalid));
}

#[test]
fn test_parse_response_status() {
    let raw = b"HTTP/1.1 200 OK\r\nContent-Type: application/vnd.docker.raw-stream\r\n\r\n";
    assert!(matches!(parse_response(raw), Parsed::Complete(StatusCode::OK)));
    assert!(matches!(parse_response(b"HTTP/1.1 101 UPGR"), Parsed::Partial));
}

#[tokio::test]
async fn test_read_request_head_keeps_everything_read() {
    let (mut client, mut server) = duplex(1024);
    client
        .write_all(b"POST /exec/1/start HTTP/1.1\r\nHost: x\r\n\r\n{}")
        .await
        .unwrap();

    let mut buf = BytesMut::new();
    let head = read_request_head(&mut server, &mut buf).await.unwrap().unwrap();
    assert_eq!(head.uri.path(), "/exec/1/start");
    assert_eq!(&buf[head.len..], b"{}");
}

#[tokio::test]
async fn test_read_head_gives_up_at_end_of_stream() {
    let (mut client, mut server) = duplex(1024);
    client.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();
    drop(client);

    let mut buf = BytesMut::new();
    assert!(read_request_head(&mut server, &mut buf).await.unwrap().is_none());
    assert_eq!(&buf[..], b"GET / HTTP/1.1\r\n");
}

#[tokio::test]
async fn test_read_response_head_leaves_stream_bytes() {
    let (mut backend, mut front) = duplex(1024);
    backend
        .write_all(b"HTTP/1.1 200 OK\r\n\r\nraw bytes")
        .await
        .unwrap();

    let mut buf = BytesMut::new();
    let status = read_response_head(&mut front, &mut buf).await.unwrap();
    assert_eq!(status, Some(StatusCode::OK));
    assert!(buf.ends_with(b"raw bytes"));
}

#[tokio::test]
async fn test_prefixed_stream_replays_prefix_first() {
    let (mut peer, inner) = duplex(1024);
    let inner: BoxedStream = Box::new(inner);
    let mut stream = PrefixedStream::new(Bytes::from_static(b"GET / "), inner);

    peer.write_all(b"HTTP/1.1\r\n").await.unwrap();
    drop(peer);

    let mut read = Vec::new();
    stream.read_to_end(&mut read).await.unwrap();
    assert_eq!(read, b"GET / HTTP/1.1\r\n");
}

#[tokio::test]
async fn test_prefixed_stream_writes_through() {
    let (mut peer, inner) = duplex(1024);
    let inner: BoxedStream = Box::new(inner);
    let mut stream = PrefixedStream::new(Bytes::from_static(b"ignored"), inner);

    stream.write_all(b"reply").await.unwrap();
    let mut read = [0u8; 5];
    peer.read_exact(&mut read).await.unwrap();
    assert_eq!(&read, b"reply");
}

#[tokio::test]
async fn test_write_response_frames_with_length_and_closes() {
    let (mut client, mut server) = duplex(1024);
    let mut response = text_response(StatusCode::BAD_GATEWAY, "dial tcp: refused");
    response
        .headers_mut()
        .insert(CONTENT_TYPE, "text/plain".parse().unwrap());

    write_response(&mut server, response).await.unwrap();

    let mut read = Vec::new();
    client.read_to_end(&mut read).await.unwrap();
    let text = String::from_utf8(read).unwrap();
    assert!(text.starts_with("HTTP/1.1 502 Bad Gateway\r\n"), "got {text}");
    assert!(text.contains("content-type: text/plain\r\n"));
    assert!(text.contains("content-length: 17\r\n"));
    assert!(text.contains("connection: close\r\n"));
    assert!(text.ends_with("\r\n\r\ndial tcp: refused"));
}
