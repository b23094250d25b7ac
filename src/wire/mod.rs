// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! HTTP/1 below hyper.
//!
//! Attach and exec-start connections are served without hyper's response
//! framing: older engines answer them with a plain `200 OK` and then treat
//! the socket as a raw stream.  To get there, the server reads the first
//! request head of every connection itself.  Connections that are not taken
//! over get those bytes back through a [`PrefixedStream`] and are served by
//! hyper as usual.

#[cfg(test)]
mod tests;

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes, BytesMut};
use http_body_util::BodyExt;
use hyper::header::{CONNECTION, CONTENT_LENGTH, HeaderName, HeaderValue, TRANSFER_ENCODING};
use hyper::{HeaderMap, Method, StatusCode, Uri, Version};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};

use crate::core::{BoxedStream, ProxyError, ProxyResponse};

/// Longest head we are willing to parse ourselves.  Anything longer is left
/// to hyper, which enforces its own limits.
pub const MAX_HEAD_LEN: usize = 16 * 1024;

const MAX_HEADERS: usize = 64;

/// A parsed request line plus headers.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
    /// Length of the head in bytes, terminating blank line included
    pub len: usize,
}

/// Outcome of parsing the start of a buffer.
#[derive(Debug)]
pub enum Parsed<T> {
    Complete(T),
    Partial,
    /// Not HTTP/1 (an HTTP/2 preface, TLS garbage, ...)
    Invalid,
}

fn convert_headers(raw: &[httparse::Header<'_>]) -> Option<HeaderMap> {
    let mut headers = HeaderMap::with_capacity(raw.len());
    for header in raw {
        let name = HeaderName::from_bytes(header.name.as_bytes()).ok()?;
        let value = HeaderValue::from_bytes(header.value).ok()?;
        headers.append(name, value);
    }
    Some(headers)
}

fn version(minor: Option<u8>) -> Version {
    match minor {
        Some(0) => Version::HTTP_10,
        _ => Version::HTTP_11,
    }
}

/// Parse a request head at the start of `buf`.
pub fn parse_request(buf: &[u8]) -> Parsed<RequestHead> {
    let mut raw = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut request = httparse::Request::new(&mut raw);

    match request.parse(buf) {
        Ok(httparse::Status::Complete(len)) => {
            let method = request.method.and_then(|m| Method::from_bytes(m.as_bytes()).ok());
            let uri = request.path.and_then(|p| p.parse::<Uri>().ok());
            match (method, uri, convert_headers(request.headers)) {
                (Some(method), Some(uri), Some(headers)) => Parsed::Complete(RequestHead {
                    method,
                    uri,
                    version: version(request.version),
                    headers,
                    len,
                }),
                _ => Parsed::Invalid,
            }
        }
        Ok(httparse::Status::Partial) => Parsed::Partial,
        Err(_) => Parsed::Invalid,
    }
}

/// Parse a response head at the start of `buf`, returning its status.
pub fn parse_response(buf: &[u8]) -> Parsed<StatusCode> {
    let mut raw = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut raw);

    match response.parse(buf) {
        Ok(httparse::Status::Complete(_)) => response
            .code
            .and_then(|code| StatusCode::from_u16(code).ok())
            .map_or(Parsed::Invalid, Parsed::Complete),
        Ok(httparse::Status::Partial) => Parsed::Partial,
        Err(_) => Parsed::Invalid,
    }
}

/// Read from `stream` into `buf` until `parse` completes or gives up.
///
/// Returns `None` on end of stream, on a head that is not HTTP/1 and on a
/// head longer than [`MAX_HEAD_LEN`].  Everything read stays in `buf`.
async fn read_head<S, T>(
    stream: &mut S,
    buf: &mut BytesMut,
    parse: fn(&[u8]) -> Parsed<T>,
) -> io::Result<Option<T>>
where
    S: AsyncRead + Unpin + ?Sized,
{
    loop {
        if !buf.is_empty() {
            match parse(&buf[..]) {
                Parsed::Complete(head) => return Ok(Some(head)),
                Parsed::Invalid => return Ok(None),
                Parsed::Partial if buf.len() >= MAX_HEAD_LEN => return Ok(None),
                Parsed::Partial => {}
            }
        }
        if stream.read_buf(buf).await? == 0 {
            return Ok(None);
        }
    }
}

/// Read the first request head of a client connection.
pub async fn read_request_head<S>(stream: &mut S, buf: &mut BytesMut) -> io::Result<Option<RequestHead>>
where
    S: AsyncRead + Unpin + ?Sized,
{
    read_head(stream, buf, parse_request).await
}

/// Read a backend response head and return its status.
pub async fn read_response_head<S>(stream: &mut S, buf: &mut BytesMut) -> io::Result<Option<StatusCode>>
where
    S: AsyncRead + Unpin + ?Sized,
{
    read_head(stream, buf, parse_response).await
}

/// A stream that replays already-read bytes before reading on.
pub struct PrefixedStream {
    prefix: Bytes,
    inner: BoxedStream,
}

impl PrefixedStream {
    pub fn new(prefix: Bytes, inner: BoxedStream) -> Self {
        Self { prefix, inner }
    }
}

impl AsyncRead for PrefixedStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.prefix.is_empty() {
            let n = this.prefix.len().min(buf.remaining());
            buf.put_slice(&this.prefix[..n]);
            this.prefix.advance(n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for PrefixedStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, data)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// Write `response` as a complete HTTP/1.1 message and close the write side.
///
/// Used on connections served below hyper when nothing took them over.  The
/// body is collected so it can be sent with a `Content-Length`.
pub async fn write_response<W>(stream: &mut W, response: ProxyResponse) -> Result<(), ProxyError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let (parts, body) = response.into_parts();
    let body = body.collect().await?.to_bytes();

    let mut head = BytesMut::with_capacity(256);
    head.extend_from_slice(
        format!(
            "HTTP/1.1 {} {}\r\n",
            parts.status.as_u16(),
            parts.status.canonical_reason().unwrap_or("")
        )
        .as_bytes(),
    );
    for (name, value) in &parts.headers {
        if name == CONTENT_LENGTH || name == TRANSFER_ENCODING || name == CONNECTION {
            continue;
        }
        head.extend_from_slice(name.as_str().as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(value.as_bytes());
        head.extend_from_slice(b"\r\n");
    }
    head.extend_from_slice(format!("content-length: {}\r\n", body.len()).as_bytes());
    head.extend_from_slice(b"connection: close\r\n\r\n");

    stream.write_all(&head).await?;
    stream.write_all(&body).await?;
    stream.shutdown().await?;
    Ok(())
}
