// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bind specs and listening sockets.

use std::fmt;
use std::io;
#[cfg(unix)]
use std::path::PathBuf;

use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;

use crate::core::{BoxedStream, DEFAULT_ENGINE_PORT, ProxyError};

/// Scheme assumed when a bind spec has none.
pub const DEFAULT_SCHEME: &str = "tcp";

/// A `scheme://address` pair naming one endpoint to listen on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindSpec {
    pub scheme: String,
    pub addr: String,
}

impl BindSpec {
    /// Split `tcp://host:port`, `unix:///path` or a bare `host:port`.
    ///
    /// The scheme is not validated here; an unknown scheme is reported when
    /// the listener is created.
    pub fn parse(spec: &str) -> Self {
        match spec.split_once("://") {
            Some((scheme, addr)) => Self {
                scheme: scheme.to_string(),
                addr: addr.to_string(),
            },
            None => Self {
                scheme: DEFAULT_SCHEME.to_string(),
                addr: spec.to_string(),
            },
        }
    }
}

impl fmt::Display for BindSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.addr)
    }
}

/// A bound listening socket.
#[derive(Debug)]
pub enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix { listener: UnixListener, path: PathBuf },
}

impl Listener {
    /// Create the listener for `spec`.
    pub async fn bind(spec: &BindSpec) -> Result<Self, ProxyError> {
        match spec.scheme.as_str() {
            "tcp" => TcpListener::bind(spec.addr.as_str())
                .await
                .map(Listener::Tcp)
                .map_err(|e| bind_error(&spec.addr, e)),
            #[cfg(unix)]
            "unix" => bind_unix(&spec.addr),
            other => Err(ProxyError::UnsupportedProtocol(other.to_string())),
        }
    }

    /// Printable local address (socket address or socket path).
    pub fn local_addr(&self) -> Result<String, ProxyError> {
        match self {
            Listener::Tcp(listener) => Ok(listener.local_addr()?.to_string()),
            #[cfg(unix)]
            Listener::Unix { path, .. } => Ok(path.display().to_string()),
        }
    }

    /// Accept the next connection together with a peer description.
    pub async fn accept(&self) -> io::Result<(BoxedStream, String)> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                stream.set_nodelay(true)?;
                Ok((Box::new(stream), peer.to_string()))
            }
            #[cfg(unix)]
            Listener::Unix { listener, path } => {
                let (stream, _) = listener.accept().await?;
                Ok((Box::new(stream), path.display().to_string()))
            }
        }
    }
}

/// Map a bind failure, recognising a clash on the engine's own port.
fn bind_error(addr: &str, source: io::Error) -> ProxyError {
    if source.kind() == io::ErrorKind::AddrInUse && addr.contains(DEFAULT_ENGINE_PORT) {
        ProxyError::PortConflict {
            addr: addr.to_string(),
            source,
        }
    } else {
        ProxyError::Bind {
            addr: addr.to_string(),
            source,
        }
    }
}

#[cfg(unix)]
fn bind_unix(addr: &str) -> Result<Listener, ProxyError> {
    use std::os::unix::fs::PermissionsExt;

    let path = PathBuf::from(addr);
    match std::fs::remove_file(&path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(bind_error(addr, e)),
    }

    let listener = UnixListener::bind(&path).map_err(|e| bind_error(addr, e))?;
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o660))
        .map_err(|e| bind_error(addr, e))?;

    Ok(Listener::Unix { listener, path })
}
