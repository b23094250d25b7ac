// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! TLS material.
//!
//! The front door uses one set of TLS settings for both directions: the
//! listener side terminates client TLS, the dial side talks TLS to the
//! backend.  Either half may be absent.  Loading is a thin adapter over
//! PEM files; nothing here is consulted per request except the prepared
//! acceptor / connector.

use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use serde::{Deserialize, Serialize};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::core::ProxyError;

/// Paths to PEM material, as found under the `tls` configuration key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsFiles {
    /// Certificate chain presented to clients
    #[serde(default)]
    pub cert: Option<String>,
    /// Private key matching `cert`
    #[serde(default)]
    pub key: Option<String>,
    /// CA bundle used to verify the backend; setting it enables backend TLS
    #[serde(default)]
    pub ca: Option<String>,
    /// Dial the backend over TLS (defaults to `true` when `ca` is set)
    #[serde(default)]
    pub verify_backend: Option<bool>,
}

/// Prepared TLS configuration for listeners and backend dials.
#[derive(Clone, Default)]
pub struct TlsSettings {
    server: Option<Arc<ServerConfig>>,
    client: Option<Arc<ClientConfig>>,
}

impl fmt::Debug for TlsSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsSettings")
            .field("server", &self.server.is_some())
            .field("client", &self.client.is_some())
            .finish()
    }
}

impl TlsSettings {
    /// No TLS in either direction.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Terminate client TLS with the given configuration.
    ///
    /// ALPN is pinned to `http/1.1`; hijacked sessions require HTTP/1.
    pub fn with_server(mut self, mut config: ServerConfig) -> Self {
        config.alpn_protocols = vec![b"http/1.1".to_vec()];
        self.server = Some(Arc::new(config));
        self
    }

    /// Dial the backend over TLS with the given configuration.
    pub fn with_client(mut self, config: ClientConfig) -> Self {
        self.client = Some(Arc::new(config));
        self
    }

    /// Acceptor for listeners, if listener TLS is configured.
    pub fn acceptor(&self) -> Option<TlsAcceptor> {
        self.server.clone().map(TlsAcceptor::from)
    }

    /// Connector for backend dials, if backend TLS is configured.
    pub fn connector(&self) -> Option<TlsConnector> {
        self.client.clone().map(TlsConnector::from)
    }

    /// Build settings from PEM files.
    ///
    /// `cert`/`key` serve listeners and double as the client certificate
    /// presented to a backend that asks for one.
    pub fn from_files(files: &TlsFiles) -> Result<Self, ProxyError> {
        let mut settings = Self::disabled();

        let identity = match (&files.cert, &files.key) {
            (Some(cert), Some(key)) => Some((load_certs(Path::new(cert))?, load_key(Path::new(key))?)),
            (None, None) => None,
            _ => {
                return Err(ProxyError::Tls(
                    "both tls.cert and tls.key must be set".to_string(),
                ));
            }
        };

        if let Some((chain, key)) = &identity {
            let config = ServerConfig::builder_with_provider(provider())
                .with_safe_default_protocol_versions()?
                .with_no_client_auth()
                .with_single_cert(chain.clone(), key.clone_key())?;
            settings = settings.with_server(config);
        }

        if let Some(ca) = &files.ca {
            if files.verify_backend.unwrap_or(true) {
                let mut roots = RootCertStore::empty();
                for cert in load_certs(Path::new(ca))? {
                    roots.add(cert)?;
                }
                let builder = ClientConfig::builder_with_provider(provider())
                    .with_safe_default_protocol_versions()?
                    .with_root_certificates(roots);
                let config = match identity {
                    Some((chain, key)) => builder.with_client_auth_cert(chain, key)?,
                    None => builder.with_no_client_auth(),
                };
                settings = settings.with_client(config);
            }
        }

        Ok(settings)
    }
}

fn provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ProxyError> {
    let mut reader = BufReader::new(File::open(path)?);
    let certs = rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(ProxyError::Tls(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, ProxyError> {
    let mut reader = BufReader::new(File::open(path)?);
    rustls_pemfile::private_key(&mut reader)?
        .ok_or_else(|| ProxyError::Tls(format!("no private key found in {}", path.display())))
}
