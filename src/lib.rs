// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Harbormaster - a clustering-aware front door for a container-engine HTTP API
//!
//! Harbormaster sits in front of a single engine daemon.  It answers a small
//! set of cluster endpoints itself and forwards everything else to the
//! daemon untouched, including the raw byte streams of `attach` and
//! `exec start`.
//!
//! # Request pipeline
//!
//! ```text
//! listener ─▶ filter chain (log, cors, …) ─▶ router ─┬─▶ create service
//!                                                    ├─▶ hijacker
//!                                                    └─▶ reverse proxy
//! ```
//!
//! - **Router**: `(method, path template)` entries, each also reachable
//!   under `/v{version}`, with the reverse proxy as the fallback.
//! - **Filter chain**: named filters from a closed registry, first name
//!   outermost.
//! - **Reverse proxy**: streams requests and responses verbatim; backend
//!   failures become `502` with the error text.
//! - **Hijacker**: relays the backend's answer to attach / exec-start
//!   (`101`, or a plain `200` raw stream) and then copies raw bytes both
//!   ways until either side closes.
//! - **Server**: one accept loop per bind spec (`tcp://`, `unix://`), first
//!   error wins.
//!
//! # Configuration System
//!
//! Configuration is layered from files (JSON, TOML, YAML) and environment
//! variables (`HARBORMASTER_SERVER__BACKEND=…`).
//!
//! # Custom handlers
//!
//! Every stage of the pipeline is a [`Handler`]:
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use harbormaster::core::{text_response, Context, Handler, ProxyRequest, ProxyResponse};
//! use hyper::StatusCode;
//!
//! #[derive(Debug)]
//! struct NotImplemented;
//!
//! #[async_trait]
//! impl Handler for NotImplemented {
//!     async fn handle(&self, _ctx: &Context, _request: ProxyRequest) -> ProxyResponse {
//!         text_response(StatusCode::NOT_IMPLEMENTED, "Not supported in clustering mode.")
//!     }
//! }
//! ```

// Module declarations
pub mod api;
pub mod config;
pub mod core;
pub mod filters;
pub mod loader;
pub mod logging;
pub mod proxy;
pub mod registry;
pub mod router;
pub mod server;
pub mod tls;
pub mod wire;

// Re-export key types at the crate root for convenience
pub use config::{Config, ConfigError, ConfigProvider, ConfigProviderExt};
pub use self::core::{BackendAddr, Context, Handler, ProxyError, ProxyRequest, ProxyResponse};
pub use filters::{FilterChain, FilterFactory, FilterSpec};
pub use loader::{Harbormaster, HarbormasterLoader, LoaderError};
pub use proxy::{HijackSession, Hijacker, ReverseProxy};
pub use registry::{EtcdRegistry, InMemoryRegistry, Registry, ServiceRecord};
pub use router::{PathParams, Router};
pub use server::{BindSpec, Listener, Server, listen_and_serve};
pub use tls::{TlsFiles, TlsSettings};
