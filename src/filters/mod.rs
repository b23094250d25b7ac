// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Built-in filters
//!
//! A filter is a [`Handler`] that wraps the next stage of the pipeline.  The
//! set of filters is **closed**: only the names in the registry below can be
//! referenced, and naming anything else fails chain construction.
//!
//! | name   | effect                                                      |
//! |--------|-------------------------------------------------------------|
//! | `log`  | tags the request with an id, logs method, path, status and latency |
//! | `cors` | answers preflights, adds `Access-Control-Allow-*` to responses |
//!
//! [`FilterChain::build`] wraps in reverse so the first name is outermost:
//! it sees the request first and the response last.


use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use hyper::header::{self, HeaderMap, HeaderValue};
use hyper::{Method, StatusCode};
use log::Level;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::core::{Context, Handler, ProxyError, ProxyRequest, ProxyResponse, empty_body};
use crate::logging::structured::generate_request_id;
use crate::{debug_fmt, error_fmt, info_fmt, trace_fmt, warn_fmt};

/// Constructor signature of a registered filter: configuration plus the
/// stage it wraps.
pub type FilterConstructor =
    fn(serde_json::Value, Arc<dyn Handler>) -> Result<Arc<dyn Handler>, ProxyError>;

/// Known-name registry, fixed at compile time.
static FILTER_REGISTRY: Lazy<HashMap<&'static str, FilterConstructor>> = Lazy::new(|| {
    let mut registry: HashMap<&'static str, FilterConstructor> = HashMap::new();
    registry.insert(LogFilter::NAME, LogFilter::construct);
    registry.insert(CorsFilter::NAME, CorsFilter::construct);
    registry
});

/// Names accepted by [`FilterFactory::create_filter`], sorted.
pub fn known_filters() -> Vec<&'static str> {
    let mut names: Vec<_> = FILTER_REGISTRY.keys().copied().collect();
    names.sort_unstable();
    names
}

/// Request id attached to the request extensions by the `log` filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

fn parse_config<T: serde::de::DeserializeOwned + Default>(
    name: &str,
    config: serde_json::Value,
) -> Result<T, ProxyError> {
    if config.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(config).map_err(|e| {
        let err = ProxyError::FilterError(format!("Invalid {name} filter config: {e}"));
        error_fmt!("Filter", "{}", err);
        err
    })
}

/// Configuration for the `log` filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogFilterConfig {
    /// Whether to log request headers
    #[serde(default = "default_false")]
    pub log_request_headers: bool,

    /// Whether to log response headers
    #[serde(default = "default_false")]
    pub log_response_headers: bool,

    /// Log level to use
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_false() -> bool {
    false
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogFilterConfig {
    fn default() -> Self {
        Self {
            log_request_headers: false,
            log_response_headers: false,
            log_level: default_log_level(),
        }
    }
}

/// A filter that logs every request passing through the chain.
#[derive(Debug)]
pub struct LogFilter {
    config: LogFilterConfig,
    inner: Arc<dyn Handler>,
}

impl LogFilter {
    pub const NAME: &'static str = "log";

    /// Create a new logging filter with the given configuration.
    pub fn new(config: LogFilterConfig, inner: Arc<dyn Handler>) -> Self {
        Self { config, inner }
    }

    fn construct(
        config: serde_json::Value,
        inner: Arc<dyn Handler>,
    ) -> Result<Arc<dyn Handler>, ProxyError> {
        let config = parse_config(Self::NAME, config)?;
        Ok(Arc::new(Self::new(config, inner)))
    }

    /// Get the log level from the configuration.
    fn level(&self) -> Level {
        match self.config.log_level.to_lowercase().as_str() {
            "error" => Level::Error,
            "warn" => Level::Warn,
            "debug" => Level::Debug,
            "trace" => Level::Trace,
            _ => Level::Info,
        }
    }

    /// Log a message at the configured log level.
    fn log(&self, message: &str) {
        match self.level() {
            Level::Error => error_fmt!("LogFilter", "{}", message),
            Level::Warn => warn_fmt!("LogFilter", "{}", message),
            Level::Info => info_fmt!("LogFilter", "{}", message),
            Level::Debug => debug_fmt!("LogFilter", "{}", message),
            Level::Trace => trace_fmt!("LogFilter", "{}", message),
        }
    }

    fn log_headers(&self, id: &str, direction: &str, headers: &HeaderMap) {
        for (name, value) in headers {
            if let Ok(value) = value.to_str() {
                self.log(&format!("{id} {direction} {name}: {value}"));
            }
        }
    }
}

#[async_trait]
impl Handler for LogFilter {
    async fn handle(&self, ctx: &Context, mut request: ProxyRequest) -> ProxyResponse {
        let id = generate_request_id();
        let method = request.method().clone();
        let path = request.uri().path().to_string();
        let started = Instant::now();

        self.log(&format!("{id} >> {method} {path}"));
        if self.config.log_request_headers {
            self.log_headers(&id, ">>", request.headers());
        }
        request.extensions_mut().insert(RequestId(id.clone()));

        let response = self.inner.handle(ctx, request).await;

        if self.config.log_response_headers {
            self.log_headers(&id, "<<", response.headers());
        }
        self.log(&format!(
            "{id} << {method} {path} {} ({} ms)",
            response.status().as_u16(),
            started.elapsed().as_millis()
        ));
        response
    }

    fn takes_connection(&self, method: &Method, path: &str) -> bool {
        self.inner.takes_connection(method, path)
    }
}

/// Configuration for the `cors` filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsFilterConfig {
    /// Value of `Access-Control-Allow-Origin`
    #[serde(default = "default_allow_origin")]
    pub allow_origin: String,

    /// Value of `Access-Control-Allow-Headers`
    #[serde(default = "default_allow_headers")]
    pub allow_headers: String,

    /// Value of `Access-Control-Allow-Methods`
    #[serde(default = "default_allow_methods")]
    pub allow_methods: String,
}

fn default_allow_origin() -> String {
    "*".to_string()
}

fn default_allow_headers() -> String {
    "Origin, X-Requested-With, Content-Type, Accept, X-Registry-Auth".to_string()
}

fn default_allow_methods() -> String {
    "GET, POST, DELETE, PUT, OPTIONS, HEAD".to_string()
}

impl Default for CorsFilterConfig {
    fn default() -> Self {
        Self {
            allow_origin: default_allow_origin(),
            allow_headers: default_allow_headers(),
            allow_methods: default_allow_methods(),
        }
    }
}

/// A filter that makes the API usable from browsers.
#[derive(Debug)]
pub struct CorsFilter {
    allow: Vec<(header::HeaderName, HeaderValue)>,
    inner: Arc<dyn Handler>,
}

impl CorsFilter {
    pub const NAME: &'static str = "cors";

    pub fn new(config: CorsFilterConfig, inner: Arc<dyn Handler>) -> Result<Self, ProxyError> {
        let value = |v: &str| {
            HeaderValue::from_str(v)
                .map_err(|e| ProxyError::FilterError(format!("Invalid cors header '{v}': {e}")))
        };

        Ok(Self {
            allow: vec![
                (
                    header::ACCESS_CONTROL_ALLOW_ORIGIN,
                    value(&config.allow_origin)?,
                ),
                (
                    header::ACCESS_CONTROL_ALLOW_HEADERS,
                    value(&config.allow_headers)?,
                ),
                (
                    header::ACCESS_CONTROL_ALLOW_METHODS,
                    value(&config.allow_methods)?,
                ),
            ],
            inner,
        })
    }

    fn construct(
        config: serde_json::Value,
        inner: Arc<dyn Handler>,
    ) -> Result<Arc<dyn Handler>, ProxyError> {
        let config = parse_config(Self::NAME, config)?;
        Ok(Arc::new(Self::new(config, inner)?))
    }

    fn is_preflight(request: &ProxyRequest) -> bool {
        *request.method() == Method::OPTIONS
            && request.headers().contains_key(header::ORIGIN)
            && request
                .headers()
                .contains_key(header::ACCESS_CONTROL_REQUEST_METHOD)
    }

    fn write_headers(&self, headers: &mut HeaderMap) {
        for (name, value) in &self.allow {
            headers.insert(name.clone(), value.clone());
        }
    }
}

#[async_trait]
impl Handler for CorsFilter {
    async fn handle(&self, ctx: &Context, request: ProxyRequest) -> ProxyResponse {
        if Self::is_preflight(&request) {
            debug_fmt!("CorsFilter", "Answering preflight for {}", request.uri().path());
            let mut response = ProxyResponse::new(empty_body());
            *response.status_mut() = StatusCode::OK;
            self.write_headers(response.headers_mut());
            return response;
        }

        let has_origin = request.headers().contains_key(header::ORIGIN);
        let mut response = self.inner.handle(ctx, request).await;
        // Upgraded responses already handed the connection over.
        if has_origin && response.status() != StatusCode::SWITCHING_PROTOCOLS {
            self.write_headers(response.headers_mut());
        }
        response
    }

    fn takes_connection(&self, method: &Method, path: &str) -> bool {
        // Preflights are answered here.
        *method != Method::OPTIONS && self.inner.takes_connection(method, path)
    }
}

/// One entry of a configured filter list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    /// Registered filter name
    #[serde(rename = "type")]
    pub filter_type: String,

    /// Filter-specific configuration
    #[serde(default)]
    pub config: serde_json::Value,
}

impl FilterSpec {
    /// A spec with default configuration.
    pub fn named(name: &str) -> Self {
        Self {
            filter_type: name.to_string(),
            config: serde_json::Value::Null,
        }
    }
}

/// Factory for creating filters from the registry.
#[derive(Debug)]
pub struct FilterFactory;

impl FilterFactory {
    /// Create the filter `name` wrapping `inner`.
    pub fn create_filter(
        name: &str,
        config: serde_json::Value,
        inner: Arc<dyn Handler>,
    ) -> Result<Arc<dyn Handler>, ProxyError> {
        debug_fmt!(
            "Filter",
            "Creating filter of type '{}' with config: {}",
            name,
            config
        );

        match FILTER_REGISTRY.get(name) {
            Some(ctor) => ctor(config, inner),
            None => {
                let err = ProxyError::UnknownFilter(name.to_string());
                error_fmt!("Filter", "{} (known: {})", err, known_filters().join(", "));
                Err(err)
            }
        }
    }
}

/// An assembled, immutable chain of filters around the router.
#[derive(Debug)]
pub struct FilterChain {
    names: Vec<String>,
    head: Arc<dyn Handler>,
}

impl FilterChain {
    /// Wrap `inner` in the filters of `specs`, first spec outermost.
    pub fn build(specs: &[FilterSpec], inner: Arc<dyn Handler>) -> Result<Self, ProxyError> {
        let mut head = inner;
        for spec in specs.iter().rev() {
            head = FilterFactory::create_filter(&spec.filter_type, spec.config.clone(), head)?;
        }

        let names: Vec<String> = specs.iter().map(|s| s.filter_type.clone()).collect();
        info_fmt!("Filter", "Filter chain: [{}]", names.join(", "));
        Ok(Self { names, head })
    }

    /// Build from bare names with default configuration.
    pub fn from_names(names: &[&str], inner: Arc<dyn Handler>) -> Result<Self, ProxyError> {
        let specs: Vec<FilterSpec> = names.iter().map(|n| FilterSpec::named(n)).collect();
        Self::build(&specs, inner)
    }

    /// Filter names, outermost first.
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

#[async_trait]
impl Handler for FilterChain {
    async fn handle(&self, ctx: &Context, request: ProxyRequest) -> ProxyResponse {
        self.head.handle(ctx, request).await
    }

    fn takes_connection(&self, method: &Method, path: &str) -> bool {
        self.head.takes_connection(method, path)
    }
}
