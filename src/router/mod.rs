// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Request routing.
//!
//! A [`Router`] owns an ordered list of [`RouteEntry`]s, fixed when the
//! router is built.  The first entry whose method and [`PathTemplate`] match
//! wins; every template matches both bare and under a `/v{version}` prefix.
//! A request no entry claims goes to the fallback handler, which for the
//! front door is the reverse proxy.
//!
//! The table is never mutated after [`RouterBuilder::build`], so lookups
//! from concurrent connections need no locking.

mod template;


pub use template::{PathParams, PathTemplate, VERSION_PARAM};

use std::sync::Arc;

use async_trait::async_trait;
use hyper::Method;

use crate::core::{Context, Handler, ProxyError, ProxyRequest, ProxyResponse};
use crate::{debug_fmt, trace_fmt};

/// One `(method, template) -> handler` entry.
#[derive(Debug, Clone)]
pub struct RouteEntry {
    method: Method,
    template: PathTemplate,
    handler: Arc<dyn Handler>,
}

impl RouteEntry {
    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn template(&self) -> &str {
        self.template.as_str()
    }
}

/// Result of resolving a request against the table.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    /// Handler that produces the response
    pub handler: Arc<dyn Handler>,
    /// Captured path parameters (empty for the fallback)
    pub params: PathParams,
    /// Template that matched, `None` for the fallback
    pub template: Option<String>,
}

/// Collects entries before the table is frozen.
#[derive(Debug)]
pub struct RouterBuilder {
    routes: Vec<RouteEntry>,
    fallback: Arc<dyn Handler>,
}

impl RouterBuilder {
    /// Register `handler` for `method` + `template`.
    pub fn route(
        mut self,
        method: Method,
        template: &str,
        handler: Arc<dyn Handler>,
    ) -> Result<Self, ProxyError> {
        debug_fmt!("Router", "Registering HTTP route {} {}", method, template);
        self.routes.push(RouteEntry {
            method,
            template: PathTemplate::new(template)?,
            handler,
        });
        Ok(self)
    }

    pub fn build(self) -> Router {
        Router {
            routes: self.routes,
            fallback: self.fallback,
        }
    }
}

/// Immutable route table with a wildcard fallback.
#[derive(Debug)]
pub struct Router {
    routes: Vec<RouteEntry>,
    fallback: Arc<dyn Handler>,
}

impl Router {
    /// Start a table whose unmatched requests go to `fallback`.
    pub fn builder(fallback: Arc<dyn Handler>) -> RouterBuilder {
        RouterBuilder {
            routes: Vec::new(),
            fallback,
        }
    }

    /// Registered entries, in match order.
    pub fn routes(&self) -> &[RouteEntry] {
        &self.routes
    }

    /// Resolve `(method, path)` to a handler.  Never fails: anything
    /// unclaimed resolves to the fallback.
    pub fn resolve(&self, method: &Method, path: &str) -> RouteMatch {
        for entry in self.routes.iter().filter(|entry| entry.method == *method) {
            if let Some(params) = entry.template.matches(path) {
                trace_fmt!("Router", "{} {} matched {}", method, path, entry.template());
                return RouteMatch {
                    handler: entry.handler.clone(),
                    params,
                    template: Some(entry.template().to_string()),
                };
            }
        }

        trace_fmt!("Router", "{} {} falls through", method, path);
        RouteMatch {
            handler: self.fallback.clone(),
            params: PathParams::default(),
            template: None,
        }
    }
}

#[async_trait]
impl Handler for Router {
    async fn handle(&self, ctx: &Context, mut request: ProxyRequest) -> ProxyResponse {
        let route = self.resolve(request.method(), request.uri().path());
        request.extensions_mut().insert(route.params);
        route.handler.handle(ctx, request).await
    }

    fn takes_connection(&self, method: &Method, path: &str) -> bool {
        self.resolve(method, path)
            .handler
            .takes_connection(method, path)
    }
}
