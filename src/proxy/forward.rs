// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use async_trait::async_trait;
use http_body_util::BodyExt;
use hyper::StatusCode;

use super::backend;
use crate::core::{Context, Handler, ProxyError, ProxyRequest, ProxyResponse, http_error};

/// Transparent reverse proxy to the backend daemon.
///
/// Neither the request nor the response body is buffered; both are streamed
/// chunk by chunk, so chunked transfers (image pulls, log follows) keep
/// their framing semantics.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReverseProxy;

impl ReverseProxy {
    pub fn new() -> Self {
        Self
    }

    /// Forward `request` and return the backend's response unchanged.
    pub async fn forward(
        &self,
        ctx: &Context,
        request: ProxyRequest,
    ) -> Result<ProxyResponse, ProxyError> {
        let response = backend::send(ctx, request).await?;
        Ok(response.map(|body| body.boxed()))
    }
}

#[async_trait]
impl Handler for ReverseProxy {
    async fn handle(&self, ctx: &Context, request: ProxyRequest) -> ProxyResponse {
        match self.forward(ctx, request).await {
            Ok(response) => response,
            Err(e) => http_error(StatusCode::BAD_GATEWAY, e),
        }
    }
}
