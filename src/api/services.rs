// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use async_trait::async_trait;
use http_body_util::BodyExt;
use hyper::{Response, StatusCode};

use crate::core::{Context, Handler, ProxyError, ProxyRequest, ProxyResponse, empty_body};
use crate::registry::ServiceRecord;
use crate::{debug_fmt, error_fmt};

/// `POST /services/create`: store the posted service record in the registry.
///
/// The answer is always `201 Created`.  A body that does not decode into a
/// record is logged and dropped without touching the registry, and a
/// registry failure is logged too; neither changes the status.
#[derive(Debug, Default, Clone, Copy)]
pub struct CreateService;

impl CreateService {
    pub fn new() -> Self {
        Self
    }

    async fn store(&self, ctx: &Context, request: ProxyRequest) -> Result<(), ProxyError> {
        let body = request.into_body().collect().await?.to_bytes();
        let record = ServiceRecord::from_slice(&body)?;
        debug_fmt!("CreateService", "Registering service {}", record.id);
        ctx.registry.set_service(&record.id, &record).await
    }
}

#[async_trait]
impl Handler for CreateService {
    async fn handle(&self, ctx: &Context, request: ProxyRequest) -> ProxyResponse {
        if let Err(e) = self.store(ctx, request).await {
            error_fmt!("CreateService", "{}", e);
        }

        let mut response = Response::new(empty_body());
        *response.status_mut() = StatusCode::CREATED;
        response
    }
}
