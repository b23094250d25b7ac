// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The cluster API surface.
//!
//! Only three `POST` routes are handled here; everything else is the
//! backend's business and reaches it through the reverse proxy.
//!
//! | route                           | handler           |
//! |---------------------------------|-------------------|
//! | `/services/create`              | [`CreateService`] |
//! | `/containers/{name}/attach`     | [`Hijacker`]      |
//! | `/exec/{execid}/start`          | [`Hijacker`]      |

mod services;


pub use services::CreateService;

use std::sync::Arc;

use hyper::Method;

use crate::core::ProxyError;
use crate::proxy::{Hijacker, ReverseProxy};
use crate::router::Router;

/// Build the route table.  Every route is also reachable under
/// `/v{version}`.
pub fn create_router() -> Result<Router, ProxyError> {
    let hijacker = Arc::new(Hijacker::new());

    Ok(Router::builder(Arc::new(ReverseProxy::new()))
        .route(Method::POST, "/services/create", Arc::new(CreateService::new()))?
        .route(Method::POST, "/containers/{name:.*}/attach", hijacker.clone())?
        .route(Method::POST, "/exec/{execid:.*}/start", hijacker)?
        .build())
}
