// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Service registry collaborator.
//!
//! The front door writes service records to an external key-value directory
//! and watches it for changes.  The directory itself is not part of this
//! crate; [`Registry`] is the seam.  Two implementations ship with it: an
//! etcd (v2 keys API) client and an in-memory registry for embedding and
//! tests.

mod etcd;


pub use etcd::{EtcdConfig, EtcdRegistry};

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::ProxyError;
use crate::error_fmt;

/// A service record as accepted by `POST /services/create`.
///
/// Only `id` is interpreted; every other field is kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ServiceRecord {
    /// Decode a record from a JSON body.
    ///
    /// Undecodable input, a missing `id` or a non-string `id` all produce
    /// [`ProxyError::MalformedRecord`].
    pub fn from_slice(body: &[u8]) -> Result<Self, ProxyError> {
        serde_json::from_slice(body).map_err(|e| ProxyError::MalformedRecord(e.to_string()))
    }
}

/// External key-value service directory.
#[async_trait]
pub trait Registry: fmt::Debug + Send + Sync {
    /// Store `record` under `service_id`.
    async fn set_service(&self, service_id: &str, record: &ServiceRecord)
        -> Result<(), ProxyError>;

    /// Watch the directory for changes until the watch fails.
    ///
    /// Started once in the background at startup; runs independently of
    /// request serving.
    async fn watch_service_changes(&self) -> Result<(), ProxyError>;
}

/// Start the background watch.  It runs detached from request serving; when
/// it ends, the reason is logged and nothing else happens.
pub fn spawn_watch(registry: Arc<dyn Registry>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = registry.watch_service_changes().await {
            error_fmt!("Registry", "Service watch stopped: {}", e);
        }
    })
}

/// Registry kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    services: RwLock<HashMap<String, ServiceRecord>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a stored record.
    pub fn get(&self, service_id: &str) -> Option<ServiceRecord> {
        self.services
            .read()
            .ok()
            .and_then(|services| services.get(service_id).cloned())
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.services.read().map(|s| s.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Registry for InMemoryRegistry {
    async fn set_service(
        &self,
        service_id: &str,
        record: &ServiceRecord,
    ) -> Result<(), ProxyError> {
        let mut services = self
            .services
            .write()
            .map_err(|e| ProxyError::Registry(e.to_string()))?;
        services.insert(service_id.to_string(), record.clone());
        Ok(())
    }

    async fn watch_service_changes(&self) -> Result<(), ProxyError> {
        // Nothing changes behind our back.
        std::future::pending::<()>().await;
        Ok(())
    }
}
