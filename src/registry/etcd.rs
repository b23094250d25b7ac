// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! etcd v2 keys-API registry.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{Registry, ServiceRecord};
use crate::core::ProxyError;
use crate::{debug_fmt, info_fmt, warn_fmt};

fn default_prefix() -> String {
    "/services".to_string()
}

/// Configuration for the etcd registry (`registry` configuration key).
#[derive(Debug, Clone, Deserialize)]
pub struct EtcdConfig {
    /// Base URL of the etcd member
    pub endpoint: String,
    /// Key prefix under which service records live
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

/// Registry backed by an etcd member speaking the v2 keys API.
#[derive(Debug, Clone)]
pub struct EtcdRegistry {
    client: reqwest::Client,
    endpoint: String,
    prefix: String,
}

/// The subset of a v2 watch event we look at.
#[derive(Debug, Deserialize)]
struct WatchEvent {
    action: String,
    node: WatchNode,
}

#[derive(Debug, Deserialize)]
struct WatchNode {
    key: String,
    #[serde(rename = "modifiedIndex", default)]
    modified_index: u64,
}

impl EtcdRegistry {
    pub fn new(endpoint: &str) -> Self {
        Self::with_config(EtcdConfig {
            endpoint: endpoint.to_string(),
            prefix: default_prefix(),
        })
    }

    pub fn with_config(config: EtcdConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            prefix: format!("/{}", config.prefix.trim_matches('/')),
        }
    }

    fn keys_url(&self, suffix: &str) -> String {
        format!("{}/v2/keys{}{}", self.endpoint, self.prefix, suffix)
    }
}

#[async_trait]
impl Registry for EtcdRegistry {
    async fn set_service(
        &self,
        service_id: &str,
        record: &ServiceRecord,
    ) -> Result<(), ProxyError> {
        let value = serde_json::to_string(record)
            .map_err(|e| ProxyError::Registry(format!("failed to encode record: {e}")))?;

        let resp = self
            .client
            .put(self.keys_url(&format!("/{service_id}")))
            .form(&[("value", value)])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(ProxyError::Registry(format!(
                "etcd rejected write of {service_id}: {}",
                resp.status()
            )));
        }

        debug_fmt!("Registry", "Stored service {}", service_id);
        Ok(())
    }

    async fn watch_service_changes(&self) -> Result<(), ProxyError> {
        let mut wait_index: Option<u64> = None;
        info_fmt!("Registry", "Watching {} for service changes", self.keys_url(""));

        loop {
            let mut query = vec![
                ("wait", "true".to_string()),
                ("recursive", "true".to_string()),
            ];
            if let Some(index) = wait_index {
                query.push(("waitIndex", index.to_string()));
            }

            let resp = self.client.get(self.keys_url("")).query(&query).send().await?;
            if !resp.status().is_success() {
                return Err(ProxyError::Registry(format!(
                    "etcd watch failed: {}",
                    resp.status()
                )));
            }

            let body: Value = resp.json().await?;
            match serde_json::from_value::<WatchEvent>(body) {
                Ok(event) => {
                    info_fmt!(
                        "Registry",
                        "Service change: {} {}",
                        event.action,
                        event.node.key
                    );
                    wait_index = Some(event.node.modified_index + 1);
                }
                Err(e) => warn_fmt!("Registry", "Ignoring unreadable watch event: {}", e),
            }
        }
    }
}
