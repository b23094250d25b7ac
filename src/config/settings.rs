// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Typed views over well-known configuration keys.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Config, ConfigError};
use crate::core::DEFAULT_API_VERSION;

/// Front-door settings (`server.*`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Backend daemon address
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Bind specs (`tcp://host:port`, `unix:///path`, bare `host:port`)
    #[serde(default = "default_hosts")]
    pub hosts: Vec<String>,

    /// API version string
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Add the CORS filter to the chain
    #[serde(default)]
    pub cors: bool,
}

fn default_backend() -> String {
    "127.0.0.1:2375".to_string()
}

fn default_hosts() -> Vec<String> {
    vec!["tcp://127.0.0.1:2376".to_string()]
}

fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            hosts: default_hosts(),
            api_version: default_api_version(),
            cors: false,
        }
    }
}

/// Registry settings (`registry.*`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrySettings {
    /// etcd endpoint
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Key prefix for service records
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_endpoint() -> String {
    "http://127.0.0.1:4001".to_string()
}

fn default_prefix() -> String {
    "/services".to_string()
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            prefix: default_prefix(),
        }
    }
}

impl ServerSettings {
    /// Read `server.*`, key by key, so that each layer may override a single
    /// field.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            backend: config.get_or_default("server.backend", defaults.backend)?,
            hosts: config.get_or_default("server.hosts", defaults.hosts)?,
            api_version: match config.get::<Value>("server.api_version")? {
                None => defaults.api_version,
                Some(Value::String(version)) => version,
                Some(Value::Number(version)) if !version.is_f64() => version.to_string(),
                // A float has already lost its formatting: 1.20 reads as 1.2.
                Some(Value::Number(version)) => {
                    return Err(ConfigError::ParseError(format!(
                        "server.api_version must be a string, got the number {version}; \
                         quote it, e.g. api_version = \"{version}\""
                    )));
                }
                Some(other) => {
                    return Err(ConfigError::ParseError(format!(
                        "server.api_version must be a string, got {other}"
                    )));
                }
            },
            cors: config.get_or_default("server.cors", defaults.cors)?,
        })
    }
}

impl RegistrySettings {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            endpoint: config.get_or_default("registry.endpoint", defaults.endpoint)?,
            prefix: config.get_or_default("registry.prefix", defaults.prefix)?,
        })
    }
}
