// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Configuration subsystem
//!
//! A running front door is created from an ordered list of
//! [`ConfigProvider`]s; later providers override earlier ones.  Typical
//! stacking order:
//!
//! 1. `FileConfigProvider` – `harbormaster.{toml,json,yaml}`
//! 2. `EnvConfigProvider`  – `HARBORMASTER_SERVER__BACKEND=unix:///var/run/docker.sock`
//!
//! | key | default | description |
//! |-----|---------|-------------|
//! | `server.backend`     | `127.0.0.1:2375`            | backend daemon address     |
//! | `server.hosts`       | `["tcp://127.0.0.1:2376"]`  | bind specs                 |
//! | `server.api_version` | `1.16`                      | API version string         |
//! | `server.cors`        | `false`                     | enable the `cors` filter   |
//! | `proxy.filters`      | `[]`                        | additional ordered filters |
//! | `proxy.logging`      | –                           | logging configuration      |
//! | `registry.endpoint`  | `http://127.0.0.1:4001`     | etcd endpoint              |
//! | `registry.prefix`    | `/services`                 | key prefix                 |
//! | `tls.*`              | –                           | PEM material               |

mod env;
pub mod error;
mod file;
mod settings;


pub use env::{DEFAULT_ENV_PREFIX, EnvConfigProvider};
pub use error::ConfigError;
pub use file::{FileConfigProvider, FileFormat};
pub use settings::{RegistrySettings, ServerSettings};

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt::Debug;
use std::sync::Arc;

/// A source of configuration values.
/// Object-safe; typed access lives on [`ConfigProviderExt`].
pub trait ConfigProvider: Debug + Send + Sync {
    /// Check if the configuration provider has a value for the given key.
    fn has(&self, key: &str) -> bool;

    /// Get the name of the configuration provider for debugging purposes.
    fn provider_name(&self) -> &str;

    /// Get a raw configuration value by key.
    fn get_raw(&self, key: &str) -> Result<Option<Value>, ConfigError>;
}

fn decode<T: DeserializeOwned>(key: &str, value: Option<Value>) -> Result<Option<T>, ConfigError> {
    value
        .map(|value| {
            serde_json::from_value(value)
                .map_err(|e| ConfigError::ParseError(format!("failed to deserialize '{key}': {e}")))
        })
        .transpose()
}

/// Typed access for any [`ConfigProvider`].
pub trait ConfigProviderExt: ConfigProvider {
    /// Get a configuration value by key and deserialize it to the specified type.
    fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        decode(key, self.get_raw(key)?)
    }
}

impl<T: ConfigProvider> ConfigProviderExt for T {}

/// Builder for the configuration system.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    providers: Vec<Arc<dyn ConfigProvider>>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a configuration provider.  Later providers take precedence.
    pub fn with_provider<P: ConfigProvider + 'static>(mut self, provider: P) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    pub fn build(self) -> Config {
        Config {
            providers: self.providers,
        }
    }
}

/// Layered configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    providers: Vec<Arc<dyn ConfigProvider>>,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    fn get_raw(&self, key: &str) -> Result<Option<Value>, ConfigError> {
        // Later providers override earlier ones.
        for provider in self.providers.iter().rev() {
            if provider.has(key) {
                return provider.get_raw(key);
            }
        }
        Ok(None)
    }

    /// Get a configuration value by key from the highest-priority provider
    /// that has it.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        decode(key, self.get_raw(key)?)
    }

    /// Get a configuration value by key with a default fallback value.
    pub fn get_or_default<T: DeserializeOwned>(
        &self,
        key: &str,
        default: T,
    ) -> Result<T, ConfigError> {
        Ok(self.get(key)?.unwrap_or(default))
    }
}
