// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Environment variable-based configuration provider.
//!
//! `HARBORMASTER_SERVER__API_VERSION=1.17` becomes the key
//! `server.api_version`: the prefix is stripped, the rest is lower-cased and
//! every double underscore separates a nesting level.

use serde_json::{Value, json};
use std::collections::HashMap;
use std::env;

use super::ConfigError;
use super::ConfigProvider;

/// Default prefix for environment variables.
pub const DEFAULT_ENV_PREFIX: &str = "HARBORMASTER_";

/// Configuration provider that retrieves values from environment variables.
#[derive(Debug)]
pub struct EnvConfigProvider {
    prefix: String,
    /// Variables matching the prefix, keyed by their dotted config key.
    cache: HashMap<String, String>,
}

impl EnvConfigProvider {
    /// Create a provider for variables starting with `prefix`.
    pub fn new(prefix: &str) -> Self {
        let mut provider = Self {
            prefix: prefix.to_string(),
            cache: HashMap::new(),
        };
        provider.refresh_cache();
        provider
    }

    /// Re-read the process environment.
    pub fn refresh_cache(&mut self) {
        self.cache = env::vars()
            .filter_map(|(key, value)| {
                key.strip_prefix(&self.prefix)
                    .map(|rest| (rest.to_lowercase().replace("__", "."), value))
            })
            .collect();
    }

    /// Interpret a raw variable: JSON arrays / objects / quoted strings,
    /// then bool and integer, then plain string.  Dotted numbers stay strings
    /// so that `1.20` is not read as `1.2`.
    fn parse_value(value: &str) -> Value {
        if value.starts_with(['[', '{', '"']) {
            if let Ok(json_value) = serde_json::from_str(value) {
                return json_value;
            }
        }
        if value.eq_ignore_ascii_case("true") {
            return json!(true);
        }
        if value.eq_ignore_ascii_case("false") {
            return json!(false);
        }
        if let Ok(int_val) = value.parse::<i64>() {
            return json!(int_val);
        }
        json!(value)
    }
}

impl Default for EnvConfigProvider {
    fn default() -> Self {
        Self::new(DEFAULT_ENV_PREFIX)
    }
}

impl ConfigProvider for EnvConfigProvider {
    fn has(&self, key: &str) -> bool {
        self.cache.contains_key(key)
    }

    fn provider_name(&self) -> &str {
        "env"
    }

    fn get_raw(&self, key: &str) -> Result<Option<Value>, ConfigError> {
        Ok(self.cache.get(key).map(|value| Self::parse_value(value)))
    }
}
