// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `proxy.logging`: which backend gets installed and how loud it is.
//!
//! ```toml
//! [proxy.logging]
//! structured = true
//! format = "json"
//! level = "debug"
//! static_fields = { cluster = "eu-1" }
//! ```

use std::collections::BTreeMap;

use log::LevelFilter;
use serde::{Deserialize, Serialize};

use super::parse_level;
use super::structured::{LogFormat, LoggerConfig};

/// Settings read from `proxy.logging`; every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Install the slog pipeline instead of env_logger
    pub structured: bool,

    /// Output of the slog pipeline; env_logger always writes text
    pub format: LogFormat,

    /// `trace`, `debug`, `info`, `warn`, `error` or `off`
    pub level: Option<String>,

    /// Extra key/value pairs on every structured record
    pub static_fields: BTreeMap<String, String>,
}

impl LoggingConfig {
    /// Configured level; unset or unrecognised means `info`.
    pub fn level(&self) -> LevelFilter {
        self.level.as_deref().map_or(LevelFilter::Info, parse_level)
    }

    pub fn to_logger_config(&self) -> LoggerConfig {
        LoggerConfig {
            format: self.format,
            level: slog_level(self.level()),
            static_fields: self
                .static_fields
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        }
    }
}

fn slog_level(level: LevelFilter) -> slog::Level {
    match level {
        LevelFilter::Trace => slog::Level::Trace,
        LevelFilter::Debug => slog::Level::Debug,
        LevelFilter::Info => slog::Level::Info,
        LevelFilter::Warn => slog::Level::Warning,
        LevelFilter::Error => slog::Level::Error,
        // slog has no "off"; the facade's max level already drops everything.
        LevelFilter::Off => slog::Level::Critical,
    }
}
