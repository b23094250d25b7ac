// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Logging utilities.
//!
//! Every component logs through the `log` facade.  At startup exactly one
//! backend is installed: `env_logger` for plain terminal output, or the
//! `slog` pipeline from [`structured`] bridged through `slog-stdlog`.

pub mod config;
pub mod structured;
pub mod wrapper;


use log::{LevelFilter, error, info};
use std::sync::Mutex;
use std::sync::Once;
use std::sync::atomic::{AtomicBool, Ordering};

use config::LoggingConfig;
use structured::LoggerGuard;

static INIT: Once = Once::new();
static USING_STRUCTURED: AtomicBool = AtomicBool::new(false);
static STRUCTURED_GUARD: Mutex<Option<LoggerGuard>> = Mutex::new(None);

fn level_name(level: LevelFilter) -> &'static str {
    match level {
        LevelFilter::Trace => "trace",
        LevelFilter::Debug => "debug",
        LevelFilter::Info => "info",
        LevelFilter::Warn => "warn",
        LevelFilter::Error => "error",
        LevelFilter::Off => "off",
    }
}

/// Parse a textual level, falling back to `info`.
pub fn parse_level(level: &str) -> LevelFilter {
    match level.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "warn" | "warning" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        "off" => LevelFilter::Off,
        _ => LevelFilter::Info,
    }
}

/// Initialize terminal logging with the specified level.
///
/// Only the first call in a process has any effect.
pub fn init(level: Option<LevelFilter>) {
    INIT.call_once(|| {
        let env = env_logger::Env::default()
            .filter_or("RUST_LOG", level.map_or("info", level_name));

        let _ = env_logger::Builder::from_env(env)
            .format_timestamp_millis()
            .format_target(true)
            .try_init();

        info!("Logging initialized at level: {}", log::max_level());
    });
}

/// Initialize logging from a [`LoggingConfig`].
///
/// With `structured = true` the `slog` pipeline is installed and the `log`
/// facade is bridged into it; otherwise this is [`init`] with the configured
/// level.
pub fn init_with_config(config: &LoggingConfig) {
    let level = config.level();

    if !config.structured {
        init(Some(level));
        return;
    }

    INIT.call_once(|| {
        let guard = structured::init_global_logger(&config.to_logger_config());
        match slog_stdlog::init_with_level(level.to_level().unwrap_or(log::Level::Info)) {
            Ok(()) => {
                log::set_max_level(level);
                USING_STRUCTURED.store(true, Ordering::SeqCst);
                if let Ok(mut slot) = STRUCTURED_GUARD.lock() {
                    *slot = Some(guard);
                }
                info!("Structured logging initialized at level: {}", level_name(level));
            }
            Err(e) => eprintln!("Failed to bridge log facade into slog: {e}"),
        }
    });
}

/// Whether the structured pipeline is the active backend.
pub fn is_structured() -> bool {
    USING_STRUCTURED.load(Ordering::SeqCst)
}

/// Log an error with context and return the error.
///
/// This is useful for logging errors in a chain of Results.
pub fn log_error<E: std::fmt::Display>(context: &str, err: E) -> E {
    error!("[{}] {}", context, err);
    err
}
