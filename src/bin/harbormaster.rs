// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Minimal CLI wrapper so the library can run as a stand-alone front door.
//!
//!  Build it with `cargo build --release --bin harbormaster`
//!  The binary honours HARBORMASTER_CONFIG_FILE, falls back to
//!  /etc/harbormaster/config.toml when present, and always reads
//!  HARBORMASTER_* environment variables on top.

use std::env;
use std::error::Error;
use std::path::Path;

use harbormaster::{Harbormaster, error_fmt, info_fmt};

const DEFAULT_CONFIG_PATH: &str = "/etc/harbormaster/config.toml";

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let mut loader = Harbormaster::loader().with_env_vars();

    match env::var("HARBORMASTER_CONFIG_FILE") {
        Ok(path) => {
            println!("Using configuration from {path}");
            loader = loader.with_config_file(&path);
        }
        Err(_) if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            println!("Using configuration from {DEFAULT_CONFIG_PATH}");
            loader = loader.with_config_file(DEFAULT_CONFIG_PATH);
        }
        Err(_) => println!("No configuration file; using environment and defaults"),
    }

    let harbormaster = match loader.build().await {
        Ok(h) => h,
        Err(e) => {
            eprintln!("Failed to start: {e}");
            return Err(e.into());
        }
    };

    match harbormaster.start().await {
        Ok(()) => {
            info_fmt!("Harbormaster", "Stopped gracefully");
            Ok(())
        }
        Err(e) => {
            error_fmt!("Harbormaster", "Stopped: {}", e);
            Err(e.into())
        }
    }
}
