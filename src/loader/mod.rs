// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! High-level entry-point – "turn the key and go".
//!
//! The [`HarbormasterLoader`] consumes configuration, initialises logging,
//! builds the registry client, the route table and the filter chain, and
//! returns a [`Harbormaster`] ready to [`start`](Harbormaster::start).


use std::future::Future;
use std::sync::Arc;

use thiserror::Error;

use crate::config::{
    Config, ConfigError, ConfigProvider, EnvConfigProvider, FileConfigProvider, RegistrySettings,
    ServerSettings,
};
use crate::core::{BackendAddr, Context, ProxyError};
use crate::filters::FilterSpec;
use crate::logging::config::LoggingConfig;
use crate::registry::{EtcdConfig, EtcdRegistry, Registry, spawn_watch};
use crate::server::{self, Server};
use crate::tls::{TlsFiles, TlsSettings};
use crate::{info_fmt, logging, warn_fmt};

/// Errors that can occur during initialization.
#[derive(Error, Debug)]
pub enum LoaderError {
    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(#[from] ConfigError),

    /// Proxy error
    #[error("proxy error: {0}")]
    ProxyError(#[from] ProxyError),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Builder for initializing and configuring the front door.
#[derive(Debug, Default)]
pub struct HarbormasterLoader {
    config: Option<Config>,
    config_file_path: Option<String>,
    use_env_vars: bool,
    env_prefix: Option<String>,
    registry: Option<Arc<dyn Registry>>,
}

impl HarbormasterLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a ready-made configuration instead of files and environment.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Set a configuration file to load.
    pub fn with_config_file(mut self, file_path: &str) -> Self {
        self.config_file_path = Some(file_path.to_string());
        self
    }

    /// Enable environment variable configuration (overrides the file).
    pub fn with_env_vars(mut self) -> Self {
        self.use_env_vars = true;
        self
    }

    /// Set a custom prefix for environment variables (default is
    /// `HARBORMASTER_`).
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_string());
        self.use_env_vars = true;
        self
    }

    /// Use `provider` as the only configuration source.
    pub fn with_provider<P: ConfigProvider + 'static>(self, provider: P) -> Self {
        Self {
            config: Some(Config::builder().with_provider(provider).build()),
            ..self
        }
    }

    /// Use `registry` instead of an etcd client built from `registry.*`.
    pub fn with_registry(mut self, registry: Arc<dyn Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    fn load_config(&self) -> Result<Config, LoaderError> {
        if let Some(config) = &self.config {
            return Ok(config.clone());
        }

        let mut builder = Config::builder();
        if let Some(path) = &self.config_file_path {
            builder = builder.with_provider(FileConfigProvider::new(path)?);
        }
        if self.use_env_vars {
            builder = builder.with_provider(match &self.env_prefix {
                Some(prefix) => EnvConfigProvider::new(prefix),
                None => EnvConfigProvider::default(),
            });
        }
        Ok(builder.build())
    }

    /// Build and initialize the front door.
    pub async fn build(self) -> Result<Harbormaster, LoaderError> {
        let config = self.load_config()?;

        match config.get::<LoggingConfig>("proxy.logging") {
            Ok(Some(logging_config)) => logging::init_with_config(&logging_config),
            Ok(None) => logging::init(None),
            Err(e) => {
                logging::init(None);
                warn_fmt!("Startup", "Ignoring unreadable logging configuration: {}", e);
            }
        }

        let settings = ServerSettings::from_config(&config)?;
        let registry_settings = RegistrySettings::from_config(&config)?;
        info_fmt!(
            "Startup",
            "Backend {}, API version {}, registry {}",
            settings.backend,
            settings.api_version,
            registry_settings.endpoint
        );

        let tls_files = TlsFiles {
            cert: config.get("tls.cert")?,
            key: config.get("tls.key")?,
            ca: config.get("tls.ca")?,
            verify_backend: config.get("tls.verify_backend")?,
        };
        let tls = TlsSettings::from_files(&tls_files)?;

        let registry = match self.registry {
            Some(registry) => registry,
            None => Arc::new(EtcdRegistry::with_config(EtcdConfig {
                endpoint: registry_settings.endpoint,
                prefix: registry_settings.prefix,
            })),
        };

        let ctx = Context::new(
            BackendAddr::parse(&settings.backend)?,
            settings.api_version.clone(),
            tls,
            registry.clone(),
        );

        let filters: Vec<FilterSpec> = config.get_or_default("proxy.filters", Vec::new())?;
        let server = server::build(ctx, settings.cors, &filters)?;

        Ok(Harbormaster {
            config: Arc::new(config),
            settings,
            registry,
            server,
        })
    }
}

/// An assembled front door.
#[derive(Debug, Clone)]
pub struct Harbormaster {
    config: Arc<Config>,
    settings: ServerSettings,
    registry: Arc<dyn Registry>,
    server: Server,
}

impl Harbormaster {
    /// Create a new loader.
    pub fn loader() -> HarbormasterLoader {
        HarbormasterLoader::new()
    }

    /// Get the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Effective `server.*` settings.
    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    /// Start the registry watch and serve until Ctrl-C / SIGTERM or the
    /// first listener failure.
    pub async fn start(&self) -> Result<(), LoaderError> {
        self.start_with_shutdown(shutdown_signal()).await
    }

    /// Like [`start`](Self::start) with a caller-provided shutdown signal.
    pub async fn start_with_shutdown<F>(&self, signal: F) -> Result<(), LoaderError>
    where
        F: Future<Output = ()> + Send,
    {
        spawn_watch(self.registry.clone());
        self.server
            .serve_with_shutdown(&self.settings.hosts, signal)
            .await?;
        info_fmt!("Harbormaster", "All listeners stopped");
        Ok(())
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn_fmt!("Startup", "Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn_fmt!("Startup", "Cannot install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info_fmt!("Startup", "Received Ctrl-C; shutting down"),
        _ = terminate => info_fmt!("Startup", "Received SIGTERM; shutting down"),
    }
}
