//! Configuration management for the change-tracked cache.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Configuration file support (`CONFIG_PATH`)
//! - Environment variable overrides (`CHANGECACHE__` prefix)
//! - Component-wise validation
mod client;
mod monitoring;
mod network;
mod retry;
mod server;
mod store;
pub use client::*;
pub use monitoring::*;
pub use network::*;
pub use retry::*;
pub use server::*;
pub use store::*;


use std::env;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

const ENV_PREFIX: &str = "CHANGECACHE";

/// Main configuration container for both sides of the notification channel
///
/// Combines all subsystem configurations with hierarchical override support:
/// 1. Default values from code implementation
/// 2. Configuration file specified by `CONFIG_PATH`
/// 3. Environment variables (highest priority)
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Settings {
    /// Notification service listener
    #[serde(default)]
    pub server: ServerConfig,
    /// Cache client side of the duplex channel
    #[serde(default)]
    pub client: ClientConfig,
    /// Low-level transport tuning shared by server and client
    #[serde(default)]
    pub network: NetworkConfig,
    /// Connect and subscribe retry policies
    #[serde(default)]
    pub retry: RetryPolicies,
    /// In-memory key-value store
    #[serde(default)]
    pub store: StoreConfig,
    /// Metrics endpoint
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

impl Settings {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// Callers MUST call `validate()` before using the configuration.
    ///
    /// # Examples
    /// ```ignore
    /// std::env::set_var("CONFIG_PATH", "config/changecache.toml");
    /// std::env::set_var("CHANGECACHE__SERVER__LISTEN_ADDRESS", "0.0.0.0:9090");
    /// let settings = Settings::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        let settings: Self = builder.build()?.try_deserialize()?;
        Ok(settings)
    }

    /// Applies additional overrides from a file, then the environment again.
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let settings: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .ignore_empty(true)
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    /// Validates every section and returns the validated instance.
    pub fn validate(self) -> Result<Self> {
        self.server.validate()?;
        self.client.validate()?;
        self.network.validate()?;
        self.retry.validate()?;
        self.store.validate()?;
        self.monitoring.validate()?;
        Ok(self)
    }
}
