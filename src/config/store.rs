use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// In-memory key-value store settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StoreConfig {
    /// How often the background sweeper evicts expired keys
    #[serde(default = "default_expiry_sweep_interval_ms")]
    pub expiry_sweep_interval_ms: u64,

    /// Capacity of the key-space event broadcast channel. Slow listeners
    /// that fall further behind than this lose the oldest events.
    #[serde(default = "default_key_event_buffer")]
    pub key_event_buffer: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            expiry_sweep_interval_ms: default_expiry_sweep_interval_ms(),
            key_event_buffer: default_key_event_buffer(),
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<()> {
        if self.expiry_sweep_interval_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "store.expiry_sweep_interval_ms must be > 0".to_string(),
            )));
        }
        if self.key_event_buffer == 0 {
            return Err(Error::Config(ConfigError::Message(
                "store.key_event_buffer must be > 0".to_string(),
            )));
        }
        Ok(())
    }
}

fn default_expiry_sweep_interval_ms() -> u64 {
    1000
}
fn default_key_event_buffer() -> usize {
    1024
}
