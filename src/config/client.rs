use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Cache client settings for the duplex notification channel
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClientConfig {
    /// Change-tracking service URI, e.g. `http://127.0.0.1:9081`
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Depth of the queue carrying subscribe/unsubscribe requests to the server
    #[serde(default = "default_outbound_buffer_size")]
    pub outbound_buffer_size: usize,

    /// Depth of the queue carrying change notifications to the orchestrator
    #[serde(default = "default_event_buffer_size")]
    pub event_buffer_size: usize,

    /// Gzip request and response bodies
    #[serde(default = "default_enable_compression")]
    pub enable_compression: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            outbound_buffer_size: default_outbound_buffer_size(),
            event_buffer_size: default_event_buffer_size(),
            enable_compression: default_enable_compression(),
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            return Err(Error::Config(ConfigError::Message(format!(
                "client.endpoint {} must start with http:// or https://",
                self.endpoint
            ))));
        }
        if self.outbound_buffer_size == 0 || self.event_buffer_size == 0 {
            return Err(Error::Config(ConfigError::Message(
                "client buffer sizes must be > 0".to_string(),
            )));
        }
        Ok(())
    }
}

fn default_endpoint() -> String {
    "http://127.0.0.1:9081".to_string()
}
fn default_outbound_buffer_size() -> usize {
    128
}
fn default_event_buffer_size() -> usize {
    1024
}
fn default_enable_compression() -> bool {
    true
}
