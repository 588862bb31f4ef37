use std::net::SocketAddr;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Notification service settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    /// Address the change-tracking gRPC service binds to
    #[serde(default = "default_listen_address")]
    pub listen_address: SocketAddr,

    /// Outbound queue depth per client session. A session whose queue is
    /// full drops the notification instead of blocking the dispatcher.
    #[serde(default = "default_sink_buffer_size")]
    pub sink_buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            sink_buffer_size: default_sink_buffer_size(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sink_buffer_size == 0 {
            return Err(Error::Config(ConfigError::Message(
                "server.sink_buffer_size must be > 0".to_string(),
            )));
        }
        Ok(())
    }
}

fn default_listen_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9081))
}
fn default_sink_buffer_size() -> usize {
    256
}
