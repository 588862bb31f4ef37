//! Key-value store seam used by the cache.
//!
//! The cache only needs get/set/remove, TTL control and a stream of
//! key-space events. [`MemoryStore`] is the in-process implementation.

mod key_event;
mod memory;

pub use key_event::*;
pub use memory::*;


use std::time::Duration;
use std::time::SystemTime;

#[cfg(test)]
use mockall::automock;
use tokio::sync::broadcast;
use tonic::async_trait;

use crate::Result;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    /// Stores `value` under `key`, clearing any deadline the key had.
    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
    ) -> Result<()>;

    async fn get(
        &self,
        key: &str,
    ) -> Result<Option<Vec<u8>>>;

    /// Returns whether the key existed.
    async fn remove(
        &self,
        key: &str,
    ) -> Result<bool>;

    /// Expires the key `ttl` from now. Returns false if the key is absent.
    async fn set_time_to_live(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<bool>;

    /// Expires the key at wall-clock time `at`. A deadline in the past
    /// removes the key immediately.
    async fn set_expire_at(
        &self,
        key: &str,
        at: SystemTime,
    ) -> Result<bool>;

    /// Subscribes to key-space events raised after this call.
    fn key_events(&self) -> broadcast::Receiver<KeyEventNotification>;
}
