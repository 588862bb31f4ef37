use std::time::Duration;
use std::time::SystemTime;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

/// How a cached value leaves the store when nobody removes it.
///
/// Sliding and absolute expiration are mutually exclusive. Change-tracked
/// entries always use [`Expiration::None`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Expiration {
    #[default]
    None,
    /// Lifetime restarts on every read
    Sliding(Duration),
    /// Fixed wall-clock deadline
    Absolute(SystemTime),
}

/// Envelope written to the key-value store for every cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheItem<T> {
    pub value: T,
    pub expiration: Expiration,
}

impl<T> CacheItem<T> {
    pub fn new(value: T) -> Self {
        Self::with_expiration(value, Expiration::None)
    }

    pub fn sliding(
        value: T,
        window: Duration,
    ) -> Self {
        Self::with_expiration(value, Expiration::Sliding(window))
    }

    pub fn absolute(
        value: T,
        at: SystemTime,
    ) -> Self {
        Self::with_expiration(value, Expiration::Absolute(at))
    }

    pub fn with_expiration(
        value: T,
        expiration: Expiration,
    ) -> Self {
        Self { value, expiration }
    }

    /// The sliding window, if this item slides.
    pub fn sliding_window(&self) -> Option<Duration> {
        match self.expiration {
            Expiration::Sliding(window) => Some(window),
            _ => None,
        }
    }

    pub fn into_value(self) -> T {
        self.value
    }
}

impl<T: Serialize> CacheItem<T> {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }
}

impl<T: DeserializeOwned> CacheItem<T> {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}
