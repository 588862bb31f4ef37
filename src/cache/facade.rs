use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use std::time::SystemTime;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

use super::CacheContext;
use super::CacheItem;
use super::ChangeDependency;
use super::Expiration;
use crate::store::KeyEvent;
use crate::CacheError;
use crate::Result;

/// Typed cache over a [`CacheContext`].
///
/// Values are stored as bincode-encoded [`CacheItem`]s. Entries leave the
/// store by sliding or absolute expiration, by [`Cache::remove`], or, for
/// change-tracked entries, when their resource changes.
pub struct Cache<T> {
    context: Arc<CacheContext>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Cache<T> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> Cache<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    pub fn new(context: Arc<CacheContext>) -> Self {
        Self {
            context,
            _marker: PhantomData,
        }
    }

    pub fn context(&self) -> &Arc<CacheContext> {
        &self.context
    }

    pub async fn add(
        &self,
        key: &str,
        value: T,
    ) -> Result<()> {
        self.put(key, CacheItem::new(value)).await
    }

    pub async fn add_with_sliding(
        &self,
        key: &str,
        value: T,
        window: Duration,
    ) -> Result<()> {
        self.put(key, CacheItem::sliding(value, window)).await
    }

    pub async fn add_with_absolute(
        &self,
        key: &str,
        value: T,
        at: SystemTime,
    ) -> Result<()> {
        self.put(key, CacheItem::absolute(value, at)).await
    }

    /// Adds a value that lives until `dependency`'s resource changes.
    pub async fn add_with_dependency(
        &self,
        key: &str,
        value: T,
        dependency: &ChangeDependency,
    ) -> Result<()> {
        let encoded = CacheItem::new(value).encode()?;
        self.context.orchestrator().add_with_dependency(key, encoded, dependency).await
    }

    /// Adds a value, then runs `callback` once on the next key-space event
    /// for `key`.
    pub async fn add_with_callback<F>(
        &self,
        key: &str,
        value: T,
        expiration: Expiration,
        callback: F,
    ) -> Result<()>
    where
        F: Fn(&str, KeyEvent) + Send + Sync + 'static,
    {
        self.put(key, CacheItem::with_expiration(value, expiration)).await?;
        self.subscribe_callback(key, callback)
    }

    /// Registers a one-shot callback for the next key-space event on `key`.
    pub fn subscribe_callback<F>(
        &self,
        key: &str,
        callback: F,
    ) -> Result<()>
    where
        F: Fn(&str, KeyEvent) + Send + Sync + 'static,
    {
        self.context.orchestrator().subscribe_callback(key, Arc::new(callback))
    }

    /// Reads `key`. Sliding entries get their lifetime restarted.
    pub async fn get(
        &self,
        key: &str,
    ) -> Result<Option<T>> {
        validate_key(key)?;
        let store = self.context.store();

        let Some(bytes) = store.get(key).await? else {
            return Ok(None);
        };
        let item = match CacheItem::<T>::decode(&bytes) {
            Ok(item) => item,
            Err(e) => {
                warn!(key, "cached value could not be decoded: {:?}", e);
                return Err(e);
            }
        };

        if let Some(window) = item.sliding_window() {
            store.set_time_to_live(key, window).await?;
        }
        Ok(Some(item.into_value()))
    }

    pub async fn get_or_add<F>(
        &self,
        key: &str,
        factory: F,
    ) -> Result<T>
    where
        F: FnOnce() -> T,
        T: Clone,
    {
        self.get_or_put(key, factory, Expiration::None).await
    }

    pub async fn get_or_add_sliding<F>(
        &self,
        key: &str,
        factory: F,
        window: Duration,
    ) -> Result<T>
    where
        F: FnOnce() -> T,
        T: Clone,
    {
        self.get_or_put(key, factory, Expiration::Sliding(window)).await
    }

    pub async fn get_or_add_absolute<F>(
        &self,
        key: &str,
        factory: F,
        at: SystemTime,
    ) -> Result<T>
    where
        F: FnOnce() -> T,
        T: Clone,
    {
        self.get_or_put(key, factory, Expiration::Absolute(at)).await
    }

    pub async fn get_or_add_with_dependency<F>(
        &self,
        key: &str,
        factory: F,
        dependency: &ChangeDependency,
    ) -> Result<T>
    where
        F: FnOnce() -> T,
        T: Clone,
    {
        if let Some(value) = self.get(key).await? {
            return Ok(value);
        }
        let value = factory();
        self.add_with_dependency(key, value.clone(), dependency).await?;
        Ok(value)
    }

    /// Returns whether the key existed.
    pub async fn remove(
        &self,
        key: &str,
    ) -> Result<bool> {
        validate_key(key)?;
        self.context.store().remove(key).await
    }

    async fn get_or_put<F>(
        &self,
        key: &str,
        factory: F,
        expiration: Expiration,
    ) -> Result<T>
    where
        F: FnOnce() -> T,
        T: Clone,
    {
        if let Some(value) = self.get(key).await? {
            return Ok(value);
        }
        let value = factory();
        self.put(key, CacheItem::with_expiration(value.clone(), expiration)).await?;
        Ok(value)
    }

    async fn put(
        &self,
        key: &str,
        item: CacheItem<T>,
    ) -> Result<()> {
        validate_key(key)?;
        if let Expiration::Sliding(window) = item.expiration {
            if window.is_zero() {
                return Err(CacheError::InvalidArgument("sliding window is zero").into());
            }
        }

        let store = self.context.store();
        store.set(key, item.encode()?).await?;
        match item.expiration {
            Expiration::None => {}
            Expiration::Sliding(window) => {
                store.set_time_to_live(key, window).await?;
            }
            Expiration::Absolute(at) => {
                store.set_expire_at(key, at).await?;
            }
        }
        debug!(key, expiration = ?item.expiration, "cache entry added");
        Ok(())
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(CacheError::InvalidArgument("cache key is empty").into());
    }
    Ok(())
}
