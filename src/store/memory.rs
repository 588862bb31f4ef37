use std::sync::Arc;
use std::time::Duration;
use std::time::SystemTime;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tonic::async_trait;
use tracing::debug;
use tracing::trace;

use super::KeyEvent;
use super::KeyEventNotification;
use super::KeyValueStore;
use crate::Result;
use crate::StoreConfig;

#[derive(Debug)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(
        &self,
        now: Instant,
    ) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-process [`KeyValueStore`].
///
/// Expired keys are dropped lazily on read and by [`MemoryStore::sweep`],
/// which [`MemoryStore::start_sweeper`] runs periodically. Every mutation is
/// published as a [`KeyEventNotification`].
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

#[derive(Debug)]
struct StoreInner {
    entries: DashMap<String, Entry>,
    events_tx: broadcast::Sender<KeyEventNotification>,
}

impl MemoryStore {
    pub fn new(key_event_buffer: usize) -> Self {
        let (events_tx, _) = broadcast::channel(key_event_buffer.max(1));
        Self {
            inner: Arc::new(StoreInner {
                entries: DashMap::new(),
                events_tx,
            }),
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config.key_event_buffer)
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Remaining lifetime of `key`, `None` if it has no deadline or is absent.
    pub fn time_to_live(
        &self,
        key: &str,
    ) -> Option<Duration> {
        let now = Instant::now();
        self.inner
            .entries
            .get(key)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    /// Removes every expired key and returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .inner
            .entries
            .iter()
            .filter(|e| e.value().is_expired(now))
            .map(|e| e.key().clone())
            .collect();

        let mut removed = 0;
        for key in expired {
            if self.inner.entries.remove_if(&key, |_, e| e.is_expired(now)).is_some() {
                self.publish(&key, KeyEvent::Expire);
                removed += 1;
            }
        }
        removed
    }

    /// Runs [`MemoryStore::sweep`] every `interval` until `cancel` fires.
    pub fn start_sweeper(
        &self,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = store.sweep();
                        if removed > 0 {
                            debug!(removed, "expired keys swept");
                        }
                    }
                }
            }
            trace!("expiry sweeper stopped");
        })
    }

    fn publish(
        &self,
        key: &str,
        event: KeyEvent,
    ) {
        // No receivers is normal.
        let _ = self.inner.events_tx.send(KeyEventNotification::new(key, event));
    }

    fn expire_now(
        &self,
        key: &str,
    ) {
        let now = Instant::now();
        if self.inner.entries.remove_if(key, |_, e| e.is_expired(now)).is_some() {
            self.publish(key, KeyEvent::Expire);
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
    ) -> Result<()> {
        self.inner.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: None,
            },
        );
        self.publish(key, KeyEvent::Set);
        Ok(())
    }

    async fn get(
        &self,
        key: &str,
    ) -> Result<Option<Vec<u8>>> {
        let now = Instant::now();
        match self.inner.entries.get(key) {
            None => return Ok(None),
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
            Some(_) => {}
        }
        self.expire_now(key);
        Ok(None)
    }

    async fn remove(
        &self,
        key: &str,
    ) -> Result<bool> {
        match self.inner.entries.remove(key) {
            Some((_, entry)) if !entry.is_expired(Instant::now()) => {
                self.publish(key, KeyEvent::Delete);
                Ok(true)
            }
            Some(_) => {
                self.publish(key, KeyEvent::Expire);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn set_time_to_live(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<bool> {
        let now = Instant::now();
        let updated = match self.inner.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) => {
                // A deadline past the clock's range never arrives.
                entry.expires_at = now.checked_add(ttl);
                true
            }
            _ => false,
        };
        if updated {
            self.publish(key, KeyEvent::ExpirationSet);
        }
        Ok(updated)
    }

    async fn set_expire_at(
        &self,
        key: &str,
        at: SystemTime,
    ) -> Result<bool> {
        match at.duration_since(SystemTime::now()) {
            Ok(ttl) if !ttl.is_zero() => self.set_time_to_live(key, ttl).await,
            _ => self.remove(key).await,
        }
    }

    fn key_events(&self) -> broadcast::Receiver<KeyEventNotification> {
        self.inner.events_tx.subscribe()
    }
}
