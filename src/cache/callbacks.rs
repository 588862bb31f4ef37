use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;
use tracing::debug;

use super::KeyCallback;
use crate::store::KeyEvent;
use crate::CacheError;
use crate::Result;

/// Identifies one registration in a [`PendingCallbacks`] map. A key that is
/// registered again after firing gets a new id.
pub type RegistrationId = u64;

/// Cache key → one-shot callback awaiting the next event for that key.
///
/// Callbacks are taken out under the lock and invoked after it is released,
/// so a callback may safely call back into the cache.
#[derive(Default)]
pub struct PendingCallbacks {
    entries: Mutex<HashMap<String, (RegistrationId, KeyCallback)>>,
    next_id: AtomicU64,
}

impl PendingCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails with [`CacheError::CallbackAlreadyRegistered`] while a callback
    /// for `key` is still pending.
    pub fn register(
        &self,
        key: &str,
        callback: KeyCallback,
    ) -> Result<RegistrationId> {
        let mut entries = self.entries.lock();
        if entries.contains_key(key) {
            return Err(CacheError::CallbackAlreadyRegistered(key.to_string()).into());
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        entries.insert(key.to_string(), (id, callback));
        Ok(id)
    }

    /// Consumes and runs the callback pending for `key`, the key the event
    /// arrived with. Returns false if nothing was pending.
    pub fn fire(
        &self,
        key: &str,
        event: KeyEvent,
    ) -> bool {
        let taken = self.entries.lock().remove(key);
        let Some((_, callback)) = taken else {
            return false;
        };
        debug!(key, %event, "firing key callback");
        callback(key, event);
        true
    }

    /// Like [`PendingCallbacks::fire`], but only consumes the callback if it
    /// is still the registration `id`.
    pub fn fire_registration(
        &self,
        key: &str,
        id: RegistrationId,
        event: KeyEvent,
    ) -> bool {
        let taken = {
            let mut entries = self.entries.lock();
            match entries.get(key) {
                Some((current, _)) if *current == id => entries.remove(key),
                _ => None,
            }
        };
        let Some((_, callback)) = taken else {
            return false;
        };
        debug!(key, id, %event, "firing key callback");
        callback(key, event);
        true
    }

    /// Drops the pending callback without running it.
    pub fn cancel(
        &self,
        key: &str,
    ) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    /// Drops registration `id` of `key` without running it. A newer
    /// registration for the same key is left alone.
    pub fn cancel_registration(
        &self,
        key: &str,
        id: RegistrationId,
    ) -> bool {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((current, _)) if *current == id => entries.remove(key).is_some(),
            _ => false,
        }
    }

    pub fn contains(
        &self,
        key: &str,
    ) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn contains_registration(
        &self,
        key: &str,
        id: RegistrationId,
    ) -> bool {
        self.entries.lock().get(key).is_some_and(|(current, _)| *current == id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl std::fmt::Debug for PendingCallbacks {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("PendingCallbacks").field("len", &self.len()).finish()
    }
}
