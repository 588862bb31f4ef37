//! Subscriber registry for the notification service.
//!
//! Maps each [`Subscriber`] to the [`NotificationSink`] of the session that
//! registered it. One exclusive lock guards the map; it is never held across
//! I/O, so registry operations are bounded by in-memory work.
//!
//! Duplicate discipline: a second `subscribe` for the same subscriber value
//! replaces the previous sink (last writer wins), so a reconnected client
//! moves its subscriptions onto the new session by subscribing again.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::debug;

use super::NotificationSink;
use super::Subscriber;
use crate::metrics::ACTIVE_SUBSCRIPTIONS;
use crate::CacheError;
use crate::Result;

#[derive(Debug, Default)]
pub struct SubscriberRegistry {
    entries: Mutex<HashMap<Subscriber, NotificationSink>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `sink` for `(key, resource)`.
    ///
    /// Returns the sink that was replaced, if any.
    pub fn subscribe(
        &self,
        key: &str,
        resource: &str,
        sink: NotificationSink,
    ) -> Result<Option<NotificationSink>> {
        if key.is_empty() {
            return Err(CacheError::InvalidArgument("subscriber key is empty").into());
        }
        if resource.is_empty() {
            return Err(CacheError::InvalidArgument("resource name is empty").into());
        }

        let subscriber = Subscriber::new(key, resource);
        let session_id = sink.session_id();
        let replaced = {
            let mut entries = self.entries.lock();
            let replaced = entries.insert(subscriber, sink);
            ACTIVE_SUBSCRIPTIONS.set(entries.len() as i64);
            replaced
        };

        match &replaced {
            Some(old) => debug!(
                key,
                resource,
                old_session = old.session_id(),
                new_session = session_id,
                "subscriber re-registered, previous sink replaced"
            ),
            None => debug!(key, resource, session_id, "subscriber registered"),
        }
        Ok(replaced)
    }

    /// Removes `(key, resource)`. Returns whether an entry existed.
    pub fn unsubscribe(
        &self,
        key: &str,
        resource: &str,
    ) -> bool {
        let subscriber = Subscriber::new(key, resource);
        let removed = {
            let mut entries = self.entries.lock();
            let removed = entries.remove(&subscriber).is_some();
            ACTIVE_SUBSCRIPTIONS.set(entries.len() as i64);
            removed
        };
        debug!(key, resource, removed, "unsubscribe");
        removed
    }

    /// Removes `subscriber` only while it still points at `sink`.
    ///
    /// Used by the dispatcher so a purge racing a re-subscribe on a new
    /// session does not drop the fresh entry.
    pub fn remove_if_same(
        &self,
        subscriber: &Subscriber,
        sink: &NotificationSink,
    ) -> bool {
        let mut entries = self.entries.lock();
        let same = entries.get(subscriber).is_some_and(|current| current.same_sink(sink));
        if same {
            entries.remove(subscriber);
            ACTIVE_SUBSCRIPTIONS.set(entries.len() as i64);
        }
        same
    }

    /// Point-in-time copy of all entries. Sinks are cheap handle clones.
    pub fn snapshot(&self) -> Vec<(Subscriber, NotificationSink)> {
        self.entries.lock().iter().map(|(s, sink)| (s.clone(), sink.clone())).collect()
    }

    pub fn contains(
        &self,
        key: &str,
        resource: &str,
    ) -> bool {
        self.entries.lock().contains_key(&Subscriber::new(key, resource))
    }

    /// Session that currently owns `(key, resource)`.
    pub fn session_of(
        &self,
        key: &str,
        resource: &str,
    ) -> Option<u64> {
        self.entries.lock().get(&Subscriber::new(key, resource)).map(|s| s.session_id())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
