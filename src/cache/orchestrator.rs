//! Ties cache entries to change notifications.
//!
//! A change-tracked entry is written without expiration and subscribed on the
//! context's duplex channel. When the service pushes a change for it, the
//! entry is removed, the subscription dropped and its one-shot callback run.
//!
//! Dependency callbacks and key-event callbacks are kept apart: the former
//! only run from [`InvalidationOrchestrator::on_change_notification`], the
//! latter from the store's key-space events.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::ChangeDependency;
use super::KeyCallback;
use super::PendingCallbacks;
use super::RegistrationId;
use crate::client::ChannelManager;
use crate::metrics::CACHE_INVALIDATIONS;
use crate::proto::notify::TableChange;
use crate::store::KeyEvent;
use crate::store::KeyEventNotification;
use crate::store::KeyValueStore;
use crate::CacheError;
use crate::Result;

pub struct InvalidationOrchestrator {
    store: Arc<dyn KeyValueStore>,
    manager: ChannelManager,
    dependencies: PendingCallbacks,
    key_callbacks: Arc<PendingCallbacks>,
    cancel: CancellationToken,
}

impl InvalidationOrchestrator {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        manager: ChannelManager,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            manager,
            dependencies: PendingCallbacks::new(),
            key_callbacks: Arc::new(PendingCallbacks::new()),
            cancel,
        }
    }

    /// Invalidation callbacks of change-tracked entries.
    pub fn dependencies(&self) -> &PendingCallbacks {
        &self.dependencies
    }

    /// Callbacks waiting for a key-space event.
    pub fn key_callbacks(&self) -> &Arc<PendingCallbacks> {
        &self.key_callbacks
    }

    /// Stores `encoded` with no expiration and keeps it until `dependency`'s
    /// resource changes.
    ///
    /// Subscribing waits for a live channel and retries until the subscribe
    /// message is sent, so this only returns once the entry is tracked. The
    /// callback is registered before subscribing. If the entry cannot be
    /// tracked the callback is withdrawn and a stored value removed again.
    pub async fn add_with_dependency(
        &self,
        key: &str,
        encoded: Vec<u8>,
        dependency: &ChangeDependency,
    ) -> Result<()> {
        if key.is_empty() {
            return Err(CacheError::InvalidArgument("cache key is empty").into());
        }
        if dependency.resource_name().is_empty() {
            return Err(CacheError::InvalidArgument("resource name is empty").into());
        }

        let resource = dependency.resource_name();
        let id = self.dependencies.register(key, dependency.callback())?;
        if let Err(e) = self.store.set(key, encoded).await {
            self.dependencies.cancel_registration(key, id);
            return Err(e);
        }
        if let Err(e) = self.manager.subscribe(key, resource).await {
            self.dependencies.cancel_registration(key, id);
            self.discard_untracked(key, resource).await;
            return Err(e);
        }

        debug!(key, resource, "change-tracked entry added");
        Ok(())
    }

    /// Removes an entry whose subscription could not be established. Nothing
    /// would ever invalidate it.
    async fn discard_untracked(
        &self,
        key: &str,
        resource: &str,
    ) {
        match self.store.remove(key).await {
            Ok(_) => warn!(key, resource, "subscription failed, entry discarded"),
            Err(e) => warn!(key, resource, "untracked entry could not be removed: {:?}", e),
        }
    }

    /// Handles one pushed `TableChange`. Notifications for keys already
    /// invalidated are harmless: the callback is gone and removal is a no-op.
    pub async fn on_change_notification(
        &self,
        resource: &str,
        key: &str,
    ) {
        if key.is_empty() {
            trace!(resource, "change without key ignored");
            return;
        }

        let removed = match self.store.remove(key).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(key, resource, "invalidation could not remove entry: {:?}", e);
                false
            }
        };
        self.manager.unsubscribe(key, resource).await;
        let fired = self.dependencies.fire(key, KeyEvent::Delete);

        if removed {
            CACHE_INVALIDATIONS.inc();
        }
        info!(key, resource, removed, fired, "cache entry invalidated");
    }

    /// Registers a one-shot callback for the next key-space event on `key`.
    ///
    /// Only events raised after this call are considered, and only events
    /// carrying `key` can fire the callback.
    pub fn subscribe_callback(
        &self,
        key: &str,
        callback: KeyCallback,
    ) -> Result<()> {
        if key.is_empty() {
            return Err(CacheError::InvalidArgument("cache key is empty").into());
        }

        let events = self.store.key_events();
        let id = self.key_callbacks.register(key, callback)?;

        tokio::spawn(watch_key_events(
            events,
            self.key_callbacks.clone(),
            key.to_string(),
            id,
            self.cancel.child_token(),
        ));
        Ok(())
    }

    /// Consumes changes forwarded by the channel manager until the
    /// orchestrator is cancelled or the manager goes away.
    pub fn spawn_listener(
        self: &Arc<Self>,
        mut events_rx: mpsc::Receiver<TableChange>,
    ) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                let change = tokio::select! {
                    _ = this.cancel.cancelled() => break,
                    change = events_rx.recv() => change,
                };
                match change {
                    Some(change) => this.on_change_notification(&change.resource, &change.key).await,
                    None => break,
                }
            }
            debug!("change listener stopped");
        })
    }
}

/// Fires registration `id` of `key` on the first store event for `key`.
///
/// `events` was subscribed before the registration was made, so a watcher
/// only ever sees events raised after its own callback. Events for other keys
/// are left to their own watchers, which may not have started listening yet.
async fn watch_key_events(
    mut events: broadcast::Receiver<KeyEventNotification>,
    pending: Arc<PendingCallbacks>,
    key: String,
    id: RegistrationId,
    cancel: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => return,
            received = events.recv() => received,
        };
        match received {
            Ok(notification) => {
                if notification.key == key {
                    pending.fire_registration(&key, id, notification.event);
                }
                if !pending.contains_registration(&key, id) {
                    return;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(key, skipped, "key event listener lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

impl std::fmt::Debug for InvalidationOrchestrator {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("InvalidationOrchestrator")
            .field("dependencies", &self.dependencies)
            .field("key_callbacks", &self.key_callbacks)
            .finish_non_exhaustive()
    }
}
