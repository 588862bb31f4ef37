use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::InvalidationOrchestrator;
use crate::client::ChannelManager;
use crate::client::Connector;
use crate::client::GrpcConnector;
use crate::client::ManagerOptions;
use crate::store::KeyValueStore;
use crate::store::MemoryStore;
use crate::Result;
use crate::Settings;

/// Connection state shared by every [`Cache`](super::Cache) built on it: the
/// key-value store, one channel manager and the background listeners.
///
/// Must be created inside a Tokio runtime.
pub struct CacheContext {
    store: Arc<dyn KeyValueStore>,
    manager: ChannelManager,
    orchestrator: Arc<InvalidationOrchestrator>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CacheContext {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        connector: Arc<dyn Connector>,
        options: ManagerOptions,
        event_buffer_size: usize,
    ) -> Self {
        Self::with_token(store, connector, options, event_buffer_size, CancellationToken::new())
    }

    /// Builds a context over a fresh [`MemoryStore`] with its expiry sweeper.
    pub fn from_settings(
        settings: &Settings,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let store = MemoryStore::from_config(&settings.store);
        let sweeper = store.start_sweeper(
            Duration::from_millis(settings.store.expiry_sweep_interval_ms),
            cancel.child_token(),
        );

        let context = Self::with_token(
            Arc::new(store),
            connector,
            ManagerOptions::from_settings(settings),
            settings.client.event_buffer_size,
            cancel,
        );
        context.tasks.lock().push(sweeper);
        context
    }

    fn with_token(
        store: Arc<dyn KeyValueStore>,
        connector: Arc<dyn Connector>,
        options: ManagerOptions,
        event_buffer_size: usize,
        cancel: CancellationToken,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(event_buffer_size.max(1));
        let (manager, supervisor) = ChannelManager::spawn(connector, options, events_tx);
        let orchestrator = Arc::new(InvalidationOrchestrator::new(
            store.clone(),
            manager.clone(),
            cancel.child_token(),
        ));
        let listener = orchestrator.spawn_listener(events_rx);

        Self {
            store,
            manager,
            orchestrator,
            cancel,
            tasks: Mutex::new(vec![supervisor, listener]),
        }
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn manager(&self) -> &ChannelManager {
        &self.manager
    }

    pub fn orchestrator(&self) -> &Arc<InvalidationOrchestrator> {
        &self.orchestrator
    }

    /// Stops the channel supervisor, the change listener and the sweeper.
    pub fn shutdown(&self) {
        if !self.cancel.is_cancelled() {
            info!("cache context shutting down");
        }
        self.manager.shutdown();
        self.cancel.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Waits for the background tasks to finish. Call after [`shutdown`].
    ///
    /// [`shutdown`]: CacheContext::shutdown
    pub async fn join(&self) -> Result<()> {
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            task.await?;
        }
        Ok(())
    }
}

impl Drop for CacheContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for CacheContext {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("CacheContext")
            .field("channel_state", &self.manager.state())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

/// Hands out cache contexts.
///
/// [`ContextFactory::shared`] returns one lazily created context reused by
/// every caller; [`ContextFactory::create_new`] always builds a separate one
/// with its own store and channel.
pub struct ContextFactory {
    settings: Settings,
    connector: Arc<dyn Connector>,
    shared: Mutex<Option<Arc<CacheContext>>>,
}

impl ContextFactory {
    /// Factory whose contexts reach the service over gRPC.
    pub fn new(settings: Settings) -> Result<Self> {
        let connector = GrpcConnector::new(&settings.client, &settings.network)?;
        Ok(Self::with_connector(settings, Arc::new(connector)))
    }

    pub fn with_connector(
        settings: Settings,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            settings,
            connector,
            shared: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The shared context, created on first use. A context that was shut
    /// down is replaced.
    pub fn shared(&self) -> Arc<CacheContext> {
        let mut shared = self.shared.lock();
        if let Some(context) = shared.as_ref().filter(|c| !c.is_shutdown()) {
            return context.clone();
        }
        let context = self.create_new();
        *shared = Some(context.clone());
        context
    }

    pub fn create_new(&self) -> Arc<CacheContext> {
        Arc::new(CacheContext::from_settings(&self.settings, self.connector.clone()))
    }
}

impl std::fmt::Debug for ContextFactory {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ContextFactory")
            .field("endpoint", &self.settings.client.endpoint)
            .finish_non_exhaustive()
    }
}
