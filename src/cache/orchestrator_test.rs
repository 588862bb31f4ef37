use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::client::ChannelManager;
use crate::client::Connector;
use crate::client::InProcessConnector;
use crate::client::ManagerOptions;
use crate::client::MockConnector;
use crate::server::ChangeTrackingServer;
use crate::store::KeyEvent;
use crate::store::KeyValueStore;
use crate::store::MemoryStore;
use crate::store::MockKeyValueStore;
use crate::CacheError;
use crate::Error;
use crate::ImmediateRetry;
use crate::NetworkError;
use crate::ServerConfig;
use crate::StorageError;

type Calls = Arc<Mutex<Vec<(String, KeyEvent)>>>;

struct Harness {
    server: Arc<ChangeTrackingServer>,
    store: MemoryStore,
    manager: ChannelManager,
    orchestrator: Arc<InvalidationOrchestrator>,
    cancel: CancellationToken,
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.manager.shutdown();
    }
}

fn options() -> ManagerOptions {
    ManagerOptions {
        connect_strategy: Arc::new(ImmediateRetry::unbounded()),
        subscribe_strategy: Arc::new(ImmediateRetry::unbounded()),
        outbound_buffer_size: 16,
    }
}

fn orchestrator_over(
    store: Arc<dyn KeyValueStore>,
    connector: Arc<dyn Connector>,
    options: ManagerOptions,
) -> (ChannelManager, Arc<InvalidationOrchestrator>, CancellationToken) {
    let (events_tx, events_rx) = tokio::sync::mpsc::channel(16);
    let (manager, _supervisor) = ChannelManager::spawn(connector, options, events_tx);
    let cancel = CancellationToken::new();
    let orchestrator = Arc::new(InvalidationOrchestrator::new(
        store,
        manager.clone(),
        cancel.clone(),
    ));
    orchestrator.spawn_listener(events_rx);
    (manager, orchestrator, cancel)
}

fn harness_with_store(
    store: Arc<dyn KeyValueStore>,
) -> (
    Arc<ChangeTrackingServer>,
    ChannelManager,
    Arc<InvalidationOrchestrator>,
    CancellationToken,
) {
    let server = Arc::new(ChangeTrackingServer::new(&ServerConfig::default()));
    let connector = InProcessConnector::new(server.clone());
    let (manager, orchestrator, cancel) = orchestrator_over(store, Arc::new(connector), options());
    (server, manager, orchestrator, cancel)
}

fn harness() -> Harness {
    let store = MemoryStore::new(64);
    let (server, manager, orchestrator, cancel) = harness_with_store(Arc::new(store.clone()));
    Harness {
        server,
        store,
        manager,
        orchestrator,
        cancel,
    }
}

fn recording_dependency(
    resource: &str,
    calls: &Calls,
) -> ChangeDependency {
    let calls = calls.clone();
    ChangeDependency::new(resource, move |key: &str, event: KeyEvent| {
        calls.lock().push((key.to_string(), event))
    })
}

async fn wait_until(cond: impl Fn() -> bool) {
    timeout(Duration::from_secs(2), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_change_notification_invalidates_entry_once() {
    let h = harness();
    let calls = Calls::default();
    let dependency = recording_dependency("Users", &calls);

    h.orchestrator.add_with_dependency("user:1", vec![1, 2, 3], &dependency).await.unwrap();
    wait_until(|| h.server.registry().contains("user:1", "Users")).await;
    assert!(h.store.get("user:1").await.unwrap().is_some());
    assert_eq!(h.store.time_to_live("user:1"), None);

    let report = h.server.table_changed("users").unwrap();
    assert_eq!(report.delivered, 1);

    wait_until(|| calls.lock().len() == 1).await;
    assert!(h.store.get("user:1").await.unwrap().is_none());
    assert_eq!(*calls.lock(), vec![("user:1".to_string(), KeyEvent::Delete)]);
    wait_until(|| !h.server.registry().contains("user:1", "Users")).await;

    h.orchestrator.on_change_notification("Users", "user:1").await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(calls.lock().len(), 1);
    assert!(h.orchestrator.dependencies().is_empty());
}

#[tokio::test]
async fn test_unrelated_change_leaves_entry() {
    let h = harness();
    let calls = Calls::default();

    h.orchestrator
        .add_with_dependency("order:9", vec![9], &recording_dependency("Orders", &calls))
        .await
        .unwrap();
    wait_until(|| h.server.registry().contains("order:9", "Orders")).await;

    let report = h.server.table_changed("Customers").unwrap();

    assert_eq!(report.delivered, 0);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(h.store.get("order:9").await.unwrap().is_some());
    assert!(calls.lock().is_empty());
}

#[tokio::test]
async fn test_add_with_dependency_rejects_empty_arguments() {
    let h = harness();
    let calls = Calls::default();

    let err = h
        .orchestrator
        .add_with_dependency("", vec![1], &recording_dependency("Users", &calls))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cache(CacheError::InvalidArgument(_))));

    let err = h
        .orchestrator
        .add_with_dependency("k", vec![1], &recording_dependency("", &calls))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cache(CacheError::InvalidArgument(_))));
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn test_store_failure_skips_subscription() {
    let mut store = MockKeyValueStore::new();
    store
        .expect_set()
        .times(1)
        .returning(|_, _| Err(StorageError::Backend("read only".to_string()).into()));
    let (server, manager, orchestrator, cancel) = harness_with_store(Arc::new(store));

    let result = orchestrator.add_with_dependency("k", vec![1], &ChangeDependency::on("T")).await;

    assert!(result.is_err());
    assert_eq!(manager.active_subscriptions(), 0);
    assert!(server.registry().is_empty());
    assert!(orchestrator.dependencies().is_empty());
    cancel.cancel();
    manager.shutdown();
}

#[tokio::test]
async fn test_unreachable_service_rolls_back_entry() {
    let mut connector = MockConnector::new();
    connector
        .expect_connect()
        .returning(|_| Err(NetworkError::ConnectError("refused".to_string()).into()));
    let options = ManagerOptions {
        connect_strategy: Arc::new(ImmediateRetry::bounded(1)),
        subscribe_strategy: Arc::new(ImmediateRetry::bounded(1)),
        outbound_buffer_size: 16,
    };
    let store = MemoryStore::new(64);
    let (manager, orchestrator, cancel) =
        orchestrator_over(Arc::new(store.clone()), Arc::new(connector), options);
    let calls = Calls::default();

    let result = timeout(
        Duration::from_secs(2),
        orchestrator.add_with_dependency("k", vec![1], &recording_dependency("T", &calls)),
    )
    .await
    .unwrap();

    assert!(result.is_err());
    assert!(store.is_empty());
    assert_eq!(manager.active_subscriptions(), 0);
    assert!(orchestrator.dependencies().is_empty());
    assert!(calls.lock().is_empty());
    cancel.cancel();
    manager.shutdown();
}

#[tokio::test]
async fn test_notification_without_key_is_ignored() {
    let h = harness();
    h.store.set("k", vec![1]).await.unwrap();

    h.orchestrator.on_change_notification("T", "").await;

    assert_eq!(h.store.len(), 1);
}

#[tokio::test]
async fn test_key_callback_ignores_events_before_registration() {
    let h = harness();
    let calls = Calls::default();
    let recorder = calls.clone();

    h.store.set("k", vec![1]).await.unwrap();
    h.orchestrator
        .subscribe_callback(
            "k",
            Arc::new(move |key: &str, event: KeyEvent| recorder.lock().push((key.to_string(), event))),
        )
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(calls.lock().is_empty());

    h.store.set_time_to_live("k", Duration::from_secs(60)).await.unwrap();

    wait_until(|| calls.lock().len() == 1).await;
    assert_eq!(calls.lock()[0], ("k".to_string(), KeyEvent::ExpirationSet));
    assert!(!h.orchestrator.key_callbacks().contains("k"));
}

#[tokio::test]
async fn test_key_callbacks_route_by_event_key() {
    let h = harness();
    let a_calls = Calls::default();
    let b_calls = Calls::default();
    let (a, b) = (a_calls.clone(), b_calls.clone());

    h.orchestrator
        .subscribe_callback("A", Arc::new(move |key: &str, e: KeyEvent| a.lock().push((key.to_string(), e))))
        .unwrap();
    h.orchestrator
        .subscribe_callback("B", Arc::new(move |key: &str, e: KeyEvent| b.lock().push((key.to_string(), e))))
        .unwrap();

    h.store.set("B", vec![1]).await.unwrap();

    wait_until(|| b_calls.lock().len() == 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(*b_calls.lock(), vec![("B".to_string(), KeyEvent::Set)]);
    assert!(a_calls.lock().is_empty());
    assert!(h.orchestrator.key_callbacks().contains("A"));
}

#[tokio::test]
async fn test_second_key_callback_is_rejected() {
    let h = harness();

    h.orchestrator.subscribe_callback("k", Arc::new(|_: &str, _: KeyEvent| {})).unwrap();
    let err = h.orchestrator.subscribe_callback("k", Arc::new(|_: &str, _: KeyEvent| {})).unwrap_err();

    assert!(matches!(err, Error::Cache(CacheError::CallbackAlreadyRegistered(_))));
}

#[tokio::test]
async fn test_key_callback_not_fired_by_event_before_its_registration() {
    let h = harness();
    let b_calls = Calls::default();
    let b = b_calls.clone();

    h.orchestrator.subscribe_callback("a", Arc::new(|_: &str, _: KeyEvent| {})).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Raised before "b" has a callback; the watcher of "a" sees it.
    h.store.set("b", vec![1]).await.unwrap();
    h.orchestrator
        .subscribe_callback("b", Arc::new(move |key: &str, e: KeyEvent| b.lock().push((key.to_string(), e))))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(b_calls.lock().is_empty());
    assert!(h.orchestrator.key_callbacks().contains("b"));

    h.store.remove("b").await.unwrap();

    wait_until(|| b_calls.lock().len() == 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(*b_calls.lock(), vec![("b".to_string(), KeyEvent::Delete)]);
    assert!(h.orchestrator.key_callbacks().contains("a"));
}

#[tokio::test]
async fn test_stale_watcher_leaves_new_registration_alone() {
    let h = harness();
    let calls = Calls::default();

    h.orchestrator.subscribe_callback("k", Arc::new(|_: &str, _: KeyEvent| {})).unwrap();
    h.store.set("k", vec![1]).await.unwrap();
    wait_until(|| !h.orchestrator.key_callbacks().contains("k")).await;

    let recorder = calls.clone();
    h.orchestrator
        .subscribe_callback(
            "k",
            Arc::new(move |key: &str, e: KeyEvent| recorder.lock().push((key.to_string(), e))),
        )
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(calls.lock().is_empty());

    h.store.set_time_to_live("k", Duration::from_secs(60)).await.unwrap();

    wait_until(|| calls.lock().len() == 1).await;
    assert_eq!(calls.lock()[0], ("k".to_string(), KeyEvent::ExpirationSet));
}
