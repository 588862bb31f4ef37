use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use std::time::SystemTime;

use parking_lot::Mutex;
use serde::Deserialize;
use serde::Serialize;
use tokio::time::timeout;

use super::*;
use crate::client::InProcessConnector;
use crate::server::ChangeTrackingServer;
use crate::store::KeyEvent;
use crate::CacheError;
use crate::Error;
use crate::ServerConfig;
use crate::Settings;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct User {
    id: u64,
    name: String,
}

fn user(id: u64) -> User {
    User {
        id,
        name: format!("user-{id}"),
    }
}

fn setup<T>() -> (Arc<ChangeTrackingServer>, Cache<T>)
where
    T: Serialize + serde::de::DeserializeOwned + Send + Sync,
{
    let server = Arc::new(ChangeTrackingServer::new(&ServerConfig::default()));
    let connector = Arc::new(InProcessConnector::new(server.clone()));
    let factory = ContextFactory::with_connector(Settings::default(), connector);
    (server, Cache::new(factory.create_new()))
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
async fn test_add_get_remove() {
    let (_server, cache) = setup::<User>();

    cache.add("user:1", user(1)).await.unwrap();

    assert_eq!(cache.get("user:1").await.unwrap(), Some(user(1)));
    assert!(cache.remove("user:1").await.unwrap());
    assert!(!cache.remove("user:1").await.unwrap());
    assert_eq!(cache.get("user:1").await.unwrap(), None);
}

#[tokio::test]
async fn test_empty_keys_are_rejected() {
    let (_server, cache) = setup::<u32>();

    for result in [
        cache.add("", 1).await,
        cache.add("  ", 1).await,
        cache.get("").await.map(|_| ()),
        cache.remove("").await.map(|_| ()),
    ] {
        assert!(matches!(result, Err(Error::Cache(CacheError::InvalidArgument(_)))));
    }
}

#[tokio::test]
async fn test_zero_sliding_window_is_rejected() {
    let (_server, cache) = setup::<u32>();

    let err = cache.add_with_sliding("k", 1, Duration::ZERO).await.unwrap_err();

    assert!(matches!(err, Error::Cache(CacheError::InvalidArgument(_))));
    assert_eq!(cache.get("k").await.unwrap(), None);
}

#[tokio::test]
async fn test_unbounded_sliding_window_keeps_entry() {
    let (_server, cache) = setup::<u32>();

    cache.add_with_sliding("k", 5, Duration::MAX).await.unwrap();

    assert_eq!(cache.get("k").await.unwrap(), Some(5));
    assert_eq!(cache.get("k").await.unwrap(), Some(5));
}

#[tokio::test(start_paused = true)]
async fn test_sliding_entry_is_refreshed_by_reads() {
    let (_server, cache) = setup::<u32>();
    cache.add_with_sliding("k", 7, Duration::from_secs(10)).await.unwrap();

    tokio::time::advance(Duration::from_secs(8)).await;
    assert_eq!(cache.get("k").await.unwrap(), Some(7));

    tokio::time::advance(Duration::from_secs(8)).await;
    assert_eq!(cache.get("k").await.unwrap(), Some(7));

    tokio::time::advance(Duration::from_secs(11)).await;
    assert_eq!(cache.get("k").await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn test_absolute_entry_is_not_refreshed() {
    let (_server, cache) = setup::<u32>();
    let at = SystemTime::now() + Duration::from_secs(10);
    cache.add_with_absolute("k", 7, at).await.unwrap();

    tokio::time::advance(Duration::from_secs(8)).await;
    assert_eq!(cache.get("k").await.unwrap(), Some(7));

    tokio::time::advance(Duration::from_secs(3)).await;
    assert_eq!(cache.get("k").await.unwrap(), None);
}

#[tokio::test]
async fn test_get_or_add_runs_factory_once() {
    let (_server, cache) = setup::<User>();
    let calls = AtomicU32::new(0);
    let factory = || {
        calls.fetch_add(1, Ordering::SeqCst);
        user(5)
    };

    assert_eq!(cache.get_or_add("user:5", factory).await.unwrap(), user(5));
    assert_eq!(cache.get_or_add("user:5", factory).await.unwrap(), user(5));

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_get_or_add_sliding_sets_window() {
    let (_server, cache) = setup::<u32>();

    cache.get_or_add_sliding("k", || 3, Duration::from_secs(5)).await.unwrap();

    tokio::time::advance(Duration::from_secs(6)).await;
    assert_eq!(cache.get("k").await.unwrap(), None);
}

#[tokio::test]
async fn test_callback_fires_on_next_key_event() {
    let (_server, cache) = setup::<u32>();
    let calls: Arc<Mutex<Vec<(String, KeyEvent)>>> = Arc::default();
    let recorder = calls.clone();

    cache
        .add_with_callback("k", 1, Expiration::None, move |key: &str, event: KeyEvent| {
            recorder.lock().push((key.to_string(), event))
        })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(calls.lock().is_empty());

    cache.remove("k").await.unwrap();

    wait_until(|| !calls.lock().is_empty()).await;
    assert_eq!(*calls.lock(), vec![("k".to_string(), KeyEvent::Delete)]);

    let err = cache.subscribe_callback("", |_: &str, _: KeyEvent| {}).unwrap_err();
    assert!(matches!(err, Error::Cache(CacheError::InvalidArgument(_))));
}

#[tokio::test]
async fn test_dependency_entry_is_invalidated_by_table_change() {
    let (server, cache) = setup::<User>();
    let invalidated = Arc::new(AtomicU32::new(0));
    let counter = invalidated.clone();
    let dependency = ChangeDependency::new("Users", move |_: &str, _: KeyEvent| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let first = cache.get_or_add_with_dependency("user:9", || user(9), &dependency).await.unwrap();
    assert_eq!(first, user(9));
    wait_until(|| server.registry().contains("user:9", "Users")).await;

    server.table_changed("Users").unwrap();
    wait_until(|| invalidated.load(Ordering::SeqCst) == 1).await;
    assert_eq!(cache.get("user:9").await.unwrap(), None);

    let refreshed = cache
        .get_or_add_with_dependency("user:9", || User { id: 9, name: "renamed".into() }, &dependency)
        .await
        .unwrap();
    assert_eq!(refreshed.name, "renamed");
    wait_until(|| server.registry().contains("user:9", "Users")).await;
}
