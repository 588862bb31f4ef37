use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use changecache::client::ChannelState;
use changecache::Cache;
use changecache::ChangeDependency;
use changecache::ChangeReporter;
use changecache::ContextFactory;
use changecache::KeyEvent;
use serde::Deserialize;
use serde::Serialize;

use crate::common::client_settings;
use crate::common::wait_until;
use crate::common::TestService;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Order {
    id: u64,
    total_cents: u64,
}

fn counting_dependency(
    resource: &str,
    counter: &Arc<AtomicU32>,
) -> ChangeDependency {
    let counter = counter.clone();
    ChangeDependency::new(resource, move |_: &str, event: KeyEvent| {
        assert_eq!(event, KeyEvent::Delete);
        counter.fetch_add(1, Ordering::SeqCst);
    })
}

#[tokio::test]
async fn test_reported_change_invalidates_entry_over_grpc() {
    let service = TestService::start_ephemeral().await;
    let settings = client_settings(service.addr);
    let factory = ContextFactory::new(settings.clone()).unwrap();
    let cache: Cache<Order> = Cache::new(factory.shared());
    let invalidated = Arc::new(AtomicU32::new(0));

    let order = Order {
        id: 1,
        total_cents: 4200,
    };
    cache
        .add_with_dependency("order:1", order.clone(), &counting_dependency("Orders", &invalidated))
        .await
        .unwrap();
    cache.add("order:2", Order { id: 2, total_cents: 1 }).await.unwrap();
    wait_until(|| service.server.registry().contains("order:1", "Orders")).await;
    assert_eq!(cache.get("order:1").await.unwrap(), Some(order));

    let reporter = ChangeReporter::connect(&settings.client, &settings.network).await.unwrap();
    let ack = reporter.table_changed("ORDERS").await.unwrap();
    assert_eq!(ack.delivered, 1);

    wait_until(|| invalidated.load(Ordering::SeqCst) == 1).await;
    assert_eq!(cache.get("order:1").await.unwrap(), None);
    assert!(cache.get("order:2").await.unwrap().is_some());
    wait_until(|| !service.server.registry().contains("order:1", "Orders")).await;

    let ack = reporter.table_changed("Orders").await.unwrap();
    assert_eq!(ack.delivered, 0);
    assert_eq!(invalidated.load(Ordering::SeqCst), 1);

    cache.context().shutdown();
    service.stop().await;
}

#[tokio::test]
async fn test_subscriptions_survive_service_restart() {
    let service = TestService::start_ephemeral().await;
    let addr = service.addr;
    let factory = ContextFactory::new(client_settings(addr)).unwrap();
    let context = factory.create_new();
    let cache: Cache<Order> = Cache::new(context.clone());
    let invalidated = Arc::new(AtomicU32::new(0));

    cache
        .add_with_dependency(
            "order:7",
            Order {
                id: 7,
                total_cents: 700,
            },
            &counting_dependency("Orders", &invalidated),
        )
        .await
        .unwrap();
    wait_until(|| service.server.registry().contains("order:7", "Orders")).await;
    let first_generation = context.manager().generation();

    service.stop().await;
    let restarted = TestService::start(addr).await;

    wait_until(|| restarted.server.registry().contains("order:7", "Orders")).await;
    wait_until(|| context.manager().state() == ChannelState::Connected).await;
    assert!(context.manager().generation() > first_generation);

    let report = restarted.server.table_changed("Orders").unwrap();
    assert_eq!(report.delivered, 1);
    wait_until(|| invalidated.load(Ordering::SeqCst) == 1).await;
    assert_eq!(cache.get("order:7").await.unwrap(), None);

    context.shutdown();
    restarted.stop().await;
}
