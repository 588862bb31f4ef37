//! Prometheus collectors for the notification service and cache clients.
//!
//! Collectors live in a crate-private [`REGISTRY`] and are exported on
//! `/metrics` by [`start_server`].

use std::sync::Once;

use lazy_static::lazy_static;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::IntGauge;
use prometheus::Opts;
use prometheus::Registry;
use tokio::sync::watch;
use tracing::error;
use tracing::info;
use warp::Filter;
use warp::Rejection;
use warp::Reply;

#[cfg(test)]
mod metrics_test;

lazy_static! {
    pub static ref ACTIVE_SUBSCRIPTIONS: IntGauge =
        IntGauge::new("active_subscriptions", "Entries in the subscriber registry")
            .expect("metric can not be created");

    pub static ref ACTIVE_SESSIONS: IntGauge =
        IntGauge::new("active_sessions", "Open duplex sessions on the notification service")
            .expect("metric can not be created");

    pub static ref NOTIFICATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("notifications_total", "Dispatch outcomes per subscriber"),
        &["outcome"]
    )
    .expect("metric can not be created");

    pub static ref CHANNEL_RECONNECTS: IntCounter =
        IntCounter::new("channel_reconnects", "Duplex channel reopen attempts that succeeded")
            .expect("metric can not be created");

    pub static ref CACHE_INVALIDATIONS: IntCounter =
        IntCounter::new("cache_invalidations", "Cache entries removed by change notifications")
            .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

static REGISTER: Once = Once::new();

pub(crate) const OUTCOME_DELIVERED: &str = "delivered";
pub(crate) const OUTCOME_DROPPED: &str = "dropped";
pub(crate) const OUTCOME_PURGED: &str = "purged";

fn register_custom_metrics(registry: &Registry) {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(ACTIVE_SUBSCRIPTIONS.clone()),
        Box::new(ACTIVE_SESSIONS.clone()),
        Box::new(NOTIFICATIONS_TOTAL.clone()),
        Box::new(CHANNEL_RECONNECTS.clone()),
        Box::new(CACHE_INVALIDATIONS.clone()),
    ];
    for collector in collectors {
        if let Err(e) = registry.register(collector) {
            error!("collector can not be registered: {:?}", e);
        }
    }
}

/// Serves `/metrics` until `shutdown_signal` fires.
pub async fn start_server(
    port: u16,
    mut shutdown_signal: watch::Receiver<()>,
) {
    REGISTER.call_once(|| register_custom_metrics(&REGISTRY));

    let metrics_route = warp::path!("metrics").and_then(metrics_handler);

    info!("metrics endpoint listening on 0.0.0.0:{}", port);
    let (_, server) =
        warp::serve(metrics_route).bind_with_graceful_shutdown(([0, 0, 0, 0], port), async move {
            let _ = shutdown_signal.changed().await;
        });
    server.await;
}

async fn metrics_handler() -> Result<impl Reply, Rejection> {
    Ok(gather_metrics())
}

pub(crate) fn gather_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        error!("could not encode custom metrics: {}", e);
    };
    match String::from_utf8(buffer) {
        Ok(v) => v,
        Err(e) => {
            error!("custom metrics could not be from_utf8'd: {}", e);
            String::default()
        }
    }
}
