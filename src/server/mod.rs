//! Change-tracking notification service.
//!
//! Holds the subscriber registry, dispatches table changes to subscribed
//! sessions, and serves both over gRPC.

mod dispatcher;
mod registry;
mod service;
mod sink;
mod subscriber;

pub use dispatcher::*;
pub use registry::*;
pub use service::*;
pub use sink::*;
pub use subscriber::*;

#[cfg(test)]
mod service_test;

//-------------------------------------------------------------------------------
// Start RPC Server
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::FutureExt;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::codec::CompressionEncoding;
use tonic::transport::server::Router;
use tonic_health::server::health_reporter;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::proto::notify::change_tracking_service_server::ChangeTrackingServiceServer;
use crate::NetworkConfig;
use crate::Result;
use crate::SystemError;

/// Serves the change-tracking service on `listen_address` until
/// `shutdown_signal` fires.
pub async fn start_rpc_server(
    server: Arc<ChangeTrackingServer>,
    listen_address: SocketAddr,
    network: &NetworkConfig,
    shutdown_signal: watch::Receiver<()>,
) -> Result<()> {
    let router = build_router(server.clone(), network).await;
    info!("change tracking service listening on {}", listen_address);

    if let Err(e) = router
        .serve_with_shutdown(listen_address, shutdown_future(server, shutdown_signal))
        .await
    {
        error!("error to start rpc server: {:?}.", e);
        return Err(SystemError::ServerUnavailable.into());
    }
    debug!("rpc service finished!");
    Ok(())
}

/// Same as [`start_rpc_server`] on an already bound listener. Lets callers
/// bind port 0 and learn the address before serving.
pub async fn serve_with_listener(
    server: Arc<ChangeTrackingServer>,
    listener: TcpListener,
    network: &NetworkConfig,
    shutdown_signal: watch::Receiver<()>,
) -> Result<()> {
    let router = build_router(server.clone(), network).await;
    let incoming = TcpListenerStream::new(listener);

    if let Err(e) = router
        .serve_with_incoming_shutdown(incoming, shutdown_future(server, shutdown_signal))
        .await
    {
        error!("error to start rpc server: {:?}.", e);
        return Err(SystemError::ServerUnavailable.into());
    }
    debug!("rpc service finished!");
    Ok(())
}

async fn build_router(
    server: Arc<ChangeTrackingServer>,
    network: &NetworkConfig,
) -> Router {
    let (mut health_reporter, health_service) = health_reporter();
    health_reporter
        .set_serving::<ChangeTrackingServiceServer<ChangeTrackingServer>>()
        .await;

    tonic::transport::Server::builder()
        .concurrency_limit_per_connection(network.concurrency_limit)
        .tcp_keepalive(Some(network.tcp_keepalive()))
        .http2_keepalive_interval(Some(network.http2_keep_alive_interval()))
        .http2_keepalive_timeout(Some(network.http2_keep_alive_timeout()))
        .tcp_nodelay(network.tcp_nodelay)
        .add_service(health_service)
        .add_service(
            ChangeTrackingServiceServer::from_arc(server)
                .accept_compressed(CompressionEncoding::Gzip)
                .send_compressed(CompressionEncoding::Gzip),
        )
}

fn shutdown_future(
    server: Arc<ChangeTrackingServer>,
    mut shutdown_signal: watch::Receiver<()>,
) -> impl Future<Output = ()> {
    async move {
        let _ = shutdown_signal.changed().await;
    }
    .map(move |_| {
        warn!("Stopping RPC server.");
        server.shutdown();
    })
}
