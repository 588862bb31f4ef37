use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;
use tonic::Code;
use tonic::Request;
use tonic::Status;

use super::*;
use crate::proto::notify::change_tracking_service_server::ChangeTrackingService;
use crate::proto::notify::ChangeRecord;
use crate::proto::notify::ClientMessage;
use crate::ServerConfig;

type Inbound = mpsc::Sender<std::result::Result<ClientMessage, Status>>;

fn new_server() -> ChangeTrackingServer {
    ChangeTrackingServer::new(&ServerConfig::default())
}

fn open(server: &ChangeTrackingServer) -> (Inbound, SessionStream) {
    let (tx, rx) = mpsc::channel(16);
    let outbound = server.open_session(ReceiverStream::new(rx));
    (tx, outbound)
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
async fn test_session_subscribe_receives_table_change() {
    let server = new_server();
    let (inbound, mut outbound) = open(&server);

    inbound.send(Ok(ClientMessage::subscribe("user:1", "Users"))).await.unwrap();
    wait_until(|| server.registry().contains("user:1", "Users")).await;

    let report = server.table_changed("users").unwrap();
    assert_eq!(report.delivered, 1);

    let change = timeout(Duration::from_secs(1), outbound.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(change.key, "user:1");
    assert_eq!(change.resource, "Users");
}

#[tokio::test]
async fn test_session_unsubscribe_stops_delivery() {
    let server = new_server();
    let (inbound, _outbound) = open(&server);

    inbound.send(Ok(ClientMessage::subscribe("k", "Orders"))).await.unwrap();
    inbound.send(Ok(ClientMessage::unsubscribe("k", "Orders"))).await.unwrap();
    inbound.send(Ok(ClientMessage::subscribe("marker", "Other"))).await.unwrap();
    wait_until(|| server.registry().contains("marker", "Other")).await;

    assert!(!server.registry().contains("k", "Orders"));
    assert_eq!(server.table_changed("Orders").unwrap().delivered, 0);
}

#[tokio::test]
async fn test_client_close_ends_outbound_and_purges_on_dispatch() {
    let server = new_server();
    let (inbound, mut outbound) = open(&server);

    inbound.send(Ok(ClientMessage::subscribe("k", "Orders"))).await.unwrap();
    wait_until(|| server.registry().contains("k", "Orders")).await;
    drop(inbound);

    let end = timeout(Duration::from_secs(1), outbound.next()).await.unwrap();
    assert!(end.is_none());

    let report = server.table_changed("Anything").unwrap();
    assert_eq!(report.purged, 1);
    assert!(server.registry().is_empty());
}

#[tokio::test]
async fn test_inbound_error_faults_session() {
    let server = new_server();
    let (inbound, mut outbound) = open(&server);

    inbound.send(Ok(ClientMessage::subscribe("k", "Orders"))).await.unwrap();
    wait_until(|| server.registry().contains("k", "Orders")).await;
    inbound.send(Err(Status::unavailable("transport reset"))).await.unwrap();

    let end = timeout(Duration::from_secs(1), outbound.next()).await.unwrap();
    assert!(end.is_none());

    let report = server.table_changed("Orders").unwrap();
    assert_eq!(report.delivered, 0);
    assert_eq!(report.purged, 1);
}

#[tokio::test]
async fn test_resubscribe_on_new_session_replaces_stale_entry() {
    let server = new_server();
    let (old_inbound, _old_outbound) = open(&server);
    let (new_inbound, mut new_outbound) = open(&server);

    old_inbound.send(Ok(ClientMessage::subscribe("k", "Orders"))).await.unwrap();
    wait_until(|| server.registry().contains("k", "Orders")).await;
    let old_session = server.registry().session_of("k", "Orders").unwrap();

    new_inbound.send(Ok(ClientMessage::subscribe("k", "Orders"))).await.unwrap();
    wait_until(|| server.registry().session_of("k", "Orders") != Some(old_session)).await;
    drop(old_inbound);

    assert_eq!(server.registry().len(), 1);
    assert_eq!(server.table_changed("Orders").unwrap().delivered, 1);
    assert!(new_outbound.next().await.is_some());
}

#[tokio::test]
async fn test_shutdown_ends_open_sessions() {
    let server = new_server();
    let (_inbound, mut outbound) = open(&server);

    server.shutdown();

    let end = timeout(Duration::from_secs(1), outbound.next()).await.unwrap();
    assert!(end.is_none());
}

#[tokio::test]
async fn test_table_changed_rpc_reports_delivery() {
    let server = new_server();
    let (inbound, _outbound) = open(&server);
    inbound.send(Ok(ClientMessage::subscribe("k", "Orders"))).await.unwrap();
    wait_until(|| server.registry().contains("k", "Orders")).await;

    let ack = ChangeTrackingService::table_changed(
        &server,
        Request::new(ChangeRecord {
            name: "Orders".to_string(),
            version: 42,
            metadata: Default::default(),
        }),
    )
    .await
    .unwrap()
    .into_inner();

    assert_eq!(ack.delivered, 1);
    assert_eq!(ack.purged, 0);
}

#[tokio::test]
async fn test_table_changed_rpc_rejects_empty_name() {
    let server = new_server();

    let status = ChangeTrackingService::table_changed(
        &server,
        Request::new(ChangeRecord::default()),
    )
    .await
    .unwrap_err();

    assert_eq!(status.code(), Code::InvalidArgument);
}
