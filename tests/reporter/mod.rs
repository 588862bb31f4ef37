use std::collections::HashMap;

use changecache::proto::notify::ChangeRecord;
use changecache::CacheError;
use changecache::ChangeReporter;
use changecache::Error;

use crate::common::client_settings;
use crate::common::TestService;

#[tokio::test]
async fn test_report_without_subscribers_delivers_nothing() {
    let service = TestService::start_ephemeral().await;
    let settings = client_settings(service.addr);
    let reporter = ChangeReporter::connect(&settings.client, &settings.network).await.unwrap();

    let ack = reporter
        .report(ChangeRecord {
            name: "Customers".to_string(),
            version: 42,
            metadata: HashMap::from([("source".to_string(), "cdc".to_string())]),
        })
        .await
        .unwrap();

    assert_eq!(ack.delivered, 0);
    assert_eq!(ack.purged, 0);
    service.stop().await;
}

#[tokio::test]
async fn test_report_with_empty_name_is_rejected() {
    let service = TestService::start_ephemeral().await;
    let settings = client_settings(service.addr);
    let reporter = ChangeReporter::connect(&settings.client, &settings.network).await.unwrap();

    let err = reporter.table_changed("").await.unwrap_err();

    assert!(matches!(err, Error::Cache(CacheError::InvalidArgument(_))));
    service.stop().await;
}

#[tokio::test]
async fn test_connect_to_invalid_endpoint_fails() {
    let mut settings = client_settings("127.0.0.1:1".parse().unwrap());
    settings.client.endpoint = "not a uri".to_string();

    assert!(ChangeReporter::connect(&settings.client, &settings.network).await.is_err());
}
