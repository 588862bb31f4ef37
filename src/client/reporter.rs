use std::collections::HashMap;

use tonic::transport::Channel;
use tracing::debug;

use super::connector::build_client;
use super::connector::create_endpoint;
use crate::proto::notify::change_tracking_service_client::ChangeTrackingServiceClient;
use crate::proto::notify::ChangeRecord;
use crate::proto::notify::DispatchAck;
use crate::CacheError;
use crate::ClientConfig;
use crate::NetworkConfig;
use crate::Result;

/// Client used by change-detection producers to announce that a tracked
/// resource changed.
#[derive(Debug, Clone)]
pub struct ChangeReporter {
    client: ChangeTrackingServiceClient<Channel>,
}

impl ChangeReporter {
    pub async fn connect(
        client: &ClientConfig,
        network: &NetworkConfig,
    ) -> Result<Self> {
        let channel = create_endpoint(&client.endpoint, network)?
            .timeout(network.request_timeout())
            .connect()
            .await?;
        Ok(Self {
            client: build_client(channel, client.enable_compression),
        })
    }

    /// Reports a change of `name` without version or metadata.
    pub async fn table_changed(
        &self,
        name: &str,
    ) -> Result<DispatchAck> {
        self.report(ChangeRecord {
            name: name.to_string(),
            version: 0,
            metadata: HashMap::new(),
        })
        .await
    }

    pub async fn report(
        &self,
        record: ChangeRecord,
    ) -> Result<DispatchAck> {
        if record.name.is_empty() {
            return Err(CacheError::InvalidArgument("resource name is empty").into());
        }
        let mut client = self.client.clone();
        let ack = client.table_changed(record).await?.into_inner();
        debug!(delivered = ack.delivered, purged = ack.purged, "change reported");
        Ok(ack)
    }
}
