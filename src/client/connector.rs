//! Ways of opening one duplex session to the change-tracking service.

use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;
#[cfg(test)]
use mockall::automock;
use parking_lot::Mutex;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::async_trait;
use tonic::codec::CompressionEncoding;
use tonic::transport::Channel;
use tonic::transport::Endpoint;
use tracing::debug;

use crate::proto::notify::change_tracking_service_client::ChangeTrackingServiceClient;
use crate::proto::notify::ClientMessage;
use crate::proto::notify::TableChange;
use crate::server::ChangeTrackingServer;
use crate::ClientConfig;
use crate::Error;
use crate::NetworkConfig;
use crate::NetworkError;
use crate::Result;

/// Server-to-client half of a session. An `Err` item or the end of the
/// stream means the session is over.
pub type InboundStream = BoxStream<'static, Result<TableChange>>;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Opens a session that drains `outbound` and yields pushed changes.
    async fn connect(
        &self,
        outbound: ReceiverStream<ClientMessage>,
    ) -> Result<InboundStream>;
}

/// Connects over gRPC.
#[derive(Debug, Clone)]
pub struct GrpcConnector {
    endpoint: Endpoint,
    enable_compression: bool,
}

impl GrpcConnector {
    pub fn new(
        client: &ClientConfig,
        network: &NetworkConfig,
    ) -> Result<Self> {
        Ok(Self {
            endpoint: create_endpoint(&client.endpoint, network)?,
            enable_compression: client.enable_compression,
        })
    }
}

pub(crate) fn create_endpoint(
    addr: &str,
    network: &NetworkConfig,
) -> Result<Endpoint> {
    let endpoint = Endpoint::from_shared(addr.to_string())
        .map_err(|e| NetworkError::InvalidURI(format!("{addr}: {e}")))?
        .connect_timeout(network.connect_timeout())
        .tcp_keepalive(Some(network.tcp_keepalive()))
        .tcp_nodelay(network.tcp_nodelay)
        .http2_keep_alive_interval(network.http2_keep_alive_interval())
        .keep_alive_timeout(network.http2_keep_alive_timeout())
        .keep_alive_while_idle(true);
    Ok(endpoint)
}

pub(crate) fn build_client(
    channel: Channel,
    enable_compression: bool,
) -> ChangeTrackingServiceClient<Channel> {
    let mut client = ChangeTrackingServiceClient::new(channel);
    if enable_compression {
        client = client
            .send_compressed(CompressionEncoding::Gzip)
            .accept_compressed(CompressionEncoding::Gzip);
    }
    client
}

#[async_trait]
impl Connector for GrpcConnector {
    async fn connect(
        &self,
        outbound: ReceiverStream<ClientMessage>,
    ) -> Result<InboundStream> {
        debug!("connecting to {}", self.endpoint.uri());
        let channel = self
            .endpoint
            .connect()
            .await
            .map_err(|e| NetworkError::ConnectError(e.to_string()))?;

        let mut client = build_client(channel, self.enable_compression);
        let inbound = client.session(outbound).await?.into_inner();

        Ok(inbound.map(|item| item.map_err(Error::from)).boxed())
    }
}

/// Connects to a [`ChangeTrackingServer`] living in the same process.
///
/// Sessions go through the same registry and dispatcher as remote ones.
/// [`InProcessConnector::sever`] ends the current session with a transport
/// error, the way a dropped TCP connection would.
#[derive(Debug, Clone)]
pub struct InProcessConnector {
    server: Arc<ChangeTrackingServer>,
    current: Arc<Mutex<CancellationToken>>,
}

impl InProcessConnector {
    pub fn new(server: Arc<ChangeTrackingServer>) -> Self {
        Self {
            server,
            current: Arc::new(Mutex::new(CancellationToken::new())),
        }
    }

    pub fn server(&self) -> &Arc<ChangeTrackingServer> {
        &self.server
    }

    /// Faults the session opened most recently.
    pub fn sever(&self) {
        self.current.lock().cancel();
    }
}

#[async_trait]
impl Connector for InProcessConnector {
    async fn connect(
        &self,
        outbound: ReceiverStream<ClientMessage>,
    ) -> Result<InboundStream> {
        let severed = CancellationToken::new();
        *self.current.lock() = severed.clone();

        // Severing ends both directions: the server sees its inbound end and
        // closes the session, the client sees a transport error.
        let to_server = outbound.take_until(severed.clone().cancelled_owned()).map(Ok);
        let from_server = self.server.open_session(Box::pin(to_server));

        let fault = severed.clone();
        let inbound = from_server
            .map(|item| item.map_err(Error::from))
            .take_until(severed.cancelled_owned())
            .chain(futures::stream::once(async move {
                if fault.is_cancelled() {
                    Err(NetworkError::ChannelClosed.into())
                } else {
                    Err(NetworkError::ConnectError("session ended by server".to_string()).into())
                }
            }));
        Ok(inbound.boxed())
    }
}
