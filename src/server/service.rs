use std::pin::Pin;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures::Stream;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::Request;
use tonic::Response;
use tonic::Status;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::CleanupPolicy;
use super::DispatchReport;
use super::NotificationDispatcher;
use super::NotificationSink;
use super::SubscriberRegistry;
use crate::metrics::ACTIVE_SESSIONS;
use crate::proto::notify::change_tracking_service_server::ChangeTrackingService;
use crate::proto::notify::client_message::Payload;
use crate::proto::notify::ChangeRecord;
use crate::proto::notify::ClientMessage;
use crate::proto::notify::DispatchAck;
use crate::proto::notify::TableChange;
use crate::Result;
use crate::ServerConfig;

pub type SessionStream = Pin<Box<dyn Stream<Item = std::result::Result<TableChange, Status>> + Send>>;

/// Central change-tracking service: owns the registry and dispatcher and
/// terminates client duplex sessions.
#[derive(Debug)]
pub struct ChangeTrackingServer {
    dispatcher: NotificationDispatcher,
    sink_buffer_size: usize,
    next_session_id: AtomicU64,
    shutdown: CancellationToken,
}

impl ChangeTrackingServer {
    pub fn new(config: &ServerConfig) -> Self {
        Self::with_policy(config, CleanupPolicy::default())
    }

    pub fn with_policy(
        config: &ServerConfig,
        policy: CleanupPolicy,
    ) -> Self {
        let registry = Arc::new(SubscriberRegistry::new());
        Self {
            dispatcher: NotificationDispatcher::with_policy(registry, policy),
            sink_buffer_size: config.sink_buffer_size,
            next_session_id: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        self.dispatcher.registry()
    }

    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    /// Entry point for the change-detection collaborator.
    pub fn table_changed(
        &self,
        resource: &str,
    ) -> Result<DispatchReport> {
        self.dispatcher.dispatch(resource)
    }

    /// Ends every open session stream. Called when the RPC server stops so
    /// graceful shutdown is not held up by long-lived sessions.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Binds one duplex session.
    ///
    /// Inbound subscribe/unsubscribe messages are applied to the registry by
    /// a session task; the returned stream carries this session's
    /// notifications and ends once the session is closed or faulted.
    pub fn open_session<S>(
        &self,
        mut inbound: S,
    ) -> SessionStream
    where
        S: Stream<Item = std::result::Result<ClientMessage, Status>> + Send + Unpin + 'static,
    {
        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.sink_buffer_size);
        let sink = NotificationSink::with_token(session_id, tx, self.shutdown.child_token());
        let registry = self.registry().clone();

        ACTIVE_SESSIONS.inc();
        info!(session_id, "session opened");

        let session_sink = sink.clone();
        let closed = sink.closed_token();
        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = closed.cancelled() => break,
                    next = inbound.next() => next,
                };
                match next {
                    Some(Ok(msg)) => handle_client_message(&registry, &session_sink, msg),
                    Some(Err(status)) => {
                        warn!(session_id, ?status, "session faulted");
                        session_sink.fault();
                        break;
                    }
                    None => {
                        debug!(session_id, "client closed session");
                        session_sink.close();
                        break;
                    }
                }
            }
            // Shutdown path: the token fired without an explicit transition.
            session_sink.close();
            ACTIVE_SESSIONS.dec();
            info!(session_id, state = ?session_sink.state(), "session ended");
        });

        let stream = ReceiverStream::new(rx)
            .map(Ok)
            .take_until(sink.closed_token().cancelled_owned());
        Box::pin(stream)
    }
}

fn handle_client_message(
    registry: &SubscriberRegistry,
    sink: &NotificationSink,
    msg: ClientMessage,
) {
    match msg.payload {
        Some(Payload::Subscribe(req)) => {
            if let Err(e) = registry.subscribe(&req.key, &req.resource, sink.clone()) {
                warn!(session_id = sink.session_id(), "subscribe rejected: {:?}", e);
            }
        }
        Some(Payload::Unsubscribe(req)) => {
            registry.unsubscribe(&req.key, &req.resource);
        }
        None => {
            warn!(session_id = sink.session_id(), "empty client message ignored");
        }
    }
}

#[tonic::async_trait]
impl ChangeTrackingService for ChangeTrackingServer {
    type SessionStream = SessionStream;

    async fn session(
        &self,
        request: Request<tonic::Streaming<ClientMessage>>,
    ) -> std::result::Result<Response<Self::SessionStream>, Status> {
        debug!(remote = ?request.remote_addr(), "session requested");
        Ok(Response::new(self.open_session(request.into_inner())))
    }

    #[tracing::instrument(skip(self, request))]
    async fn table_changed(
        &self,
        request: Request<ChangeRecord>,
    ) -> std::result::Result<Response<DispatchAck>, Status> {
        let record = request.into_inner();
        debug!(name = %record.name, version = record.version, "change record received");

        let report = self.dispatcher.dispatch(&record.name)?;
        Ok(Response::new(DispatchAck {
            delivered: report.delivered as u32,
            purged: report.purged as u32,
        }))
    }
}
