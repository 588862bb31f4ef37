use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::proto::notify::ClientMessage;
use crate::NetworkError;
use crate::Result;

/// Send half of one live duplex connection.
///
/// Owned by the [`ChannelManager`](super::ChannelManager); callers only ever
/// borrow it through an `Arc`. Once closed it never reopens: the manager
/// builds a new channel with a higher generation instead.
#[derive(Debug)]
pub struct NotificationChannel {
    generation: u64,
    outbound: mpsc::Sender<ClientMessage>,
    closed: CancellationToken,
}

impl NotificationChannel {
    pub(crate) fn new(
        generation: u64,
        outbound: mpsc::Sender<ClientMessage>,
    ) -> Self {
        Self {
            generation,
            outbound,
            closed: CancellationToken::new(),
        }
    }

    /// Monotonic connection counter, starting at 1.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_open(&self) -> bool {
        !self.closed.is_cancelled() && !self.outbound.is_closed()
    }

    pub(crate) fn close(&self) {
        self.closed.cancel();
    }

    pub async fn subscribe(
        &self,
        key: &str,
        resource: &str,
    ) -> Result<()> {
        self.send(ClientMessage::subscribe(key, resource)).await
    }

    pub async fn unsubscribe(
        &self,
        key: &str,
        resource: &str,
    ) -> Result<()> {
        self.send(ClientMessage::unsubscribe(key, resource)).await
    }

    async fn send(
        &self,
        msg: ClientMessage,
    ) -> Result<()> {
        if !self.is_open() {
            return Err(NetworkError::ChannelClosed.into());
        }
        tokio::select! {
            _ = self.closed.cancelled() => Err(NetworkError::ChannelClosed.into()),
            sent = self.outbound.send(msg) => {
                sent.map_err(|_| NetworkError::ChannelClosed)?;
                trace!(generation = self.generation, "client message queued");
                Ok(())
            }
        }
    }
}
