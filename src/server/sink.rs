use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::trace;
use tracing::warn;

use crate::proto::notify::TableChange;

/// Liveness of a client session as seen by the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SinkState {
    Open = 0,
    Closed = 1,
    Faulted = 2,
}

impl From<u8> for SinkState {
    fn from(v: u8) -> Self {
        match v {
            0 => SinkState::Open,
            1 => SinkState::Closed,
            _ => SinkState::Faulted,
        }
    }
}

/// Result of pushing one notification into a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Delivered,
    /// Session queue was full; the notification is lost.
    Dropped,
    /// Session is gone; the subscriber should be purged.
    Disconnected,
}

/// Push handle for one duplex session.
///
/// Clones share state. The sink never blocks: a full session queue drops
/// the notification, a closed queue flips the sink to `Closed`.
#[derive(Debug, Clone)]
pub struct NotificationSink {
    inner: Arc<SinkInner>,
}

#[derive(Debug)]
struct SinkInner {
    session_id: u64,
    tx: mpsc::Sender<TableChange>,
    state: AtomicU8,
    closed: CancellationToken,
}

impl NotificationSink {
    pub fn new(
        session_id: u64,
        tx: mpsc::Sender<TableChange>,
    ) -> Self {
        Self::with_token(session_id, tx, CancellationToken::new())
    }

    pub(crate) fn with_token(
        session_id: u64,
        tx: mpsc::Sender<TableChange>,
        closed: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(SinkInner {
                session_id,
                tx,
                state: AtomicU8::new(SinkState::Open as u8),
                closed,
            }),
        }
    }

    pub fn session_id(&self) -> u64 {
        self.inner.session_id
    }

    pub fn state(&self) -> SinkState {
        let state = SinkState::from(self.inner.state.load(Ordering::Acquire));
        if state == SinkState::Open && self.inner.tx.is_closed() {
            self.mark(SinkState::Closed);
            return SinkState::Closed;
        }
        state
    }

    pub fn is_open(&self) -> bool {
        self.state() == SinkState::Open
    }

    /// Orderly end of the session.
    pub fn close(&self) {
        self.mark(SinkState::Closed);
    }

    /// Session ended with a transport error.
    pub fn fault(&self) {
        self.mark(SinkState::Faulted);
    }

    /// Resolves once the sink leaves the `Open` state through `close`/`fault`.
    pub(crate) fn closed_token(&self) -> CancellationToken {
        self.inner.closed.clone()
    }

    /// Pushes `TableChange(resource, key)` to the session.
    pub fn publish(
        &self,
        resource: &str,
        key: &str,
    ) -> PublishOutcome {
        if !self.is_open() {
            return PublishOutcome::Disconnected;
        }
        match self.inner.tx.try_send(TableChange::new(resource, key)) {
            Ok(()) => {
                trace!(session_id = self.session_id(), resource, key, "notification queued");
                PublishOutcome::Delivered
            }
            Err(TrySendError::Full(_)) => {
                warn!(
                    session_id = self.session_id(),
                    resource, key, "session queue full, notification dropped"
                );
                PublishOutcome::Dropped
            }
            Err(TrySendError::Closed(_)) => {
                self.mark(SinkState::Closed);
                PublishOutcome::Disconnected
            }
        }
    }

    /// True when both handles refer to the same session sink.
    pub fn same_sink(
        &self,
        other: &NotificationSink,
    ) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn mark(
        &self,
        state: SinkState,
    ) {
        // Only the first transition out of Open sticks.
        if self
            .inner
            .state
            .compare_exchange(
                SinkState::Open as u8,
                state as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            self.inner.closed.cancel();
        }
    }
}
