//! Self-healing duplex channel.
//!
//! A single supervisor task owns the connection and walks an explicit state
//! machine:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> (Closed | Faulted) -> Connecting -> ...
//! ```
//!
//! Connecting is retried with the connect strategy (unbounded by default).
//! After every successful (re)connect the supervisor replays all active
//! subscriptions on the new channel before it is published to callers, so
//! notifications keep flowing across reconnects. Callers never open a
//! connection themselves; they wait for `Connected` and borrow the current
//! channel.
//!
//! Subscription sends, unsubscribe sends and the replay-then-publish step
//! are serialized by one async lock, so a subscription dropped while a
//! replay is in flight is still withdrawn on the channel being published.

use std::collections::HashSet;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::Connector;
use super::InboundStream;
use super::NotificationChannel;
use crate::metrics::CHANNEL_RECONNECTS;
use crate::proto::notify::TableChange;
use crate::retry_with_strategy;
use crate::server::Subscriber;
use crate::CacheError;
use crate::ExponentialBackoff;
use crate::FixedSchedule;
use crate::NetworkError;
use crate::Result;
use crate::RetryStrategy;
use crate::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
    /// Session ended by the peer without an error
    Closed,
    /// Session ended with a transport error
    Faulted,
}

/// Tuning for one [`ChannelManager`]
#[derive(Clone)]
pub struct ManagerOptions {
    pub connect_strategy: Arc<dyn RetryStrategy>,
    pub subscribe_strategy: Arc<dyn RetryStrategy>,
    pub outbound_buffer_size: usize,
}

impl ManagerOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            connect_strategy: Arc::new(FixedSchedule::from(&settings.retry.connect)),
            subscribe_strategy: Arc::new(ExponentialBackoff::from(&settings.retry.subscribe)),
            outbound_buffer_size: settings.client.outbound_buffer_size,
        }
    }
}

impl std::fmt::Debug for ManagerOptions {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ManagerOptions")
            .field("outbound_buffer_size", &self.outbound_buffer_size)
            .finish()
    }
}

/// Owns the one live duplex channel of a cache context.
#[derive(Clone)]
pub struct ChannelManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    connector: Arc<dyn Connector>,
    options: ManagerOptions,
    current: ArcSwapOption<NotificationChannel>,
    state_tx: watch::Sender<ChannelState>,
    subscriptions: Mutex<HashSet<Subscriber>>,
    send_gate: tokio::sync::Mutex<()>,
    events_tx: mpsc::Sender<TableChange>,
    generation: AtomicU64,
    cancel: CancellationToken,
}

impl ChannelManager {
    /// Starts the supervisor. Pushed changes are forwarded to `events_tx`.
    pub fn spawn(
        connector: Arc<dyn Connector>,
        options: ManagerOptions,
        events_tx: mpsc::Sender<TableChange>,
    ) -> (Self, JoinHandle<()>) {
        let (state_tx, _) = watch::channel(ChannelState::Disconnected);
        let inner = Arc::new(ManagerInner {
            connector,
            options,
            current: ArcSwapOption::empty(),
            state_tx,
            subscriptions: Mutex::new(HashSet::new()),
            send_gate: tokio::sync::Mutex::new(()),
            events_tx,
            generation: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        });

        let handle = tokio::spawn(inner.clone().run());
        (Self { inner }, handle)
    }

    pub fn state(&self) -> ChannelState {
        *self.inner.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.inner.state_tx.subscribe()
    }

    /// Number of connections opened so far.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    /// The live channel, if connected right now.
    pub fn current_channel(&self) -> Option<Arc<NotificationChannel>> {
        self.inner.current.load_full().filter(|ch| ch.is_open())
    }

    /// Waits for the supervisor to publish a live channel.
    pub async fn channel(&self) -> Result<Arc<NotificationChannel>> {
        let mut state_rx = self.watch_state();
        loop {
            if let Some(ch) = self.current_channel() {
                return Ok(ch);
            }
            tokio::select! {
                _ = self.inner.cancel.cancelled() => {
                    return Err(match self.state() {
                        ChannelState::Faulted => NetworkError::ChannelClosed.into(),
                        _ => NetworkError::Cancelled.into(),
                    });
                }
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        return Err(NetworkError::ChannelClosed.into());
                    }
                }
            }
        }
    }

    /// Registers interest of `key` in `resource`, retrying until the
    /// subscribe message is on a live channel.
    ///
    /// The subscription is remembered and replayed after every reconnect. If
    /// it cannot be sent it is forgotten again.
    pub async fn subscribe(
        &self,
        key: &str,
        resource: &str,
    ) -> Result<()> {
        if key.is_empty() {
            return Err(CacheError::InvalidArgument("subscriber key is empty").into());
        }
        if resource.is_empty() {
            return Err(CacheError::InvalidArgument("resource name is empty").into());
        }

        let subscriber = Subscriber::new(key, resource);
        let inserted = self.inner.subscriptions.lock().insert(subscriber.clone());

        let strategy = self.inner.options.subscribe_strategy.as_ref();
        let sent = retry_with_strategy("subscribe", strategy, &self.inner.cancel, || async {
            let channel = self.channel().await?;
            let _gate = self.inner.send_gate.lock().await;
            let wanted = self.inner.subscriptions.lock().contains(&subscriber);
            if !wanted {
                debug!(key, resource, "subscription withdrawn before it was sent");
                return Ok(());
            }
            channel.subscribe(key, resource).await
        })
        .await;

        if let Err(e) = sent {
            if inserted {
                // A replay may have sent it already.
                self.unsubscribe(key, resource).await;
            }
            return Err(e);
        }
        Ok(())
    }

    /// Drops the subscription. Best effort: if no channel is live the server
    /// forgets the entry when it purges the dead session.
    ///
    /// Waits for an in-flight replay, so the unsubscribe lands on the
    /// channel that replay publishes.
    pub async fn unsubscribe(
        &self,
        key: &str,
        resource: &str,
    ) {
        let _gate = self.inner.send_gate.lock().await;
        self.inner.subscriptions.lock().remove(&Subscriber::new(key, resource));

        if let Some(channel) = self.current_channel() {
            if let Err(e) = channel.unsubscribe(key, resource).await {
                debug!(key, resource, "unsubscribe not sent: {:?}", e);
            }
        }
    }

    pub fn active_subscriptions(&self) -> usize {
        self.inner.subscriptions.lock().len()
    }

    /// Stops the supervisor and closes the current channel.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }
}

impl ManagerInner {
    async fn run(self: Arc<Self>) {
        loop {
            self.set_state(ChannelState::Connecting);

            let strategy = self.options.connect_strategy.as_ref();
            let opened =
                retry_with_strategy("connect", strategy, &self.cancel, || self.open()).await;
            let (channel, inbound) = match opened {
                Ok(opened) => opened,
                Err(e) if self.cancel.is_cancelled() => {
                    debug!("connect interrupted by shutdown: {:?}", e);
                    break;
                }
                Err(e) => {
                    error!("notification channel gave up connecting: {:?}", e);
                    self.set_state(ChannelState::Faulted);
                    self.cancel.cancel();
                    return;
                }
            };

            let end_state = self.serve(channel.clone(), inbound).await;
            channel.close();
            self.current.store(None);

            let Some(state) = end_state else {
                break;
            };
            warn!(generation = channel.generation(), ?state, "notification channel lost, reopening");
            self.set_state(state);

            let pause = strategy.next_delay(1).unwrap_or_default();
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        if let Some(channel) = self.current.swap(None) {
            channel.close();
        }
        self.set_state(ChannelState::Disconnected);
        info!("channel supervisor stopped");
    }

    async fn open(&self) -> Result<(Arc<NotificationChannel>, InboundStream)> {
        let (tx, rx) = mpsc::channel(self.options.outbound_buffer_size);
        let inbound = self.connector.connect(ReceiverStream::new(rx)).await?;
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        Ok((Arc::new(NotificationChannel::new(generation, tx)), inbound))
    }

    /// Replays subscriptions, publishes the channel and pumps inbound
    /// changes. Returns the state the session ended in, or `None` on
    /// shutdown.
    async fn serve(
        &self,
        channel: Arc<NotificationChannel>,
        mut inbound: InboundStream,
    ) -> Option<ChannelState> {
        let gate = tokio::select! {
            _ = self.cancel.cancelled() => return None,
            gate = self.send_gate.lock() => gate,
        };
        let replay: Vec<Subscriber> = self.subscriptions.lock().iter().cloned().collect();
        for sub in &replay {
            let sent = tokio::select! {
                _ = self.cancel.cancelled() => return None,
                sent = channel.subscribe(sub.key(), sub.resource()) => sent,
            };
            if let Err(e) = sent {
                warn!(%sub, "replay failed: {:?}", e);
                return Some(ChannelState::Faulted);
            }
        }

        self.current.store(Some(channel.clone()));
        drop(gate);
        if channel.generation() > 1 {
            CHANNEL_RECONNECTS.inc();
        }
        info!(
            generation = channel.generation(),
            replayed = replay.len(),
            "notification channel connected"
        );
        self.set_state(ChannelState::Connected);

        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => return None,
                next = inbound.next() => next,
            };
            match next {
                Some(Ok(change)) => {
                    debug!(resource = %change.resource, key = %change.key, "change received");
                    if self.events_tx.send(change).await.is_err() {
                        warn!("change listener gone, notification discarded");
                    }
                }
                Some(Err(e)) => {
                    warn!("notification channel faulted: {:?}", e);
                    return Some(ChannelState::Faulted);
                }
                None => return Some(ChannelState::Closed),
            }
        }
    }

    fn set_state(
        &self,
        state: ChannelState,
    ) {
        self.state_tx.send_replace(state);
    }
}
