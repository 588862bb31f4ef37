//! Fan-out of change events to subscribed sessions.
//!
//! ```text
//! table_changed(resource)
//!   -> snapshot(registry)            [lock held only for the copy]
//!   -> for each (subscriber, sink):
//!        sink not open  -> purge (policy dependent)
//!        resource match -> sink.publish(subscribed resource, key)  [try_send, never blocks]
//! ```

use std::sync::Arc;

use tracing::debug;
use tracing::info;

use super::PublishOutcome;
use super::SubscriberRegistry;
use crate::metrics::NOTIFICATIONS_TOTAL;
use crate::metrics::OUTCOME_DELIVERED;
use crate::metrics::OUTCOME_DROPPED;
use crate::metrics::OUTCOME_PURGED;
use crate::CacheError;
use crate::Result;

/// When dead subscribers are removed during dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CleanupPolicy {
    /// Every dispatch purges every non-open sink it sees.
    #[default]
    FullScan,
    /// Only subscribers of the dispatched resource are purged.
    MatchOnly,
}

/// Per-dispatch accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchReport {
    pub delivered: usize,
    pub dropped: usize,
    pub purged: usize,
}

#[derive(Debug, Clone)]
pub struct NotificationDispatcher {
    registry: Arc<SubscriberRegistry>,
    policy: CleanupPolicy,
}

impl NotificationDispatcher {
    pub fn new(registry: Arc<SubscriberRegistry>) -> Self {
        Self::with_policy(registry, CleanupPolicy::default())
    }

    pub fn with_policy(
        registry: Arc<SubscriberRegistry>,
        policy: CleanupPolicy,
    ) -> Self {
        Self { registry, policy }
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    /// Pushes `resource` to every matching open subscriber and purges dead
    /// ones. Delivery is best effort.
    pub fn dispatch(
        &self,
        resource: &str,
    ) -> Result<DispatchReport> {
        if resource.is_empty() {
            return Err(CacheError::InvalidArgument("resource name is empty").into());
        }

        let mut report = DispatchReport::default();
        for (subscriber, sink) in self.registry.snapshot() {
            let interested = subscriber.is_interested_in(resource);

            if !sink.is_open() {
                if (self.policy == CleanupPolicy::FullScan || interested)
                    && self.registry.remove_if_same(&subscriber, &sink)
                {
                    debug!(%subscriber, session_id = sink.session_id(), "purged dead subscriber");
                    report.purged += 1;
                }
                continue;
            }

            if !interested {
                continue;
            }

            // Echo the subscribed spelling so the client can unsubscribe exactly.
            match sink.publish(subscriber.resource(), subscriber.key()) {
                PublishOutcome::Delivered => report.delivered += 1,
                PublishOutcome::Dropped => report.dropped += 1,
                PublishOutcome::Disconnected => {
                    if self.registry.remove_if_same(&subscriber, &sink) {
                        report.purged += 1;
                    }
                }
            }
        }

        NOTIFICATIONS_TOTAL
            .with_label_values(&[OUTCOME_DELIVERED])
            .inc_by(report.delivered as u64);
        NOTIFICATIONS_TOTAL.with_label_values(&[OUTCOME_DROPPED]).inc_by(report.dropped as u64);
        NOTIFICATIONS_TOTAL.with_label_values(&[OUTCOME_PURGED]).inc_by(report.purged as u64);

        info!(
            resource,
            delivered = report.delivered,
            dropped = report.dropped,
            purged = report.purged,
            "table change dispatched"
        );
        Ok(report)
    }
}
