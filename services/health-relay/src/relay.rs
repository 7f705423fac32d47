use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use rumqttc::{AsyncClient, ClientError, QoS};

use crate::forwarder::{Forwarder, MetricsSink};
use crate::normalize::{NormalizeError, normalize};
use crate::store::StateSink;
use crate::types::{Reading, StatsResp, StoredReading};

/// Anything able to register a topic subscription on the current session.
pub trait TopicSubscriber {
    fn subscribe_topic(&self, topic: &str) -> Result<(), ClientError>;
}

impl TopicSubscriber for AsyncClient {
    // non-blocking: runs inside the event loop task that drains the request queue
    fn subscribe_topic(&self, topic: &str) -> Result<(), ClientError> {
        self.try_subscribe(topic, QoS::AtLeastOnce)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    Sent,
    Throttled,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Message arrived on a topic this relay does not own.
    Ignored,
    /// Payload failed normalization; no sink was touched.
    Rejected,
    Delivered {
        stored: bool,
        forwarded: ForwardOutcome,
    },
}

#[derive(Debug, Default)]
struct RelayStats {
    received: AtomicU64,
    rejected: AtomicU64,
    stored: AtomicU64,
    store_failed: AtomicU64,
    forwarded: AtomicU64,
    forward_failed: AtomicU64,
    throttled: AtomicU64,
}

impl RelayStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> StatsResp {
        StatsResp {
            received: self.received.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            stored: self.stored.load(Ordering::Relaxed),
            store_failed: self.store_failed.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            forward_failed: self.forward_failed.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
        }
    }
}

/// Owns the subscription and fans each valid reading out to the state store
/// and the rate-limited metrics forwarder.
pub struct RelayController<S, M> {
    topic: String,
    store: S,
    forwarder: Forwarder<M>,
    stats: RelayStats,
    latest: RwLock<Option<Reading>>,
}

impl<S: StateSink, M: MetricsSink> RelayController<S, M> {
    pub fn new(topic: impl Into<String>, store: S, forwarder: Forwarder<M>) -> Self {
        Self {
            topic: topic.into(),
            store,
            forwarder,
            stats: RelayStats::default(),
            latest: RwLock::new(None),
        }
    }

    pub fn forwarder(&self) -> &Forwarder<M> {
        &self.forwarder
    }

    pub fn stats(&self) -> StatsResp {
        self.stats.snapshot()
    }

    pub fn latest(&self) -> Option<StoredReading> {
        let latest = self.latest.read().unwrap_or_else(|e| e.into_inner());
        latest.as_ref().map(StoredReading::from)
    }

    /// Called on every ConnAck. Re-subscribing after a reconnect is harmless.
    pub fn on_connect(&self, subscriber: &impl TopicSubscriber) {
        match subscriber.subscribe_topic(&self.topic) {
            Ok(()) => tracing::info!(topic = %self.topic, "subscribed"),
            Err(e) => tracing::error!(topic = %self.topic, error = %e, "subscribe failed"),
        }
    }

    pub async fn on_message(&self, topic: &str, payload: &[u8]) -> DispatchOutcome {
        self.on_message_at(topic, payload, Instant::now()).await
    }

    /// Handle one inbound message using `now` for the rate-limit decision.
    pub async fn on_message_at(
        &self,
        topic: &str,
        payload: &[u8],
        now: Instant,
    ) -> DispatchOutcome {
        if topic != self.topic {
            tracing::trace!(topic, "ignoring message on foreign topic");
            return DispatchOutcome::Ignored;
        }
        RelayStats::bump(&self.stats.received);
        tracing::debug!(topic, bytes = payload.len(), "message received");

        let reading = match normalize(payload) {
            Ok(reading) => reading,
            Err(e) => {
                RelayStats::bump(&self.stats.rejected);
                match &e {
                    NormalizeError::Validation { field, .. } => {
                        tracing::warn!(topic, field = *field, error = %e, "payload rejected")
                    }
                    NormalizeError::Decode { .. } => {
                        tracing::warn!(topic, error = %e, "payload rejected")
                    }
                }
                return DispatchOutcome::Rejected;
            }
        };
        tracing::info!(
            heart_rate = reading.heart_rate,
            spo2 = reading.spo2,
            temperature = reading.temperature,
            humidity = reading.humidity,
            "reading normalized"
        );
        *self.latest.write().unwrap_or_else(|e| e.into_inner()) = Some(reading);

        let (stored, forwarded) = tokio::join!(
            self.store.write_latest(&reading),
            self.forwarder.maybe_forward(&reading, now),
        );

        let stored = match stored {
            Ok(()) => {
                RelayStats::bump(&self.stats.stored);
                true
            }
            Err(e) => {
                RelayStats::bump(&self.stats.store_failed);
                tracing::warn!(sink = "state-store", error = %e, "state store write failed");
                false
            }
        };

        let forwarded = match forwarded {
            Ok(true) => {
                RelayStats::bump(&self.stats.forwarded);
                tracing::info!(sink = "metrics", "reading forwarded");
                ForwardOutcome::Sent
            }
            Ok(false) => {
                RelayStats::bump(&self.stats.throttled);
                tracing::debug!(
                    sink = "metrics",
                    min_interval_ms = self.forwarder.limiter().min_interval().as_millis() as u64,
                    "forward throttled"
                );
                ForwardOutcome::Throttled
            }
            Err(e) => {
                RelayStats::bump(&self.stats.forward_failed);
                tracing::warn!(sink = "metrics", error = %e, "metrics forward failed");
                ForwardOutcome::Failed
            }
        };

        DispatchOutcome::Delivered { stored, forwarded }
    }
}

/// Read-only view used by the operational HTTP surface.
pub trait RelayStatus: Send + Sync {
    fn stats(&self) -> StatsResp;
    fn latest(&self) -> Option<StoredReading>;
}

impl<S, M> RelayStatus for RelayController<S, M>
where
    S: StateSink + Send + Sync,
    M: MetricsSink + Send + Sync,
{
    fn stats(&self) -> StatsResp {
        RelayController::stats(self)
    }

    fn latest(&self) -> Option<StoredReading> {
        RelayController::latest(self)
    }
}
