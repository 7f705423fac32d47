use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode};
use thiserror::Error;

use crate::types::Reading;

pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(16_000);

#[derive(Error, Debug)]
pub enum ForwardError {
    #[error("metrics request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("metrics endpoint answered {status}: {body}")]
    Status { status: StatusCode, body: String },
}

/// External metrics API receiving forwarded readings.
pub trait MetricsSink {
    fn send(&self, reading: &Reading) -> impl Future<Output = Result<(), ForwardError>> + Send;
}

/// ThingSpeak style `GET /update?api_key=..&field1=..&field4=..` channel writer.
#[derive(Clone)]
pub struct ThingSpeakClient {
    client: Client,
    url: String,
    api_key: String,
}

impl ThingSpeakClient {
    pub fn new(client: Client, url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            api_key: api_key.into(),
        }
    }
}

impl MetricsSink for ThingSpeakClient {
    async fn send(&self, reading: &Reading) -> Result<(), ForwardError> {
        let fields = [
            ("api_key", self.api_key.clone()),
            ("field1", reading.heart_rate.to_string()),
            ("field2", reading.spo2.to_string()),
            ("field3", reading.temperature.to_string()),
            ("field4", reading.humidity.to_string()),
        ];
        let response = self.client.get(&self.url).query(&fields).send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ForwardError::Status { status, body });
        }
        // ThingSpeak answers "0" instead of an entry id when it drops an update
        tracing::debug!(%status, entry = %body.trim(), "metrics endpoint accepted request");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardingState {
    /// `None` until the first forward after process start.
    pub last_sent_at: Option<Instant>,
}

/// Minimum-interval gate. Check and update happen under one lock, so two
/// overlapping callers can never both pass for the same window.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    state: Mutex<ForwardingState>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            state: Mutex::new(ForwardingState::default()),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Returns true and records `now` when more than `min_interval` has
    /// elapsed since the last granted slot.
    pub fn try_acquire(&self, now: Instant) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let due = match state.last_sent_at {
            None => true,
            Some(last) => now.saturating_duration_since(last) > self.min_interval,
        };
        if due {
            state.last_sent_at = Some(now);
        }
        due
    }

    pub fn state(&self) -> ForwardingState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn reset(&self) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = ForwardingState::default();
    }
}

/// Sends readings to a [`MetricsSink`] at most once per minimum interval.
pub struct Forwarder<M> {
    sink: M,
    limiter: RateLimiter,
}

impl<M: MetricsSink> Forwarder<M> {
    pub fn new(sink: M, min_interval: Duration) -> Self {
        Self {
            sink,
            limiter: RateLimiter::new(min_interval),
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Forward `reading` if the rate limit allows it. The slot is taken before
    /// the request, so a failed send still consumes the window.
    pub async fn maybe_forward(
        &self,
        reading: &Reading,
        now: Instant,
    ) -> Result<bool, ForwardError> {
        if !self.limiter.try_acquire(now) {
            return Ok(false);
        }
        self.sink.send(reading).await?;
        Ok(true)
    }
}
