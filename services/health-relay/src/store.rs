use std::future::Future;

use reqwest::{Client, StatusCode};
use thiserror::Error;

use crate::types::{Reading, StoredReading};

#[derive(Error, Debug)]
pub enum SinkWriteError {
    #[error("state store request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("state store rejected write with {status}: {body}")]
    Rejected { status: StatusCode, body: String },
}

/// Destination that keeps only the latest reading.
pub trait StateSink {
    fn write_latest(
        &self,
        reading: &Reading,
    ) -> impl Future<Output = Result<(), SinkWriteError>> + Send;
}

/// JSON document store reached over its REST API (Firebase Realtime Database
/// style). Writes are `PATCH` requests, which merge the four reading keys into
/// the record and leave any other keys at that location untouched.
#[derive(Clone)]
pub struct HttpStateStore {
    client: Client,
    record_url: String,
    auth: Option<String>,
}

impl HttpStateStore {
    pub fn new(client: Client, base_url: &str, path: &str, auth: Option<String>) -> Self {
        Self {
            client,
            record_url: record_url(base_url, path),
            auth,
        }
    }

    pub fn record_url(&self) -> &str {
        &self.record_url
    }
}

impl StateSink for HttpStateStore {
    async fn write_latest(&self, reading: &Reading) -> Result<(), SinkWriteError> {
        let mut request = self
            .client
            .patch(&self.record_url)
            .json(&StoredReading::from(reading));
        if let Some(auth) = &self.auth {
            request = request.query(&[("auth", auth)]);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkWriteError::Rejected { status, body });
        }
        tracing::debug!(url = %self.record_url, "state store updated");
        Ok(())
    }
}

// "/" -> "{base}/.json", "devices/esp32" -> "{base}/devices/esp32.json"
fn record_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let path = path.trim_matches('/');
    if path.is_empty() {
        format!("{base}/.json")
    } else {
        format!("{base}/{path}.json")
    }
}
