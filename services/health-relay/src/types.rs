use serde::{Deserialize, Serialize};

/// One normalized telemetry sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub heart_rate: f64,
    pub spo2: f64,
    pub temperature: f64,
    pub humidity: f64,
}

// Record merged into the state store. Key names differ from the inbound ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReading {
    #[serde(rename = "hrData")]
    pub hr_data: f64,
    #[serde(rename = "spo2Data")]
    pub spo2_data: f64,
    #[serde(rename = "tempData")]
    pub temp_data: f64,
    pub humidity: f64,
}

impl From<&Reading> for StoredReading {
    fn from(r: &Reading) -> Self {
        Self {
            hr_data: r.heart_rate,
            spo2_data: r.spo2,
            temp_data: r.temperature,
            humidity: r.humidity,
        }
    }
}

// Counters served on GET /stats
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsResp {
    pub received: u64,
    pub rejected: u64,
    pub stored: u64,
    pub store_failed: u64,
    pub forwarded: u64,
    pub forward_failed: u64,
    pub throttled: u64,
}
