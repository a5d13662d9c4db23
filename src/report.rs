//! # Speed Reporting
//!
//! Outbound side of the pipeline: turn a finished [`WindowSummary`] into
//! either an SMS body (sent through the modem link) or a JSON reading POSTed
//! to the companion app's backend.
//!
//! Delivery guarantees end at the boundary: the cellular network owns the
//! SMS once the modem confirms it, and the REST collaborator owns anything
//! past a 2xx response.

use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::WindowSummary;

/// Errors that can occur while posting a reading.
#[derive(Error, Debug)]
pub enum ReportError {
    /// HTTP request failed (network, TLS, or protocol error)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Endpoint answered outside the 2xx range
    #[error("endpoint rejected reading with status {0}")]
    Status(reqwest::StatusCode),
}

/// JSON payload the REST collaborator expects.
#[derive(Clone, Debug, Serialize)]
pub struct SpeedReading {
    /// Which bike this reading came from
    pub device_id: String,
    /// Window close time, serialized as ISO-8601
    pub timestamp: DateTime<Utc>,
    /// Window speed in km/h, >= 0
    pub speed: f64,
    /// Accepted pulses in the window, >= 0
    pub pulse_count: u32,
}

impl SpeedReading {
    pub fn from_summary(device_id: &str, summary: &WindowSummary) -> Self {
        SpeedReading {
            device_id: device_id.to_string(),
            timestamp: Utc::now(),
            speed: summary.speed_kph,
            pulse_count: summary.pulse_count,
        }
    }
}

/// Render the SMS body for a finished window.
///
/// Short and fixed-format on purpose: it has to fit a single GSM message
/// and stay readable on a dumb phone.
pub fn format_sms(summary: &WindowSummary) -> String {
    format!(
        "Bike speed: {:.1} km/h (avg {:.1}, {} pulses) at {}",
        summary.speed_kph,
        summary.rolling_avg_kph,
        summary.pulse_count,
        Local::now().format("%H:%M:%S")
    )
}

/// POSTs readings to the configured REST endpoint.
pub struct HttpReporter {
    client: reqwest::Client,
    endpoint: String,
    device_id: String,
}

impl HttpReporter {
    /// Build a reporter with a bounded request timeout; a slow backend must
    /// not stall the measurement loop for longer than one window.
    pub fn new(endpoint: &str, device_id: &str) -> Result<Self, ReportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(HttpReporter {
            client,
            endpoint: endpoint.to_string(),
            device_id: device_id.to_string(),
        })
    }

    /// Post one reading. Failures are definite and logged by the caller;
    /// there is no retry here since the next window supersedes this one.
    pub async fn post(&self, summary: &WindowSummary) -> Result<(), ReportError> {
        let reading = SpeedReading::from_summary(&self.device_id, summary);
        let response = self
            .client
            .post(&self.endpoint)
            .json(&reading)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ReportError::Status(response.status()));
        }
        log::info!(
            "posted {:.1} km/h ({} pulses) to {}",
            reading.speed,
            reading.pulse_count,
            self.endpoint
        );
        Ok(())
    }
}
