//! # Bike Speedometer Core Library
//!
//! This library provides the core logic for a hall-effect bike speedometer
//! running on a Raspberry Pi Zero: pulse counting with debounce, speed
//! estimation over fixed measurement windows, and a cellular modem link for
//! reporting readings over SMS (with an HTTP fallback for app-based setups).
//!
//! ## Design Philosophy
//!
//! ### Polling over interrupts
//! The hall sensor is read in a tight poll-then-sleep loop rather than via
//! GPIO edge interrupts. The Pi's edge-detection facility proved unreliable
//! under sustained access on this hardware, so the sampler trades a little
//! CPU for deterministic edge capture. The poll interval is configurable and
//! should stay at or below 1 ms to avoid missing closely spaced pulses.
//!
//! ### Explicit ownership
//! Hardware handles are owned objects ([`estimator::PulseSpeedEstimator`],
//! [`modem::ModemLink`]) constructed once and passed to the orchestration
//! loop. There is no module-level GPIO or serial state, which keeps the core
//! testable against fake sensors and mock serial ports.
//!
//! ### Degrade, don't die
//! Reporting failures never stop measurement. The modem link downgrades
//! itself through `Ready -> Degraded -> Disconnected` on repeated send
//! failures and is reconnected opportunistically, while the measurement loop
//! keeps producing speed readings throughout.
//!
//! ## Data Flow
//! 1. **Sample**: poll the hall pin, debounce falling edges, tally pulses
//! 2. **Finalize**: once per window, convert the tally to km/h and update
//!    the rolling history
//! 3. **Report**: format an SMS through the modem link, or POST a JSON
//!    reading to the configured endpoint

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Module declarations
pub mod at;
pub mod config;
pub mod estimator;
pub mod hall;
pub mod modem;
pub mod report;
pub mod retry;
pub mod sim;

/// A single speed reading produced at the end of a measurement window.
///
/// Kept in a bounded FIFO history inside the estimator for the rolling
/// average; insertion order is significant and the oldest sample is evicted
/// once the history is full.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SpeedSample {
    /// Speed in km/h, always >= 0
    pub speed_kph: f64,
    /// Wall-clock time the window closed
    pub timestamp: DateTime<Utc>,
}

/// Everything the orchestration loop needs from one finished window.
///
/// Returned by [`estimator::PulseSpeedEstimator::finalize_window`]; the
/// pulse count is carried alongside the derived speeds so reports can
/// include the raw tally for diagnosing sensor placement problems.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WindowSummary {
    /// Instantaneous speed over this window, km/h
    pub speed_kph: f64,
    /// Mean over the bounded sample history, km/h
    pub rolling_avg_kph: f64,
    /// Accepted (debounced) pulses in this window
    pub pulse_count: u32,
}
