//! # Pulse Counting and Speed Estimation
//!
//! This module converts raw hall-sensor pin transitions into speed readings.
//! A magnet on the wheel pulls the sensor output LOW once per revolution, so
//! speed falls out of the pulse count, the wheel circumference, and the
//! window length:
//!
//! ```text
//! speed_kph = (pulses * circumference_m / window_s) * 3.6
//! ```
//!
//! ## Debounce
//!
//! Reed and hall sensors bounce: a single magnet pass can produce a burst of
//! electrical transitions a few milliseconds apart. An edge is only accepted
//! if it arrives more than `debounce_interval` after the previous accepted
//! edge (default 50 ms). That threshold also caps the maximum measurable
//! pulse rate, which is why it is configuration, not a constant.
//!
//! ## Window accounting
//!
//! Every accepted edge belongs to exactly one measurement window: the tally
//! is read and reset atomically by [`PulseSpeedEstimator::finalize_window`],
//! and the debounce clock carries across window boundaries so an edge is
//! never counted twice or dropped at the seam.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::hall::{HallSensor, SensorError};
use crate::{SpeedSample, WindowSummary};

/// Samples kept for the rolling average (ordinary sliding window)
pub const DEFAULT_HISTORY_CAPACITY: usize = 10;

/// Converts pin-level samples into per-window speed readings.
///
/// Feed it every poll tick through [`sample`](Self::sample) and close out
/// each measurement window with [`finalize_window`](Self::finalize_window).
/// The estimator itself never touches hardware; the caller owns the pin.
pub struct PulseSpeedEstimator {
    wheel_circumference_m: f64,
    debounce_interval: Duration,
    /// Accepted pulses since the last window reset
    count: u32,
    /// Time of the most recent accepted edge, for debounce
    last_pulse_time: Option<Instant>,
    /// Level seen on the previous poll tick (pull-up idles HIGH)
    last_level_high: bool,
    history: VecDeque<SpeedSample>,
    history_capacity: usize,
}

impl PulseSpeedEstimator {
    /// Create an estimator for the given wheel and debounce threshold.
    pub fn new(wheel_circumference_m: f64, debounce_interval: Duration) -> Self {
        Self::with_history_capacity(
            wheel_circumference_m,
            debounce_interval,
            DEFAULT_HISTORY_CAPACITY,
        )
    }

    /// Like [`new`](Self::new) with an explicit rolling-history size.
    pub fn with_history_capacity(
        wheel_circumference_m: f64,
        debounce_interval: Duration,
        history_capacity: usize,
    ) -> Self {
        PulseSpeedEstimator {
            wheel_circumference_m,
            debounce_interval,
            count: 0,
            last_pulse_time: None,
            last_level_high: true,
            history: VecDeque::with_capacity(history_capacity),
            history_capacity,
        }
    }

    /// Feed one pin-level observation.
    ///
    /// Detects a HIGH->LOW transition against the previously observed level
    /// and accepts it only if it falls outside the debounce interval.
    /// Returns true when an edge was accepted and the tally incremented;
    /// rejected bounce returns false without mutating the tally.
    pub fn sample(&mut self, pin_high: bool, now: Instant) -> bool {
        let falling = self.last_level_high && !pin_high;
        self.last_level_high = pin_high;

        if !falling {
            return false;
        }

        if let Some(last) = self.last_pulse_time {
            let gap = now.saturating_duration_since(last);
            if gap <= self.debounce_interval {
                log::trace!("edge rejected as bounce ({:?} since previous)", gap);
                return false;
            }
            // Inter-pulse spacing gives an instantaneous speed reading that
            // is handy when aligning the magnet, but only the window tally
            // feeds the reported speed.
            let kph = self.wheel_circumference_m / gap.as_secs_f64() * 3.6;
            log::debug!("pulse accepted, instantaneous {:.1} km/h", kph);
        }

        self.last_pulse_time = Some(now);
        self.count += 1;
        true
    }

    /// Close out a measurement window.
    ///
    /// Atomically reads and resets the pulse tally, derives the window speed,
    /// appends it to the rolling history (evicting the oldest sample when
    /// full), and returns the summary. A non-positive `elapsed` yields a
    /// speed of 0 rather than dividing by zero.
    pub fn finalize_window(&mut self, elapsed: Duration) -> WindowSummary {
        let count = self.count;
        self.count = 0;

        let secs = elapsed.as_secs_f64();
        let speed_kph = if secs > 0.0 {
            (count as f64 * self.wheel_circumference_m / secs) * 3.6
        } else {
            0.0
        };

        if self.history.len() == self.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(SpeedSample {
            speed_kph,
            timestamp: Utc::now(),
        });

        let rolling_avg_kph =
            self.history.iter().map(|s| s.speed_kph).sum::<f64>() / self.history.len() as f64;

        WindowSummary {
            speed_kph,
            rolling_avg_kph,
            pulse_count: count,
        }
    }

    /// Rolling history of recent window speeds, oldest first.
    pub fn history(&self) -> &VecDeque<SpeedSample> {
        &self.history
    }
}

/// Run one measurement window over a live sensor.
///
/// Tight poll-then-sleep loop with an explicit exit condition: elapsed time
/// reaching `window`, or `stop` being set (Ctrl-C). A pin read failure is
/// fatal to the window and propagates; silently losing samples would corrupt
/// the speed estimate without any visible signal.
pub fn run_window(
    sensor: &mut dyn HallSensor,
    estimator: &mut PulseSpeedEstimator,
    window: Duration,
    poll_interval: Duration,
    stop: &AtomicBool,
) -> Result<WindowSummary, SensorError> {
    let start = Instant::now();
    loop {
        let now = Instant::now();
        if now.duration_since(start) >= window || stop.load(Ordering::Relaxed) {
            break;
        }
        let level = sensor.read_level()?;
        estimator.sample(level, now);
        thread::sleep(poll_interval);
    }
    Ok(estimator.finalize_window(start.elapsed()))
}
