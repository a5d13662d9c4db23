//! # Simulated Hall Sensor
//!
//! Development-mode stand-in for the real sensor, so the full measurement
//! and reporting pipeline can run on a workstation with no GPIO at all.
//! The simulated wheel turns at a fixed speed: the pin goes LOW for a few
//! milliseconds once per "revolution", exactly the waveform the magnet
//! produces on the bench.

use std::time::{Duration, Instant};

use crate::hall::{HallSensor, SensorError};

/// How long the simulated magnet holds the line LOW each pass.
///
/// Long enough that a 1 ms poll loop cannot step over it, short enough that
/// a single pass never yields two debounced edges.
const MAGNET_DWELL: Duration = Duration::from_millis(5);

/// A sensor that pretends the bike is rolling at a constant speed.
pub struct SimulatedSensor {
    revolution_period: Duration,
    started: Instant,
}

impl SimulatedSensor {
    /// Simulate a wheel of `wheel_circumference_m` meters moving at
    /// `speed_kph` km/h. A non-positive speed parks the wheel (line idles
    /// HIGH forever).
    pub fn new(speed_kph: f64, wheel_circumference_m: f64) -> Self {
        let period = if speed_kph > 0.0 {
            let p = Duration::from_secs_f64(wheel_circumference_m / (speed_kph / 3.6));
            log::info!("Simulated sensor: {:.1} km/h, one pulse every {:?}", speed_kph, p);
            p
        } else {
            log::info!("Simulated sensor: wheel parked");
            Duration::MAX
        };
        SimulatedSensor {
            revolution_period: period,
            started: Instant::now(),
        }
    }
}

impl HallSensor for SimulatedSensor {
    fn read_level(&mut self) -> Result<bool, SensorError> {
        if self.revolution_period == Duration::MAX {
            return Ok(true);
        }
        let elapsed = self.started.elapsed().as_secs_f64();
        let phase = elapsed % self.revolution_period.as_secs_f64();
        Ok(phase >= MAGNET_DWELL.as_secs_f64())
    }
}
