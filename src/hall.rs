//! # Hall Sensor Input
//!
//! Thin seam between the estimator and the physical GPIO pin. The sensor is
//! wired active-low with the Pi's internal pull-up: the line idles HIGH and
//! the magnet pulls it LOW once per wheel revolution.
//!
//! The [`HallSensor`] trait exists so the measurement loop can run against
//! scripted fakes in tests and the simulated sensor in development mode; the
//! `rppal`-backed implementation is only compiled on Linux with the
//! `hardware` feature, the same gating the rest of the Pi-specific code uses.

use thiserror::Error;

/// Errors raised by the sensor layer.
///
/// A pin that cannot be read is a resource failure: it propagates out of the
/// measurement loop rather than being swallowed, because continuing without
/// samples would silently report a standstill.
#[derive(Error, Debug)]
pub enum SensorError {
    /// GPIO access failed (permissions, missing chip, pin already claimed)
    #[error("GPIO error: {0}")]
    Gpio(String),
}

/// A digital input line carrying hall-sensor pulses.
pub trait HallSensor {
    /// Read the instantaneous pin level; `true` is HIGH (idle), `false` is
    /// LOW (magnet present).
    fn read_level(&mut self) -> Result<bool, SensorError>;
}

/// Hall sensor on a Raspberry Pi GPIO pin via rppal.
#[cfg(all(target_os = "linux", feature = "hardware"))]
pub struct RppalHallSensor {
    pin: rppal::gpio::InputPin,
}

#[cfg(all(target_os = "linux", feature = "hardware"))]
impl RppalHallSensor {
    /// Claim the given BCM pin as a pulled-up input.
    pub fn new(bcm_pin: u8) -> Result<Self, SensorError> {
        let gpio = rppal::gpio::Gpio::new().map_err(|e| SensorError::Gpio(e.to_string()))?;
        let pin = gpio
            .get(bcm_pin)
            .map_err(|e| SensorError::Gpio(e.to_string()))?
            .into_input_pullup();
        log::info!("Hall sensor ready on GPIO {}", bcm_pin);
        Ok(RppalHallSensor { pin })
    }
}

#[cfg(all(target_os = "linux", feature = "hardware"))]
impl HallSensor for RppalHallSensor {
    fn read_level(&mut self) -> Result<bool, SensorError> {
        Ok(self.pin.is_high())
    }
}
