//! # Configuration Management
//!
//! This module handles loading and parsing configuration from the
//! speedo-config.toml file. It provides a centralized way to configure the
//! hall sensor geometry, the modem serial link, and reporting behavior.
//!
//! Missing or malformed files fall back to the built-in defaults so the
//! speedometer always starts, even on a freshly flashed SD card.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Application configuration loaded from speedo-config.toml
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Hall sensor and speed calculation settings
    pub sensor: SensorConfig,
    /// Cellular modem serial link settings
    pub modem: ModemConfig,
    /// Where finished readings go (SMS or HTTP)
    pub report: ReportConfig,
}

/// Hall sensor wiring and measurement parameters
#[derive(Debug, Deserialize, Serialize)]
pub struct SensorConfig {
    /// BCM GPIO number the hall sensor is wired to (pull-up, active low)
    pub hall_sensor_pin: u8,
    /// Wheel circumference in meters (measure your actual tire!)
    pub wheel_circumference_m: f64,
    /// Minimum spacing between accepted pulses, in seconds.
    ///
    /// This bounds the maximum measurable pulse frequency and therefore the
    /// maximum measurable speed; 0.05 s and a 2.1 m wheel top out around
    /// 150 km/h, plenty for a bicycle.
    pub debounce_interval_s: f64,
    /// Measurement window length in seconds
    pub measurement_window_s: u64,
    /// Poll interval in microseconds (keep <= 1000 to avoid missed edges)
    pub poll_interval_us: u64,
}

/// Modem serial port and SMS retry parameters
#[derive(Debug, Deserialize, Serialize)]
pub struct ModemConfig {
    /// Preferred serial device (auto-detection still scans the others)
    pub serial_port: String,
    /// Preferred baud rate (SIM7070G auto-bauds, 115200 works best)
    pub baud_rate: u32,
    /// Attempts per send_text operation before reporting failure
    pub max_send_retries: u32,
    /// Consecutive failed sends before teardown-and-reconnect
    pub degraded_threshold: u32,
    /// Seconds to back off when the network is not registered
    pub network_backoff_s: u64,
    /// Destination phone number in international format
    pub destination_address: String,
}

/// Report sink selection and HTTP collaborator settings
#[derive(Debug, Deserialize, Serialize)]
pub struct ReportConfig {
    /// "sms" to send through the modem, "http" to POST readings
    pub mode: ReportMode,
    /// Endpoint for HTTP mode, e.g. a Firebase function URL
    pub http_endpoint: String,
    /// Device identifier included in HTTP payloads
    pub device_id: String,
}

/// Which collaborator receives finished readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportMode {
    /// SMS through the cellular modem
    Sms,
    /// HTTP POST to the configured endpoint
    Http,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            sensor: SensorConfig {
                hall_sensor_pin: 17,
                wheel_circumference_m: 2.1,
                debounce_interval_s: 0.05,
                measurement_window_s: 30,
                poll_interval_us: 1000,
            },
            modem: ModemConfig {
                serial_port: "/dev/serial0".to_string(),
                baud_rate: 115200,
                max_send_retries: 3,
                degraded_threshold: 3,
                network_backoff_s: 5,
                destination_address: "+10000000000".to_string(),
            },
            report: ReportConfig {
                mode: ReportMode::Sms,
                http_endpoint: "http://localhost:3000/speed".to_string(),
                device_id: "bike-01".to_string(),
            },
        }
    }
}

impl Config {
    /// Load configuration from speedo-config.toml file
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load() -> Self {
        Self::load_from_path("speedo-config.toml")
    }

    /// Load configuration from specified path
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str::<Config>(&contents) {
                Ok(config) => {
                    log::info!(
                        "Loaded configuration: pin {}, wheel {:.2}m, reporting via {:?}",
                        config.sensor.hall_sensor_pin,
                        config.sensor.wheel_circumference_m,
                        config.report.mode
                    );
                    config
                }
                Err(e) => {
                    log::warn!("Invalid config file format: {}", e);
                    log::warn!("Using default configuration");
                    Self::default()
                }
            },
            Err(_) => {
                log::info!("No config file found, using default configuration");
                Self::default()
            }
        }
    }

    /// Save current configuration to speedo-config.toml
    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        let contents = toml::to_string_pretty(self)?;
        fs::write("speedo-config.toml", contents)?;
        log::info!("Configuration saved to speedo-config.toml");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.sensor.hall_sensor_pin, 17);
        assert_eq!(config.sensor.wheel_circumference_m, 2.1);
        assert_eq!(config.sensor.debounce_interval_s, 0.05);
        assert_eq!(config.sensor.measurement_window_s, 30);
        assert_eq!(config.modem.serial_port, "/dev/serial0");
        assert_eq!(config.modem.max_send_retries, 3);
        assert_eq!(config.report.mode, ReportMode::Sms);
    }

    #[test]
    fn test_config_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(config.sensor.hall_sensor_pin, parsed.sensor.hall_sensor_pin);
        assert_eq!(config.modem.serial_port, parsed.modem.serial_port);
        assert_eq!(config.report.device_id, parsed.report.device_id);
    }

    #[test]
    fn test_load_nonexistent_file() {
        let config = Config::load_from_path("/nonexistent/path");
        // Should fallback to default
        assert_eq!(config.sensor.hall_sensor_pin, 17);
    }

    #[test]
    fn test_load_partial_file_falls_back() {
        // A file with the wrong shape should not take the process down
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "[sensor]\nhall_sensor_pin = \"not a number\"").unwrap();
        let config = Config::load_from_path(f.path());
        assert_eq!(config.sensor.hall_sensor_pin, 17);
    }

    #[test]
    fn test_report_mode_parses_lowercase() {
        let toml_str = r#"
            [sensor]
            hall_sensor_pin = 22
            wheel_circumference_m = 2.05
            debounce_interval_s = 0.03
            measurement_window_s = 10
            poll_interval_us = 500

            [modem]
            serial_port = "/dev/ttyUSB0"
            baud_rate = 57600
            max_send_retries = 5
            degraded_threshold = 2
            network_backoff_s = 10
            destination_address = "+306900000000"

            [report]
            mode = "http"
            http_endpoint = "https://example.com/speed"
            device_id = "bike-42"
        "#;
        let parsed: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(parsed.report.mode, ReportMode::Http);
        assert_eq!(parsed.sensor.hall_sensor_pin, 22);
        assert_eq!(parsed.modem.baud_rate, 57600);
    }
}
