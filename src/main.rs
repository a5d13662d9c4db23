//! # Bike Speedometer Application Entry Point
//!
//! This binary wires the library pieces together: it measures speed in
//! fixed windows on the hall sensor and reports each finished window over
//! SMS (through the cellular modem) or HTTP POST. It supports a development
//! mode (`--stdout`) that runs the whole pipeline against a simulated wheel
//! and prints readings instead of sending them.

// Test modules
#[cfg(test)]
mod tests;

use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use env_logger::Env;

use speedo_lib::config::{Config, ReportMode};
use speedo_lib::estimator::{run_window, PulseSpeedEstimator};
use speedo_lib::hall::HallSensor;
use speedo_lib::modem::{LinkState, ModemLink};
use speedo_lib::report::{format_sms, HttpReporter};
use speedo_lib::sim::SimulatedSensor;
use speedo_lib::WindowSummary;

/// Speed the simulated wheel rolls at in development mode.
const SIMULATED_SPEED_KPH: f64 = 15.0;

/// Where finished readings go.
enum Reporter {
    /// Development mode: print to stdout
    Stdout,
    /// SMS through the modem link
    Sms {
        link: ModemLink,
        destination: String,
    },
    /// JSON POST to the companion backend
    Http {
        reporter: HttpReporter,
        rt: tokio::runtime::Runtime,
    },
}

impl Reporter {
    /// Report one finished window. Failures are logged, never fatal: the
    /// measurement loop keeps running even with reporting down.
    fn report(&self, summary: &WindowSummary) {
        match self {
            Reporter::Stdout => println!("{}", format_sms(summary)),
            Reporter::Sms { link, destination } => {
                if link.state() != LinkState::Ready {
                    log::info!("modem link is {:?}, attempting reconnect", link.state());
                    if !link.reconnect() {
                        log::warn!("reconnect failed, dropping this reading");
                        return;
                    }
                }
                if link.send_text(destination, &format_sms(summary)) {
                    log::info!("reported via SMS to {}", destination);
                } else {
                    log::warn!("SMS report failed, continuing to measure");
                }
            }
            Reporter::Http { reporter, rt } => {
                if let Err(e) = rt.block_on(reporter.post(summary)) {
                    log::warn!("HTTP report failed: {}", e);
                }
            }
        }
    }
}

/// Pick the real pin or the simulated wheel depending on build and flags.
fn build_sensor(config: &Config, simulate: bool) -> anyhow::Result<Box<dyn HallSensor>> {
    #[cfg(all(target_os = "linux", feature = "hardware"))]
    {
        if !simulate {
            let sensor = speedo_lib::hall::RppalHallSensor::new(config.sensor.hall_sensor_pin)?;
            return Ok(Box::new(sensor));
        }
    }
    #[cfg(not(all(target_os = "linux", feature = "hardware")))]
    {
        if !simulate {
            log::warn!("built without hardware support, falling back to the simulated sensor");
        }
    }
    Ok(Box::new(SimulatedSensor::new(
        SIMULATED_SPEED_KPH,
        config.sensor.wheel_circumference_m,
    )))
}

fn build_reporter(config: &Config, stdout_mode: bool) -> anyhow::Result<Reporter> {
    if stdout_mode {
        return Ok(Reporter::Stdout);
    }
    match config.report.mode {
        ReportMode::Sms => {
            let link = ModemLink::new(&config.modem);
            // A dead modem at startup is not fatal; the loop retries while
            // measurement carries on
            if link.connect() {
                if !link.initialize() {
                    log::error!("modem initialization failed, will retry between windows");
                }
            } else {
                log::error!("no modem found, SMS reporting suspended until reconnect");
            }
            Ok(Reporter::Sms {
                link,
                destination: config.modem.destination_address.clone(),
            })
        }
        ReportMode::Http => Ok(Reporter::Http {
            reporter: HttpReporter::new(&config.report.http_endpoint, &config.report.device_id)?,
            rt: tokio::runtime::Runtime::new().context("create Tokio runtime")?,
        }),
    }
}

/// Main application entry point.
fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(Env::default().filter_or("LOG_LEVEL", "info"));

    // Development mode: simulated sensor, readings printed to stdout
    let stdout_mode = env::args().any(|arg| arg == "--stdout");
    let simulate = stdout_mode || env::args().any(|arg| arg == "--simulate");

    let config = Config::load();

    // Ctrl-C flips the flag; the window loop checks it every poll tick, so
    // shutdown is prompt and the modem handle is dropped on the way out
    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    ctrlc::set_handler(move || {
        flag.store(false, Ordering::SeqCst);
    })
    .context("install Ctrl-C handler")?;

    let mut sensor = build_sensor(&config, simulate)?;
    let mut estimator = PulseSpeedEstimator::new(
        config.sensor.wheel_circumference_m,
        Duration::from_secs_f64(config.sensor.debounce_interval_s),
    );
    let reporter = build_reporter(&config, stdout_mode)?;

    let window = Duration::from_secs(config.sensor.measurement_window_s);
    let poll = Duration::from_micros(config.sensor.poll_interval_us);
    log::info!(
        "measuring in {}s windows, wheel {:.2}m, poll every {}us",
        config.sensor.measurement_window_s,
        config.sensor.wheel_circumference_m,
        config.sensor.poll_interval_us
    );

    while running.load(Ordering::SeqCst) {
        // A pin read failure aborts the loop: continuing without samples
        // would silently report a standstill
        let summary = run_window(sensor.as_mut(), &mut estimator, window, poll, &running)?;
        log::info!(
            "window closed: {:.1} km/h (avg {:.1}, {} pulses)",
            summary.speed_kph,
            summary.rolling_avg_kph,
            summary.pulse_count
        );

        // Skip reporting the truncated window cut short by shutdown
        if !running.load(Ordering::SeqCst) {
            break;
        }
        reporter.report(&summary);
    }

    // ModemLink releases the serial handle in Drop; nothing else to clean up
    log::info!("speedometer stopped");
    Ok(())
}
