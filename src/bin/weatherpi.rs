// Weatherpi - Environmental sampling job for a Raspberry PI
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use chrono::Local;
use clap::Parser;
use std::path::PathBuf;
use std::process;
use tracing::Level;
use weatherpi::config::{self, Settings};
use weatherpi::db::{Connector, MysqlConnector};
use weatherpi::image::SystemRunner;
use weatherpi::indicator::{self, Indicator};
use weatherpi::metrics::RunMetrics;
use weatherpi::notify::{self, LogNotifier, MailNotifier, Notifier};
use weatherpi::run::{self, RunContext};
use weatherpi::sensor::{open_i2c, open_pin, Bmp280Sensor, DhtSensor, HumiditySensor, UnavailableSensor};

const DEFAULT_LOG_LEVEL: Level = Level::INFO;

/// Sample temperature, humidity, and pressure sensors and a camera, once
///
/// Read a DHT11 or DHT22 sensor (retrying a bounded number of times) and a BMP280
/// sensor, store the combined sample in a MySQL table, take an image with the camera
/// and copy it to a remote host. Failures of any stage are emailed to the operator.
///
/// This is meant to be run periodically by a timer, once for each sample. An LED is
/// lit while a run is in progress.
#[derive(Debug, Parser)]
#[command(name = "weatherpi", version = clap::crate_version!())]
struct WeatherpiApplication {
    /// Path to the JSON settings file. By default, credentials.json in the same
    /// directory as the weatherpi binary
    #[arg(long)]
    config: Option<PathBuf>,

    /// Logging verbosity. Allowed values are 'trace', 'debug', 'info', 'warn', and 'error'
    /// (case insensitive)
    #[arg(long, default_value_t = DEFAULT_LOG_LEVEL)]
    log_level: Level,

    /// BCM GPIO pin number the indicator LED is connected to
    #[arg(long, default_value_t = indicator::DEFAULT_PIN)]
    led_pin: u8,

    /// Fraction of each PWM period the indicator LED is on (0.0 to 1.0)
    #[arg(long, default_value_t = indicator::DEFAULT_DUTY_CYCLE)]
    led_duty: f64,

    /// PWM frequency for the indicator LED, in hertz
    #[arg(long, default_value_t = indicator::DEFAULT_FREQUENCY_HZ)]
    led_frequency: f64,
}

fn main() {
    let opts = WeatherpiApplication::parse();
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(opts.log_level)
            .finish(),
    )
    .expect("failed to set tracing subscriber");

    // Exit only after everything acquired during the run has been released
    let code = sample(&opts);
    process::exit(code);
}

/// Perform a run and return the exit code for the process.
fn sample(opts: &WeatherpiApplication) -> i32 {
    let _indicator = indicator::open_output(opts.led_pin)
        .and_then(|pin| Indicator::start(pin, opts.led_frequency, opts.led_duty))
        .map_err(|e| {
            tracing::warn!(message = "failed to light indicator, continuing without it", led_pin = opts.led_pin, error = %e);
        })
        .ok();

    let path = opts.config.clone().unwrap_or_else(config::default_path);
    let settings = match Settings::load(&path) {
        Ok(s) => s,
        Err(e) => {
            // Mail credentials live in the same file so there is nobody to tell
            tracing::error!(message = "failed to load settings, not sampling", path = %path.display(), error = %e);
            return 0;
        }
    };

    let notifier: Box<dyn Notifier> = match settings.mail.clone() {
        Some(mail) => Box::new(MailNotifier::new(mail)),
        None => {
            tracing::warn!(message = "no mail settings, failures will only be logged");
            Box::new(LogNotifier)
        }
    };

    let dht_pin = settings.sensor.dht_pin;
    let humidity_sensor: Box<dyn HumiditySensor> = match open_pin(dht_pin) {
        Ok(pin) => Box::new(DhtSensor::from_pin(settings.sensor.dht_model, pin)),
        Err(e) => {
            // The run reports the failure and carries on without humidity
            tracing::error!(message = "failed to initialize DHT data pin", bcm_pin = dht_pin, error = %e);
            Box::new(UnavailableSensor::new(e))
        }
    };

    let (bus, address) = (settings.sensor.i2c_bus, settings.sensor.bmp280_address);
    let pressure_sensor = match open_i2c(bus, address).and_then(Bmp280Sensor::from_bus) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(message = "failed to initialize BMP280 sensor", i2c_bus = bus, address = address, error = %e);
            notify::best_effort(notifier.as_ref(), &format!("Failed to initialize BMP280 sensor:\n{}", e));
            return 1;
        }
    };

    let connector = settings
        .database
        .clone()
        .map(|db| Box::new(MysqlConnector::new(db)) as Box<dyn Connector>);

    let metrics = settings.metrics.as_ref().and_then(|_| {
        RunMetrics::new()
            .map_err(|e| tracing::warn!(message = "failed to create run metrics", error = %e))
            .ok()
    });

    let mut ctx = RunContext {
        settings,
        humidity_sensor,
        pressure_sensor: Box::new(pressure_sensor),
        notifier,
        connector,
        runner: Box::new(SystemRunner),
        metrics,
    };

    match run::run(&mut ctx, || Local::now().naive_local()) {
        Ok(report) => {
            tracing::info!(
                message = "run complete",
                sample = %report.sample,
                dht_attempts = report.dht_attempts,
                image = report.image.as_label(),
                failures = report.failures.len()
            );
            0
        }
        Err(e) => {
            tracing::error!(message = "run aborted", error = %e);
            notify::best_effort(
                ctx.notifier.as_ref(),
                &format!("Run aborted at {}:\n{}", Local::now().format("%Y-%m-%d %H:%M:%S"), e),
            );
            1
        }
    }
}
