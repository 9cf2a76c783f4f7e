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

use crate::config::Settings;
use crate::db::{self, Connector, InsertOutcome};
use crate::image::{self, CommandRunner, ImageStage};
use crate::metrics::RunMetrics;
use crate::notify::{self, Notifier};
use crate::sample::{Sample, SensorReading};
use crate::sensor::{HumiditySensor, PressureSensor, SensorError};
use chrono::NaiveDateTime;
use std::error::Error;
use std::fmt::{self, Formatter};

/// Parts of a run that can fail without ending it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    HumiditySensor,
    Database,
    Image,
}

impl Stage {
    pub fn as_label(&self) -> &'static str {
        match self {
            Stage::HumiditySensor => "humidity_sensor",
            Stage::Database => "database",
            Stage::Image => "image",
        }
    }
}

/// Failure that ends a run before a sample could be assembled
#[derive(Debug)]
pub enum RunError {
    PressureSensor(SensorError),
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            RunError::PressureSensor(e) => write!(f, "unable to read pressure sensor: {}", e),
        }
    }
}

impl Error for RunError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RunError::PressureSensor(ref e) => Some(e),
        }
    }
}

/// Everything a run needs, owned by whoever starts the run and passed to each stage.
pub struct RunContext {
    pub settings: Settings,
    pub humidity_sensor: Box<dyn HumiditySensor>,
    pub pressure_sensor: Box<dyn PressureSensor>,
    pub notifier: Box<dyn Notifier>,
    pub connector: Option<Box<dyn Connector>>,
    pub runner: Box<dyn CommandRunner>,
    pub metrics: Option<RunMetrics>,
}

/// What happened during a run that made it to the end.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub sample: Sample,
    pub dht_attempts: u32,
    pub stored: Option<InsertOutcome>,
    pub image: ImageStage,
    pub failures: Vec<Stage>,
}

/// Perform a single sampling run.
///
/// The sample is timestamped by calling `clock` once the humidity sensor has been
/// read, since retrying it can take minutes.
///
/// Every stage after reading the sensors has its failures logged and sent to the
/// notifier without ending the run. Only a failure to read the pressure sensor,
/// which leaves nothing to store, is returned as an error.
pub fn run<C>(ctx: &mut RunContext, clock: C) -> Result<RunReport, RunError>
where
    C: Fn() -> NaiveDateTime,
{
    let notifier: &dyn Notifier = ctx.notifier.as_ref();
    let mut failures = Vec::new();

    let policy = ctx.settings.sensor.retry_policy();
    let humidity_sensor = &mut ctx.humidity_sensor;
    let mut dht_attempts = 0;

    let dht = policy.run(|| {
        dht_attempts += 1;
        humidity_sensor.read()
    });

    let timestamp = clock();
    let stamp = timestamp.format("%Y-%m-%d %H:%M:%S").to_string();

    let dht = match dht {
        Ok(retried) => {
            if retried.value.is_none() {
                let cause = retried.last_error.map(|e| e.to_string()).unwrap_or_default();
                tracing::error!(
                    message = "no reading from DHT sensor",
                    attempts = retried.attempts,
                    error = %cause
                );
                notify::best_effort(
                    notifier,
                    &format!(
                        "Failed to read DHT sensor {} after {} attempts:\n{}",
                        stamp, retried.attempts, cause
                    ),
                );
                failures.push(Stage::HumiditySensor);
            }
            retried.value
        }
        Err(e) => {
            notify::best_effort(notifier, &format!("DHT sensor failure at {}:\n{}", stamp, e));
            failures.push(Stage::HumiditySensor);
            None
        }
    };

    let (temperature_b, pressure) = ctx.pressure_sensor.read().map_err(RunError::PressureSensor)?;
    let reading = SensorReading {
        temperature_a: dht.map(|(t, _)| t),
        temperature_b,
        humidity: dht.map(|(_, h)| h),
        pressure,
    };

    let sample = Sample::from_reading(timestamp, &reading);
    tracing::info!(message = "assembled sample", sample = %sample, dht_attempts = dht_attempts);

    let stored = match (&ctx.settings.database, &ctx.connector) {
        (Some(settings), Some(connector)) => match db::persist(connector.as_ref(), &settings.table, &sample) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::error!(message = "unable to store sample", error = %e);
                notify::best_effort(notifier, &format!("Error occurred at {}:\n{}", stamp, e));
                failures.push(Stage::Database);
                None
            }
        },
        _ => {
            tracing::warn!(message = "no database configured, sample not stored");
            notify::best_effort(notifier, &format!("Sample at {} not stored, no database configured", stamp));
            failures.push(Stage::Database);
            None
        }
    };

    let image = match &ctx.settings.image {
        Some(settings) => {
            let outcome = image::capture_and_transfer(settings, timestamp, ctx.runner.as_mut(), notifier);
            if outcome.stage == ImageStage::Failed {
                failures.push(Stage::Image);
            }
            outcome.stage
        }
        None => {
            tracing::warn!(message = "no image settings, image not taken");
            notify::best_effort(notifier, &format!("Image at {} not taken, no image settings", stamp));
            failures.push(Stage::Image);
            ImageStage::Idle
        }
    };

    let report = RunReport {
        sample,
        dht_attempts,
        stored,
        image,
        failures,
    };

    write_metrics(ctx, &report);
    Ok(report)
}

/// Record the outcome of the run and write it for the textfile collector, if configured.
fn write_metrics(ctx: &RunContext, report: &RunReport) {
    let (metrics, settings) = match (&ctx.metrics, &ctx.settings.metrics) {
        (Some(m), Some(s)) => (m, s),
        _ => return,
    };

    metrics.record_sample(&report.sample);
    metrics.record_attempts(report.dht_attempts);
    metrics.record_run();
    for stage in report.failures.iter() {
        metrics.record_failure(stage.as_label());
    }

    if let Err(e) = metrics.write_textfile(&settings.textfile) {
        tracing::warn!(message = "unable to write metrics", path = %settings.textfile.display(), error = %e);
    }
}
