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

use crate::sample::Sample;
use prometheus::{Encoder, Gauge, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use std::error::Error;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Error registering, encoding, or writing run metrics.
#[derive(Debug)]
pub enum MetricsError {
    Registration(&'static str, Box<dyn Error + Send + Sync + 'static>),
    Encoding(&'static str, Box<dyn Error + Send + Sync + 'static>),
    Write(&'static str, Box<dyn Error + Send + Sync + 'static>),
}

impl fmt::Display for MetricsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricsError::Registration(msg, ref e) => write!(f, "{}: {}", msg, e),
            MetricsError::Encoding(msg, ref e) => write!(f, "{}: {}", msg, e),
            MetricsError::Write(msg, ref e) => write!(f, "{}: {}", msg, e),
        }
    }
}

impl Error for MetricsError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MetricsError::Registration(_, ref e) => Some(e.as_ref()),
            MetricsError::Encoding(_, ref e) => Some(e.as_ref()),
            MetricsError::Write(_, ref e) => Some(e.as_ref()),
        }
    }
}

fn register<T>(reg: &Registry, metric: T) -> Result<T, MetricsError>
where
    T: prometheus::core::Collector + Clone + 'static,
{
    reg.register(Box::new(metric.clone()))
        .map_err(|e| MetricsError::Registration("unable to register metric", Box::new(e)))?;
    Ok(metric)
}

fn gauge(reg: &Registry, name: &str, help: &str) -> Result<Gauge, MetricsError> {
    let g = Gauge::new(name, help).map_err(|e| MetricsError::Registration("unable to declare gauge", Box::new(e)))?;
    register(reg, g)
}

/// Prometheus metrics describing the outcome of a single sampling run.
///
/// Since the job exits after each run, these are written to a file picked up
/// by the node_exporter textfile collector instead of being served over HTTP.
pub struct RunMetrics {
    registry: Registry,
    temperature: Gauge,
    humidity: Gauge,
    pressure: Gauge,
    dht_attempts: IntGauge,
    failures: IntGaugeVec,
    last_run: Gauge,
}

impl RunMetrics {
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let temperature = gauge(&registry, "weatherpi_temperature_degrees", "Temperature in celsius")?;
        let humidity = gauge(&registry, "weatherpi_relative_humidity", "Relative humidity (0-100)")?;
        let pressure = gauge(&registry, "weatherpi_pressure_hpa", "Atmospheric pressure in hectopascals")?;
        let last_run = gauge(&registry, "weatherpi_last_run_timestamp", "UNIX timestamp of the last run")?;

        let dht_attempts = IntGauge::new("weatherpi_dht_read_attempts", "Attempts needed to read the DHT sensor")
            .map_err(|e| MetricsError::Registration("unable to declare gauge", Box::new(e)))?;
        let dht_attempts = register(&registry, dht_attempts)?;

        let failures = IntGaugeVec::new(
            Opts::new("weatherpi_last_run_failures", "Failures during the last run by stage"),
            &["stage"],
        )
        .map_err(|e| MetricsError::Registration("unable to declare gauge", Box::new(e)))?;
        let failures = register(&registry, failures)?;

        Ok(Self {
            registry,
            temperature,
            humidity,
            pressure,
            dht_attempts,
            failures,
            last_run,
        })
    }

    pub fn record_sample(&self, sample: &Sample) {
        self.temperature.set(sample.temperature);
        self.pressure.set(sample.pressure as f64);
        self.humidity.set(sample.humidity.unwrap_or(f64::NAN));
    }

    pub fn record_attempts(&self, attempts: u32) {
        self.dht_attempts.set(attempts as i64);
    }

    pub fn record_failure(&self, stage: &str) {
        self.failures.with_label_values(&[stage]).inc();
    }

    pub fn record_run(&self) {
        // If we can't get the number of seconds since the epoch, skip the update
        let _ = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| self.last_run.set(d.as_secs_f64()));
    }

    /// Encode all metrics in the Prometheus text exposition format.
    pub fn encode(&self) -> Result<Vec<u8>, MetricsError> {
        let families = self.registry.gather();
        let mut buffer = Vec::new();

        tracing::debug!(
            message = "encoding metric families to text exposition format",
            num_metrics = families.len()
        );

        TextEncoder::new()
            .encode(&families, &mut buffer)
            .map_err(|e| MetricsError::Encoding("unable to encode Prometheus metrics", Box::new(e)))?;
        Ok(buffer)
    }

    /// Write metrics to `path`. The file is replaced atomically so that a collector
    /// reading it never sees a partial write.
    pub fn write_textfile(&self, path: &Path) -> Result<(), MetricsError> {
        let buffer = self.encode()?;
        let tmp = path.with_extension("prom.tmp");

        fs::write(&tmp, buffer).map_err(|e| MetricsError::Write("unable to write metrics file", Box::new(e)))?;
        fs::rename(&tmp, path).map_err(|e| MetricsError::Write("unable to replace metrics file", Box::new(e)))?;

        tracing::debug!(message = "wrote metrics file", path = %path.display());
        Ok(())
    }
}

impl fmt::Debug for RunMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunMetrics").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod test {
    use super::RunMetrics;
    use crate::sample::Sample;
    use chrono::NaiveDate;
    use std::{env, fs, process};

    fn sample() -> Sample {
        Sample {
            timestamp: NaiveDate::from_ymd_opt(2018, 2, 3)
                .unwrap()
                .and_hms_opt(14, 0, 5)
                .unwrap(),
            temperature: 22.5,
            pressure: 1013,
            humidity: None,
        }
    }

    #[test]
    fn test_encode() {
        let metrics = RunMetrics::new().unwrap();
        metrics.record_sample(&sample());
        metrics.record_attempts(7);
        metrics.record_failure("humidity_sensor");

        let text = String::from_utf8(metrics.encode().unwrap()).unwrap();

        assert!(text.contains("weatherpi_temperature_degrees 22.5"));
        assert!(text.contains("weatherpi_pressure_hpa 1013"));
        assert!(text.contains("weatherpi_relative_humidity NaN"));
        assert!(text.contains("weatherpi_dht_read_attempts 7"));
        assert!(text.contains("weatherpi_last_run_failures{stage=\"humidity_sensor\"} 1"));
    }

    #[test]
    fn test_write_textfile() {
        let path = env::temp_dir().join(format!("weatherpi-metrics-{}.prom", process::id()));
        let metrics = RunMetrics::new().unwrap();
        metrics.record_run();

        metrics.write_textfile(&path).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        fs::remove_file(&path).unwrap();

        assert!(text.contains("# TYPE weatherpi_last_run_timestamp gauge"));
        assert!(!text.contains("weatherpi_last_run_timestamp 0\n"));
        assert!(!path.with_extension("prom.tmp").exists());
    }
}
