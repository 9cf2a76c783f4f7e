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

use crate::sensor::{Humidity, PressureHpa, TemperatureCelsius};
use chrono::NaiveDateTime;
use std::fmt::{self, Formatter};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";

/// Values read from both sensors during a single run.
///
/// The temperature and humidity from the DHT sensor are missing if it couldn't be
/// read within the allowed number of attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorReading {
    pub temperature_a: Option<TemperatureCelsius>,
    pub temperature_b: TemperatureCelsius,
    pub humidity: Option<Humidity>,
    pub pressure: PressureHpa,
}

/// Single row of measurements, as stored in the database.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub timestamp: NaiveDateTime,
    pub temperature: f64,
    pub pressure: i64,
    pub humidity: Option<f64>,
}

impl Sample {
    pub fn from_reading(timestamp: NaiveDateTime, reading: &SensorReading) -> Self {
        Sample {
            timestamp,
            temperature: aggregate_temperature(reading.temperature_a.map(f64::from), reading.temperature_b.into()),
            pressure: round_pressure(reading.pressure.into()),
            humidity: reading.humidity.map(f64::from),
        }
    }

    /// Date of the sample, `YYYY-MM-DD`
    pub fn date(&self) -> String {
        self.timestamp.format(DATE_FORMAT).to_string()
    }

    /// Time of the sample, `HH:MM:SS`
    pub fn time(&self) -> String {
        self.timestamp.format(TIME_FORMAT).to_string()
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "T: {}C, Pres: {}", self.temperature, self.pressure)?;
        match self.humidity {
            Some(h) => write!(f, ", Hum: {}", h),
            None => write!(f, ", Hum: none"),
        }
    }
}

/// Combine the temperatures of both sensors into a single value, rounded to two
/// decimal places. Only the second (always available) temperature is used when
/// the first is missing.
pub fn aggregate_temperature(temperature_a: Option<f64>, temperature_b: f64) -> f64 {
    match temperature_a {
        Some(a) => round2((a + temperature_b) / 2.0),
        None => round2(temperature_b),
    }
}

/// Round to the nearest whole hectopascal, halfway cases away from zero.
pub fn round_pressure(pressure: f64) -> i64 {
    pressure.round() as i64
}

/// Round to two decimal places, halfway cases away from zero.
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod test {
    use super::{aggregate_temperature, round2, round_pressure, Sample, SensorReading};
    use chrono::NaiveDate;

    #[test]
    fn test_aggregate_both() {
        assert_eq!(21.0, aggregate_temperature(Some(20.0), 22.0));
        assert_eq!(21.33, aggregate_temperature(Some(21.0), 21.666));
    }

    #[test]
    fn test_aggregate_fallback() {
        assert_eq!(22.0, aggregate_temperature(None, 22.0));
        assert_eq!(22.13, aggregate_temperature(None, 22.1299));
    }

    #[test]
    fn test_round2() {
        assert_eq!(1.24, round2(1.2367));
        assert_eq!(-3.5, round2(-3.5));
        assert_eq!(10.0, round2(9.999));
    }

    #[test]
    fn test_round_pressure() {
        assert_eq!(1013, round_pressure(1013.4));
        assert_eq!(1014, round_pressure(1013.6));
        assert_eq!(1014, round_pressure(1013.5));
        assert_eq!(1013, round_pressure(1012.6));
    }

    #[test]
    fn test_sample_from_reading() {
        let timestamp = NaiveDate::from_ymd_opt(2018, 2, 3)
            .unwrap()
            .and_hms_opt(14, 0, 5)
            .unwrap();
        let reading = SensorReading {
            temperature_a: None,
            temperature_b: 22.5.into(),
            humidity: None,
            pressure: 1012.6.into(),
        };

        let sample = Sample::from_reading(timestamp, &reading);

        assert_eq!(22.5, sample.temperature);
        assert_eq!(1013, sample.pressure);
        assert_eq!(None, sample.humidity);
        assert_eq!("2018-02-03", sample.date());
        assert_eq!("14:00:05", sample.time());
        assert_eq!("T: 22.5C, Pres: 1013, Hum: none", sample.to_string());
    }

    #[test]
    fn test_sample_keeps_humidity() {
        let timestamp = NaiveDate::from_ymd_opt(2018, 2, 3)
            .unwrap()
            .and_hms_opt(9, 5, 0)
            .unwrap();
        let reading = SensorReading {
            temperature_a: Some(20.0.into()),
            temperature_b: 22.0.into(),
            humidity: Some(41.0.into()),
            pressure: 1013.4.into(),
        };

        let sample = Sample::from_reading(timestamp, &reading);

        assert_eq!(21.0, sample.temperature);
        assert_eq!(1013, sample.pressure);
        assert_eq!(Some(41.0), sample.humidity);
        assert_eq!("09:05:00", sample.time());
    }
}
