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

use crate::sensor::core::{DataPin, Humidity, HumiditySensor, SensorError, SensorErrorKind, TemperatureCelsius};
use rppal::gpio::Mode;
use serde::Deserialize;
use std::fmt::{self, Debug, Formatter};
use std::thread;
use std::time::Duration;

pub(crate) const MAX_CYCLES: u32 = 32_000;
pub(crate) const TRANSITIONS: usize = 41;
pub(crate) const FRAME_SIZE: usize = 5;

/// Member of the DHT family of sensors connected to the data pin.
///
/// Both models use the same single-wire protocol and frame layout but encode
/// temperature and humidity differently.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DhtModel {
    Dht11,
    Dht22,
}

impl fmt::Display for DhtModel {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            DhtModel::Dht11 => f.write_str("DHT11"),
            DhtModel::Dht22 => f.write_str("DHT22"),
        }
    }
}

/// Number of cycles the data pin spent low and high during each transition
/// of a single read, the first of which is the sensor's response signal.
#[derive(Debug)]
struct CycleCounts {
    counts: [u32; TRANSITIONS * 2],
}

impl CycleCounts {
    /// Busy-wait on the pin, counting how long it stays low and then high for every
    /// transition. Returns a timeout error if the pin gets stuck, in which case the
    /// read needs to be retried after the sensor has had time to recover.
    fn capture(pin: &dyn DataPin) -> Result<Self, SensorError> {
        let mut counts = [0u32; TRANSITIONS * 2];

        for pair in counts.chunks_exact_mut(2) {
            while pin.is_low() {
                pair[0] += 1;
                if pair[0] >= MAX_CYCLES {
                    return Err(SensorError::KindMsg(
                        SensorErrorKind::ReadTimeout,
                        "timeout waiting for low pulse capture",
                    ));
                }
            }

            while pin.is_high() {
                pair[1] += 1;
                if pair[1] >= MAX_CYCLES {
                    return Err(SensorError::KindMsg(
                        SensorErrorKind::ReadTimeout,
                        "timeout waiting for high pulse capture",
                    ));
                }
            }
        }

        tracing::trace!(message = "captured low/high cycle counts", counts = ?counts);
        Ok(Self { counts })
    }

    /// Low and high counts for the 40 data bits, skipping the response signal.
    fn bits(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.counts[2..].chunks_exact(2).map(|pair| (pair[0], pair[1]))
    }
}

/// Five bytes sent by the sensor: two for humidity, two for temperature and a checksum.
#[derive(Debug, PartialEq)]
struct Frame {
    bytes: [u8; FRAME_SIZE],
}

impl Frame {
    /// Turn cycle counts into bits. A bit is `1` when the pin stays high longer than
    /// the average time it spends low between bits, `0` otherwise.
    fn from_counts(counts: &CycleCounts) -> Result<Self, SensorError> {
        let lows: Vec<u32> = counts.bits().map(|(low, _)| low).collect();
        let threshold = lows.iter().sum::<u32>() / lows.len() as u32;
        let mut bytes = [0u8; FRAME_SIZE];

        for (i, (_, high)) in counts.bits().enumerate() {
            let byte = &mut bytes[i / 8];
            *byte <<= 1;
            if high >= threshold {
                *byte |= 1;
            }
        }

        let frame = Frame { bytes };
        frame.verify()?;
        Ok(frame)
    }

    /// The last byte must equal the low eight bits of the sum of the first four.
    fn verify(&self) -> Result<(), SensorError> {
        let expected = self.bytes[4];
        let computed = self.bytes[..4].iter().fold(0u8, |acc, &b| acc.wrapping_add(b));

        tracing::debug!(
            message = "computing checksum for sensor data",
            computed = computed,
            expected = expected
        );

        if computed != expected {
            Err(SensorError::CheckSum(expected, computed))
        } else {
            Ok(())
        }
    }

    fn decode(&self, model: DhtModel) -> (TemperatureCelsius, Humidity) {
        let b = &self.bytes;
        let (temperature, humidity) = match model {
            // Integral and decimal bytes. Sensors that report below-zero temperatures
            // set the high bit of the decimal temperature byte.
            DhtModel::Dht11 => {
                let humidity = b[0] as f64 + b[1] as f64 / 10.0;
                let magnitude = b[2] as f64 + (b[3] & 0x7F) as f64 / 10.0;
                let temperature = if b[3] & 0x80 > 0 { -magnitude } else { magnitude };
                (temperature, humidity)
            }
            // Big-endian tenths, with the high bit of the temperature as the sign.
            DhtModel::Dht22 => {
                let humidity = u16::from_be_bytes([b[0], b[1]]) as f64 / 10.0;
                let magnitude = u16::from_be_bytes([b[2] & 0x7F, b[3]]) as f64 / 10.0;
                let temperature = if b[2] & 0x80 > 0 { -magnitude } else { magnitude };
                (temperature, humidity)
            }
        };

        let temperature = TemperatureCelsius::from(temperature);
        let humidity = Humidity::from(humidity);

        tracing::debug!(
            message = "parsed sensor data",
            model = %model,
            temperature = %temperature,
            humidity = %humidity
        );

        (temperature, humidity)
    }
}

/// Read temperature in degrees celsius and relative humidity from a DHT11 or DHT22 sensor
pub struct DhtSensor {
    model: DhtModel,
    pin: Box<dyn DataPin + Send + Sync + 'static>,
}

impl DhtSensor {
    pub fn from_pin<T>(model: DhtModel, pin: T) -> Self
    where
        T: DataPin + Send + Sync + 'static,
    {
        Self {
            model,
            pin: Box::new(pin),
        }
    }

    fn start_signal(&mut self) {
        // Wake the sensor by holding the line high, then low for longer than the
        // 18ms the DHT11 requires (the DHT22 only needs 1ms), then release it high
        // briefly before switching to input to receive the response.
        self.pin.set_mode(Mode::Output);
        self.pin.set_high();
        thread::sleep(Duration::from_millis(10));
        self.pin.set_low();
        thread::sleep(Duration::from_millis(20));
        self.pin.set_high();
        thread::sleep(Duration::from_micros(30));
        self.pin.set_mode(Mode::Input);
    }
}

impl HumiditySensor for DhtSensor {
    /// Perform a single read of the sensor. Timeouts and checksum failures are common
    /// with these sensors and are reported as transient errors.
    fn read(&mut self) -> Result<(TemperatureCelsius, Humidity), SensorError> {
        self.start_signal();
        let counts = CycleCounts::capture(self.pin.as_ref())?;
        let frame = Frame::from_counts(&counts)?;
        Ok(frame.decode(self.model))
    }
}

impl Debug for DhtSensor {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("DhtSensor")
            .field("model", &self.model)
            .field("pin", &self.pin.pin())
            .finish()
    }
}
