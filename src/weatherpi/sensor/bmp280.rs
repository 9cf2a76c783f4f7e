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

use crate::sensor::core::{PressureHpa, PressureSensor, RegisterBus, SensorError, SensorErrorKind, TemperatureCelsius};
use std::fmt::{self, Debug, Formatter};
use std::thread;
use std::time::Duration;

pub const DEFAULT_ADDRESS: u16 = 0x77;
pub(crate) const CHIP_ID: u8 = 0x58;

pub(crate) const REG_CALIBRATION: u8 = 0x88;
pub(crate) const REG_CHIP_ID: u8 = 0xD0;
pub(crate) const REG_STATUS: u8 = 0xF3;
pub(crate) const REG_CTRL_MEAS: u8 = 0xF4;
pub(crate) const REG_DATA: u8 = 0xF7;

pub(crate) const CALIBRATION_SIZE: usize = 24;
pub(crate) const DATA_SIZE: usize = 6;

// Temperature and pressure oversampling x1, forced mode
pub(crate) const CTRL_FORCED_X1: u8 = 0b001_001_01;
pub(crate) const STATUS_MEASURING: u8 = 0b0000_1000;

const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(2);
const MAX_STATUS_POLLS: u32 = 50;

/// Factory trimming parameters stored in the non-volatile memory of each sensor.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Calibration {
    t1: u16,
    t2: i16,
    t3: i16,
    p1: u16,
    p2: i16,
    p3: i16,
    p4: i16,
    p5: i16,
    p6: i16,
    p7: i16,
    p8: i16,
    p9: i16,
}

impl Calibration {
    /// Parse the twelve little-endian words starting at register `0x88`.
    pub(crate) fn from_bytes(b: &[u8; CALIBRATION_SIZE]) -> Self {
        let unsigned = |i: usize| u16::from_le_bytes([b[i], b[i + 1]]);
        let signed = |i: usize| i16::from_le_bytes([b[i], b[i + 1]]);

        Calibration {
            t1: unsigned(0),
            t2: signed(2),
            t3: signed(4),
            p1: unsigned(6),
            p2: signed(8),
            p3: signed(10),
            p4: signed(12),
            p5: signed(14),
            p6: signed(16),
            p7: signed(18),
            p8: signed(20),
            p9: signed(22),
        }
    }

    /// Return the "fine" temperature used by pressure compensation along with
    /// the temperature in degrees celsius.
    ///
    /// These are the floating point formulas from section 8.1 of the BMP280 datasheet.
    fn temperature(&self, adc_t: i32) -> (f64, f64) {
        let adc_t = adc_t as f64;
        let t1 = self.t1 as f64;

        let var1 = (adc_t / 16384.0 - t1 / 1024.0) * self.t2 as f64;
        let var2 = (adc_t / 131072.0 - t1 / 8192.0).powi(2) * self.t3 as f64;
        let t_fine = var1 + var2;

        (t_fine, t_fine / 5120.0)
    }

    /// Compensated pressure in pascals, or `None` if the calibration data would
    /// cause a division by zero.
    fn pressure(&self, t_fine: f64, adc_p: i32) -> Option<f64> {
        let mut var1 = t_fine / 2.0 - 64000.0;
        let mut var2 = var1 * var1 * self.p6 as f64 / 32768.0;
        var2 += var1 * self.p5 as f64 * 2.0;
        var2 = var2 / 4.0 + self.p4 as f64 * 65536.0;
        var1 = (self.p3 as f64 * var1 * var1 / 524288.0 + self.p2 as f64 * var1) / 524288.0;
        var1 = (1.0 + var1 / 32768.0) * self.p1 as f64;

        if var1 == 0.0 {
            return None;
        }

        let mut p = 1048576.0 - adc_p as f64;
        p = (p - var2 / 4096.0) * 6250.0 / var1;
        let var1 = self.p9 as f64 * p * p / 2147483648.0;
        let var2 = p * self.p8 as f64 / 32768.0;

        Some(p + (var1 + var2 + self.p7 as f64) / 16.0)
    }
}

/// Combine the 20-bit value spread over a most significant, least significant,
/// and extra least significant (upper nibble only) byte.
fn raw_sample(msb: u8, lsb: u8, xlsb: u8) -> i32 {
    ((msb as i32) << 12) | ((lsb as i32) << 4) | ((xlsb as i32) >> 4)
}

/// Read temperature in degrees celsius and pressure in hectopascals from a BMP280 sensor
pub struct Bmp280Sensor {
    bus: Box<dyn RegisterBus + Send + 'static>,
    calibration: Calibration,
}

impl Bmp280Sensor {
    /// Verify the device on the bus is a BMP280 and load its calibration data.
    pub fn from_bus<T>(bus: T) -> Result<Self, SensorError>
    where
        T: RegisterBus + Send + 'static,
    {
        let mut bus = Box::new(bus);

        let mut id = [0u8; 1];
        bus.read_registers(REG_CHIP_ID, &mut id)?;
        if id[0] != CHIP_ID {
            tracing::error!(message = "unexpected chip ID", expected = CHIP_ID, got = id[0]);
            return Err(SensorError::KindMsg(
                SensorErrorKind::Initialization,
                "device on the bus is not a BMP280",
            ));
        }

        let mut raw = [0u8; CALIBRATION_SIZE];
        bus.read_registers(REG_CALIBRATION, &mut raw)?;
        let calibration = Calibration::from_bytes(&raw);
        tracing::debug!(message = "loaded sensor calibration", calibration = ?calibration);

        Ok(Self { bus, calibration })
    }

    fn wait_for_measurement(&mut self) -> Result<(), SensorError> {
        let mut status = [0u8; 1];
        for _ in 0..MAX_STATUS_POLLS {
            thread::sleep(STATUS_POLL_INTERVAL);
            self.bus.read_registers(REG_STATUS, &mut status)?;
            if status[0] & STATUS_MEASURING == 0 {
                return Ok(());
            }
        }

        Err(SensorError::KindMsg(
            SensorErrorKind::ReadTimeout,
            "timeout waiting for measurement to complete",
        ))
    }
}

impl PressureSensor for Bmp280Sensor {
    /// Trigger a single forced-mode measurement and return the compensated values.
    fn read(&mut self) -> Result<(TemperatureCelsius, PressureHpa), SensorError> {
        self.bus.write_register(REG_CTRL_MEAS, CTRL_FORCED_X1)?;
        self.wait_for_measurement()?;

        let mut data = [0u8; DATA_SIZE];
        self.bus.read_registers(REG_DATA, &mut data)?;
        let adc_p = raw_sample(data[0], data[1], data[2]);
        let adc_t = raw_sample(data[3], data[4], data[5]);

        let (t_fine, celsius) = self.calibration.temperature(adc_t);
        let pascals = self.calibration.pressure(t_fine, adc_p).ok_or(SensorError::KindMsg(
            SensorErrorKind::Initialization,
            "invalid calibration data for pressure compensation",
        ))?;

        let temperature = TemperatureCelsius::from(celsius);
        let pressure = PressureHpa::from(pascals / 100.0);

        tracing::debug!(
            message = "parsed sensor data",
            raw_temperature = adc_t,
            raw_pressure = adc_p,
            temperature = %temperature,
            pressure = %pressure
        );

        Ok((temperature, pressure))
    }
}

impl Debug for Bmp280Sensor {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bmp280Sensor")
            .field("calibration", &self.calibration)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::{raw_sample, Bmp280Sensor, Calibration, CHIP_ID, CTRL_FORCED_X1, REG_CTRL_MEAS, STATUS_MEASURING};
    use crate::sensor::core::{PressureSensor, SensorErrorKind};
    use crate::sensor::test::MockBus;

    // Example values from section 8.2 of the BMP280 datasheet
    const ADC_T: i32 = 519888;
    const ADC_P: i32 = 415148;

    #[test]
    fn test_raw_sample() {
        assert_eq!(ADC_T, raw_sample(0x7E, 0xED, 0x00));
        assert_eq!(0xFFFFF, raw_sample(0xFF, 0xFF, 0xF0));
    }

    #[test]
    fn test_calibration_from_bytes() {
        let bus = MockBus::datasheet(ADC_T, ADC_P);
        let calibration = Calibration::from_bytes(&bus.calibration_bytes());

        assert_eq!(27504, calibration.t1);
        assert_eq!(-1000, calibration.t3);
        assert_eq!(-10685, calibration.p2);
        assert_eq!(6000, calibration.p9);
    }

    #[test]
    fn test_compensation_datasheet_example() {
        let bus = MockBus::datasheet(ADC_T, ADC_P);
        let calibration = Calibration::from_bytes(&bus.calibration_bytes());

        let (t_fine, celsius) = calibration.temperature(ADC_T);
        let pascals = calibration.pressure(t_fine, ADC_P).unwrap();

        assert!((celsius - 25.08).abs() < 0.01, "temperature was {}", celsius);
        assert!((pascals - 100653.27).abs() < 0.1, "pressure was {}", pascals);
    }

    #[test]
    fn test_sensor_read() {
        let bus = MockBus::datasheet(ADC_T, ADC_P);
        let writes = bus.writes();
        let mut sensor = Bmp280Sensor::from_bus(bus).unwrap();

        let (t, p) = sensor.read().unwrap();
        let t: f64 = t.into();
        let p: f64 = p.into();

        assert!((t - 25.08).abs() < 0.01, "temperature was {}", t);
        assert!((p - 1006.53).abs() < 0.01, "pressure was {}", p);
        assert_eq!(vec![(REG_CTRL_MEAS, CTRL_FORCED_X1)], *writes.lock().unwrap());
    }

    #[test]
    fn test_sensor_wrong_chip() {
        let mut bus = MockBus::datasheet(ADC_T, ADC_P);
        bus.set_chip_id(CHIP_ID + 1);

        let res = Bmp280Sensor::from_bus(bus);
        assert_eq!(SensorErrorKind::Initialization, res.unwrap_err().kind());
    }

    #[test]
    fn test_sensor_measurement_never_completes() {
        let mut bus = MockBus::datasheet(ADC_T, ADC_P);
        bus.set_status(STATUS_MEASURING);
        let mut sensor = Bmp280Sensor::from_bus(bus).unwrap();

        let res = sensor.read();
        assert_eq!(SensorErrorKind::ReadTimeout, res.unwrap_err().kind());
    }

    #[test]
    fn test_sensor_zero_calibration() {
        let bus = MockBus::with_calibration([0; super::CALIBRATION_SIZE], ADC_T, ADC_P);
        let mut sensor = Bmp280Sensor::from_bus(bus).unwrap();

        let res = sensor.read();
        assert_eq!(SensorErrorKind::Initialization, res.unwrap_err().kind());
    }
}
