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

use std::error::Error;
use std::fmt::{self, Formatter};

use rppal::gpio::{Gpio, IoPin, Mode};
use rppal::i2c::I2c;

/// Temperature, in degrees celsius
#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(transparent)]
pub struct TemperatureCelsius(f64);

impl From<TemperatureCelsius> for f64 {
    fn from(v: TemperatureCelsius) -> Self {
        v.0
    }
}

impl From<f64> for TemperatureCelsius {
    fn from(v: f64) -> Self {
        Self(v)
    }
}

impl fmt::Display for TemperatureCelsius {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}c", self.0)
    }
}

/// Relative humidity (from 0 to 100)
#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(transparent)]
pub struct Humidity(f64);

impl From<Humidity> for f64 {
    fn from(v: Humidity) -> Self {
        v.0
    }
}

impl From<f64> for Humidity {
    fn from(v: f64) -> Self {
        Self(v)
    }
}

impl fmt::Display for Humidity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// Atmospheric pressure, in hectopascals
#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(transparent)]
pub struct PressureHpa(f64);

impl From<PressureHpa> for f64 {
    fn from(v: PressureHpa) -> Self {
        v.0
    }
}

impl From<f64> for PressureHpa {
    fn from(v: f64) -> Self {
        Self(v)
    }
}

impl fmt::Display for PressureHpa {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}hPa", self.0)
    }
}

/// Potential kinds of errors that can be encountered reading from a sensor
#[derive(PartialEq, Eq, Debug, Hash, Clone, Copy)]
pub enum SensorErrorKind {
    Initialization,
    ReadTimeout,
    Checksum,
    Bus,
}

impl SensorErrorKind {
    pub fn as_label(&self) -> &'static str {
        match self {
            SensorErrorKind::Initialization => "initialization",
            SensorErrorKind::ReadTimeout => "timeout",
            SensorErrorKind::Checksum => "checksum",
            SensorErrorKind::Bus => "bus",
        }
    }

    /// Return true if a read failing with this kind of error may succeed when
    /// tried again after waiting, false if the sensor or driver is broken.
    pub fn is_transient(&self) -> bool {
        matches!(self, SensorErrorKind::ReadTimeout | SensorErrorKind::Checksum)
    }
}

/// Error initializing or reading a sensor via a GPIO pin or I2C bus
#[derive(Debug)]
pub enum SensorError {
    CheckSum(u8, u8),
    KindMsg(SensorErrorKind, &'static str),
    KindMsgCause(SensorErrorKind, &'static str, Box<dyn Error + Send + Sync>),
}

impl SensorError {
    pub fn kind(&self) -> SensorErrorKind {
        match self {
            SensorError::CheckSum(_, _) => SensorErrorKind::Checksum,
            SensorError::KindMsg(kind, _) => *kind,
            SensorError::KindMsgCause(kind, _, _) => *kind,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind().is_transient()
    }
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SensorError::CheckSum(expected, got) => {
                write!(f, "checksum error: expected {}, got {}", expected, got)
            }
            SensorError::KindMsg(_, msg) => msg.fmt(f),
            SensorError::KindMsgCause(_, msg, ref e) => write!(f, "{}: {}", msg, e),
        }
    }
}

impl Error for SensorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SensorError::KindMsgCause(_, _, ref e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

/// Create a new `IoPin` based on the BCM GPIO pin number of the data wire of a
/// sensor.
///
/// Note that the BCM GPIO pin number is NOT the same as the physical pin number.
/// See [pinout] for more information.
///
/// [pinout]: https://www.raspberrypi.com/documentation/computers/os.html#gpio-and-the-40-pin-header
pub fn open_pin(bcm_gpio_pin: u8) -> Result<IoPin, SensorError> {
    let controller = Gpio::new().map_err(|e| {
        SensorError::KindMsgCause(
            SensorErrorKind::Initialization,
            "unable to create GPIO controller",
            Box::new(e),
        )
    })?;

    let pin = controller.get(bcm_gpio_pin).map_err(|e| {
        SensorError::KindMsgCause(
            SensorErrorKind::Initialization,
            "unable to acquire pin from controller",
            Box::new(e),
        )
    })?;

    let io_pin = pin.into_io(Mode::Input);
    Ok(io_pin)
}

/// Open the given I2C bus (usually `1` on a Raspberry PI) and address the device
/// at `address` for all subsequent reads and writes.
pub fn open_i2c(bus: u8, address: u16) -> Result<I2c, SensorError> {
    let mut i2c = I2c::with_bus(bus).map_err(|e| {
        SensorError::KindMsgCause(SensorErrorKind::Initialization, "unable to open I2C bus", Box::new(e))
    })?;

    i2c.set_slave_address(address).map_err(|e| {
        SensorError::KindMsgCause(
            SensorErrorKind::Initialization,
            "unable to set I2C device address",
            Box::new(e),
        )
    })?;

    Ok(i2c)
}

/// Abstraction around an `rppal::gpio::IoPin` to allow for easier testing.
pub trait DataPin {
    fn is_low(&self) -> bool;
    fn is_high(&self) -> bool;
    fn pin(&self) -> u8;
    fn set_high(&mut self);
    fn set_low(&mut self);
    fn set_mode(&mut self, mode: Mode);
}

impl DataPin for IoPin {
    fn is_low(&self) -> bool {
        IoPin::is_low(self)
    }

    fn is_high(&self) -> bool {
        IoPin::is_high(self)
    }

    fn pin(&self) -> u8 {
        IoPin::pin(self)
    }

    fn set_high(&mut self) {
        IoPin::set_high(self);
    }

    fn set_low(&mut self) {
        IoPin::set_low(self);
    }

    fn set_mode(&mut self, mode: Mode) {
        IoPin::set_mode(self, mode);
    }
}

/// Abstraction around an `rppal::i2c::I2c` addressing a device with byte-wide
/// registers, to allow for easier testing.
pub trait RegisterBus {
    /// Read `buf.len()` consecutive registers starting at `register`.
    fn read_registers(&mut self, register: u8, buf: &mut [u8]) -> Result<(), SensorError>;

    /// Write a single byte to `register`.
    fn write_register(&mut self, register: u8, value: u8) -> Result<(), SensorError>;
}

impl RegisterBus for I2c {
    fn read_registers(&mut self, register: u8, buf: &mut [u8]) -> Result<(), SensorError> {
        self.write_read(&[register], buf)
            .map_err(|e| SensorError::KindMsgCause(SensorErrorKind::Bus, "unable to read I2C registers", Box::new(e)))
    }

    fn write_register(&mut self, register: u8, value: u8) -> Result<(), SensorError> {
        self.smbus_write_byte(register, value)
            .map_err(|e| SensorError::KindMsgCause(SensorErrorKind::Bus, "unable to write I2C register", Box::new(e)))
    }
}

/// Sensor that measures temperature and relative humidity, typically a DHT11 or DHT22.
pub trait HumiditySensor {
    fn read(&mut self) -> Result<(TemperatureCelsius, Humidity), SensorError>;
}

/// Sensor that measures temperature and atmospheric pressure, typically a BMP280.
pub trait PressureSensor {
    fn read(&mut self) -> Result<(TemperatureCelsius, PressureHpa), SensorError>;
}

/// Stand-in for a humidity sensor that couldn't be set up, so a run can continue
/// without it. The first read fails with the error from setting it up, later reads
/// with a generic initialization error.
#[derive(Debug)]
pub struct UnavailableSensor {
    cause: Option<SensorError>,
}

impl UnavailableSensor {
    pub fn new(cause: SensorError) -> Self {
        Self { cause: Some(cause) }
    }
}

impl HumiditySensor for UnavailableSensor {
    fn read(&mut self) -> Result<(TemperatureCelsius, Humidity), SensorError> {
        Err(self.cause.take().unwrap_or(SensorError::KindMsg(
            SensorErrorKind::Initialization,
            "sensor was not initialized",
        )))
    }
}

#[cfg(test)]
mod test {
    use super::{HumiditySensor, SensorError, SensorErrorKind, UnavailableSensor};

    #[test]
    fn test_error_kind_transient() {
        assert!(SensorErrorKind::ReadTimeout.is_transient());
        assert!(SensorErrorKind::Checksum.is_transient());
        assert!(!SensorErrorKind::Initialization.is_transient());
        assert!(!SensorErrorKind::Bus.is_transient());
    }

    #[test]
    fn test_checksum_error_is_transient() {
        let err = SensorError::CheckSum(1, 2);
        assert!(err.is_transient());
        assert_eq!("checksum error: expected 1, got 2", err.to_string());
    }

    #[test]
    fn test_unavailable_sensor() {
        let cause = SensorError::KindMsg(SensorErrorKind::Initialization, "unable to create GPIO controller");
        let mut sensor = UnavailableSensor::new(cause);

        let first = sensor.read().unwrap_err();
        assert_eq!(SensorErrorKind::Initialization, first.kind());
        assert_eq!("unable to create GPIO controller", first.to_string());

        let second = sensor.read().unwrap_err();
        assert!(!second.is_transient());
    }
}
