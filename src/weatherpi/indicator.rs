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

use rppal::gpio::{Gpio, OutputPin};
use std::error::Error;
use std::fmt::{self, Formatter};
use std::thread;
use std::time::Duration;

pub const DEFAULT_PIN: u8 = 17;
pub const DEFAULT_FREQUENCY_HZ: f64 = 60.0;
pub const DEFAULT_DUTY_CYCLE: f64 = 0.35;

/// Error setting up or driving the indicator light
#[derive(Debug)]
pub enum IndicatorError {
    Msg(&'static str),
    MsgCause(&'static str, Box<dyn Error + Send + Sync>),
}

impl fmt::Display for IndicatorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            IndicatorError::Msg(msg) => msg.fmt(f),
            IndicatorError::MsgCause(msg, ref e) => write!(f, "{}: {}", msg, e),
        }
    }
}

impl Error for IndicatorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            IndicatorError::MsgCause(_, ref e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

/// Abstraction around an `rppal::gpio::OutputPin` driven with software PWM to
/// allow for easier testing.
pub trait PwmOutput {
    fn start_pwm(&mut self, frequency: f64, duty_cycle: f64) -> Result<(), IndicatorError>;
    fn stop_pwm(&mut self) -> Result<(), IndicatorError>;
}

impl PwmOutput for OutputPin {
    fn start_pwm(&mut self, frequency: f64, duty_cycle: f64) -> Result<(), IndicatorError> {
        self.set_pwm_frequency(frequency, duty_cycle)
            .map_err(|e| IndicatorError::MsgCause("unable to start PWM", Box::new(e)))
    }

    fn stop_pwm(&mut self) -> Result<(), IndicatorError> {
        self.clear_pwm()
            .map_err(|e| IndicatorError::MsgCause("unable to stop PWM", Box::new(e)))?;
        self.set_low();
        Ok(())
    }
}

impl<P: PwmOutput + ?Sized> PwmOutput for &mut P {
    fn start_pwm(&mut self, frequency: f64, duty_cycle: f64) -> Result<(), IndicatorError> {
        (**self).start_pwm(frequency, duty_cycle)
    }

    fn stop_pwm(&mut self) -> Result<(), IndicatorError> {
        (**self).stop_pwm()
    }
}

/// Acquire the GPIO pin the indicator light is connected to as an output.
pub fn open_output(bcm_gpio_pin: u8) -> Result<OutputPin, IndicatorError> {
    let controller =
        Gpio::new().map_err(|e| IndicatorError::MsgCause("unable to create GPIO controller", Box::new(e)))?;

    let pin = controller
        .get(bcm_gpio_pin)
        .map_err(|e| IndicatorError::MsgCause("unable to acquire pin from controller", Box::new(e)))?;

    Ok(pin.into_output())
}

/// Light that is dimly lit for as long as this value is alive.
///
/// The light is turned off and the pin released when dropped, no matter how the
/// owning scope is exited.
#[derive(Debug)]
pub struct Indicator<P: PwmOutput> {
    pin: P,
    lit: bool,
}

impl<P: PwmOutput> Indicator<P> {
    pub fn start(mut pin: P, frequency: f64, duty_cycle: f64) -> Result<Self, IndicatorError> {
        if !(0.0..=1.0).contains(&duty_cycle) {
            return Err(IndicatorError::Msg("duty cycle must be between 0.0 and 1.0"));
        }

        pin.start_pwm(frequency, duty_cycle)?;
        tracing::debug!(message = "indicator on", frequency = frequency, duty_cycle = duty_cycle);
        Ok(Self { pin, lit: true })
    }

    pub fn is_lit(&self) -> bool {
        self.lit
    }

    /// Turn the light off. Calling this more than once has no effect.
    pub fn stop(&mut self) {
        if !self.lit {
            return;
        }

        self.lit = false;
        match self.pin.stop_pwm() {
            Ok(_) => tracing::debug!(message = "indicator off"),
            Err(e) => tracing::warn!(message = "unable to turn indicator off", error = %e),
        }
    }
}

impl<P: PwmOutput> Drop for Indicator<P> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Turn the light on and off `times` times, spending `delay` in each state.
pub fn blink<P: PwmOutput>(
    pin: &mut P,
    times: u32,
    frequency: f64,
    duty_cycle: f64,
    delay: Duration,
) -> Result<(), IndicatorError> {
    for _ in 0..times {
        let light = Indicator::start(&mut *pin, frequency, duty_cycle)?;
        thread::sleep(delay);
        drop(light);
        thread::sleep(delay);
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::{blink, Indicator, IndicatorError, PwmOutput};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Start(f64, f64),
        Stop,
    }

    #[derive(Debug, Default)]
    struct RecordingPwm {
        events: Vec<Event>,
    }

    impl PwmOutput for RecordingPwm {
        fn start_pwm(&mut self, frequency: f64, duty_cycle: f64) -> Result<(), IndicatorError> {
            self.events.push(Event::Start(frequency, duty_cycle));
            Ok(())
        }

        fn stop_pwm(&mut self) -> Result<(), IndicatorError> {
            self.events.push(Event::Stop);
            Ok(())
        }
    }

    fn failing_stage(pin: &mut RecordingPwm) -> Result<(), &'static str> {
        let _light = Indicator::start(pin, 60.0, 0.35).map_err(|_| "indicator")?;
        Err("sensor failure")
    }

    #[test]
    fn test_off_on_off() {
        let mut pin = RecordingPwm::default();
        {
            let light = Indicator::start(&mut pin, 60.0, 0.35).unwrap();
            assert!(light.is_lit());
        }

        assert_eq!(vec![Event::Start(60.0, 0.35), Event::Stop], pin.events);
    }

    #[test]
    fn test_released_on_error_path() {
        let mut pin = RecordingPwm::default();

        assert!(failing_stage(&mut pin).is_err());
        assert_eq!(Some(&Event::Stop), pin.events.last());
    }

    #[test]
    fn test_stop_once() {
        let mut pin = RecordingPwm::default();
        {
            let mut light = Indicator::start(&mut pin, 60.0, 0.35).unwrap();
            light.stop();
            light.stop();
            assert!(!light.is_lit());
        }

        assert_eq!(vec![Event::Start(60.0, 0.35), Event::Stop], pin.events);
    }

    #[test]
    fn test_invalid_duty_cycle() {
        let mut pin = RecordingPwm::default();
        assert!(Indicator::start(&mut pin, 60.0, 35.0).is_err());
        assert!(pin.events.is_empty());
    }

    #[test]
    fn test_blink() {
        let mut pin = RecordingPwm::default();
        blink(&mut pin, 3, 60.0, 0.35, Duration::ZERO).unwrap();

        assert_eq!(6, pin.events.len());
        assert_eq!(3, pin.events.iter().filter(|e| **e == Event::Stop).count());
    }
}
