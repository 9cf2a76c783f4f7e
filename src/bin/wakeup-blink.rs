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

use clap::Parser;
use std::process;
use std::time::Duration;
use tracing::Level;
use weatherpi::indicator;

const DEFAULT_LOG_LEVEL: Level = Level::INFO;
const DEFAULT_TIMES: u32 = 5;
const DEFAULT_DELAY_MS: u64 = 500;

/// Blink the indicator LED to show the board is up
///
/// Usually run once at boot. The LED is turned on and off a few times using
/// software PWM and the GPIO pin is released before exiting.
#[derive(Debug, Parser)]
#[command(name = "wakeup-blink", version = clap::crate_version!())]
struct WakeupBlinkApplication {
    /// BCM GPIO pin number the indicator LED is connected to
    #[arg(long, default_value_t = indicator::DEFAULT_PIN)]
    led_pin: u8,

    /// Number of times to blink
    #[arg(long, default_value_t = DEFAULT_TIMES)]
    times: u32,

    /// Time the LED spends on, and then off, for each blink, in milliseconds
    #[arg(long, default_value_t = DEFAULT_DELAY_MS)]
    delay_ms: u64,

    /// Fraction of each PWM period the LED is on (0.0 to 1.0)
    #[arg(long, default_value_t = indicator::DEFAULT_DUTY_CYCLE)]
    led_duty: f64,

    /// PWM frequency for the LED, in hertz
    #[arg(long, default_value_t = indicator::DEFAULT_FREQUENCY_HZ)]
    led_frequency: f64,

    /// Logging verbosity. Allowed values are 'trace', 'debug', 'info', 'warn', and 'error'
    /// (case insensitive)
    #[arg(long, default_value_t = DEFAULT_LOG_LEVEL)]
    log_level: Level,
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let opts = WakeupBlinkApplication::parse();
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(opts.log_level)
            .finish(),
    )
    .expect("failed to set tracing subscriber");

    let mut pin = indicator::open_output(opts.led_pin).unwrap_or_else(|e| {
        tracing::error!(message = "failed to initialize indicator pin", bcm_pin = opts.led_pin, error = %e);
        process::exit(1)
    });

    let delay = Duration::from_millis(opts.delay_ms);
    indicator::blink(&mut pin, opts.times, opts.led_frequency, opts.led_duty, delay)?;

    tracing::info!(message = "finished blinking", bcm_pin = opts.led_pin, times = opts.times);
    Ok(())
}
