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

//! Sample temperature, humidity, and pressure sensors and a camera from a Raspberry PI.
//!
//! ## Features
//!
//! `weatherpi` performs a single sampling run each time it is invoked and is meant
//! to be started periodically by a timer (cron or a systemd timer). Each run:
//!
//! * Reads temperature and humidity from a [DHT11 or DHT22 sensor](https://learn.adafruit.com/dht),
//!   retrying up to a configurable number of times since these sensors often fail to read.
//! * Reads temperature and pressure from a BMP280 sensor over I2C.
//! * Averages both temperatures and stores a row with temperature, pressure, and humidity
//!   in a MySQL table.
//! * Takes an image with `raspistill` and copies it to a remote host with `scp`.
//! * Emails the operator when any of the above fails.
//!
//! An LED is dimly lit for the duration of the run.
//!
//! ## Build
//!
//! `weatherpi` is a Rust program and must be built from source using a [Rust toolchain](https://rustup.rs/)
//! . Since it's meant to be run on a Raspberry PI, you will also likely need to cross-compile it. If you
//! are on Ubuntu GNU/Linux, you'll need the following packages installed for this.
//!
//! ```text
//! apt-get install gcc-arm-linux-gnueabihf musl-tools
//! ```
//!
//! Next, make sure you have a Rust toolchain for ARMv7 and build `weatherpi` for it.
//!
//! ```text
//! rustup target add armv7-unknown-linux-musleabihf
//! cargo build --release --target armv7-unknown-linux-musleabihf
//! ```
//!
//! ## Configure
//!
//! Settings are read from `credentials.json` next to the `weatherpi` binary (or the
//! path given by `--config`). If the file can't be read, `weatherpi` exits right away
//! without sampling anything.
//!
//! ```json
//! {
//!   "mail": {"username": "monitor@gmail.com", "password": "...", "recipient": "me@example.com"},
//!   "database": {"host": "db.local", "user": "pi", "password": "...", "database": "weather"},
//!   "image": {"output": "/home/pi/images", "remote_host": "pi@nas", "remote_dir": "/mnt/plant_monitor", "quality": 20},
//!   "sensor": {"dht_pin": 25, "dht_model": "dht11", "max_attempts": 100, "bmp280_address": 119},
//!   "metrics": {"textfile": "/var/lib/node_exporter/weatherpi.prom"}
//! }
//! ```
//!
//! Only `mail`, `database`, and `image` are needed for a complete run, everything else
//! has defaults. Samples are inserted into the `Sample` table (configurable with
//! `database.table`) which must have the columns `date`, `time`, `temperature`,
//! `pressure`, and `humidity`.
//!
//! ## Run
//!
//! In order to read and write the device `/dev/gpiomem`, `weatherpi` must run as a
//! user in the `gpio` group (or `root`). The remote host must accept key based SSH
//! logins from that user since `ssh` and `scp` are run non-interactively.
//!

pub mod config;
pub mod db;
pub mod image;
pub mod indicator;
pub mod metrics;
pub mod notify;
pub mod run;
pub mod sample;
pub mod sensor;
