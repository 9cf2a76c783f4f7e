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

//! Settings for a sampling run, loaded from a JSON document.
//!
//! The document holds credentials as well as hardware parameters so it is
//! expected to be readable only by the user running the job.

use crate::sensor::{DhtModel, RetryPolicy, BMP280_DEFAULT_ADDRESS};
use serde::Deserialize;
use std::error::Error;
use std::fmt::{self, Debug, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs, io};

pub const CONFIG_FILE_NAME: &str = "credentials.json";

const DEFAULT_SMTP_SERVER: &str = "smtp.gmail.com";
const DEFAULT_SMTP_PORT: u16 = 465;
const DEFAULT_MYSQL_PORT: u16 = 3306;
const DEFAULT_TABLE: &str = "Sample";
const DEFAULT_DHT_PIN: u8 = 25;
const DEFAULT_MAX_ATTEMPTS: u32 = 100;
const DEFAULT_RETRY_INTERVAL_MS: u64 = 2000;
const DEFAULT_I2C_BUS: u8 = 1;

/// String that is never included in `Debug` output, for passwords.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Secret {
    fn from(v: &str) -> Self {
        Self(v.to_owned())
    }
}

impl Debug for Secret {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Error reading or parsing the settings document
#[derive(Debug)]
pub enum ConfigError {
    Read(PathBuf, io::Error),
    Parse(PathBuf, serde_json::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read(path, e) => write!(f, "unable to read {}: {}", path.display(), e),
            ConfigError::Parse(path, e) => write!(f, "unable to parse {}: {}", path.display(), e),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfigError::Read(_, ref e) => Some(e),
            ConfigError::Parse(_, ref e) => Some(e),
        }
    }
}

/// Credentials for the mail relay and who to send alerts to.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MailSettings {
    pub username: String,
    pub password: Secret,
    pub recipient: String,
    #[serde(default = "default_smtp_server")]
    pub server: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
}

/// Connection parameters for the MySQL server samples are stored in.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DatabaseSettings {
    pub host: String,
    #[serde(default = "default_mysql_port")]
    pub port: u16,
    pub user: String,
    pub password: Secret,
    pub database: String,
    #[serde(default = "default_table")]
    pub table: String,
}

/// Where images are written locally, where they are copied to, and how they are taken.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ImageSettings {
    pub output: PathBuf,
    pub remote_host: String,
    /// Must not contain whitespace or shell metacharacters
    pub remote_dir: String,
    pub quality: u8,
    #[serde(default = "default_true")]
    pub vflip: bool,
    #[serde(default = "default_true")]
    pub hflip: bool,
}

/// Pins, buses, and read policy for the sensors.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SensorSettings {
    pub dht_pin: u8,
    pub dht_model: DhtModel,
    pub max_attempts: u32,
    pub retry_interval_ms: u64,
    pub i2c_bus: u8,
    pub bmp280_address: u16,
}

impl SensorSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.retry_interval_ms))
    }
}

impl Default for SensorSettings {
    fn default() -> Self {
        SensorSettings {
            dht_pin: DEFAULT_DHT_PIN,
            dht_model: DhtModel::Dht11,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_interval_ms: DEFAULT_RETRY_INTERVAL_MS,
            i2c_bus: DEFAULT_I2C_BUS,
            bmp280_address: BMP280_DEFAULT_ADDRESS,
        }
    }
}

/// Location of a file to write run metrics to for the node_exporter textfile collector.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MetricsSettings {
    pub textfile: PathBuf,
}

/// Everything needed for a single sampling run.
///
/// The `mail`, `database`, and `image` sections are required for a complete run
/// but missing ones only cause the stage that needs them to be skipped.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Settings {
    pub mail: Option<MailSettings>,
    pub database: Option<DatabaseSettings>,
    pub image: Option<ImageSettings>,
    #[serde(default)]
    pub sensor: SensorSettings,
    pub metrics: Option<MetricsSettings>,
}

impl Settings {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_owned(), e))?;
        let settings: Settings =
            serde_json::from_str(&contents).map_err(|e| ConfigError::Parse(path.to_owned(), e))?;

        tracing::debug!(message = "loaded settings", path = %path.display(), settings = ?settings);
        Ok(settings)
    }
}

/// Settings file next to the running executable, falling back to the current
/// directory if the location of the executable can't be determined.
pub fn default_path() -> PathBuf {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(CONFIG_FILE_NAME)))
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME))
}

fn default_smtp_server() -> String {
    DEFAULT_SMTP_SERVER.to_owned()
}

fn default_smtp_port() -> u16 {
    DEFAULT_SMTP_PORT
}

fn default_mysql_port() -> u16 {
    DEFAULT_MYSQL_PORT
}

fn default_table() -> String {
    DEFAULT_TABLE.to_owned()
}

fn default_true() -> bool {
    true
}
