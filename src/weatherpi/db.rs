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

use crate::config::DatabaseSettings;
use crate::sample::Sample;
use mysql::prelude::Queryable;
use mysql::{Conn, OptsBuilder};
use std::error::Error;
use std::fmt::{self, Debug, Formatter};

/// Error connecting to the database or inserting a sample
#[derive(Debug)]
pub enum DatabaseError {
    Connect(&'static str, Box<dyn Error + Send + Sync>),
    Query(&'static str, Box<dyn Error + Send + Sync>),
    InvalidTable(String),
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseError::Connect(msg, ref e) => write!(f, "{}: {}", msg, e),
            DatabaseError::Query(msg, ref e) => write!(f, "{}: {}", msg, e),
            DatabaseError::InvalidTable(table) => write!(f, "invalid table name '{}'", table),
        }
    }
}

impl Error for DatabaseError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DatabaseError::Connect(_, ref e) => Some(e.as_ref()),
            DatabaseError::Query(_, ref e) => Some(e.as_ref()),
            DatabaseError::InvalidTable(_) => None,
        }
    }
}

/// Result of trying to insert a single sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// There was no connection so nothing was attempted
    Skipped,
    /// Exactly one row was inserted
    Inserted,
    /// The insert succeeded but changed some other number of rows
    Anomaly(u64),
}

/// Open connection to a database that samples can be inserted into.
pub trait Connection {
    /// Insert `sample` as a single row of `table`, returning the number of affected rows.
    fn insert(&mut self, table: &str, sample: &Sample) -> Result<u64, DatabaseError>;
}

/// Something able to open new database connections.
pub trait Connector {
    fn connect(&self) -> Result<Box<dyn Connection>, DatabaseError>;

    /// Human readable description of where connections go, for logging.
    fn describe(&self) -> String;
}

/// Table names are interpolated into the statement so only allow plain identifiers.
fn validate_table(table: &str) -> Result<(), DatabaseError> {
    let valid = !table.is_empty() && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(DatabaseError::InvalidTable(table.to_owned()))
    }
}

fn insert_statement(table: &str) -> String {
    format!(
        "INSERT INTO `{}` (date, time, temperature, pressure, humidity) VALUES (?, ?, ?, ?, ?)",
        table
    )
}

/// Scoped database client. The connection, if any, is closed when this is dropped.
pub struct Database {
    conn: Option<Box<dyn Connection>>,
    target: String,
}

impl Database {
    /// Open a new connection using `connector`.
    pub fn connect(connector: &dyn Connector) -> Result<Self, DatabaseError> {
        let target = connector.describe();
        let conn = connector.connect()?;
        tracing::debug!(message = "opened database connection", target = %target);

        Ok(Self {
            conn: Some(conn),
            target,
        })
    }

    /// Client without a connection, inserts are skipped.
    pub fn disconnected() -> Self {
        Self {
            conn: None,
            target: String::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Insert a sample as a single row. Does nothing (except log) if not connected.
    pub fn insert(&mut self, table: &str, sample: &Sample) -> Result<InsertOutcome, DatabaseError> {
        let conn = match self.conn.as_mut() {
            Some(c) => c,
            None => {
                tracing::warn!(message = "not connected to database, skipping insert");
                return Ok(InsertOutcome::Skipped);
            }
        };

        validate_table(table)?;
        let rows = conn.insert(table, sample)?;

        if rows == 1 {
            tracing::info!(message = "inserted sample", target = %self.target, table = table);
            Ok(InsertOutcome::Inserted)
        } else {
            tracing::warn!(
                message = "unexpected number of rows changed by insert",
                target = %self.target,
                table = table,
                rows = rows
            );
            Ok(InsertOutcome::Anomaly(rows))
        }
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if self.conn.take().is_some() {
            tracing::debug!(message = "closed database connection", target = %self.target);
        }
    }
}

impl Debug for Database {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("connected", &self.is_connected())
            .field("target", &self.target)
            .finish()
    }
}

/// Connect, insert a single sample, and disconnect. The connection is released
/// whether or not the insert succeeds.
pub fn persist(connector: &dyn Connector, table: &str, sample: &Sample) -> Result<InsertOutcome, DatabaseError> {
    let mut db = Database::connect(connector)?;
    db.insert(table, sample)
}

/// Connections to a MySQL (or MariaDB) server.
#[derive(Debug, Clone)]
pub struct MysqlConnector {
    settings: DatabaseSettings,
}

impl MysqlConnector {
    pub fn new(settings: DatabaseSettings) -> Self {
        Self { settings }
    }
}

impl Connector for MysqlConnector {
    fn connect(&self) -> Result<Box<dyn Connection>, DatabaseError> {
        let opts = OptsBuilder::new()
            .ip_or_hostname(Some(self.settings.host.clone()))
            .tcp_port(self.settings.port)
            .user(Some(self.settings.user.clone()))
            .pass(Some(self.settings.password.expose().to_owned()))
            .db_name(Some(self.settings.database.clone()));

        let conn = Conn::new(opts)
            .map_err(|e| DatabaseError::Connect("unable to connect to MySQL server", Box::new(e)))?;

        Ok(Box::new(MysqlConnection { conn }))
    }

    fn describe(&self) -> String {
        format!("{}@{}:{}", self.settings.database, self.settings.host, self.settings.port)
    }
}

struct MysqlConnection {
    conn: Conn,
}

impl Connection for MysqlConnection {
    fn insert(&mut self, table: &str, sample: &Sample) -> Result<u64, DatabaseError> {
        let params = (
            sample.date(),
            sample.time(),
            sample.temperature,
            sample.pressure,
            sample.humidity,
        );

        self.conn
            .exec_drop(insert_statement(table), params)
            .map_err(|e| DatabaseError::Query("unable to insert sample", Box::new(e)))?;

        Ok(self.conn.affected_rows())
    }
}

#[cfg(test)]
pub(crate) use self::test::MockConnector;
