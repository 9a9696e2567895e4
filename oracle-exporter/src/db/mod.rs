//! Database collaborator interface consumed by probes.
//!
//! The driver is reached through two traits: a [`Connector`] opens a
//! [`Connection`] for one scrape, and a connection runs read-only statements
//! returning [`Row`]s of typed [`Value`] cells. All calls block.

pub mod memory;
#[cfg(feature = "oracle")]
pub mod oracle;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::DbError;

/// A single typed cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Text(String),
    Number(f64),
    Time(DateTime<Utc>),
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(t: DateTime<Utc>) -> Self {
        Value::Time(t)
    }
}

/// One result row: an ordered tuple of cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    cells: Vec<Value>,
}

impl Row {
    pub fn new(cells: Vec<Value>) -> Self {
        Self { cells }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Raw access to a cell.
    pub fn get(&self, index: usize) -> Result<&Value, DbError> {
        self.cells.get(index).ok_or(DbError::ColumnOutOfRange {
            index,
            len: self.cells.len(),
        })
    }

    /// Read a cell as text. Numbers and timestamps are formatted.
    pub fn text(&self, index: usize) -> Result<String, DbError> {
        match self.get(index)? {
            Value::Text(s) => Ok(s.clone()),
            Value::Number(n) => Ok(format_number(*n)),
            Value::Time(t) => Ok(t.to_rfc3339()),
            Value::Null => Err(DbError::Conversion {
                column: index,
                expected: "text",
                found: "NULL".to_string(),
            }),
        }
    }

    /// Read a cell as a number.
    ///
    /// Returns `Ok(None)` for NULL. Text is parsed; timestamps become Unix
    /// seconds.
    pub fn number(&self, index: usize) -> Result<Option<f64>, DbError> {
        match self.get(index)? {
            Value::Null => Ok(None),
            Value::Number(n) => Ok(Some(*n)),
            Value::Time(t) => Ok(Some(t.timestamp_millis() as f64 / 1000.0)),
            Value::Text(s) => s
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|_| DbError::Conversion {
                    column: index,
                    expected: "number",
                    found: format!("text {s:?}"),
                }),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() {
        format!("{:.0}", n)
    } else {
        n.to_string()
    }
}

/// Iterator over the rows of a result set.
pub type Rows<'a> = Box<dyn Iterator<Item = Result<Row, DbError>> + 'a>;

/// A live database connection.
pub trait Connection: Send {
    /// Run a statement and iterate its rows.
    fn query(&self, sql: &str) -> Result<Rows<'_>, DbError>;

    /// Run a statement and return its first row.
    fn query_row(&self, sql: &str) -> Result<Row, DbError> {
        self.query(sql)?.next().unwrap_or(Err(DbError::NoRows))
    }

    /// Bound every subsequent round trip to the server.
    fn set_call_timeout(&self, timeout: Option<Duration>) -> Result<(), DbError>;

    /// Close the connection. Closing twice is a no-op.
    fn close(&mut self) -> Result<(), DbError>;
}

/// Opens connections to one configured database.
pub trait Connector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn Connection>, DbError>;
}

/// Opens connections, giving up after an optional deadline.
///
/// An attempt with a deadline runs on a helper thread. When the deadline
/// passes the scrape moves on, and a connection that arrives later is closed
/// by the helper. At most one attempt is outstanding: while an abandoned
/// attempt is still blocked in the driver, new attempts fail with
/// [`DbError::ConnectPending`] instead of starting another thread.
pub struct TimedConnector {
    connector: Arc<dyn Connector>,
    timeout: Option<Duration>,
    in_flight: Arc<AtomicBool>,
}

impl TimedConnector {
    /// Wrap `connector` without a deadline.
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            timeout: None,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Open a connection.
    pub fn connect(&self) -> Result<Box<dyn Connection>, DbError> {
        let Some(timeout) = self.timeout else {
            return self.connector.connect();
        };

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(DbError::ConnectPending);
        }

        let (tx, rx) = mpsc::sync_channel(1);
        let connector = self.connector.clone();
        let in_flight = self.in_flight.clone();
        let spawned = thread::Builder::new()
            .name("db-connect".to_string())
            .spawn(move || {
                let result = connector.connect();
                in_flight.store(false, Ordering::Release);
                if let Err(
                    mpsc::TrySendError::Full(Ok(mut conn))
                    | mpsc::TrySendError::Disconnected(Ok(mut conn)),
                ) = tx.try_send(result)
                {
                    let _ = conn.close();
                }
            });
        if let Err(e) = spawned {
            self.in_flight.store(false, Ordering::Release);
            return Err(DbError::Connect(format!(
                "failed to spawn connect thread: {e}"
            )));
        }

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(DbError::Timeout(timeout)),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(DbError::Connect("connect thread exited".to_string()))
            }
        }
    }
}

/// Owns a connection for the duration of a scrape and closes it on drop.
pub struct ScopedConnection {
    inner: Box<dyn Connection>,
}

impl ScopedConnection {
    pub fn new(inner: Box<dyn Connection>) -> Self {
        Self { inner }
    }

    pub fn get(&self) -> &dyn Connection {
        self.inner.as_ref()
    }
}

impl Drop for ScopedConnection {
    fn drop(&mut self) {
        if let Err(e) = self.inner.close() {
            tracing::warn!(error = %e, "Failed to close database connection");
        }
    }
}

/// Connection parameters parsed from `user/password@connect_string`.
#[derive(Clone, PartialEq, Eq)]
pub struct Dsn {
    pub username: String,
    pub password: String,
    pub connect_string: String,
}

impl Dsn {
    /// Parse a DSN of the form `user/password@connect_string`.
    ///
    /// The credentials end at the last `@`, so passwords may contain `@`.
    /// `/@connect_string` selects external authentication.
    pub fn parse(dsn: &str) -> Result<Self, DbError> {
        let dsn = dsn.trim();
        let (credentials, connect_string) = dsn
            .rsplit_once('@')
            .ok_or_else(|| DbError::InvalidDsn("missing '@' before connect string".to_string()))?;

        let (username, password) = credentials
            .split_once('/')
            .ok_or_else(|| DbError::InvalidDsn("expected user/password".to_string()))?;

        if connect_string.is_empty() {
            return Err(DbError::InvalidDsn("empty connect string".to_string()));
        }

        Ok(Self {
            username: username.to_string(),
            password: password.to_string(),
            connect_string: connect_string.to_string(),
        })
    }
}

impl fmt::Debug for Dsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dsn")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("connect_string", &self.connect_string)
            .finish()
    }
}

impl fmt::Display for Dsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.username, self.connect_string)
    }
}
