//! Native Oracle driver binding.
//!
//! Wraps the `oracle` crate (ODPI-C). The Oracle client libraries are loaded
//! at runtime on the first connection attempt.

use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use oracle::sql_type::{OracleType, Timestamp};
use oracle::SqlValue;

use super::{Connection, Connector, Dsn, Row, Rows, Value};
use crate::error::DbError;

/// Opens connections with the credentials of a parsed DSN.
pub struct OracleConnector {
    dsn: Dsn,
}

impl OracleConnector {
    pub fn new(dsn: Dsn) -> Self {
        Self { dsn }
    }
}

impl Connector for OracleConnector {
    fn connect(&self) -> Result<Box<dyn Connection>, DbError> {
        let conn = oracle::Connection::connect(
            &self.dsn.username,
            &self.dsn.password,
            &self.dsn.connect_string,
        )
        .map_err(|e| DbError::Connect(e.to_string()))?;

        Ok(Box::new(OracleConnection { inner: Some(conn) }))
    }
}

struct OracleConnection {
    inner: Option<oracle::Connection>,
}

impl OracleConnection {
    fn conn(&self) -> Result<&oracle::Connection, DbError> {
        self.inner.as_ref().ok_or(DbError::Closed)
    }
}

impl Connection for OracleConnection {
    fn query(&self, sql: &str) -> Result<Rows<'_>, DbError> {
        let rows = self
            .conn()?
            .query(sql, &[])
            .map_err(|e| DbError::query(sql, e.to_string()))?;

        let sql = sql.to_string();
        Ok(Box::new(rows.map(move |row| {
            let row = row.map_err(|e| DbError::query(&sql, e.to_string()))?;
            convert_row(&row)
        })))
    }

    fn set_call_timeout(&self, timeout: Option<Duration>) -> Result<(), DbError> {
        self.conn()?
            .set_call_timeout(timeout)
            .map_err(|e| DbError::Connect(e.to_string()))
    }

    fn close(&mut self) -> Result<(), DbError> {
        match self.inner.take() {
            Some(conn) => conn.close().map_err(|e| DbError::Connect(e.to_string())),
            None => Ok(()),
        }
    }
}

fn convert_row(row: &oracle::Row) -> Result<Row, DbError> {
    row.sql_values()
        .iter()
        .enumerate()
        .map(|(column, value)| convert_value(column, value))
        .collect::<Result<Vec<_>, _>>()
        .map(Row::new)
}

fn convert_value(column: usize, value: &SqlValue) -> Result<Value, DbError> {
    let conversion = |e: oracle::Error| DbError::Conversion {
        column,
        expected: "supported column type",
        found: e.to_string(),
    };

    if value.is_null().map_err(conversion)? {
        return Ok(Value::Null);
    }

    match value.oracle_type().map_err(conversion)? {
        OracleType::Number(_, _)
        | OracleType::Float(_)
        | OracleType::BinaryFloat
        | OracleType::BinaryDouble
        | OracleType::Int64
        | OracleType::UInt64 => value.get::<f64>().map(Value::Number).map_err(conversion),
        OracleType::Date
        | OracleType::Timestamp(_)
        | OracleType::TimestampTZ(_)
        | OracleType::TimestampLTZ(_) => {
            let ts: Timestamp = value.get().map_err(conversion)?;
            timestamp_to_utc(&ts)
                .map(Value::Time)
                .ok_or_else(|| DbError::Conversion {
                    column,
                    expected: "timestamp",
                    found: ts.to_string(),
                })
        }
        _ => value.get::<String>().map(Value::Text).map_err(conversion),
    }
}

fn timestamp_to_utc(ts: &Timestamp) -> Option<DateTime<Utc>> {
    let local = NaiveDate::from_ymd_opt(ts.year(), ts.month(), ts.day())?.and_hms_nano_opt(
        ts.hour(),
        ts.minute(),
        ts.second(),
        ts.nanosecond(),
    )?;
    let offset = chrono::Duration::seconds(i64::from(ts.tz_offset()));
    Some((local - offset).and_utc())
}
