//! Error types for the exporter.
//!
//! Errors are split along the failure domains of a scrape: the database
//! driver ([`DbError`]), row decoding ([`DecodeError`]), metric family
//! bookkeeping ([`RegistryError`]), a single probe ([`ProbeError`]) and the
//! scrape as a whole ([`ScrapeError`]).

use std::time::Duration;

use thiserror::Error;

/// Errors raised by the database collaborator.
#[derive(Debug, Error)]
pub enum DbError {
    /// Could not open a connection.
    #[error("Failed to connect to database: {0}")]
    Connect(String),

    /// A statement failed to execute or fetch.
    #[error("Query failed: {message}")]
    Query { sql: String, message: String },

    /// A single-row query returned nothing.
    #[error("Query returned no rows")]
    NoRows,

    /// An earlier connection attempt that timed out has not returned yet.
    #[error("A previous connection attempt is still pending")]
    ConnectPending,

    /// The operation did not complete in time.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The connection has already been closed.
    #[error("Connection is closed")]
    Closed,

    /// A cell could not be converted to the requested type.
    #[error("Column {column}: expected {expected}, found {found}")]
    Conversion {
        column: usize,
        expected: &'static str,
        found: String,
    },

    /// A cell index past the end of the row.
    #[error("Column {index} out of range (row has {len} columns)")]
    ColumnOutOfRange { index: usize, len: usize },

    /// The DSN could not be parsed.
    #[error("Invalid data source name: {0}")]
    InvalidDsn(String),
}

impl DbError {
    /// Create a query error for the given statement.
    pub fn query(sql: &str, message: impl Into<String>) -> Self {
        Self::Query {
            sql: sql.to_string(),
            message: message.into(),
        }
    }
}

/// Errors raised while turning a row into samples.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Cell access or conversion failed.
    #[error(transparent)]
    Cell(#[from] DbError),

    /// A numeric column was NULL.
    #[error("Column {column} is NULL, expected a number")]
    Null { column: usize },

    /// A sample was built with the wrong number of label values.
    #[error("Metric {metric} expects {expected} label values, got {found}")]
    LabelArity {
        metric: String,
        expected: usize,
        found: usize,
    },
}

/// Errors raised by the metric registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The same metric family was declared twice with different label names.
    #[error(
        "Metric family {name} already registered with labels {existing:?}, refusing labels {requested:?}"
    )]
    Conflict {
        name: String,
        existing: Vec<String>,
        requested: Vec<String>,
    },

    /// The same metric family was declared twice with different types.
    #[error("Metric family {name} already registered as {existing}, refusing {requested}")]
    KindConflict {
        name: String,
        existing: &'static str,
        requested: &'static str,
    },

    /// The family belongs to the exporter's own metrics.
    #[error("Metric family {0} is reserved for exporter self-metrics")]
    Reserved(String),

    /// A metric name that cannot be exposed.
    #[error("Invalid metric name: {0:?}")]
    InvalidName(String),
}

/// Errors raised by a single probe.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("{0}")]
    Query(#[from] DbError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// The probe emitted a series already exposed in this scrape.
    #[error("Duplicate series {metric} with labels {labels:?}")]
    DuplicateSeries { metric: String, labels: Vec<String> },
}

impl ProbeError {
    /// Whether this failure is a metric family conflict (an authoring bug
    /// rather than a runtime condition).
    pub fn is_registry_conflict(&self) -> bool {
        matches!(
            self,
            Self::Registry(
                RegistryError::Conflict { .. }
                    | RegistryError::KindConflict { .. }
                    | RegistryError::Reserved(_)
            )
        )
    }

    /// Whether the probe's output collides with other series, either by
    /// family schema or by an identical series.
    pub fn is_collision(&self) -> bool {
        self.is_registry_conflict() || matches!(self, Self::DuplicateSeries { .. })
    }
}

/// Errors that abort a scrape before any probe runs.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("Connection failed: {0}")]
    Connect(#[source] DbError),

    #[error("Liveness check failed: {0}")]
    Liveness(#[source] DbError),
}
