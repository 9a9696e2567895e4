//! Probes: independent units of diagnostic work.
//!
//! A probe runs one or more read-only queries on the scrape's connection and
//! decodes their rows into samples. Probes hold no state between scrapes.
//!
//! Probes are described declaratively with [`ProbeSpec`] (the same form is
//! accepted in the configuration file for custom probes) and compiled into a
//! [`DeclarativeProbe`] once at startup.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, trace};

use crate::db::Connection;
use crate::decode::{MetricColumn, RowShape, decode_row};
use crate::error::ProbeError;
use crate::metric::{MetricKind, MetricSample};
use crate::registry::MetricRegistry;

/// A unit of work run once per scrape.
pub trait Probe: Send + Sync {
    /// Name used for the enable flag and for error attribution.
    fn name(&self) -> &str;

    /// Run the probe against an open connection.
    fn run(&self, conn: &dyn Connection) -> Result<Vec<MetricSample>, ProbeFailure>;
}

/// A failed probe run.
#[derive(Debug)]
pub struct ProbeFailure {
    pub error: ProbeError,
    /// Samples produced before the failure that the probe's policy allows
    /// to be published. Empty unless the probe keeps partial results.
    pub salvaged: Vec<MetricSample>,
}

/// What happens to samples from earlier queries when a later one fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PartialResults {
    /// Fail the whole probe; publish nothing from it.
    #[default]
    Discard,
    /// Publish samples from queries that completed before the failure.
    Keep,
}

/// One compiled query of a probe.
#[derive(Debug, Clone)]
pub struct Query {
    pub sql: String,
    pub shape: RowShape,
    /// Use exactly the first row; no rows is an error.
    pub single_row: bool,
}

/// A probe compiled from a [`ProbeSpec`].
pub struct DeclarativeProbe {
    name: String,
    queries: Vec<Query>,
    partial: PartialResults,
    registry: Arc<MetricRegistry>,
}

impl DeclarativeProbe {
    pub fn new(
        name: impl Into<String>,
        queries: Vec<Query>,
        partial: PartialResults,
        registry: Arc<MetricRegistry>,
    ) -> Self {
        Self {
            name: name.into(),
            queries,
            partial,
            registry,
        }
    }

    fn run_query(
        &self,
        conn: &dyn Connection,
        query: &Query,
        samples: &mut Vec<MetricSample>,
    ) -> Result<(), ProbeError> {
        if query.single_row {
            let row = conn.query_row(&query.sql)?;
            samples.extend(decode_row(&query.shape, &row, &self.registry)?);
            return Ok(());
        }

        let mut count = 0usize;
        for row in conn.query(&query.sql)? {
            samples.extend(decode_row(&query.shape, &row?, &self.registry)?);
            count += 1;
        }
        trace!(probe = %self.name, rows = count, "Query complete");
        Ok(())
    }
}

impl Probe for DeclarativeProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, conn: &dyn Connection) -> Result<Vec<MetricSample>, ProbeFailure> {
        let mut samples = Vec::new();
        // Samples from queries that completed successfully.
        let mut committed = 0;

        for query in &self.queries {
            if let Err(error) = self.run_query(conn, query, &mut samples) {
                samples.truncate(committed);
                let salvaged = match self.partial {
                    PartialResults::Keep => samples,
                    PartialResults::Discard => Vec::new(),
                };
                return Err(ProbeFailure { error, salvaged });
            }
            committed = samples.len();
        }

        Ok(samples)
    }
}

/// Declarative description of a probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeSpec {
    /// Unique probe name.
    pub name: String,

    /// Publish samples from completed queries when a later query fails.
    #[serde(default)]
    pub keep_partial: bool,

    /// Queries run in order.
    pub queries: Vec<QuerySpec>,
}

/// Declarative description of one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    pub sql: String,

    /// Subsystem part of every metric name this query produces.
    pub subsystem: String,

    /// Use exactly the first row; no rows is an error.
    #[serde(default)]
    pub single_row: bool,

    pub shape: ShapeSpec,
}

/// Row layout of a query, see [`RowShape`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ShapeSpec {
    Wide {
        #[serde(default)]
        labels: Vec<String>,
        metrics: Vec<MetricColumn>,
    },
    Pivoted {
        #[serde(default)]
        labels: Vec<String>,
        #[serde(default)]
        help: String,
        #[serde(default)]
        kind: MetricKind,
    },
    NameInValue {
        #[serde(default)]
        labels: Vec<String>,
        metrics: Vec<MetricColumn>,
    },
}

impl ProbeSpec {
    /// Check the spec for authoring mistakes that do not need a registry.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("probe name must not be empty".to_string());
        }
        if self.queries.is_empty() {
            return Err(format!("probe '{}' has no queries", self.name));
        }

        for (i, query) in self.queries.iter().enumerate() {
            if query.sql.trim().is_empty() {
                return Err(format!("probe '{}' query {} has empty sql", self.name, i));
            }
            let metrics = match &query.shape {
                ShapeSpec::Wide { metrics, .. } | ShapeSpec::NameInValue { metrics, .. } => {
                    metrics.len()
                }
                ShapeSpec::Pivoted { .. } => 1,
            };
            if metrics == 0 {
                return Err(format!(
                    "probe '{}' query {} declares no metric columns",
                    self.name, i
                ));
            }
        }

        Ok(())
    }

    /// Compile the spec, registering its static metric families.
    pub fn build(&self, registry: Arc<MetricRegistry>) -> Result<DeclarativeProbe, ProbeError> {
        let queries = self
            .queries
            .iter()
            .map(|q| -> Result<Query, ProbeError> {
                let shape = match &q.shape {
                    ShapeSpec::Wide { labels, metrics } => {
                        RowShape::wide(&registry, &q.subsystem, labels.clone(), metrics)?
                    }
                    ShapeSpec::Pivoted { labels, help, kind } => RowShape::Pivoted {
                        subsystem: q.subsystem.clone(),
                        labels: labels.clone(),
                        help: help.clone(),
                        kind: *kind,
                    },
                    ShapeSpec::NameInValue { labels, metrics } => {
                        info!(
                            probe = %self.name,
                            subsystem = %q.subsystem,
                            "Metric names derive from row values; these series cannot be aggregated across that value"
                        );
                        RowShape::NameInValue {
                            subsystem: q.subsystem.clone(),
                            labels: labels.clone(),
                            metrics: metrics.clone(),
                        }
                    }
                };
                Ok(Query {
                    sql: q.sql.clone(),
                    shape,
                    single_row: q.single_row,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let partial = if self.keep_partial {
            PartialResults::Keep
        } else {
            PartialResults::Discard
        };

        Ok(DeclarativeProbe::new(
            self.name.clone(),
            queries,
            partial,
            registry,
        ))
    }
}
