//! Row decoding.
//!
//! A query declares the shape of its rows once, at probe construction. Each
//! row is then turned into samples according to that shape:
//!
//! ```text
//! Wide         label.. | metric_1 .. metric_n       -> n samples
//! Pivoted      label.. | metric suffix | value      -> 1 sample, family from suffix
//! NameInValue  name    | label.. | metric_1 .. n    -> n samples, family from name
//! ```
//!
//! `NameInValue` folds a row value into the metric name. Series produced that
//! way cannot be aggregated across the folded dimension; probes using it say
//! so in their definition.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::db::Row;
use crate::error::{DbError, DecodeError, ProbeError};
use crate::metric::{MetricDescriptor, MetricKind, MetricSample, sanitize_metric_name};
use crate::registry::MetricRegistry;

/// A metric column of a wide or name-in-value row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricColumn {
    pub name: String,
    #[serde(default)]
    pub help: String,
    #[serde(default)]
    pub kind: MetricKind,
}

impl MetricColumn {
    pub fn gauge(name: &str, help: &str) -> Self {
        Self {
            name: name.to_string(),
            help: help.to_string(),
            kind: MetricKind::Gauge,
        }
    }
}

/// How the rows of one query map to samples.
#[derive(Debug, Clone)]
pub enum RowShape {
    /// Leading label columns followed by one column per metric family.
    /// Families are fixed and registered when the shape is built.
    Wide {
        labels: Vec<String>,
        metrics: Vec<Arc<MetricDescriptor>>,
    },
    /// Leading label columns, then a metric name suffix, then the value.
    Pivoted {
        subsystem: String,
        labels: Vec<String>,
        help: String,
        kind: MetricKind,
    },
    /// A name fragment, then label columns, then one column per metric.
    /// The family name is `<fragment>_<column name>`.
    NameInValue {
        subsystem: String,
        labels: Vec<String>,
        metrics: Vec<MetricColumn>,
    },
}

impl RowShape {
    /// Build a wide shape, registering its families.
    pub fn wide(
        registry: &MetricRegistry,
        subsystem: &str,
        labels: Vec<String>,
        metrics: &[MetricColumn],
    ) -> Result<Self, ProbeError> {
        let metrics = metrics
            .iter()
            .map(|column| {
                registry.get_or_create(subsystem, &column.name, &column.help, column.kind, &labels)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RowShape::Wide { labels, metrics })
    }

    /// Number of columns a row of this shape must have.
    pub fn column_count(&self) -> usize {
        match self {
            RowShape::Wide { labels, metrics } => labels.len() + metrics.len(),
            RowShape::Pivoted { labels, .. } => labels.len() + 2,
            RowShape::NameInValue {
                labels, metrics, ..
            } => 1 + labels.len() + metrics.len(),
        }
    }
}

/// Decode one row into samples.
///
/// Dynamic families are looked up in (or added to) `registry`. Any failure
/// aborts the row; the caller decides what that means for the probe.
pub fn decode_row(
    shape: &RowShape,
    row: &Row,
    registry: &MetricRegistry,
) -> Result<Vec<MetricSample>, ProbeError> {
    trace!(columns = row.len(), "Decoding row");

    let expected = shape.column_count();
    if row.len() < expected {
        return Err(DecodeError::from(DbError::ColumnOutOfRange {
            index: expected - 1,
            len: row.len(),
        })
        .into());
    }

    match shape {
        RowShape::Wide { labels, metrics } => {
            let label_values = read_labels(row, 0, labels.len())?;
            metrics
                .iter()
                .enumerate()
                .map(|(i, descriptor)| -> Result<MetricSample, ProbeError> {
                    let value = read_number(row, labels.len() + i)?;
                    Ok(MetricSample::new(
                        descriptor.clone(),
                        value,
                        label_values.clone(),
                    )?)
                })
                .collect()
        }
        RowShape::Pivoted {
            subsystem,
            labels,
            help,
            kind,
        } => {
            let label_values = read_labels(row, 0, labels.len())?;
            let suffix = row.text(labels.len()).map_err(DecodeError::from)?;
            let value = read_number(row, labels.len() + 1)?;

            let descriptor = registry.get_or_create(
                subsystem,
                &sanitize_metric_name(&suffix),
                help,
                *kind,
                labels,
            )?;
            Ok(vec![MetricSample::new(descriptor, value, label_values)?])
        }
        RowShape::NameInValue {
            subsystem,
            labels,
            metrics,
        } => {
            let fragment = sanitize_metric_name(&row.text(0).map_err(DecodeError::from)?);
            let label_values = read_labels(row, 1, labels.len())?;

            metrics
                .iter()
                .enumerate()
                .map(|(i, column)| -> Result<MetricSample, ProbeError> {
                    let value = read_number(row, 1 + labels.len() + i)?;
                    let name = format!("{}_{}", fragment, column.name);
                    let descriptor = registry.get_or_create(
                        subsystem,
                        &name,
                        &column.help,
                        column.kind,
                        labels,
                    )?;
                    Ok(MetricSample::new(descriptor, value, label_values.clone())?)
                })
                .collect()
        }
    }
}

fn read_labels(row: &Row, start: usize, count: usize) -> Result<Vec<String>, DecodeError> {
    (start..start + count)
        .map(|i| row.text(i).map_err(DecodeError::from))
        .collect()
}

fn read_number(row: &Row, index: usize) -> Result<f64, DecodeError> {
    row.number(index)?
        .ok_or(DecodeError::Null { column: index })
}
