//! Metric identity and samples.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// Identity of a metric family: fully-qualified name, help text, value type
/// and the ordered label names every sample of the family carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDescriptor {
    fq_name: String,
    help: String,
    kind: MetricKind,
    label_names: Vec<String>,
}

impl MetricDescriptor {
    /// Create a descriptor from its name parts.
    pub fn new(
        namespace: &str,
        subsystem: &str,
        name: &str,
        help: impl Into<String>,
        kind: MetricKind,
        label_names: Vec<String>,
    ) -> Self {
        Self {
            fq_name: build_fq_name(namespace, subsystem, name),
            help: help.into(),
            kind,
            label_names,
        }
    }

    /// The fully-qualified metric name.
    pub fn fq_name(&self) -> &str {
        &self.fq_name
    }

    pub fn help(&self) -> &str {
        &self.help
    }

    /// The TYPE every sample of this family is exposed with.
    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    pub fn label_names(&self) -> &[String] {
        &self.label_names
    }
}

/// Prometheus value type of a sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    #[default]
    Gauge,
    Counter,
}

impl MetricKind {
    /// Get the TYPE comment string for Prometheus exposition format.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

/// One observation of a metric family.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub descriptor: Arc<MetricDescriptor>,
    pub value: f64,
    /// Label values, positionally matching the descriptor's label names.
    pub label_values: Vec<String>,
}

impl MetricSample {
    /// Create a sample, checking the label arity against the descriptor.
    pub fn new(
        descriptor: Arc<MetricDescriptor>,
        value: f64,
        label_values: Vec<String>,
    ) -> Result<Self, DecodeError> {
        if label_values.len() != descriptor.label_names().len() {
            return Err(DecodeError::LabelArity {
                metric: descriptor.fq_name().to_string(),
                expected: descriptor.label_names().len(),
                found: label_values.len(),
            });
        }

        Ok(Self {
            descriptor,
            value,
            label_values,
        })
    }

    /// The fully-qualified name of this sample's family.
    pub fn name(&self) -> &str {
        self.descriptor.fq_name()
    }

    /// Look up the value of a label by name.
    pub fn label(&self, name: &str) -> Option<&str> {
        self.descriptor
            .label_names()
            .iter()
            .position(|n| n == name)
            .map(|i| self.label_values[i].as_str())
    }
}

/// Join namespace, subsystem and name with underscores, skipping empty parts.
///
/// An empty `name` yields an empty string, since a family without a name
/// cannot be exposed.
pub fn build_fq_name(namespace: &str, subsystem: &str, name: &str) -> String {
    if name.is_empty() {
        return String::new();
    }

    [namespace, subsystem, name]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("_")
}

/// Sanitize a metric name fragment to be Prometheus-compatible.
///
/// Prometheus metric names must match `[a-zA-Z_:][a-zA-Z0-9_:]*`. Invalid
/// characters become underscores, runs of underscores collapse, and a leading
/// digit gets an underscore prefix. Names derived from row values pass through
/// here, so the result is also lowercased.
pub fn sanitize_metric_name(name: &str) -> String {
    let mut result = String::with_capacity(name.len() + 1);
    let mut last_was_underscore = false;
    let mut chars = name.chars().peekable();

    if let Some(&first) = chars.peek()
        && first.is_ascii_digit()
    {
        result.push('_');
        last_was_underscore = true;
    }

    for c in chars {
        let is_valid_char = c.is_ascii_alphanumeric() || c == '_' || c == ':';

        if is_valid_char {
            if c == '_' {
                if !last_was_underscore {
                    result.push(c);
                    last_was_underscore = true;
                }
            } else {
                result.push(c.to_ascii_lowercase());
                last_was_underscore = false;
            }
        } else if !last_was_underscore {
            result.push('_');
            last_was_underscore = true;
        }
    }

    while result.ends_with('_') {
        result.pop();
    }

    if result.is_empty() {
        result.push_str("unnamed");
    }

    result
}

/// Check that a string is a valid Prometheus label name.
///
/// Label names must match `[a-zA-Z_][a-zA-Z0-9_]*` and must not start with
/// the reserved `__` prefix.
pub fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    !name.starts_with("__") && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Check that a string is a valid fully-qualified metric name.
pub fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}
