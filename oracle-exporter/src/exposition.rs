//! Prometheus text exposition format.

use std::collections::BTreeMap;
use std::io::Write;

use crate::metric::MetricSample;

/// Content type of the rendered output.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Render samples grouped into families, sorted by family name.
///
/// Each family gets a `# HELP` line (when it has help text) and a `# TYPE`
/// line taken from its descriptor; its samples keep their input order.
pub fn render(samples: &[MetricSample]) -> String {
    let mut by_name: BTreeMap<&str, Vec<&MetricSample>> = BTreeMap::new();
    for sample in samples {
        by_name.entry(sample.name()).or_default().push(sample);
    }

    let mut output = Vec::with_capacity(samples.len() * 100);

    for (name, series) in by_name {
        let descriptor = &series[0].descriptor;
        let help = descriptor.help();
        if !help.is_empty() {
            writeln!(output, "# HELP {} {}", name, escape_help(help)).ok();
        }
        writeln!(output, "# TYPE {} {}", name, descriptor.kind().as_str()).ok();

        for sample in series {
            writeln!(
                output,
                "{}{} {}",
                name,
                format_labels(sample),
                format_value(sample.value)
            )
            .ok();
        }
    }

    String::from_utf8(output).unwrap_or_default()
}

fn format_labels(sample: &MetricSample) -> String {
    let names = sample.descriptor.label_names();
    if names.is_empty() {
        return String::new();
    }

    let parts: Vec<String> = names
        .iter()
        .zip(&sample.label_values)
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();

    format!("{{{}}}", parts.join(","))
}

/// Escape special characters in label values.
fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

/// Escape help text. Quotes are allowed verbatim here.
fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

/// Format a floating point value for Prometheus.
fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}
