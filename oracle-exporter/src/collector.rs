//! Collector facade: runs a scrape per poll and adds the exporter's own
//! metrics.
//!
//! Scrapes are serialized; a poll that arrives during a scrape waits for it
//! to finish and then runs its own. Counters live for the whole process,
//! gauges describe the most recent scrape only.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::ExporterConfig;
use crate::db::Connector;
use crate::error::{ProbeError, RegistryError};
use crate::exposition;
use crate::metric::{MetricDescriptor, MetricKind, MetricSample};
use crate::probe::ProbeSpec;
use crate::probes::{build_probes, enabled_builtins};
use crate::registry::MetricRegistry;
use crate::scrape::{ScrapeResult, Scraper};

/// Label of the per-probe error counter.
pub const COLLECTOR_LABEL: &str = "collector";

/// Cumulative collector statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectorStats {
    /// Scrapes run since startup.
    pub scrapes_total: u64,
    /// Failures per probe since startup.
    pub scrape_errors: BTreeMap<String, u64>,
    /// Whether the most recent scrape found the database up.
    pub up: bool,
    /// Whether the most recent scrape failed.
    pub last_scrape_error: bool,
    /// Duration of the most recent scrape.
    pub last_scrape_duration: Duration,
}

struct SelfDescriptors {
    up: Arc<MetricDescriptor>,
    duration: Arc<MetricDescriptor>,
    last_error: Arc<MetricDescriptor>,
    scrapes_total: Arc<MetricDescriptor>,
    scrape_errors: Arc<MetricDescriptor>,
}

impl SelfDescriptors {
    /// Reserve the self-metric families. Reserving again returns the same
    /// descriptors; a probe family already using one of the names fails.
    fn register(registry: &MetricRegistry) -> Result<Self, RegistryError> {
        Ok(Self {
            up: registry.reserve(
                "",
                "up",
                "Whether the Oracle database server is up.",
                MetricKind::Gauge,
                &[],
            )?,
            duration: registry.reserve(
                "exporter",
                "last_scrape_duration_seconds",
                "Duration of the last scrape of metrics from Oracle DB.",
                MetricKind::Gauge,
                &[],
            )?,
            last_error: registry.reserve(
                "exporter",
                "last_scrape_error",
                "Whether the last scrape of metrics from Oracle DB resulted in an error (1 for error, 0 for success).",
                MetricKind::Gauge,
                &[],
            )?,
            scrapes_total: registry.reserve(
                "exporter",
                "scrapes_total",
                "Total number of times Oracle DB was scraped for metrics.",
                MetricKind::Counter,
                &[],
            )?,
            scrape_errors: registry.reserve(
                "exporter",
                "scrape_errors_total",
                "Total number of times an error occurred scraping an Oracle database.",
                MetricKind::Counter,
                &[COLLECTOR_LABEL.to_string()],
            )?,
        })
    }
}

/// Scrapes the database on demand and keeps the self-metric state.
pub struct OracleCollector {
    scraper: Scraper,
    descriptors: SelfDescriptors,
    /// Held for the duration of a scrape.
    stats: Mutex<CollectorStats>,
}

impl OracleCollector {
    /// Create a collector around a scraper.
    ///
    /// The self-metric families are registered in `registry`, and the error
    /// counter starts at zero for every probe the scraper runs.
    pub fn new(scraper: Scraper, registry: &MetricRegistry) -> Result<Self, RegistryError> {
        let descriptors = SelfDescriptors::register(registry)?;

        let stats = CollectorStats {
            scrape_errors: scraper.probe_names().map(|n| (n.to_string(), 0)).collect(),
            ..Default::default()
        };

        Ok(Self {
            scraper,
            descriptors,
            stats: Mutex::new(stats),
        })
    }

    /// Build the collector described by `config`.
    ///
    /// Fails when two probes declare the same metric family with different
    /// schemas, or when a probe declares one of the self-metric families.
    pub fn from_config(
        config: &ExporterConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, ProbeError> {
        let registry = Arc::new(MetricRegistry::new(config.metrics.namespace.clone()));

        // Self-metrics first, so probes cannot shadow them.
        SelfDescriptors::register(&registry)?;

        let mut specs: Vec<ProbeSpec> = enabled_builtins(&config.collect);
        specs.extend(config.custom_probes.iter().cloned());
        let probes = build_probes(&specs, &registry)?;

        info!(
            probes = ?specs.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            families = registry.len(),
            "Probes configured"
        );

        let scraper = Scraper::new(connector, probes)
            .with_connect_timeout(config.database.connect_timeout())
            .with_query_timeout(config.database.query_timeout())
            .with_fail_on_probe_error(config.scrape.fail_on_probe_error);

        Ok(Self::new(scraper, &registry)?)
    }

    /// Run one scrape and return its samples followed by the self-metrics.
    pub fn collect(&self) -> Vec<MetricSample> {
        let mut stats = self.stats.lock();

        let result = self.scraper.scrape();
        record(&mut stats, &result);

        debug!(
            scrapes_total = stats.scrapes_total,
            up = stats.up,
            "Collected"
        );

        let mut samples = result.samples;
        samples.extend(self.self_metrics(&stats));
        samples
    }

    /// Run one scrape and render it in the Prometheus text format.
    pub fn render(&self) -> String {
        exposition::render(&self.collect())
    }

    /// Get collector statistics.
    pub fn stats(&self) -> CollectorStats {
        self.stats.lock().clone()
    }

    fn self_metrics(&self, stats: &CollectorStats) -> Vec<MetricSample> {
        let d = &self.descriptors;
        let sample = |descriptor: &Arc<MetricDescriptor>, value: f64| MetricSample {
            descriptor: descriptor.clone(),
            value,
            label_values: Vec::new(),
        };

        let mut samples = vec![
            sample(&d.up, bool_value(stats.up)),
            sample(&d.duration, stats.last_scrape_duration.as_secs_f64()),
            sample(&d.last_error, bool_value(stats.last_scrape_error)),
            sample(&d.scrapes_total, stats.scrapes_total as f64),
        ];

        samples.extend(stats.scrape_errors.iter().map(|(probe, count)| MetricSample {
            descriptor: d.scrape_errors.clone(),
            value: *count as f64,
            label_values: vec![probe.clone()],
        }));

        samples
    }
}

fn record(stats: &mut CollectorStats, result: &ScrapeResult) {
    stats.scrapes_total += 1;
    stats.up = result.up;
    stats.last_scrape_error = !result.success;
    stats.last_scrape_duration = result.duration;

    for probe in result.errors.keys() {
        *stats.scrape_errors.entry(probe.clone()).or_default() += 1;
    }
}

fn bool_value(b: bool) -> f64 {
    if b { 1.0 } else { 0.0 }
}

/// Create a shareable collector handle.
pub type SharedCollector = Arc<OracleCollector>;
