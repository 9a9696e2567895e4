//! Scrape coordination.
//!
//! One scrape walks a fixed sequence of states:
//!
//! ```text
//! Connecting -> CheckingLiveness -> RunningProbes -> Finalizing -> Done
//!      |               |
//!      +---------------+--> Finalizing (down, no probes run)
//! ```
//!
//! The connection is owned by a [`ScopedConnection`] for the whole scrape, so
//! it is closed on every path out of [`Scraper::scrape`].
//!
//! Every series is exposed at most once per scrape. A probe whose output
//! repeats a series (its own or an earlier probe's) fails, and none of its
//! samples are published.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, trace, warn};

use crate::db::{Connector, ScopedConnection, TimedConnector};
use crate::error::{ProbeError, ScrapeError};
use crate::metric::MetricSample;
use crate::probe::{Probe, ProbeFailure};
use crate::probes::LIVENESS_QUERY;

/// States of a scrape, used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapeState {
    Connecting,
    CheckingLiveness,
    RunningProbes,
    Finalizing,
}

/// Outcome of one scrape.
#[derive(Debug, Default)]
pub struct ScrapeResult {
    /// Wall time of the whole scrape, connection included.
    pub duration: Duration,
    /// Whether the liveness check passed.
    pub up: bool,
    /// Overall success under the configured policy.
    pub success: bool,
    /// Why the scrape never reached the probes, if it didn't.
    pub connectivity_error: Option<ScrapeError>,
    /// Probe failures keyed by probe name.
    pub errors: BTreeMap<String, ProbeError>,
    /// Samples from every probe that produced any.
    pub samples: Vec<MetricSample>,
}

/// Runs the configured probes against the database, one scrape at a time.
pub struct Scraper {
    connector: TimedConnector,
    probes: Vec<Arc<dyn Probe>>,
    query_timeout: Option<Duration>,
    fail_on_probe_error: bool,
}

impl Scraper {
    /// Create a scraper with no timeouts and the strict success policy.
    pub fn new(connector: Arc<dyn Connector>, probes: Vec<Arc<dyn Probe>>) -> Self {
        Self {
            connector: TimedConnector::new(connector),
            probes,
            query_timeout: None,
            fail_on_probe_error: true,
        }
    }

    /// Bound connection acquisition.
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connector = self.connector.with_timeout(timeout);
        self
    }

    /// Bound every round trip made by the liveness check and the probes.
    pub fn with_query_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Whether a probe failure makes the whole scrape unsuccessful.
    /// When false, a scrape succeeds as soon as the database is live.
    pub fn with_fail_on_probe_error(mut self, fail: bool) -> Self {
        self.fail_on_probe_error = fail;
        self
    }

    /// Names of the probes this scraper runs, in order.
    pub fn probe_names(&self) -> impl Iterator<Item = &str> {
        self.probes.iter().map(|p| p.name())
    }

    /// Run one scrape to completion.
    pub fn scrape(&self) -> ScrapeResult {
        let start = Instant::now();
        let mut result = ScrapeResult::default();

        self.run_states(&mut result);

        trace!(state = ?ScrapeState::Finalizing, "Scrape state");
        result.duration = start.elapsed();
        result.success = result.up && (!self.fail_on_probe_error || result.errors.is_empty());

        debug!(
            up = result.up,
            success = result.success,
            samples = result.samples.len(),
            failed_probes = result.errors.len(),
            duration_ms = result.duration.as_millis() as u64,
            "Scrape complete"
        );

        result
    }

    /// Connect, check liveness and run probes. The connection is closed when
    /// this returns.
    fn run_states(&self, result: &mut ScrapeResult) {
        trace!(state = ?ScrapeState::Connecting, "Scrape state");
        let conn = match self.connector.connect() {
            Ok(conn) => ScopedConnection::new(conn),
            Err(e) => {
                warn!(error = %e, "Database connection failed");
                result.connectivity_error = Some(ScrapeError::Connect(e));
                return;
            }
        };

        trace!(state = ?ScrapeState::CheckingLiveness, "Scrape state");
        if let Err(e) = conn.get().set_call_timeout(self.query_timeout) {
            warn!(error = %e, "Failed to set query timeout");
            result.connectivity_error = Some(ScrapeError::Liveness(e));
            return;
        }
        let liveness = conn
            .get()
            .query(LIVENESS_QUERY)
            .and_then(|rows| rows.collect::<Result<Vec<_>, _>>());
        if let Err(e) = liveness {
            warn!(error = %e, "Database liveness check failed");
            result.connectivity_error = Some(ScrapeError::Liveness(e));
            return;
        }
        result.up = true;

        trace!(state = ?ScrapeState::RunningProbes, "Scrape state");
        let mut seen = HashSet::new();
        for probe in &self.probes {
            let started = Instant::now();
            let outcome = probe.run(conn.get()).and_then(|samples| {
                claim_series(&mut seen, &samples)
                    .map(|()| samples)
                    .map_err(|error| ProbeFailure {
                        error,
                        salvaged: Vec::new(),
                    })
            });
            match outcome {
                Ok(samples) => {
                    trace!(
                        probe = %probe.name(),
                        samples = samples.len(),
                        duration_ms = started.elapsed().as_millis() as u64,
                        "Probe succeeded"
                    );
                    result.samples.extend(samples);
                }
                Err(failure) => {
                    if failure.error.is_collision() {
                        error!(
                            probe = %probe.name(),
                            error = %failure.error,
                            "Probe produced a colliding metric series"
                        );
                    } else {
                        warn!(probe = %probe.name(), error = %failure.error, "Probe failed");
                    }
                    if claim_series(&mut seen, &failure.salvaged).is_ok() {
                        result.samples.extend(failure.salvaged);
                    }
                    result.errors.insert(probe.name().to_string(), failure.error);
                }
            }
        }
    }
}

type SeriesKey = (String, Vec<String>);

/// Record the series of `samples` as exposed, unless one of them already is
/// or appears twice. Nothing is recorded on failure.
fn claim_series(
    seen: &mut HashSet<SeriesKey>,
    samples: &[MetricSample],
) -> Result<(), ProbeError> {
    let mut claimed = HashSet::with_capacity(samples.len());
    for sample in samples {
        let key = (sample.name().to_string(), sample.label_values.clone());
        if seen.contains(&key) || !claimed.insert(key) {
            return Err(ProbeError::DuplicateSeries {
                metric: sample.name().to_string(),
                labels: sample.label_values.clone(),
            });
        }
    }
    seen.extend(claimed);
    Ok(())
}
