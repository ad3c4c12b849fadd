//! Metrics helpers and per-site telemetry bookkeeping.
//!
//! [`SiteMetrics`] counters are always maintained and feed the router's
//! diagnostics; the `metrics` feature additionally emits labelled samples to
//! the global recorder, and `prometheus` installs an exporter for them.

// std
use std::sync::atomic::{AtomicU64, Ordering};
// crates.io
#[cfg(feature = "metrics")]
use metrics::Label;
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
#[cfg(feature = "metrics")]
use smallvec::SmallVec;
// self
use crate::_prelude::*;

#[cfg(feature = "metrics")]
type LabelSet = SmallVec<[Label; 4]>;

#[cfg(feature = "metrics")]
const METRIC_REQUESTS_TOTAL: &str = "wp_relay_requests_total";
#[cfg(feature = "metrics")]
const METRIC_CACHE_HITS_TOTAL: &str = "wp_relay_cache_hits_total";
#[cfg(feature = "metrics")]
const METRIC_CACHE_MISSES_TOTAL: &str = "wp_relay_cache_misses_total";
#[cfg(feature = "metrics")]
const METRIC_ERRORS_TOTAL: &str = "wp_relay_errors_total";
#[cfg(feature = "metrics")]
const METRIC_RETRIES_TOTAL: &str = "wp_relay_retries_total";
#[cfg(feature = "metrics")]
const METRIC_REQUEST_DURATION: &str = "wp_relay_request_duration_seconds";

/// Shared Prometheus handle installed by [`install_default_exporter`].
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: std::sync::OnceLock<PrometheusHandle> = std::sync::OnceLock::new();

/// Thread-safe telemetry accumulator for a single site.
#[derive(Debug, Default)]
pub struct SiteMetrics {
    requests: AtomicU64,
    cache_hits: AtomicU64,
    upstream_calls: AtomicU64,
    retries: AtomicU64,
    errors: AtomicU64,
    last_request_micros: AtomicU64,
}
impl SiteMetrics {
    /// Create a new accumulator.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record one completed execution.
    pub fn record_execution(&self, from_cache: bool, attempts: u32, duration: Duration) {
        self.requests.fetch_add(1, Ordering::Relaxed);

        if from_cache {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.upstream_calls.fetch_add(1, Ordering::Relaxed);
        }
        if attempts > 1 {
            self.retries
                .fetch_add((attempts - 1) as u64, Ordering::Relaxed);
        }

        self.last_request_micros
            .store(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record one failed execution.
    pub fn record_error(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time snapshot for diagnostics.
    pub fn snapshot(&self) -> SiteMetricsSnapshot {
        SiteMetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            upstream_calls: self.upstream_calls.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            last_request_micros: match self.last_request_micros.load(Ordering::Relaxed) {
                0 => None,
                value => Some(value),
            },
        }
    }
}

/// Read-only snapshot of per-site telemetry counters.
#[derive(Clone, Copy, Debug)]
pub struct SiteMetricsSnapshot {
    /// Executions observed, successful or failed.
    pub requests: u64,
    /// Executions served from the cache.
    pub cache_hits: u64,
    /// Executions that reached the upstream.
    pub upstream_calls: u64,
    /// Extra HTTP attempts beyond the first, across all executions.
    pub retries: u64,
    /// Executions that surfaced an error.
    pub errors: u64,
    /// Microsecond latency of the most recent execution.
    pub last_request_micros: Option<u64>,
}
impl SiteMetricsSnapshot {
    /// Convenience method to compute the cache hit rate.
    pub fn hit_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.cache_hits as f64 / self.requests as f64
        }
    }
}

/// Install the default Prometheus recorder backed by `metrics`.
///
/// Multiple invocations are safe; subsequent calls become no-ops once the
/// recorder is installed.
#[cfg(feature = "prometheus")]
pub fn install_default_exporter() -> Result<()> {
    if PROMETHEUS_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|err| Error::Config {
            field: "metrics",
            reason: err.to_string(),
        })?;
    let _ = PROMETHEUS_HANDLE.set(handle);

    Ok(())
}

/// Access the global Prometheus exporter handle when installed.
#[cfg(feature = "prometheus")]
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// Record one completed execution to the global recorder.
#[cfg(feature = "metrics")]
pub fn record_execution(site: &str, op: &str, from_cache: bool, attempts: u32, duration: Duration) {
    let labels = base_labels(site, op);

    metrics::counter!(METRIC_REQUESTS_TOTAL, labels.iter()).increment(1);

    if from_cache {
        metrics::counter!(METRIC_CACHE_HITS_TOTAL, labels.iter()).increment(1);
    } else {
        metrics::counter!(METRIC_CACHE_MISSES_TOTAL, labels.iter()).increment(1);
    }
    if attempts > 1 {
        metrics::counter!(METRIC_RETRIES_TOTAL, labels.iter()).increment((attempts - 1) as u64);
    }

    metrics::histogram!(METRIC_REQUEST_DURATION, labels.iter()).record(duration.as_secs_f64());
}

/// Record one failed execution to the global recorder.
#[cfg(feature = "metrics")]
pub fn record_error(site: &str, op: &str, kind: &'static str) {
    let mut labels = base_labels(site, op);

    labels.push(Label::new("kind", kind));

    metrics::counter!(METRIC_ERRORS_TOTAL, labels.iter()).increment(1);
}

#[cfg(feature = "metrics")]
fn base_labels(site: &str, op: &str) -> LabelSet {
    let mut labels = LabelSet::with_capacity(2);

    labels.push(Label::new("site", site.to_owned()));
    labels.push(Label::new("op", op.to_owned()));

    labels
}

#[cfg(test)]
mod tests {
    // self
    use super::*;

    #[test]
    fn accumulator_tracks_hits_and_retries() {
        let metrics = SiteMetrics::new();

        metrics.record_execution(true, 0, Duration::from_micros(40));
        metrics.record_execution(false, 3, Duration::from_micros(90));
        metrics.record_error();

        let snapshot = metrics.snapshot();

        assert_eq!(snapshot.requests, 3);
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.upstream_calls, 1);
        assert_eq!(snapshot.retries, 2);
        assert_eq!(snapshot.errors, 1);
        assert_eq!(snapshot.last_request_micros, Some(90));
        assert!((snapshot.hit_rate() - 1.0 / 3.0).abs() < 1e-9);
    }

    #[cfg(feature = "metrics")]
    mod recorder {
        // std
        use std::borrow::Borrow;
        // crates.io
        use metrics_util::{
            CompositeKey, MetricKind,
            debugging::{DebugValue, DebuggingRecorder},
        };
        // self
        use super::super::*;

        fn capture_metrics<F>(f: F) -> Vec<(CompositeKey, DebugValue)>
        where
            F: FnOnce(),
        {
            let recorder = DebuggingRecorder::new();
            let snapshotter = recorder.snapshotter();

            metrics::with_local_recorder(&recorder, f);

            snapshotter
                .snapshot()
                .into_vec()
                .into_iter()
                .map(|(key, _, _, value)| (key, value))
                .collect()
        }

        fn counter_value(snapshot: &[(CompositeKey, DebugValue)], name: &str) -> u64 {
            snapshot
                .iter()
                .find_map(|(key, value)| {
                    (key.kind() == MetricKind::Counter
                        && Borrow::<str>::borrow(key.key().name()) == name)
                        .then(|| match value {
                            DebugValue::Counter(value) => *value,
                            _ => 0,
                        })
                })
                .unwrap_or(0)
        }

        #[test]
        fn emits_request_and_cache_counters() {
            let snapshot = capture_metrics(|| {
                record_execution("s1", "getPost", true, 1, Duration::from_millis(5));
                record_execution("s1", "getPost", false, 2, Duration::from_millis(9));
                record_error("s1", "getPost", "UpstreamUnavailable");
            });

            assert_eq!(counter_value(&snapshot, "wp_relay_requests_total"), 2);
            assert_eq!(counter_value(&snapshot, "wp_relay_cache_hits_total"), 1);
            assert_eq!(counter_value(&snapshot, "wp_relay_cache_misses_total"), 1);
            assert_eq!(counter_value(&snapshot, "wp_relay_retries_total"), 1);
            assert_eq!(counter_value(&snapshot, "wp_relay_errors_total"), 1);
        }
    }
}
