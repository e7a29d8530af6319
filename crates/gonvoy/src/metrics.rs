//! Metric handles memoized per configuration.
//!
//! Handles are defined on the host the first time a canonical name is seen
//! and reused afterwards, so every stream sharing a configuration increments
//! the same host metric.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::host::{CounterSink, GaugeSink, HistogramSink, MetricsHost};

/// Monotonic counter.
#[derive(Clone)]
pub struct Counter {
    name: Arc<str>,
    sink: Arc<dyn CounterSink>,
}

impl Counter {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn increment(&self, value: u64) {
        self.sink.increment(value);
    }
}

impl fmt::Debug for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Counter").field(&self.name).finish()
    }
}

#[derive(Clone)]
pub struct Gauge {
    name: Arc<str>,
    sink: Arc<dyn GaugeSink>,
}

impl Gauge {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn increment(&self, value: u64) {
        self.sink.increment(value);
    }

    pub fn decrement(&self, value: u64) {
        self.sink.decrement(value);
    }

    pub fn record(&self, value: u64) {
        self.sink.record(value);
    }
}

impl fmt::Debug for Gauge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Gauge").field(&self.name).finish()
    }
}

#[derive(Clone)]
pub struct Histogram {
    name: Arc<str>,
    sink: Arc<dyn HistogramSink>,
}

impl Histogram {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn record(&self, value: u64) {
        self.sink.record(value);
    }
}

impl fmt::Debug for Histogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Histogram").field(&self.name).finish()
    }
}

#[derive(Default)]
struct Handles {
    counters: HashMap<String, Counter>,
    gauges: HashMap<String, Gauge>,
    histograms: HashMap<String, Histogram>,
}

/// Metric factory for one configuration.
pub struct Metrics {
    prefix: String,
    host: Arc<dyn MetricsHost>,
    handles: Mutex<Handles>,
}

impl fmt::Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handles = self.handles.lock();
        f.debug_struct("Metrics")
            .field("prefix", &self.prefix)
            .field("counters", &handles.counters.len())
            .field("gauges", &handles.gauges.len())
            .field("histograms", &handles.histograms.len())
            .finish()
    }
}

impl Metrics {
    pub fn new(prefix: impl Into<String>, host: Arc<dyn MetricsHost>) -> Self {
        Self {
            prefix: prefix.into(),
            host,
            handles: Mutex::new(Handles::default()),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Counter named `name` with the given label pairs.
    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> Result<Counter> {
        let canonical = canonical_name(&self.prefix, name, labels);
        let mut handles = self.handles.lock();
        if let Some(counter) = handles.counters.get(&canonical) {
            return Ok(counter.clone());
        }

        let sink = self
            .host
            .define_counter(&canonical)
            .map_err(|e| Error::Runtime(e.to_string()).context(format!("counter {}", canonical)))?;
        let counter = Counter {
            name: Arc::from(canonical.as_str()),
            sink,
        };
        handles.counters.insert(canonical, counter.clone());
        Ok(counter)
    }

    pub fn gauge(&self, name: &str, labels: &[(&str, &str)]) -> Result<Gauge> {
        let canonical = canonical_name(&self.prefix, name, labels);
        let mut handles = self.handles.lock();
        if let Some(gauge) = handles.gauges.get(&canonical) {
            return Ok(gauge.clone());
        }

        let sink = self
            .host
            .define_gauge(&canonical)
            .map_err(|e| Error::Runtime(e.to_string()).context(format!("gauge {}", canonical)))?;
        let gauge = Gauge {
            name: Arc::from(canonical.as_str()),
            sink,
        };
        handles.gauges.insert(canonical, gauge.clone());
        Ok(gauge)
    }

    pub fn histogram(&self, name: &str, labels: &[(&str, &str)]) -> Result<Histogram> {
        let canonical = canonical_name(&self.prefix, name, labels);
        let mut handles = self.handles.lock();
        if let Some(histogram) = handles.histograms.get(&canonical) {
            return Ok(histogram.clone());
        }

        let sink = self.host.define_histogram(&canonical).map_err(|e| {
            Error::Runtime(e.to_string()).context(format!("histogram {}", canonical))
        })?;
        let histogram = Histogram {
            name: Arc::from(canonical.as_str()),
            sink,
        };
        handles.histograms.insert(canonical, histogram.clone());
        Ok(histogram)
    }
}

/// `prefix + snake_case(name)` followed by `_k=v` for every label, lower-cased
/// with spaces replaced by underscores.
pub fn canonical_name(prefix: &str, name: &str, labels: &[(&str, &str)]) -> String {
    let mut canonical = String::with_capacity(prefix.len() + name.len() + labels.len() * 8);
    canonical.push_str(prefix);
    canonical.push_str(&snake_case(name));
    for (key, value) in labels {
        canonical.push('_');
        canonical.push_str(key);
        canonical.push('=');
        canonical.push_str(value);
    }
    canonical.to_lowercase().replace(' ', "_")
}

fn snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            let boundary = prev.is_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_uppercase() && next_is_lower);
            if boundary && !out.ends_with('_') {
                out.push('_');
            }
        }
        out.extend(c.to_lowercase());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostError;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorder {
        defined: AtomicUsize,
        total: Arc<AtomicU64>,
    }

    struct Sink(Arc<AtomicU64>);

    impl CounterSink for Sink {
        fn increment(&self, value: u64) {
            self.0.fetch_add(value, Ordering::SeqCst);
        }
    }

    impl GaugeSink for Sink {
        fn increment(&self, value: u64) {
            self.0.fetch_add(value, Ordering::SeqCst);
        }
        fn decrement(&self, value: u64) {
            self.0.fetch_sub(value, Ordering::SeqCst);
        }
        fn record(&self, value: u64) {
            self.0.store(value, Ordering::SeqCst);
        }
    }

    impl HistogramSink for Sink {
        fn record(&self, value: u64) {
            self.0.store(value, Ordering::SeqCst);
        }
    }

    impl MetricsHost for Recorder {
        fn define_counter(&self, name: &str) -> Result<Arc<dyn CounterSink>, HostError> {
            if name.contains("broken") {
                return Err(HostError::new("define_counter", "rejected"));
            }
            self.defined.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Sink(Arc::clone(&self.total))))
        }

        fn define_gauge(&self, _name: &str) -> Result<Arc<dyn GaugeSink>, HostError> {
            self.defined.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Sink(Arc::clone(&self.total))))
        }

        fn define_histogram(&self, _name: &str) -> Result<Arc<dyn HistogramSink>, HostError> {
            self.defined.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Sink(Arc::clone(&self.total))))
        }
    }

    #[test]
    fn canonical_names() {
        assert_eq!(canonical_name("", "RequestTotal", &[]), "request_total");
        assert_eq!(canonical_name("edge_", "requestTotal", &[]), "edge_request_total");
        assert_eq!(canonical_name("", "HTTPRequests", &[]), "http_requests");
        assert_eq!(
            canonical_name("gw_", "Upstream Errors", &[("Host", "api example"), ("code", "502")]),
            "gw_upstream_errors_host=api_example_code=502"
        );
    }

    #[test]
    fn handles_are_memoized_by_canonical_name() {
        let host = Arc::new(Recorder::default());
        let metrics = Metrics::new("edge_", host.clone());

        let a = metrics.counter("RequestTotal", &[("route", "a")]).unwrap();
        let b = metrics.counter("request_total", &[("route", "a")]).unwrap();
        assert_eq!(a.name(), b.name());
        assert_eq!(host.defined.load(Ordering::SeqCst), 1);

        a.increment(2);
        b.increment(3);
        assert_eq!(host.total.load(Ordering::SeqCst), 5);

        metrics.counter("request_total", &[("route", "b")]).unwrap();
        assert_eq!(host.defined.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn gauge_and_histogram() {
        let host = Arc::new(Recorder::default());
        let metrics = Metrics::new("", host.clone());

        let gauge = metrics.gauge("InFlight", &[]).unwrap();
        gauge.increment(3);
        gauge.decrement(1);
        assert_eq!(host.total.load(Ordering::SeqCst), 2);

        let histogram = metrics.histogram("LatencyMs", &[]).unwrap();
        histogram.record(42);
        assert_eq!(histogram.name(), "latency_ms");
        assert_eq!(host.total.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn host_rejection_is_reported() {
        let metrics = Metrics::new("", Arc::new(Recorder::default()));
        let err = metrics.counter("broken", &[]).unwrap_err();
        assert!(err.to_string().contains("counter broken"));
    }
}
