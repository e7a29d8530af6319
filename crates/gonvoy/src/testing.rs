//! In-memory host fakes.
//!
//! Every fake is a cheap handle over shared state: hand one clone to the
//! pipeline and keep another to inspect what the filter did.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use parking_lot::Mutex;

use crate::host::{
    BufferInstance, CounterSink, FilterCallbacks, GaugeSink, HeaderMap, HistogramSink, HostError,
    LocalReply, LogLevel, MetricsHost, RequestHeaderMap, ResponseHeaderMap, StreamInfo,
};

/// Header map backed by an ordered list of lower-cased names.
#[derive(Debug, Clone, Default)]
pub struct MemoryHeaders {
    entries: Arc<Mutex<Vec<(String, String)>>>,
}

impl MemoryHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request headers with the usual pseudo-headers.
    pub fn request(method: &str, host: &str, path: &str) -> Self {
        Self::from_pairs([
            (":method", method),
            (":authority", host),
            (":path", path),
            (":scheme", "http"),
        ])
    }

    pub fn response(status: u16) -> Self {
        let headers = Self::new();
        headers.insert(":status", &status.to_string());
        headers
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let headers = Self::new();
        for (name, value) in pairs {
            headers.insert(name, value);
        }
        headers
    }

    /// Append a header through a shared handle.
    pub fn insert(&self, name: &str, value: &str) {
        self.entries
            .lock()
            .push((name.to_ascii_lowercase(), value.to_string()));
    }
}

impl HeaderMap for MemoryHeaders {
    fn get(&self, name: &str) -> Option<String> {
        let name = name.to_ascii_lowercase();
        self.entries
            .lock()
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.clone())
    }

    fn values(&self, name: &str) -> Vec<String> {
        let name = name.to_ascii_lowercase();
        self.entries
            .lock()
            .iter()
            .filter(|(k, _)| *k == name)
            .map(|(_, v)| v.clone())
            .collect()
    }

    fn set(&mut self, name: &str, value: &str) {
        let name = name.to_ascii_lowercase();
        let mut entries = self.entries.lock();
        match entries.iter().position(|(k, _)| *k == name) {
            Some(first) => {
                entries[first].1 = value.to_string();
                let mut index = 0;
                entries.retain(|(k, _)| {
                    let keep = *k != name || index == first;
                    index += 1;
                    keep
                });
            }
            None => entries.push((name, value.to_string())),
        }
    }

    fn add(&mut self, name: &str, value: &str) {
        self.insert(name, value);
    }

    fn remove(&mut self, name: &str) {
        let name = name.to_ascii_lowercase();
        self.entries.lock().retain(|(k, _)| *k != name);
    }

    fn entries(&self) -> Vec<(String, String)> {
        self.entries.lock().clone()
    }
}

impl RequestHeaderMap for MemoryHeaders {}

impl ResponseHeaderMap for MemoryHeaders {}

/// Body buffer with shared contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryBuffer {
    data: Arc<Mutex<BytesMut>>,
}

impl MemoryBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Bytes {
        Bytes::copy_from_slice(&self.data.lock())
    }
}

impl From<&[u8]> for MemoryBuffer {
    fn from(data: &[u8]) -> Self {
        Self {
            data: Arc::new(Mutex::new(BytesMut::from(data))),
        }
    }
}

impl From<&str> for MemoryBuffer {
    fn from(data: &str) -> Self {
        Self::from(data.as_bytes())
    }
}

impl BufferInstance for MemoryBuffer {
    fn bytes(&self) -> Bytes {
        self.contents()
    }

    fn len(&self) -> usize {
        self.data.lock().len()
    }

    fn set(&mut self, data: &[u8]) {
        let mut buffer = self.data.lock();
        buffer.clear();
        buffer.extend_from_slice(data);
    }

    fn append(&mut self, data: &[u8]) {
        self.data.lock().extend_from_slice(data);
    }

    fn drain(&mut self, n: usize) {
        let mut buffer = self.data.lock();
        let n = n.min(buffer.len());
        buffer.advance(n);
    }
}

#[derive(Debug, Default)]
struct CallbackState {
    replies: Vec<LocalReply>,
    logs: Vec<(LogLevel, String)>,
    route_cache_clears: usize,
    properties: HashMap<String, String>,
    stream_info: StreamInfo,
    fail_replies: bool,
}

/// Filter callbacks that record everything the filter asks of the host.
#[derive(Debug, Clone, Default)]
pub struct RecordingCallbacks {
    state: Arc<Mutex<CallbackState>>,
}

impl RecordingCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `send_local_reply` fail.
    pub fn fail_local_replies(&self) {
        self.state.lock().fail_replies = true;
    }

    pub fn set_property(&self, path: &str, value: &str) {
        self.state
            .lock()
            .properties
            .insert(path.to_string(), value.to_string());
    }

    pub fn set_stream_info(&self, info: StreamInfo) {
        self.state.lock().stream_info = info;
    }

    pub fn replies(&self) -> Vec<LocalReply> {
        self.state.lock().replies.clone()
    }

    pub fn last_reply(&self) -> Option<LocalReply> {
        self.state.lock().replies.last().cloned()
    }

    pub fn logs(&self) -> Vec<(LogLevel, String)> {
        self.state.lock().logs.clone()
    }

    pub fn route_cache_clears(&self) -> usize {
        self.state.lock().route_cache_clears
    }
}

impl FilterCallbacks for RecordingCallbacks {
    fn send_local_reply(&mut self, reply: LocalReply) -> Result<(), HostError> {
        let mut state = self.state.lock();
        if state.fail_replies {
            return Err(HostError::new("send_local_reply", "stream already reset"));
        }
        state.replies.push(reply);
        Ok(())
    }

    fn log(&self, level: LogLevel, message: &str) {
        self.state.lock().logs.push((level, message.to_string()));
    }

    fn get_property(&self, path: &str) -> Option<String> {
        self.state.lock().properties.get(path).cloned()
    }

    fn stream_info(&self) -> StreamInfo {
        self.state.lock().stream_info.clone()
    }

    fn clear_route_cache(&mut self) {
        self.state.lock().route_cache_clears += 1;
    }
}

#[derive(Debug, Default)]
struct MetricValues {
    counters: HashMap<String, u64>,
    gauges: HashMap<String, i64>,
    histograms: HashMap<String, Vec<u64>>,
}

/// Metrics host keeping every value in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryMetricsHost {
    values: Arc<Mutex<MetricValues>>,
}

struct MemorySink {
    name: String,
    values: Arc<Mutex<MetricValues>>,
}

impl MemoryMetricsHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, name: &str) -> Option<u64> {
        self.values.lock().counters.get(name).copied()
    }

    pub fn gauge(&self, name: &str) -> Option<i64> {
        self.values.lock().gauges.get(name).copied()
    }

    pub fn histogram(&self, name: &str) -> Vec<u64> {
        self.values
            .lock()
            .histograms
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    fn sink(&self, name: &str) -> Arc<MemorySink> {
        Arc::new(MemorySink {
            name: name.to_string(),
            values: Arc::clone(&self.values),
        })
    }
}

impl CounterSink for MemorySink {
    fn increment(&self, value: u64) {
        *self.values.lock().counters.entry(self.name.clone()).or_default() += value;
    }
}

impl GaugeSink for MemorySink {
    fn increment(&self, value: u64) {
        *self.values.lock().gauges.entry(self.name.clone()).or_default() += value as i64;
    }

    fn decrement(&self, value: u64) {
        *self.values.lock().gauges.entry(self.name.clone()).or_default() -= value as i64;
    }

    fn record(&self, value: u64) {
        self.values
            .lock()
            .gauges
            .insert(self.name.clone(), value as i64);
    }
}

impl HistogramSink for MemorySink {
    fn record(&self, value: u64) {
        self.values
            .lock()
            .histograms
            .entry(self.name.clone())
            .or_default()
            .push(value);
    }
}

impl MetricsHost for MemoryMetricsHost {
    fn define_counter(&self, name: &str) -> Result<Arc<dyn CounterSink>, HostError> {
        self.values.lock().counters.entry(name.to_string()).or_default();
        Ok(self.sink(name))
    }

    fn define_gauge(&self, name: &str) -> Result<Arc<dyn GaugeSink>, HostError> {
        self.values.lock().gauges.entry(name.to_string()).or_default();
        Ok(self.sink(name))
    }

    fn define_histogram(&self, name: &str) -> Result<Arc<dyn HistogramSink>, HostError> {
        self.values.lock().histograms.entry(name.to_string()).or_default();
        Ok(self.sink(name))
    }
}
