//! FilterHarness and StreamDriver: run a filter the way a host would.

use std::sync::Arc;

use serde_json::{json, Value};
use thiserror::Error;

use gonvoy::testing::{MemoryBuffer, MemoryHeaders, MemoryMetricsHost, RecordingCallbacks};
use gonvoy::{
    ConfigOptions, DestroyReason, FilterFactory, FilterPipeline, FilterRegistry, HostStatus,
    HttpFilter, LocalReply, LogLevel,
};

/// Type URL stamped on every payload the harness builds.
pub const TYPE_URL: &str = "type.googleapis.com/gonvoy.test.Config";

/// Errors from FilterHarness operations.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("filter {0} fell back to pass-through")]
    PassThrough(String),

    #[error("invalid config payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// One registered filter plus the in-memory metrics host its
/// configurations are bound to.
pub struct FilterHarness {
    name: String,
    registry: FilterRegistry,
    metrics: MemoryMetricsHost,
}

impl FilterHarness {
    pub fn new<F, T>(name: &str, factory: F, options: ConfigOptions) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        T: HttpFilter + 'static,
    {
        let mut registry = FilterRegistry::new();
        registry.register(name, factory, options);
        Self {
            name: name.to_string(),
            registry,
            metrics: MemoryMetricsHost::new(),
        }
    }

    pub fn registry(&self) -> &FilterRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &MemoryMetricsHost {
        &self.metrics
    }

    /// Resolve `value` wrapped in a typed-struct envelope.
    pub fn configure(&self, value: Value) -> Result<FilterFactory, HarnessError> {
        let payload = serde_json::to_vec(&json!({ "@type": TYPE_URL, "value": value }))?;
        self.parse_raw(&payload)
    }

    /// Resolve a raw payload, exactly as the host would hand it over.
    pub fn parse_raw(&self, payload: &[u8]) -> Result<FilterFactory, HarnessError> {
        let factory =
            self.registry
                .parse_config(&self.name, payload, Arc::new(self.metrics.clone()));
        self.configured(factory)
    }

    /// Merge a route-level `child` over `parent`.
    pub fn merge(
        &self,
        parent: &FilterFactory,
        child: &FilterFactory,
    ) -> Result<FilterFactory, HarnessError> {
        let factory = self.registry.merge_config(&self.name, parent, child);
        self.configured(factory)
    }

    /// Start a stream on `factory`.
    pub fn stream(&self, factory: &FilterFactory) -> StreamDriver {
        StreamDriver::new(factory)
    }

    fn configured(&self, factory: FilterFactory) -> Result<FilterFactory, HarnessError> {
        if factory.is_pass_through() {
            return Err(HarnessError::PassThrough(self.name.clone()));
        }
        Ok(factory)
    }
}

/// Plays one stream through a pipeline and records what the host saw.
pub struct StreamDriver {
    pipeline: FilterPipeline,
    callbacks: RecordingCallbacks,
    request_buffer: Option<MemoryBuffer>,
    response_buffer: Option<MemoryBuffer>,
}

impl StreamDriver {
    pub fn new(factory: &FilterFactory) -> Self {
        let callbacks = RecordingCallbacks::new();
        let pipeline = factory.create_pipeline(Box::new(callbacks.clone()));
        Self {
            pipeline,
            callbacks,
            request_buffer: None,
            response_buffer: None,
        }
    }

    pub fn pipeline(&self) -> &FilterPipeline {
        &self.pipeline
    }

    pub fn callbacks(&self) -> &RecordingCallbacks {
        &self.callbacks
    }

    pub fn replies(&self) -> Vec<LocalReply> {
        self.callbacks.replies()
    }

    pub fn last_reply(&self) -> Option<LocalReply> {
        self.callbacks.last_reply()
    }

    /// True when some host log line at `level` contains `needle`.
    pub fn logged(&self, level: LogLevel, needle: &str) -> bool {
        self.callbacks
            .logs()
            .iter()
            .any(|(l, message)| *l == level && message.contains(needle))
    }

    /// The buffer handed over with the latest request body callback.
    pub fn request_buffer(&self) -> Option<&MemoryBuffer> {
        self.request_buffer.as_ref()
    }

    /// The buffer handed over with the latest response body callback.
    pub fn response_buffer(&self) -> Option<&MemoryBuffer> {
        self.response_buffer.as_ref()
    }

    pub fn request_headers(&mut self, headers: &MemoryHeaders, end_stream: bool) -> HostStatus {
        self.pipeline
            .on_request_header(Box::new(headers.clone()), end_stream)
    }

    pub fn request_body(&mut self, chunk: &[u8], end_stream: bool) -> HostStatus {
        let buffer = MemoryBuffer::from(chunk);
        self.request_buffer = Some(buffer.clone());
        self.pipeline.on_request_body(Box::new(buffer), end_stream)
    }

    pub fn response_headers(&mut self, headers: &MemoryHeaders, end_stream: bool) -> HostStatus {
        self.pipeline
            .on_response_header(Box::new(headers.clone()), end_stream)
    }

    pub fn response_body(&mut self, chunk: &[u8], end_stream: bool) -> HostStatus {
        let buffer = MemoryBuffer::from(chunk);
        self.response_buffer = Some(buffer.clone());
        self.pipeline.on_response_body(Box::new(buffer), end_stream)
    }

    /// Send headers followed by `chunks`, the last one ending the stream.
    /// Like a host, stops at the first local reply.
    pub fn send_request(&mut self, headers: &MemoryHeaders, chunks: &[&str]) -> Vec<HostStatus> {
        let mut statuses = vec![self.request_headers(headers, chunks.is_empty())];
        for (i, chunk) in chunks.iter().enumerate() {
            if statuses.last() == Some(&HostStatus::LocalReply) {
                break;
            }
            statuses.push(self.request_body(chunk.as_bytes(), i + 1 == chunks.len()));
        }
        statuses
    }

    /// Response counterpart of [`StreamDriver::send_request`].
    pub fn send_response(&mut self, headers: &MemoryHeaders, chunks: &[&str]) -> Vec<HostStatus> {
        let mut statuses = vec![self.response_headers(headers, chunks.is_empty())];
        for (i, chunk) in chunks.iter().enumerate() {
            if statuses.last() == Some(&HostStatus::LocalReply) {
                break;
            }
            statuses.push(self.response_body(chunk.as_bytes(), i + 1 == chunks.len()));
        }
        statuses
    }

    /// Log and destroy the stream.
    pub fn finish(&mut self) {
        self.pipeline.on_log();
        self.pipeline.on_destroy(DestroyReason::Normal);
    }
}
