//! Interfaces to the host proxy.
//!
//! The host owns the stream: it hands the pipeline header maps and body
//! buffers on every callback and exposes a callbacks object for local
//! replies, logging, properties and route cache control. Host adapters
//! implement these traits on top of the real plugin ABI; the test harness
//! implements them in memory.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;

/// Status returned to the host from every flow callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostStatus {
    /// The filter is still running asynchronously.
    Running,
    /// The filter produced a local reply.
    LocalReply,
    /// Continue to the next filter.
    Continue,
    /// Hold the headers and buffer the body until the filter continues.
    StopAndBuffer,
    /// Like `StopAndBuffer`, but honouring the host buffer watermark.
    StopAndBufferWatermark,
    /// Hold without buffering.
    StopNoBuffer,
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HostStatus::Running => "Running",
            HostStatus::LocalReply => "LocalReply",
            HostStatus::Continue => "Continue",
            HostStatus::StopAndBuffer => "StopAndBuffer",
            HostStatus::StopAndBufferWatermark => "StopAndBufferWatermark",
            HostStatus::StopNoBuffer => "StopNoBuffer",
        };
        f.write_str(name)
    }
}

/// Host log levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

/// Why the host destroyed a filter instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyReason {
    /// The stream finished normally.
    Normal,
    /// The stream was reset or the worker is shutting down.
    Terminate,
}

/// Failure reported by the host.
#[derive(Debug, Clone, Error)]
#[error("host rejected {operation}: {message}")]
pub struct HostError {
    pub operation: &'static str,
    pub message: String,
}

impl HostError {
    pub fn new(operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
        }
    }
}

/// Header operations shared by request and response header maps.
///
/// Names are case-insensitive. Values are returned as owned strings because
/// host storage is not addressable from the filter.
pub trait HeaderMap: Send {
    /// First value of `name`, if present.
    fn get(&self, name: &str) -> Option<String>;

    /// All values of `name`, in insertion order.
    fn values(&self, name: &str) -> Vec<String>;

    /// Replace every value of `name` with `value`.
    fn set(&mut self, name: &str, value: &str);

    /// Append a value without touching existing ones.
    fn add(&mut self, name: &str, value: &str);

    /// Remove every value of `name`.
    fn remove(&mut self, name: &str);

    /// Every header, pseudo-headers included.
    fn entries(&self) -> Vec<(String, String)>;
}

/// Request headers, with accessors for the pseudo-headers.
pub trait RequestHeaderMap: HeaderMap {
    fn method(&self) -> Option<String> {
        self.get(":method")
    }

    fn host(&self) -> Option<String> {
        self.get(":authority")
    }

    fn path(&self) -> Option<String> {
        self.get(":path")
    }

    fn scheme(&self) -> Option<String> {
        self.get(":scheme")
    }

    fn set_method(&mut self, method: &str) {
        self.set(":method", method);
    }

    fn set_host(&mut self, host: &str) {
        self.set(":authority", host);
    }

    fn set_path(&mut self, path: &str) {
        self.set(":path", path);
    }
}

/// Response headers.
pub trait ResponseHeaderMap: HeaderMap {
    fn status(&self) -> Option<u16> {
        self.get(":status").and_then(|s| s.parse().ok())
    }
}

/// A body buffer handed over by the host for one body callback.
pub trait BufferInstance: Send {
    /// Current contents.
    fn bytes(&self) -> Bytes;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the contents.
    fn set(&mut self, data: &[u8]);

    fn append(&mut self, data: &[u8]);

    /// Drop the first `n` bytes.
    fn drain(&mut self, n: usize);
}

/// A response produced by the filter instead of the upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalReply {
    pub status_code: u16,
    pub body: Bytes,
    pub headers: Vec<(String, String)>,
    /// -1 when no gRPC status applies.
    pub grpc_status: i64,
    pub details: String,
}

/// Stream metadata exposed by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamInfo {
    pub route_name: Option<String>,
    pub protocol: Option<String>,
    pub downstream_remote_address: Option<String>,
    pub filter_chain_name: Option<String>,
}

/// Per-stream callbacks into the host.
pub trait FilterCallbacks: Send {
    /// Short-circuit the stream with a local reply.
    fn send_local_reply(&mut self, reply: LocalReply) -> Result<(), HostError>;

    /// Write to the host log.
    fn log(&self, level: LogLevel, message: &str);

    /// Look up a host attribute such as `request.id` or `xds.route_name`.
    fn get_property(&self, path: &str) -> Option<String>;

    fn stream_info(&self) -> StreamInfo;

    /// Force the host to recompute the route for this stream.
    fn clear_route_cache(&mut self);
}

/// Counter defined on the host.
pub trait CounterSink: Send + Sync {
    fn increment(&self, value: u64);
}

/// Gauge defined on the host.
pub trait GaugeSink: Send + Sync {
    fn increment(&self, value: u64);
    fn decrement(&self, value: u64);
    fn record(&self, value: u64);
}

/// Histogram defined on the host.
pub trait HistogramSink: Send + Sync {
    fn record(&self, value: u64);
}

/// Metric definition surface of the host.
pub trait MetricsHost: Send + Sync {
    fn define_counter(&self, name: &str) -> Result<Arc<dyn CounterSink>, HostError>;
    fn define_gauge(&self, name: &str) -> Result<Arc<dyn GaugeSink>, HostError>;
    fn define_histogram(&self, name: &str) -> Result<Arc<dyn HistogramSink>, HostError>;
}

/// Metrics host that discards everything; used when the host offers none.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetricsHost;

struct NoopSink;

impl CounterSink for NoopSink {
    fn increment(&self, _value: u64) {}
}

impl GaugeSink for NoopSink {
    fn increment(&self, _value: u64) {}
    fn decrement(&self, _value: u64) {}
    fn record(&self, _value: u64) {}
}

impl HistogramSink for NoopSink {
    fn record(&self, _value: u64) {}
}

impl MetricsHost for NoopMetricsHost {
    fn define_counter(&self, _name: &str) -> Result<Arc<dyn CounterSink>, HostError> {
        Ok(Arc::new(NoopSink))
    }

    fn define_gauge(&self, _name: &str) -> Result<Arc<dyn GaugeSink>, HostError> {
        Ok(Arc::new(NoopSink))
    }

    fn define_histogram(&self, _name: &str) -> Result<Arc<dyn HistogramSink>, HostError> {
        Ok(Arc::new(NoopSink))
    }
}
