//! Body buffering and access policy.

use bytes::{Bytes, BytesMut};

use crate::config::BodyAccessOptions;
use crate::host::{BufferInstance, HeaderMap, RequestHeaderMap, ResponseHeaderMap};

pub const HEADER_REQUEST_BODY_ACCESS: &str = "x-request-body-access";
pub const HEADER_RESPONSE_BODY_ACCESS: &str = "x-response-body-access";
pub const HEADER_CONTENT_OPERATION: &str = "x-content-operation";

/// Stream direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

/// Read/write permission for one direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BodyAccess {
    pub readable: bool,
    pub writable: bool,
}

impl BodyAccess {
    pub const NONE: Self = Self {
        readable: false,
        writable: false,
    };

    pub fn is_accessible(&self) -> bool {
        self.readable || self.writable
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContentOperation {
    ReadOnly,
    ReadWrite,
}

impl ContentOperation {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ro" | "readonly" => Some(Self::ReadOnly),
            "rw" | "readwrite" => Some(Self::ReadWrite),
            _ => None,
        }
    }
}

/// Header inputs to the access decision for one direction.
#[derive(Debug, Clone, Default)]
pub(crate) struct AccessHeaders {
    /// `X-{Request,Response}-Body-Access`.
    pub body_access: Option<String>,
    pub content_operation: Option<String>,
    pub content_length: Option<String>,
}

impl AccessHeaders {
    pub(crate) fn for_request(headers: &dyn RequestHeaderMap) -> Self {
        Self {
            body_access: headers.get(HEADER_REQUEST_BODY_ACCESS),
            content_operation: headers.get(HEADER_CONTENT_OPERATION),
            content_length: headers.get("content-length"),
        }
    }

    /// Response headers first, then the request headers the client sent.
    pub(crate) fn for_response(
        headers: &dyn ResponseHeaderMap,
        request: Option<&dyn RequestHeaderMap>,
    ) -> Self {
        let lookup = |name: &str| {
            headers
                .get(name)
                .or_else(|| request.and_then(|r| r.get(name)))
        };

        Self {
            body_access: lookup(HEADER_RESPONSE_BODY_ACCESS),
            content_operation: lookup(HEADER_CONTENT_OPERATION),
            content_length: headers.get("content-length"),
        }
    }
}

/// Decide body access for one direction.
///
/// `X-*-Body-Access: Off` always wins. In strict mode access requires
/// `X-Content-Operation`; write access also needs a non-zero
/// `Content-Length`. Write access implies read access.
pub(crate) fn resolve_access(
    options: &BodyAccessOptions,
    direction: Direction,
    headers: &AccessHeaders,
) -> BodyAccess {
    if headers
        .body_access
        .as_deref()
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("off"))
    {
        return BodyAccess::NONE;
    }

    let (read_enabled, write_enabled) = match direction {
        Direction::Request => (
            options.enable_request_body_read,
            options.enable_request_body_write,
        ),
        Direction::Response => (
            options.enable_response_body_read,
            options.enable_response_body_write,
        ),
    };

    if !options.is_strict() {
        return BodyAccess {
            readable: read_enabled || write_enabled,
            writable: write_enabled,
        };
    }

    match headers
        .content_operation
        .as_deref()
        .and_then(ContentOperation::parse)
    {
        Some(ContentOperation::ReadOnly) => BodyAccess {
            readable: read_enabled || write_enabled,
            writable: false,
        },
        Some(ContentOperation::ReadWrite) => {
            let has_body = headers
                .content_length
                .as_deref()
                .and_then(|v| v.trim().parse::<u64>().ok())
                .is_some_and(|n| n > 0);
            BodyAccess {
                readable: read_enabled || write_enabled,
                writable: write_enabled && has_body,
            }
        }
        None => BodyAccess::NONE,
    }
}

/// Accumulates body chunks for one direction.
///
/// Every chunk is copied into the accumulator and drained from the host
/// buffer, so the host only ever holds what the filter hands back. The final
/// chunk's buffer becomes the canonical body and is filled with the full
/// accumulated body.
#[derive(Default)]
pub(crate) struct BodyBuffer {
    accumulated: BytesMut,
    canonical: Option<Box<dyn BufferInstance>>,
    complete: bool,
}

impl BodyBuffer {
    /// Feed one chunk. Returns true once the body is complete.
    pub(crate) fn push_chunk(&mut self, mut chunk: Box<dyn BufferInstance>, end_stream: bool) -> bool {
        self.accumulated.extend_from_slice(&chunk.bytes());
        if !end_stream {
            let len = chunk.len();
            chunk.drain(len);
            return false;
        }

        chunk.set(&self.accumulated);
        self.canonical = Some(chunk);
        self.complete = true;
        true
    }

    pub(crate) fn bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.accumulated)
    }

    pub(crate) fn len(&self) -> usize {
        self.accumulated.len()
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.complete
    }

    /// Replace the body. The canonical host buffer, if installed, follows.
    pub(crate) fn replace(&mut self, data: &[u8]) {
        self.accumulated.clear();
        self.accumulated.extend_from_slice(data);
        if let Some(buffer) = self.canonical.as_mut() {
            buffer.set(data);
        }
    }
}
