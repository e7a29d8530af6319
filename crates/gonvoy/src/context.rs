//! Per-stream filter context.
//!
//! The context is what handlers see: header views, buffered bodies, body
//! permissions, local reply shortcuts, the configuration, the shared cache
//! and metrics. One context lives for one stream and is only touched by the
//! worker driving that stream.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use serde::Serialize;

use crate::body::{resolve_access, AccessHeaders, BodyAccess, BodyBuffer, Direction};
use crate::cache::Cache;
use crate::config::ResolvedConfig;
use crate::error::{Error, Result};
use crate::error_handler::ErrorHandler;
use crate::host::{
    FilterCallbacks, HeaderMap, HostStatus, LocalReply, LogLevel, RequestHeaderMap,
    ResponseHeaderMap, StreamInfo,
};
use crate::metrics::Metrics;
use crate::reply::LocalReplyOptions;

const CONTENT_TYPE_JSON: &str = "application/json";
const CONTENT_TYPE_TEXT: &str = "text/plain; charset=utf-8";

/// Method, host and path of the request; a change means the route may differ.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RouteKey {
    method: Option<String>,
    host: Option<String>,
    path: Option<String>,
}

/// State shared by the handlers of one stream.
pub struct FilterContext {
    config: Arc<ResolvedConfig>,
    callbacks: Box<dyn FilterCallbacks>,
    status: HostStatus,
    committed: bool,

    request_headers: Option<Box<dyn RequestHeaderMap>>,
    response_headers: Option<Box<dyn ResponseHeaderMap>>,
    request: Option<http::Request<()>>,
    response: Option<http::Response<()>>,

    request_body: BodyBuffer,
    response_body: BodyBuffer,
    request_access: BodyAccess,
    response_access: BodyAccess,

    error_handler: Arc<dyn ErrorHandler>,
}

impl fmt::Debug for FilterContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterContext")
            .field("filter", &self.config.filter_name())
            .field("status", &self.status)
            .field("committed", &self.committed)
            .field("request_access", &self.request_access)
            .field("response_access", &self.response_access)
            .finish_non_exhaustive()
    }
}

impl FilterContext {
    pub(crate) fn new(config: Arc<ResolvedConfig>, callbacks: Box<dyn FilterCallbacks>) -> Self {
        let error_handler = config.error_handler();
        Self {
            config,
            callbacks,
            status: HostStatus::Continue,
            committed: false,
            request_headers: None,
            response_headers: None,
            request: None,
            response: None,
            request_body: BodyBuffer::default(),
            response_body: BodyBuffer::default(),
            request_access: BodyAccess::NONE,
            response_access: BodyAccess::NONE,
            error_handler,
        }
    }

    pub fn filter_name(&self) -> &str {
        self.config.filter_name()
    }

    // Headers

    pub fn request_header(&self) -> Option<&dyn RequestHeaderMap> {
        self.request_headers.as_deref()
    }

    pub fn request_header_mut(&mut self) -> Option<&mut (dyn RequestHeaderMap + 'static)> {
        self.request_headers.as_deref_mut()
    }

    pub fn response_header(&self) -> Option<&dyn ResponseHeaderMap> {
        self.response_headers.as_deref()
    }

    pub fn response_header_mut(&mut self) -> Option<&mut (dyn ResponseHeaderMap + 'static)> {
        self.response_headers.as_deref_mut()
    }

    /// Request as it looked when its headers arrived.
    pub fn request(&self) -> Option<&http::Request<()>> {
        self.request.as_ref()
    }

    /// Response as it looked when its headers arrived.
    pub fn response(&self) -> Option<&http::Response<()>> {
        self.response.as_ref()
    }

    pub fn set_request_header(&mut self, name: &str, value: &str) -> Result<()> {
        self.request_headers_or_err()?.set(name, value);
        Ok(())
    }

    pub fn add_request_header(&mut self, name: &str, value: &str) -> Result<()> {
        self.request_headers_or_err()?.add(name, value);
        Ok(())
    }

    pub fn remove_request_header(&mut self, name: &str) -> Result<()> {
        self.request_headers_or_err()?.remove(name);
        Ok(())
    }

    pub fn set_response_header(&mut self, name: &str, value: &str) -> Result<()> {
        self.response_headers_or_err()?.set(name, value);
        Ok(())
    }

    pub fn add_response_header(&mut self, name: &str, value: &str) -> Result<()> {
        self.response_headers_or_err()?.add(name, value);
        Ok(())
    }

    pub fn remove_response_header(&mut self, name: &str) -> Result<()> {
        self.response_headers_or_err()?.remove(name);
        Ok(())
    }

    fn request_headers_or_err(&mut self) -> Result<&mut (dyn RequestHeaderMap + 'static)> {
        self.request_headers
            .as_deref_mut()
            .ok_or_else(|| Error::not_permitted("request headers are not available yet"))
    }

    fn response_headers_or_err(&mut self) -> Result<&mut (dyn ResponseHeaderMap + 'static)> {
        self.response_headers
            .as_deref_mut()
            .ok_or_else(|| Error::not_permitted("response headers are not available yet"))
    }

    // Bodies

    pub fn is_request_body_readable(&self) -> bool {
        !self.committed && self.request_access.readable
    }

    pub fn is_request_body_writable(&self) -> bool {
        !self.committed && self.request_access.writable
    }

    pub fn is_response_body_readable(&self) -> bool {
        !self.committed && self.response_access.readable
    }

    pub fn is_response_body_writable(&self) -> bool {
        !self.committed && self.response_access.writable
    }

    /// The request body buffered so far.
    pub fn request_body(&self) -> Result<Bytes> {
        if !self.is_request_body_readable() {
            return Err(Error::not_permitted("request body is not readable"));
        }
        Ok(self.request_body.bytes())
    }

    pub fn response_body(&self) -> Result<Bytes> {
        if !self.is_response_body_readable() {
            return Err(Error::not_permitted("response body is not readable"));
        }
        Ok(self.response_body.bytes())
    }

    /// True once the final request chunk has been buffered.
    pub fn is_request_body_complete(&self) -> bool {
        self.request_body.is_complete()
    }

    pub fn is_response_body_complete(&self) -> bool {
        self.response_body.is_complete()
    }

    /// Replace the request body and update `Content-Length`.
    pub fn set_request_body(&mut self, data: &[u8]) -> Result<()> {
        if !self.is_request_body_writable() {
            return Err(Error::not_permitted("request body is not writable"));
        }
        self.request_body.replace(data);
        let len = self.request_body.len().to_string();
        if let Some(headers) = self.request_headers.as_deref_mut() {
            headers.set("content-length", &len);
        }
        Ok(())
    }

    /// Replace the response body and update `Content-Length`.
    pub fn set_response_body(&mut self, data: &[u8]) -> Result<()> {
        if !self.is_response_body_writable() {
            return Err(Error::not_permitted("response body is not writable"));
        }
        self.response_body.replace(data);
        let len = self.response_body.len().to_string();
        if let Some(headers) = self.response_headers.as_deref_mut() {
            headers.set("content-length", &len);
        }
        Ok(())
    }

    // Local replies

    /// Reply with a JSON body. `content-type` defaults to `application/json`.
    pub fn json(
        &mut self,
        status_code: u16,
        body: impl Into<Bytes>,
        options: LocalReplyOptions,
    ) -> Result<()> {
        self.local_reply(status_code, body.into(), Some(CONTENT_TYPE_JSON), options)
    }

    /// Serialize `body` and reply with it as JSON.
    pub fn json_value<T: Serialize + ?Sized>(
        &mut self,
        status_code: u16,
        body: &T,
        options: LocalReplyOptions,
    ) -> Result<()> {
        let bytes = serde_json::to_vec(body)
            .map_err(|e| Error::InternalServer(format!("serializing reply body: {}", e)))?;
        self.json(status_code, bytes, options)
    }

    /// Reply with a plain text body.
    pub fn string(&mut self, status_code: u16, text: &str, options: LocalReplyOptions) -> Result<()> {
        self.local_reply(
            status_code,
            Bytes::copy_from_slice(text.as_bytes()),
            Some(CONTENT_TYPE_TEXT),
            options,
        )
    }

    /// Reply with `body` and only the headers in `options`.
    pub fn send_response(
        &mut self,
        status_code: u16,
        body: &str,
        options: LocalReplyOptions,
    ) -> Result<()> {
        self.local_reply(
            status_code,
            Bytes::copy_from_slice(body.as_bytes()),
            None,
            options,
        )
    }

    fn local_reply(
        &mut self,
        status_code: u16,
        body: Bytes,
        content_type: Option<&str>,
        options: LocalReplyOptions,
    ) -> Result<()> {
        let details = options.details();
        let needs_content_type = content_type.filter(|_| !options.has_header("content-type"));
        let LocalReplyOptions {
            grpc_status,
            status,
            mut headers,
            ..
        } = options;
        if let Some(content_type) = needs_content_type {
            headers.push(("content-type".to_string(), content_type.to_string()));
        }

        self.callbacks
            .send_local_reply(LocalReply {
                status_code,
                body,
                headers,
                grpc_status,
                details,
            })
            .map_err(|e| Error::InternalServer(e.to_string()))?;

        // Only a reply the host accepted commits the stream.
        self.status = status;
        self.committed = true;
        Ok(())
    }

    // Flow control

    /// Stop running handlers and let the stream continue untouched.
    pub fn skip_next_phase(&mut self) {
        self.committed = true;
        self.status = HostStatus::Continue;
    }

    /// Ask the host to recompute the route.
    pub fn reload_route(&mut self) {
        self.callbacks.clear_route_cache();
    }

    pub fn status(&self) -> HostStatus {
        self.status
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    // Shared state

    pub fn cache(&self) -> &Cache {
        self.config.cache()
    }

    pub fn metrics(&self) -> &Metrics {
        self.config.metrics()
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    /// The decoded filter configuration, if it is a `T`.
    pub fn filter_config<T: Any>(&self) -> Option<&T> {
        self.config.schema::<T>()
    }

    // Host access

    pub fn property(&self, path: &str) -> Option<String> {
        self.callbacks.get_property(path)
    }

    pub fn stream_info(&self) -> StreamInfo {
        self.callbacks.stream_info()
    }

    /// Write to the host log.
    pub fn log(&self, level: LogLevel, message: &str) {
        self.callbacks.log(level, message);
    }

    /// Replace the error handler for the rest of this stream.
    pub fn set_error_handler(&mut self, handler: impl ErrorHandler + 'static) {
        self.error_handler = Arc::new(handler);
    }

    pub(crate) fn error_handler(&self) -> Arc<dyn ErrorHandler> {
        Arc::clone(&self.error_handler)
    }

    // Pipeline hooks

    /// Take ownership of the request headers, snapshot the request and decide
    /// request body access.
    pub(crate) fn install_request_headers(&mut self, headers: Box<dyn RequestHeaderMap>) -> Result<()> {
        let access = AccessHeaders::for_request(headers.as_ref());
        self.request_access = resolve_access(self.config.body_access(), Direction::Request, &access);
        let snapshot = build_request(headers.as_ref());
        self.request_headers = Some(headers);
        self.request = Some(snapshot?);
        Ok(())
    }

    pub(crate) fn install_response_headers(
        &mut self,
        headers: Box<dyn ResponseHeaderMap>,
    ) -> Result<()> {
        let access = AccessHeaders::for_response(headers.as_ref(), self.request_headers.as_deref());
        self.response_access = resolve_access(self.config.body_access(), Direction::Response, &access);
        let snapshot = build_response(headers.as_ref());
        self.response_headers = Some(headers);
        self.response = Some(snapshot?);
        Ok(())
    }

    pub(crate) fn request_body_buffer(&mut self) -> &mut BodyBuffer {
        &mut self.request_body
    }

    pub(crate) fn response_body_buffer(&mut self) -> &mut BodyBuffer {
        &mut self.response_body
    }

    pub(crate) fn route_key(&self) -> Option<RouteKey> {
        self.request_headers.as_deref().map(|h| RouteKey {
            method: h.method(),
            host: h.host(),
            path: h.path(),
        })
    }
}

fn build_request(headers: &dyn RequestHeaderMap) -> Result<http::Request<()>> {
    let method = headers.method().unwrap_or_else(|| "GET".to_string());
    let path = headers.path().unwrap_or_else(|| "/".to_string());
    let uri = match headers.host().filter(|h| !h.is_empty()) {
        Some(host) => {
            let scheme = headers.scheme().unwrap_or_else(|| "http".to_string());
            format!("{}://{}{}", scheme, host, path)
        }
        None => path,
    };

    let mut request = http::Request::builder()
        .method(method.as_str())
        .uri(uri)
        .body(())?;
    copy_headers(headers.entries(), request.headers_mut());
    Ok(request)
}

fn build_response(headers: &dyn ResponseHeaderMap) -> Result<http::Response<()>> {
    let mut response = http::Response::builder()
        .status(headers.status().unwrap_or(200))
        .body(())?;
    copy_headers(headers.entries(), response.headers_mut());
    Ok(response)
}

/// Copy regular headers, skipping pseudo-headers and anything `http` rejects.
fn copy_headers(entries: Vec<(String, String)>, target: &mut http::HeaderMap) {
    for (name, value) in entries {
        if name.starts_with(':') {
            continue;
        }
        let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) else {
            continue;
        };
        target.append(name, value);
    }
}
