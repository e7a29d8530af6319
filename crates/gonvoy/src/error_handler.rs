//! Turning errors into local replies.
//!
//! Every error a phase produces, panics included, ends up in one
//! [`ErrorHandler`]. The default maps error kinds to HTTP statuses and sends
//! a JSON [`ErrorBody`].

use crate::context::FilterContext;
use crate::error::{Error, ErrorKind};
use crate::host::{HostStatus, LogLevel};
use crate::reply::{sanitize_details, ErrorBody, LocalReplyOptions};

/// Header stamped on every error reply.
pub const REPORTER_HEADER: (&str, &str) = ("reporter", "gateway");

/// Maps an error to a host status, usually by sending a local reply.
pub trait ErrorHandler: Send + Sync {
    fn handle(&self, ctx: &mut FilterContext, err: Error) -> HostStatus;
}

impl<F> ErrorHandler for F
where
    F: Fn(&mut FilterContext, Error) -> HostStatus + Send + Sync,
{
    fn handle(&self, ctx: &mut FilterContext, err: Error) -> HostStatus {
        self(ctx, err)
    }
}

/// HTTP status, body code and details prefix for an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorMapping {
    pub status: u16,
    pub code: &'static str,
    pub details_prefix: &'static str,
}

impl ErrorMapping {
    pub fn for_kind(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Unauthorized => Self {
                status: 401,
                code: "UNAUTHORIZED",
                details_prefix: "goext_unauthorized",
            },
            ErrorKind::AccessDenied => Self {
                status: 403,
                code: "FORBIDDEN",
                details_prefix: "goext_access_denied",
            },
            ErrorKind::OperationNotPermitted => Self {
                status: 502,
                code: "BAD_GATEWAY",
                details_prefix: "goext_error",
            },
            ErrorKind::ClientClosedRequest => Self {
                status: 499,
                code: "CLIENT_CLOSED_REQUEST",
                details_prefix: "goext_info",
            },
            _ => Self {
                status: 500,
                code: "RUNTIME_ERROR",
                details_prefix: "goext_error",
            },
        }
    }
}

/// The stock error handler.
#[derive(Debug, Clone, Default)]
pub struct DefaultErrorHandler {
    headers: Vec<(String, String)>,
}

impl DefaultErrorHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `headers` to every reply, after `reporter: gateway`.
    pub fn with_headers(headers: Vec<(String, String)>) -> Self {
        Self { headers }
    }
}

impl ErrorHandler for DefaultErrorHandler {
    fn handle(&self, ctx: &mut FilterContext, err: Error) -> HostStatus {
        // A handler that already replied and then failed gets no second reply.
        if ctx.is_committed() && ctx.status() == HostStatus::LocalReply {
            ctx.log(
                LogLevel::Error,
                &format!("error after local reply was sent: {}", err),
            );
            return HostStatus::LocalReply;
        }

        let mapping = ErrorMapping::for_kind(err.kind());
        let details = format!(
            "{}{{{}}}",
            mapping.details_prefix,
            sanitize_details(&err.to_string())
        );
        let options = LocalReplyOptions::new()
            .with_details(details)
            .with_header(REPORTER_HEADER.0, REPORTER_HEADER.1)
            .with_headers(self.headers.iter().cloned());
        let body = ErrorBody::new(mapping.code, mapping.status);

        match ctx.json_value(mapping.status, &body, options) {
            Ok(()) => HostStatus::LocalReply,
            Err(reply_err) => {
                gonvoy_telemetry::log_local_reply_failed!(
                    filter = ctx.filter_name(),
                    error = %err,
                    reply_error = %reply_err,
                    "failed to send error reply"
                );
                ctx.log(
                    LogLevel::Error,
                    &format!("failed to send error reply for {}: {}", err, reply_err),
                );
                HostStatus::Continue
            }
        }
    }
}
