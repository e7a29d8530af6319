//! Error types for the filter framework.
//!
//! Errors are distinguished by [`ErrorKind`]. Wrapping with
//! [`Error::context`] keeps the kind of the innermost error, so the error
//! handler can classify an error no matter how many layers it went through.

use std::fmt;

use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced by handlers, the pipeline, the config resolver and the cache.
#[derive(Debug, Error)]
pub enum Error {
    /// The caller is not authenticated.
    #[error("unauthorized")]
    Unauthorized,

    /// The caller is authenticated but not allowed.
    #[error("access denied")]
    AccessDenied,

    /// An operation was attempted without the required permission,
    /// e.g. writing a body that is only readable.
    #[error("operation not permitted: {0}")]
    OperationNotPermitted(String),

    /// The downstream client went away before the stream finished.
    #[error("client closed request")]
    ClientClosedRequest,

    /// The request could not be interpreted.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Generic server-side failure.
    #[error("internal server error: {0}")]
    InternalServer(String),

    /// Failure raised while running handler code.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// A handler panicked; the message is the panic payload.
    #[error("panic: {0}")]
    Panic(String),

    /// A typed-struct payload could not be decoded into the schema.
    #[error("failed to parse filter config: {0}")]
    ConfigParse(String),

    /// Parent and child configurations could not be merged.
    #[error("failed to merge filter config: {0}")]
    ConfigMerge(String),

    /// `Cache::load_into` was given no receiver.
    #[error("cache receiver is nil")]
    NilReceiver,

    /// The stored value's type does not match the requested type.
    #[error("cache value of type {stored} is not assignable to {requested}")]
    IncompatibleReceiver {
        stored: &'static str,
        requested: &'static str,
    },

    /// An error with extra context attached.
    #[error("{context}: {source}")]
    Wrapped {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

/// The identity of an error, independent of any wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Unauthorized,
    AccessDenied,
    OperationNotPermitted,
    ClientClosedRequest,
    BadRequest,
    InternalServer,
    Runtime,
    Panic,
    ConfigParse,
    ConfigMerge,
    NilReceiver,
    IncompatibleReceiver,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::AccessDenied => "access_denied",
            ErrorKind::OperationNotPermitted => "operation_not_permitted",
            ErrorKind::ClientClosedRequest => "client_closed_request",
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::InternalServer => "internal_server",
            ErrorKind::Runtime => "runtime",
            ErrorKind::Panic => "panic",
            ErrorKind::ConfigParse => "config_parse",
            ErrorKind::ConfigMerge => "config_merge",
            ErrorKind::NilReceiver => "nil_receiver",
            ErrorKind::IncompatibleReceiver => "incompatible_receiver",
        };
        f.write_str(name)
    }
}

impl Error {
    /// Returns the kind of the innermost error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Unauthorized => ErrorKind::Unauthorized,
            Error::AccessDenied => ErrorKind::AccessDenied,
            Error::OperationNotPermitted(_) => ErrorKind::OperationNotPermitted,
            Error::ClientClosedRequest => ErrorKind::ClientClosedRequest,
            Error::BadRequest(_) => ErrorKind::BadRequest,
            Error::InternalServer(_) => ErrorKind::InternalServer,
            Error::Runtime(_) => ErrorKind::Runtime,
            Error::Panic(_) => ErrorKind::Panic,
            Error::ConfigParse(_) => ErrorKind::ConfigParse,
            Error::ConfigMerge(_) => ErrorKind::ConfigMerge,
            Error::NilReceiver => ErrorKind::NilReceiver,
            Error::IncompatibleReceiver { .. } => ErrorKind::IncompatibleReceiver,
            Error::Wrapped { source, .. } => source.kind(),
        }
    }

    /// Returns true if this error, or any error it wraps, has the given kind.
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind() == kind
    }

    /// Wrap this error with additional context.
    pub fn context(self, context: impl Into<String>) -> Self {
        Error::Wrapped {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Shorthand for [`Error::Runtime`].
    pub fn runtime(message: impl Into<String>) -> Self {
        Error::Runtime(message.into())
    }

    /// Shorthand for [`Error::OperationNotPermitted`].
    pub fn not_permitted(message: impl Into<String>) -> Self {
        Error::OperationNotPermitted(message.into())
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Runtime(format!("{:#}", err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::ConfigParse(err.to_string())
    }
}

impl From<http::Error> for Error {
    fn from(err: http::Error) -> Self {
        Error::BadRequest(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_survives_wrapping() {
        let err = Error::Unauthorized
            .context("checking api key")
            .context("auth handler");
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        assert!(err.is(ErrorKind::Unauthorized));
        assert!(!err.is(ErrorKind::AccessDenied));
    }

    #[test]
    fn wrapped_display_includes_context() {
        let err = Error::AccessDenied.context("tenant mismatch");
        assert_eq!(err.to_string(), "tenant mismatch: access denied");
    }

    #[test]
    fn anyhow_maps_to_runtime() {
        let err: Error = anyhow::anyhow!("upstream lookup failed").into();
        assert_eq!(err.kind(), ErrorKind::Runtime);
        assert!(err.to_string().contains("upstream lookup failed"));
    }

    #[test]
    fn serde_json_maps_to_config_parse() {
        let parse = serde_json::from_str::<u32>("\"nope\"").unwrap_err();
        let err: Error = parse.into();
        assert_eq!(err.kind(), ErrorKind::ConfigParse);
    }

    #[test]
    fn kind_display_is_snake_case() {
        assert_eq!(ErrorKind::ClientClosedRequest.to_string(), "client_closed_request");
        assert_eq!(ErrorKind::OperationNotPermitted.to_string(), "operation_not_permitted");
    }
}
