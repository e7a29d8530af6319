//! Framework for writing HTTP filters that run inside a host proxy.
//!
//! A filter registers a factory and a set of [`ConfigOptions`] with a
//! [`FilterRegistry`]. For every configuration the host hands over, the
//! registry produces a [`FilterFactory`]; for every stream the factory builds
//! a [`FilterPipeline`] that drives the filter's handlers through the request
//! and response phases, buffers bodies when asked to, and answers handler
//! errors and panics with a structured JSON local reply.
//!
//! # Example
//!
//! ```
//! use gonvoy::prelude::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, FilterSchema)]
//! struct Auth {
//!     #[gonvoy(mergeable)]
//!     token: String,
//! }
//!
//! struct CheckToken;
//!
//! impl HttpFilterHandler for CheckToken {
//!     fn on_request_header(&mut self, ctx: &mut FilterContext) -> Result<()> {
//!         let expected = ctx.filter_config::<Auth>().map(|a| a.token.clone());
//!         let given = ctx.request_header().and_then(|h| h.get("authorization"));
//!         if given != expected {
//!             return Err(Error::Unauthorized);
//!         }
//!         Ok(())
//!     }
//! }
//!
//! struct AuthFilter;
//!
//! impl HttpFilter for AuthFilter {
//!     fn on_begin(&mut self, _ctx: &mut FilterContext, registrar: &mut HandlerRegistrar<'_>) -> Result<()> {
//!         registrar.register(CheckToken);
//!         Ok(())
//!     }
//! }
//!
//! let mut registry = FilterRegistry::new();
//! registry.register("auth", || AuthFilter, ConfigOptions::new().with_schema::<Auth>());
//! assert!(registry.contains("auth"));
//! ```

// Lets the derive macro refer to `::gonvoy` from inside this crate.
extern crate self as gonvoy;

pub mod body;
pub mod cache;
pub mod chain;
pub mod config;
pub mod context;
pub mod error;
pub mod error_handler;
pub mod handler;
pub mod host;
pub mod metrics;
pub mod phase;
pub mod pipeline;
pub mod registry;
pub mod reply;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use body::{BodyAccess, Direction};
pub use cache::Cache;
pub use chain::{ChainOutcome, HandlerChain};
pub use config::{ConfigOptions, ConfigResolver, FeatureGates, FilterSchema, ResolvedConfig};
pub use context::FilterContext;
pub use error::{Error, ErrorKind, Result};
pub use error_handler::{DefaultErrorHandler, ErrorHandler, ErrorMapping};
pub use handler::{HandlerRegistrar, HttpFilter, HttpFilterHandler};
pub use host::{
    BufferInstance, DestroyReason, FilterCallbacks, HeaderMap, HostStatus, LocalReply, LogLevel,
    MetricsHost, RequestHeaderMap, ResponseHeaderMap, StreamInfo,
};
pub use metrics::{Counter, Gauge, Histogram, Metrics};
pub use phase::Phase;
pub use pipeline::{EncoderState, FilterPipeline, StreamState};
pub use registry::{FilterFactory, FilterRegistry};
pub use reply::{ErrorBody, LocalReplyOptions};

/// Derive macro for [`config::FilterSchema`].
pub use gonvoy_macros::FilterSchema;

/// Logging bootstrap for host adapters.
pub use gonvoy_telemetry as telemetry;

pub mod prelude {
    pub use crate::config::{ConfigOptions, FilterSchema};
    pub use crate::context::FilterContext;
    pub use crate::error::{Error, Result};
    pub use crate::handler::{HandlerRegistrar, HttpFilter, HttpFilterHandler};
    pub use crate::host::{HeaderMap, HostStatus, LogLevel, RequestHeaderMap, ResponseHeaderMap};
    pub use crate::registry::FilterRegistry;
    pub use crate::reply::LocalReplyOptions;
    pub use gonvoy_macros::FilterSchema;
}
