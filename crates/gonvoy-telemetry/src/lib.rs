//! Logging for gonvoy filters.
//!
//! Two halves: [`init_logging`] installs a stdout subscriber for the host
//! worker, and the `log_*!` macros give framework records a stable `event`
//! field so they can be matched in log pipelines.
//!
//! ```no_run
//! use gonvoy_telemetry::{init_logging, TelemetryConfig};
//!
//! let config = TelemetryConfig::from_env()?.with_source_location(true);
//! init_logging(&config)?;
//! # Ok::<(), gonvoy_telemetry::TelemetryError>(())
//! ```

pub mod config;
pub mod logging;

pub use config::{LogFormat, TelemetryConfig, LOG_FORMAT_ENV, LOG_LEVEL_ENV};
pub use logging::{events, init_logging, LOG_ENV};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("invalid log level directive {0}")]
    InvalidLevel(String),

    #[error("unknown log format {0:?}, expected json or pretty")]
    UnknownFormat(String),
}
