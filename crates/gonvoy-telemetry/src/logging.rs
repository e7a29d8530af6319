//! Subscriber setup and the framework's log events.
//!
//! Filters run inside the host worker, so records go to stdout and the host
//! collects them alongside its own access logs.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::{LogFormat, TelemetryConfig, TelemetryError};

/// Variable checked before `RUST_LOG` for filter directives.
pub const LOG_ENV: &str = "GONVOY_LOG";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber.
///
/// Directives come from `GONVOY_LOG`, then `RUST_LOG`, then
/// `config.level`. Fails if a subscriber is already installed.
pub fn init_logging(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let layer = stdout_layer(config).with_filter(env_filter(config)?);

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| TelemetryError::LoggingInit(e.to_string()))
}

fn env_filter(config: &TelemetryConfig) -> Result<EnvFilter, TelemetryError> {
    for var in [LOG_ENV, EnvFilter::DEFAULT_ENV] {
        if let Ok(filter) = EnvFilter::try_from_env(var) {
            return Ok(filter);
        }
    }
    EnvFilter::try_new(&config.level)
        .map_err(|e| TelemetryError::InvalidLevel(format!("{}: {}", config.level, e)))
}

fn stdout_layer(config: &TelemetryConfig) -> BoxedLayer {
    let source = config.source_location;
    match config.format {
        LogFormat::Json => fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .with_file(source)
            .with_line_number(source)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_file(source)
            .with_line_number(source)
            .boxed(),
    }
}

/// Standard log event names.
pub mod events {
    /// A filter was added to the registry.
    pub const FILTER_REGISTERED: &str = "filter_registered";

    /// A typed-struct payload could not be decoded into the filter schema.
    pub const CONFIG_PARSE_FAILED: &str = "config_parse_failed";

    /// A per-route configuration could not be merged with its parent.
    pub const CONFIG_MERGE_FAILED: &str = "config_merge_failed";

    /// A handler (or the filter itself) panicked inside a host callback.
    pub const HANDLER_PANIC: &str = "handler_panic";

    /// The error handler could not dispatch its local reply.
    pub const LOCAL_REPLY_FAILED: &str = "local_reply_failed";

    /// The host delivered its log callback and `on_complete` ran.
    pub const STREAM_COMPLETED: &str = "stream_completed";

    /// A phase was skipped by a feature gate or a committed context.
    pub const PHASE_SKIPPED: &str = "phase_skipped";
}

#[macro_export]
macro_rules! log_filter_registered {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::FILTER_REGISTERED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_config_parse_failed {
    ($($field:tt)*) => {
        tracing::error!(
            event = $crate::logging::events::CONFIG_PARSE_FAILED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_config_merge_failed {
    ($($field:tt)*) => {
        tracing::error!(
            event = $crate::logging::events::CONFIG_MERGE_FAILED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_handler_panic {
    ($($field:tt)*) => {
        tracing::error!(
            event = $crate::logging::events::HANDLER_PANIC,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_local_reply_failed {
    ($($field:tt)*) => {
        tracing::error!(
            event = $crate::logging::events::LOCAL_REPLY_FAILED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_stream_completed {
    ($($field:tt)*) => {
        tracing::debug!(
            event = $crate::logging::events::STREAM_COMPLETED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_phase_skipped {
    ($($field:tt)*) => {
        tracing::trace!(
            event = $crate::logging::events::PHASE_SKIPPED,
            $($field)*
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    // One global subscriber per process: only the second call is checked.
    #[test]
    fn second_init_is_an_error() {
        let config = TelemetryConfig::new().with_format(LogFormat::Pretty);
        let _ = init_logging(&config);
        assert!(matches!(
            init_logging(&config),
            Err(TelemetryError::LoggingInit(_))
        ));
    }

    #[test]
    fn stdout_layer_covers_both_formats() {
        for format in [LogFormat::Json, LogFormat::Pretty] {
            let config = TelemetryConfig::new()
                .with_format(format)
                .with_source_location(true);
            let _layer = stdout_layer(&config);
        }
    }
}
