//! Registration options and environment feature gates.

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use super::resolver::SchemaBinding;
use super::FilterSchema;
use crate::error::{Error, Result};
use crate::error_handler::ErrorHandler;
use crate::phase::Phase;

/// Static body access flags.
///
/// Strict mode is on unless `disable_strict_body_access` is set. In strict
/// mode a stream only gets body access when it opts in with the
/// `X-Content-Operation` header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BodyAccessOptions {
    pub disable_strict_body_access: bool,
    pub enable_request_body_read: bool,
    pub enable_request_body_write: bool,
    pub enable_response_body_read: bool,
    pub enable_response_body_write: bool,
}

impl BodyAccessOptions {
    pub fn is_strict(&self) -> bool {
        !self.disable_strict_body_access
    }
}

/// Options given when a filter is registered.
#[derive(Clone, Default)]
pub struct ConfigOptions {
    pub(crate) schema: Option<SchemaBinding>,
    pub(crate) metric_prefix: String,
    pub(crate) body_access: BodyAccessOptions,
    pub(crate) auto_reload_route_on_header_change: bool,
    pub(crate) json_schema: Option<Arc<jsonschema::Validator>>,
    pub(crate) error_handler: Option<Arc<dyn ErrorHandler>>,
    pub(crate) gateway_headers: Vec<(String, String)>,
}

impl fmt::Debug for ConfigOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigOptions")
            .field("schema", &self.schema.as_ref().map(|s| s.type_name()))
            .field("metric_prefix", &self.metric_prefix)
            .field("body_access", &self.body_access)
            .field(
                "auto_reload_route_on_header_change",
                &self.auto_reload_route_on_header_change,
            )
            .field("json_schema", &self.json_schema.is_some())
            .field("error_handler", &self.error_handler.is_some())
            .field("gateway_headers", &self.gateway_headers)
            .finish()
    }
}

impl ConfigOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode payloads into `T`.
    pub fn with_schema<T: FilterSchema>(mut self) -> Self {
        self.schema = Some(SchemaBinding::of::<T>());
        self
    }

    pub fn with_metric_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.metric_prefix = prefix.into();
        self
    }

    pub fn with_body_access(mut self, body_access: BodyAccessOptions) -> Self {
        self.body_access = body_access;
        self
    }

    pub fn disable_strict_body_access(mut self) -> Self {
        self.body_access.disable_strict_body_access = true;
        self
    }

    pub fn enable_request_body_read(mut self) -> Self {
        self.body_access.enable_request_body_read = true;
        self
    }

    pub fn enable_request_body_write(mut self) -> Self {
        self.body_access.enable_request_body_write = true;
        self
    }

    pub fn enable_response_body_read(mut self) -> Self {
        self.body_access.enable_response_body_read = true;
        self
    }

    pub fn enable_response_body_write(mut self) -> Self {
        self.body_access.enable_response_body_write = true;
        self
    }

    pub fn auto_reload_route_on_header_change(mut self) -> Self {
        self.auto_reload_route_on_header_change = true;
        self
    }

    /// Validate every payload against a JSON Schema before decoding.
    pub fn with_json_schema(mut self, schema: &Value) -> Result<Self> {
        let validator = jsonschema::Validator::new(schema)
            .map_err(|e| Error::ConfigParse(format!("invalid JSON schema: {}", e)))?;
        self.json_schema = Some(Arc::new(validator));
        Ok(self)
    }

    /// Replace the default error handler for this registration.
    pub fn with_error_handler(mut self, handler: impl ErrorHandler + 'static) -> Self {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// Extra header attached to every error reply, next to `reporter: gateway`.
    pub fn with_gateway_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.gateway_headers.push((name.into(), value.into()));
        self
    }

    pub fn metric_prefix(&self) -> &str {
        &self.metric_prefix
    }

    pub fn body_access(&self) -> &BodyAccessOptions {
        &self.body_access
    }
}

/// Environment variable prefix for feature gates.
pub const FEATURE_GATE_PREFIX: &str = "GONVOY_";

/// Per-phase switches read from `GONVOY_ALLOW_*_PHASE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureGates {
    pub request_header: bool,
    pub request_body: bool,
    pub response_header: bool,
    pub response_body: bool,
}

impl Default for FeatureGates {
    fn default() -> Self {
        Self {
            request_header: true,
            request_body: true,
            response_header: true,
            response_body: true,
        }
    }
}

impl FeatureGates {
    /// Read the gates from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the gates through `lookup`. Missing variables leave a phase
    /// enabled; any value other than `true`, `1`, `yes` or `enabled`
    /// disables it.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let gate = |suffix: &str| {
            lookup(&format!("{}{}", FEATURE_GATE_PREFIX, suffix)).map_or(true, |v| is_truthy(&v))
        };

        Self {
            request_header: gate("ALLOW_REQUEST_HEADER_PHASE"),
            request_body: gate("ALLOW_REQUEST_BODY_PHASE"),
            response_header: gate("ALLOW_RESPONSE_HEADER_PHASE"),
            response_body: gate("ALLOW_RESPONSE_BODY_PHASE"),
        }
    }

    pub fn allows(&self, phase: Phase) -> bool {
        match phase {
            Phase::RequestHeader => self.request_header,
            Phase::RequestBody => self.request_body,
            Phase::ResponseHeader => self.response_header,
            Phase::ResponseBody => self.response_body,
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "enabled"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn strict_by_default() {
        let options = ConfigOptions::new();
        assert!(options.body_access().is_strict());
        assert!(!options.body_access().enable_request_body_read);
    }

    #[test]
    fn builder_sets_flags() {
        let options = ConfigOptions::new()
            .with_metric_prefix("edge_")
            .disable_strict_body_access()
            .enable_request_body_read()
            .enable_response_body_write()
            .auto_reload_route_on_header_change()
            .with_gateway_header("x-gateway-id", "edge-1");

        assert_eq!(options.metric_prefix(), "edge_");
        assert!(!options.body_access().is_strict());
        assert!(options.body_access().enable_request_body_read);
        assert!(!options.body_access().enable_request_body_write);
        assert!(options.body_access().enable_response_body_write);
        assert!(options.auto_reload_route_on_header_change);
        assert_eq!(options.gateway_headers.len(), 1);
    }

    #[test]
    fn body_access_deserializes_with_defaults() {
        let access: BodyAccessOptions =
            serde_json::from_value(json!({"enable_request_body_read": true})).unwrap();
        assert!(access.enable_request_body_read);
        assert!(access.is_strict());
    }

    #[test]
    fn invalid_json_schema_is_rejected() {
        let err = ConfigOptions::new()
            .with_json_schema(&json!({"type": "not-a-type"}))
            .unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }

    #[test]
    fn gates_default_to_enabled() {
        let gates = FeatureGates::from_lookup(|_| None);
        assert_eq!(gates, FeatureGates::default());
    }

    #[test]
    fn gates_recognise_truthy_values() {
        let env: HashMap<&str, &str> = [
            ("GONVOY_ALLOW_REQUEST_HEADER_PHASE", "Enabled"),
            ("GONVOY_ALLOW_REQUEST_BODY_PHASE", "no"),
            ("GONVOY_ALLOW_RESPONSE_HEADER_PHASE", "1"),
            ("GONVOY_ALLOW_RESPONSE_BODY_PHASE", "false"),
        ]
        .into_iter()
        .collect();

        let gates = FeatureGates::from_lookup(|name| env.get(name).map(|v| v.to_string()));
        assert!(gates.allows(Phase::RequestHeader));
        assert!(!gates.allows(Phase::RequestBody));
        assert!(gates.allows(Phase::ResponseHeader));
        assert!(!gates.allows(Phase::ResponseBody));
    }
}
