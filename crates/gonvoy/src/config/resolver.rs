//! Typed-struct decoding and parent/child resolution.

use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use super::merge::{merge_values, MergeDescriptor};
use super::options::{BodyAccessOptions, ConfigOptions, FeatureGates};
use super::FilterSchema;
use crate::cache::Cache;
use crate::error::{Error, Result};
use crate::error_handler::{DefaultErrorHandler, ErrorHandler};
use crate::host::{MetricsHost, NoopMetricsHost};
use crate::metrics::Metrics;

type Decoded = (Arc<dyn Any + Send + Sync>, Value);

/// Ties a registration to its schema type.
#[derive(Clone)]
pub(crate) struct SchemaBinding {
    type_id: TypeId,
    type_name: &'static str,
    descriptor: Arc<MergeDescriptor>,
    decode: fn(Value) -> Result<Decoded>,
}

impl SchemaBinding {
    pub(crate) fn of<T: FilterSchema>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            descriptor: Arc::new(T::merge_descriptor()),
            decode: decode_as::<T>,
        }
    }

    pub(crate) fn type_name(&self) -> &'static str {
        self.type_name
    }
}

/// Decode into `T`, then serialize back so the stored value carries every
/// field, defaults included.
fn decode_as<T: FilterSchema>(value: Value) -> Result<Decoded> {
    let schema: T = serde_json::from_value(value)?;
    let normalized = serde_json::to_value(&schema)
        .map_err(|e| Error::ConfigParse(format!("schema is not JSON serializable: {}", e)))?;
    Ok((Arc::new(schema), normalized))
}

/// Envelope handed over by the host.
#[derive(Debug, Deserialize)]
struct TypedStruct {
    #[serde(rename = "@type", default)]
    type_tag: Option<String>,
    #[serde(default)]
    type_url: Option<String>,
    #[serde(default)]
    value: Option<Value>,
}

impl TypedStruct {
    fn decode(payload: &[u8]) -> Result<Self> {
        if payload.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self {
                type_tag: None,
                type_url: None,
                value: None,
            });
        }
        serde_json::from_slice(payload)
            .map_err(|e| Error::ConfigParse(format!("invalid typed struct: {}", e)))
    }

    fn type_url(&self) -> Option<&str> {
        self.type_url.as_deref().or(self.type_tag.as_deref())
    }

    fn into_value(self) -> Value {
        match self.value {
            None | Some(Value::Null) => Value::Object(Default::default()),
            Some(value) => value,
        }
    }
}

#[derive(Clone)]
struct ResolvedSchema {
    instance: Arc<dyn Any + Send + Sync>,
    value: Value,
    binding: SchemaBinding,
}

/// A decoded, possibly merged, filter configuration.
///
/// Shared by every pipeline created from the same attachment.
#[derive(Clone)]
pub struct ResolvedConfig {
    filter_name: Arc<str>,
    type_url: Option<String>,
    schema: Option<ResolvedSchema>,
    options: Arc<ConfigOptions>,
    feature_gates: FeatureGates,
    cache: Cache,
    metrics: Arc<Metrics>,
    error_handler: Arc<dyn ErrorHandler>,
}

impl fmt::Debug for ResolvedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedConfig")
            .field("filter_name", &self.filter_name)
            .field("type_url", &self.type_url)
            .field("schema", &self.schema.as_ref().map(|s| s.binding.type_name))
            .field("value", &self.value())
            .field("feature_gates", &self.feature_gates)
            .finish()
    }
}

impl ResolvedConfig {
    pub fn filter_name(&self) -> &str {
        &self.filter_name
    }

    /// The `type_url` (or `@type`) of the payload, if it had one.
    pub fn type_url(&self) -> Option<&str> {
        self.type_url.as_deref()
    }

    /// The schema instance, if one was registered and it is a `T`.
    pub fn schema<T: Any>(&self) -> Option<&T> {
        self.schema.as_ref()?.instance.downcast_ref::<T>()
    }

    /// Serialized form of the schema instance.
    pub fn value(&self) -> Option<&Value> {
        self.schema.as_ref().map(|s| &s.value)
    }

    pub fn schema_type_name(&self) -> Option<&'static str> {
        self.schema.as_ref().map(|s| s.binding.type_name)
    }

    pub fn body_access(&self) -> &BodyAccessOptions {
        &self.options.body_access
    }

    pub fn auto_reload_route(&self) -> bool {
        self.options.auto_reload_route_on_header_change
    }

    pub fn feature_gates(&self) -> &FeatureGates {
        &self.feature_gates
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn error_handler(&self) -> Arc<dyn ErrorHandler> {
        Arc::clone(&self.error_handler)
    }

    /// Same configuration with different feature gates.
    pub fn with_feature_gates(mut self, gates: FeatureGates) -> Self {
        self.feature_gates = gates;
        self
    }
}

/// Decodes and merges configurations for one registered filter.
///
/// The resolver owns the registration's cache, so every configuration it
/// produces shares the same entries.
pub struct ConfigResolver {
    filter_name: Arc<str>,
    options: Arc<ConfigOptions>,
    cache: Cache,
}

impl ConfigResolver {
    pub fn new(filter_name: impl Into<String>, options: ConfigOptions) -> Self {
        Self {
            filter_name: Arc::from(filter_name.into()),
            options: Arc::new(options),
            cache: Cache::new(),
        }
    }

    pub fn filter_name(&self) -> &str {
        &self.filter_name
    }

    pub fn options(&self) -> &ConfigOptions {
        &self.options
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Decode `payload` without a metrics host.
    pub fn parse(&self, payload: &[u8]) -> Result<ResolvedConfig> {
        self.parse_with_metrics(payload, Arc::new(NoopMetricsHost))
    }

    /// Decode `payload` into the registered schema.
    ///
    /// Without a registered schema the inner value is ignored, but the
    /// envelope must still be well formed.
    pub fn parse_with_metrics(
        &self,
        payload: &[u8],
        metrics_host: Arc<dyn MetricsHost>,
    ) -> Result<ResolvedConfig> {
        let typed = TypedStruct::decode(payload)?;
        let type_url = typed.type_url().map(str::to_string);

        let schema = match &self.options.schema {
            Some(binding) => {
                let value = typed.into_value();
                if let Some(validator) = &self.options.json_schema {
                    validator
                        .validate(&value)
                        .map_err(|e| Error::ConfigParse(format!("schema validation: {}", e)))?;
                }
                let (instance, value) = (binding.decode)(value)?;
                Some(ResolvedSchema {
                    instance,
                    value,
                    binding: binding.clone(),
                })
            }
            None => None,
        };

        let error_handler = match &self.options.error_handler {
            Some(handler) => Arc::clone(handler),
            None => Arc::new(DefaultErrorHandler::with_headers(
                self.options.gateway_headers.clone(),
            )),
        };

        Ok(ResolvedConfig {
            filter_name: Arc::clone(&self.filter_name),
            type_url,
            schema,
            options: Arc::clone(&self.options),
            feature_gates: FeatureGates::from_env(),
            cache: self.cache.clone(),
            metrics: Arc::new(Metrics::new(self.options.metric_prefix.clone(), metrics_host)),
            error_handler,
        })
    }

    /// Merge a per-route `child` over `parent`.
    ///
    /// Only the schema instance changes. Cache, metrics, gates and error
    /// handler come from the parent.
    pub fn merge(&self, parent: &ResolvedConfig, child: &ResolvedConfig) -> Result<ResolvedConfig> {
        let schema = match (&parent.schema, &child.schema) {
            (None, None) => None,
            (Some(p), Some(c)) if p.binding.type_id == c.binding.type_id => {
                let value = merge_values(&p.value, &c.value, &p.binding.descriptor)?;
                let (instance, value) = (p.binding.decode)(value)
                    .map_err(|e| Error::ConfigMerge(format!("merged config: {}", e)))?;
                Some(ResolvedSchema {
                    instance,
                    value,
                    binding: p.binding.clone(),
                })
            }
            (p, c) => {
                return Err(Error::ConfigMerge(format!(
                    "schema types differ: parent {}, child {}",
                    p.as_ref().map_or("none", |s| s.binding.type_name),
                    c.as_ref().map_or("none", |s| s.binding.type_name),
                )))
            }
        };

        Ok(ResolvedConfig {
            type_url: child.type_url.clone().or_else(|| parent.type_url.clone()),
            schema,
            ..parent.clone()
        })
    }
}
