//! Filter registration surface.
//!
//! Host adapters keep one [`FilterRegistry`], register every filter at
//! startup and turn each host config payload into a [`FilterFactory`].
//! Configuration failures never reach the host: they are logged and the
//! factory degrades to a pass-through.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use gonvoy_telemetry::{log_config_merge_failed, log_config_parse_failed, log_filter_registered};

use crate::config::{ConfigOptions, ConfigResolver, ResolvedConfig};
use crate::handler::HttpFilter;
use crate::host::{FilterCallbacks, MetricsHost};
use crate::pipeline::{FilterFactoryFn, FilterPipeline};

struct Registration {
    factory: FilterFactoryFn,
    resolver: ConfigResolver,
}

/// Registered filters by name.
#[derive(Default)]
pub struct FilterRegistry {
    filters: HashMap<String, Registration>,
}

impl fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterRegistry")
            .field("filters", &self.filters.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `name`. A later registration replaces an
    /// earlier one.
    pub fn register<F, T>(&mut self, name: impl Into<String>, factory: F, options: ConfigOptions)
    where
        F: Fn() -> T + Send + Sync + 'static,
        T: HttpFilter + 'static,
    {
        let factory: FilterFactoryFn = Arc::new(move || Box::new(factory()) as Box<dyn HttpFilter>);
        self.register_factory(name, factory, options);
    }

    /// Register a factory that already produces boxed filters.
    pub fn register_factory(
        &mut self,
        name: impl Into<String>,
        factory: FilterFactoryFn,
        options: ConfigOptions,
    ) {
        let name = name.into();
        log_filter_registered!(
            filter = %name,
            schema = options.schema.as_ref().map(|s| s.type_name()).unwrap_or("none"),
            metric_prefix = %options.metric_prefix()
        );

        let resolver = ConfigResolver::new(name.clone(), options);
        if self
            .filters
            .insert(name.clone(), Registration { factory, resolver })
            .is_some()
        {
            tracing::warn!(filter = %name, "filter registered twice, keeping the latest");
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.filters.keys().map(String::as_str)
    }

    pub fn resolver(&self, name: &str) -> Option<&ConfigResolver> {
        self.filters.get(name).map(|r| &r.resolver)
    }

    /// Decode an attachment or route payload for `name`.
    pub fn parse_config(
        &self,
        name: &str,
        payload: &[u8],
        metrics_host: Arc<dyn MetricsHost>,
    ) -> FilterFactory {
        let Some(registration) = self.filters.get(name) else {
            log_config_parse_failed!(filter = %name, "filter is not registered");
            return FilterFactory::pass_through(name);
        };

        match registration.resolver.parse_with_metrics(payload, metrics_host) {
            Ok(config) => FilterFactory::Configured {
                config: Arc::new(config),
                factory: Arc::clone(&registration.factory),
            },
            Err(err) => {
                log_config_parse_failed!(filter = %name, error = %err, "falling back to pass-through");
                FilterFactory::pass_through(name)
            }
        }
    }

    /// Merge a route-level `child` over `parent`.
    pub fn merge_config(
        &self,
        name: &str,
        parent: &FilterFactory,
        child: &FilterFactory,
    ) -> FilterFactory {
        let Some(registration) = self.filters.get(name) else {
            log_config_merge_failed!(filter = %name, "filter is not registered");
            return FilterFactory::pass_through(name);
        };

        let (Some(parent_config), Some(child_config)) = (parent.config(), child.config()) else {
            log_config_merge_failed!(filter = %name, "cannot merge a pass-through config");
            return FilterFactory::pass_through(name);
        };

        match registration.resolver.merge(parent_config, child_config) {
            Ok(config) => FilterFactory::Configured {
                config: Arc::new(config),
                factory: Arc::clone(&registration.factory),
            },
            Err(err) => {
                log_config_merge_failed!(filter = %name, error = %err, "falling back to pass-through");
                FilterFactory::pass_through(name)
            }
        }
    }
}

/// What the host keeps per attachment: a configuration ready to build
/// pipelines, or a pass-through after a configuration failure.
#[derive(Clone)]
pub enum FilterFactory {
    Configured {
        config: Arc<ResolvedConfig>,
        factory: FilterFactoryFn,
    },
    PassThrough {
        filter_name: Arc<str>,
    },
}

impl fmt::Debug for FilterFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterFactory::Configured { config, .. } => {
                f.debug_tuple("Configured").field(config).finish()
            }
            FilterFactory::PassThrough { filter_name } => {
                f.debug_tuple("PassThrough").field(filter_name).finish()
            }
        }
    }
}

impl FilterFactory {
    fn pass_through(filter_name: &str) -> Self {
        FilterFactory::PassThrough {
            filter_name: Arc::from(filter_name),
        }
    }

    pub fn filter_name(&self) -> &str {
        match self {
            FilterFactory::Configured { config, .. } => config.filter_name(),
            FilterFactory::PassThrough { filter_name } => filter_name.as_ref(),
        }
    }

    pub fn config(&self) -> Option<&ResolvedConfig> {
        match self {
            FilterFactory::Configured { config, .. } => Some(config.as_ref()),
            FilterFactory::PassThrough { .. } => None,
        }
    }

    pub fn is_pass_through(&self) -> bool {
        matches!(self, FilterFactory::PassThrough { .. })
    }

    /// Build the pipeline for a new stream.
    pub fn create_pipeline(&self, callbacks: Box<dyn FilterCallbacks>) -> FilterPipeline {
        match self {
            FilterFactory::Configured { config, factory } => {
                FilterPipeline::new(Arc::clone(config), factory, callbacks)
            }
            FilterFactory::PassThrough { filter_name } => {
                FilterPipeline::pass_through(filter_name.to_string())
            }
        }
    }
}
