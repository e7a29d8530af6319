//! Filter configuration: registration options, typed-struct decoding and
//! parent/child merging.
//!
//! A filter registers a schema type implementing [`FilterSchema`]. The host
//! hands over one payload per attachment and optionally one per route; the
//! [`ConfigResolver`] decodes each into a [`ResolvedConfig`] and merges route
//! overrides into their parent according to the schema's
//! [`MergeDescriptor`].

mod merge;
mod options;
mod resolver;

use serde::de::DeserializeOwned;
use serde::Serialize;

pub use merge::{is_zero, merge_values, FieldDirective, MergeDescriptor};
pub use options::{BodyAccessOptions, ConfigOptions, FeatureGates, FEATURE_GATE_PREFIX};
pub use resolver::{ConfigResolver, ResolvedConfig};

/// A filter configuration schema.
///
/// Usually derived:
///
/// ```
/// use gonvoy::FilterSchema;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize, FilterSchema)]
/// struct Cors {
///     name: String,
///     #[gonvoy(mergeable)]
///     max_age: u32,
///     #[gonvoy(mergeable, preserve)]
///     allowed_origins: Vec<String>,
/// }
///
/// let descriptor = <Cors as gonvoy::config::FilterSchema>::merge_descriptor();
/// assert!(descriptor.directive("allowed_origins").preserve_when_zero);
/// ```
pub trait FilterSchema: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Merge directives per serialized field name. Nothing merges by default.
    fn merge_descriptor() -> MergeDescriptor {
        MergeDescriptor::new()
    }
}
