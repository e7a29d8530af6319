//! Parent/child configuration merging.
//!
//! Merging works on the serialized form of a schema. Only fields listed as
//! mergeable in the [`MergeDescriptor`] are taken from the child; fields that
//! are also marked preserve keep the parent's value when the child's is zero.

use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// How one field takes part in a merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldDirective {
    /// Child value overwrites parent value.
    pub mergeable: bool,
    /// Keep the parent value when the child value is zero.
    pub preserve_when_zero: bool,
}

impl FieldDirective {
    pub const MERGEABLE: Self = Self {
        mergeable: true,
        preserve_when_zero: false,
    };

    pub const PRESERVE: Self = Self {
        mergeable: true,
        preserve_when_zero: true,
    };
}

/// Table of field name to merge directive, in declaration order.
///
/// Names are the serialized field names. Fields that are not listed are
/// never overwritten by a child configuration.
///
/// ```
/// use gonvoy::config::MergeDescriptor;
///
/// let descriptor = MergeDescriptor::new()
///     .mergeable("timeout_ms")
///     .preserve("allowed_origins");
/// assert!(descriptor.directive("timeout_ms").mergeable);
/// assert!(!descriptor.directive("name").mergeable);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeDescriptor {
    fields: Vec<(String, FieldDirective)>,
}

impl MergeDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the directive for `name`, replacing an earlier one.
    pub fn field(mut self, name: impl Into<String>, directive: FieldDirective) -> Self {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = directive,
            None => self.fields.push((name, directive)),
        }
        self
    }

    /// Mark `name` mergeable.
    pub fn mergeable(self, name: impl Into<String>) -> Self {
        self.field(name, FieldDirective::MERGEABLE)
    }

    /// Mark `name` mergeable, keeping the parent value when the child's is zero.
    pub fn preserve(self, name: impl Into<String>) -> Self {
        self.field(name, FieldDirective::PRESERVE)
    }

    /// Directive for `name`; unlisted fields get the default (not mergeable).
    pub fn directive(&self, name: &str) -> FieldDirective {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| *d)
            .unwrap_or_default()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, FieldDirective)> {
        self.fields.iter().map(|(n, d)| (n.as_str(), *d))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Returns true if `value` is the zero value of its type.
///
/// `null`, `false`, numeric zero, the empty string, the empty array, the
/// empty object and an object whose members are all zero count as zero.
pub fn is_zero(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(members) => members.values().all(is_zero),
    }
}

/// Merge `child` into a copy of `parent` according to `descriptor`.
///
/// Both values must be JSON objects.
pub fn merge_values(parent: &Value, child: &Value, descriptor: &MergeDescriptor) -> Result<Value> {
    let parent = as_record(parent, "parent")?;
    let child = as_record(child, "child")?;

    let mut merged = parent.clone();
    for (name, directive) in descriptor.fields() {
        if !directive.mergeable {
            continue;
        }

        let child_value = child.get(name);
        let child_is_zero = child_value.map_or(true, is_zero);
        if directive.preserve_when_zero && child_is_zero {
            continue;
        }

        match child_value {
            Some(value) => {
                merged.insert(name.to_string(), value.clone());
            }
            None => {
                merged.remove(name);
            }
        }
    }

    Ok(Value::Object(merged))
}

fn as_record<'a>(value: &'a Value, side: &str) -> Result<&'a Map<String, Value>> {
    value.as_object().ok_or_else(|| {
        Error::ConfigMerge(format!(
            "{} config is not a structured record (got {})",
            side,
            kind_of(value)
        ))
    })
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
