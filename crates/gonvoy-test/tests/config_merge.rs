//! Route-level config merging through the registry, with derived schemas.

use serde::{Deserialize, Serialize};
use serde_json::json;

use gonvoy::prelude::*;
use gonvoy_test::{FilterHarness, FnFilter, HarnessError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FilterSchema)]
#[serde(rename_all = "PascalCase")]
struct Routing {
    a: String,
    #[gonvoy(mergeable)]
    b: u32,
    #[gonvoy(mergeable)]
    c: String,
    #[gonvoy(mergeable, preserve)]
    arrays: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FilterSchema)]
struct Other {
    #[gonvoy(mergeable)]
    name: String,
}

fn harness() -> FilterHarness {
    FilterHarness::new(
        "routing",
        || FnFilter::with_handlers(Vec::new()),
        ConfigOptions::new().with_schema::<Routing>(),
    )
}

#[test]
fn derived_descriptor_uses_serialized_names() {
    let descriptor = Routing::merge_descriptor();
    let fields: Vec<_> = descriptor.fields().map(|(name, _)| name.to_string()).collect();
    assert_eq!(fields, ["B", "C", "Arrays"]);
    assert!(descriptor.directive("Arrays").preserve_when_zero);
    assert!(!descriptor.directive("A").mergeable);
}

#[test]
fn route_config_merges_over_parent() {
    let harness = harness();
    let parent = harness
        .configure(json!({"A": "P", "B": 300, "C": "P", "Arrays": ["p", "v"]}))
        .unwrap();
    let child = harness
        .configure(json!({"A": "C", "B": 500, "C": "C", "Arrays": []}))
        .unwrap();

    let merged = harness.merge(&parent, &child).unwrap();
    let routing = merged.config().unwrap().schema::<Routing>().unwrap();
    assert_eq!(
        *routing,
        Routing {
            a: "P".to_string(),
            b: 500,
            c: "C".to_string(),
            arrays: vec!["p".to_string(), "v".to_string()],
        }
    );

    // The parent is untouched.
    assert_eq!(
        parent.config().unwrap().schema::<Routing>().unwrap().b,
        300
    );
}

#[test]
fn preserve_takes_non_empty_child() {
    let harness = harness();
    let parent = harness
        .configure(json!({"A": "P", "B": 1, "C": "P", "Arrays": ["p"]}))
        .unwrap();
    let child = harness
        .configure(json!({"A": "C", "B": 0, "C": "", "Arrays": ["c"]}))
        .unwrap();

    let merged = harness.merge(&parent, &child).unwrap();
    let routing = merged.config().unwrap().schema::<Routing>().unwrap();
    assert_eq!(routing.b, 0);
    assert_eq!(routing.c, "");
    assert_eq!(routing.arrays, ["c"]);
}

#[test]
fn merged_config_reaches_handlers() {
    let harness = FilterHarness::new(
        "routing",
        || {
            FnFilter::new(|ctx, _registrar| {
                let b = ctx.filter_config::<Routing>().map(|r| r.b).unwrap_or_default();
                ctx.log(LogLevel::Info, &format!("b={}", b));
                Ok(())
            })
        },
        ConfigOptions::new().with_schema::<Routing>(),
    );
    let parent = harness
        .configure(json!({"A": "P", "B": 300, "C": "P", "Arrays": []}))
        .unwrap();
    let child = harness
        .configure(json!({"A": "C", "B": 500, "C": "C", "Arrays": []}))
        .unwrap();
    let merged = harness.merge(&parent, &child).unwrap();

    let driver = harness.stream(&merged);
    assert!(driver.logged(LogLevel::Info, "b=500"));
}

#[test]
fn invalid_route_config_is_pass_through() {
    let harness = harness();
    let err = harness.configure(json!({"A": "P", "B": "three hundred"})).unwrap_err();
    assert!(matches!(err, HarnessError::PassThrough(name) if name == "routing"));
}

#[test]
fn json_schema_rejects_before_decoding() {
    let schema = json!({
        "type": "object",
        "properties": {"name": {"type": "string", "minLength": 3}},
        "required": ["name"]
    });
    let harness = FilterHarness::new(
        "other",
        || FnFilter::with_handlers(Vec::new()),
        ConfigOptions::new()
            .with_schema::<Other>()
            .with_json_schema(&schema)
            .unwrap(),
    );

    assert!(harness.configure(json!({"name": "edge"})).is_ok());
    assert!(harness.configure(json!({"name": "ed"})).is_err());
    assert!(harness.configure(json!({})).is_err());
}
