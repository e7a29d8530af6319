//! Phase feature gates read from the process environment.
//!
//! Every test here mutates `GONVOY_*` variables, so they run serially and
//! clean up after themselves.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use serial_test::serial;

use gonvoy::config::FeatureGates;
use gonvoy::phase::Phase;
use gonvoy::prelude::*;
use gonvoy_test::{FilterHarness, FnFilter, FnHandler, MemoryHeaders};

const GATES: [&str; 4] = [
    "GONVOY_ALLOW_REQUEST_HEADER_PHASE",
    "GONVOY_ALLOW_REQUEST_BODY_PHASE",
    "GONVOY_ALLOW_RESPONSE_HEADER_PHASE",
    "GONVOY_ALLOW_RESPONSE_BODY_PHASE",
];

fn with_env<T>(vars: &[(&str, &str)], f: impl FnOnce() -> T) -> T {
    for (name, value) in vars {
        std::env::set_var(name, value);
    }
    let result = f();
    for name in GATES {
        std::env::remove_var(name);
    }
    result
}

fn counting_harness(calls: Arc<Mutex<Vec<&'static str>>>) -> FilterHarness {
    FilterHarness::new(
        "gated",
        move || {
            let request = Arc::clone(&calls);
            let response = Arc::clone(&calls);
            FnFilter::with_handlers(vec![FnHandler::new("gated")
                .with_request_header(move |_ctx| {
                    request.lock().push("request");
                    Ok(())
                })
                .with_response_header(move |_ctx| {
                    response.lock().push("response");
                    Ok(())
                })])
        },
        ConfigOptions::new(),
    )
}

#[test]
#[serial]
fn missing_variables_enable_every_phase() {
    let gates = with_env(&[], FeatureGates::from_env);
    assert_eq!(gates, FeatureGates::default());
}

#[test]
#[serial]
fn unrecognised_values_disable() {
    let gates = with_env(
        &[
            ("GONVOY_ALLOW_REQUEST_HEADER_PHASE", "TRUE"),
            ("GONVOY_ALLOW_RESPONSE_BODY_PHASE", "maybe"),
        ],
        FeatureGates::from_env,
    );
    assert!(gates.allows(Phase::RequestHeader));
    assert!(gates.allows(Phase::RequestBody));
    assert!(!gates.allows(Phase::ResponseBody));
}

#[test]
#[serial]
fn disabled_phase_skips_handlers() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let harness = counting_harness(Arc::clone(&calls));
    let factory = with_env(&[("GONVOY_ALLOW_REQUEST_HEADER_PHASE", "false")], || {
        harness.configure(json!({})).unwrap()
    });

    let mut driver = harness.stream(&factory);
    let status = driver.request_headers(&MemoryHeaders::request("GET", "svc", "/"), true);
    assert_eq!(status, HostStatus::Continue);
    driver.response_headers(&MemoryHeaders::response(200), true);

    assert_eq!(*calls.lock(), ["response"]);
}

#[test]
#[serial]
fn gates_are_fixed_at_configuration_time() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let harness = counting_harness(Arc::clone(&calls));
    let factory = harness.configure(json!({})).unwrap();

    with_env(&[("GONVOY_ALLOW_REQUEST_HEADER_PHASE", "0")], || {
        let mut driver = harness.stream(&factory);
        driver.request_headers(&MemoryHeaders::request("GET", "svc", "/"), true);
    });

    assert_eq!(*calls.lock(), ["request"]);
}
