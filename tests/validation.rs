//! Validation Integration Tests
//!
//! Parameter rules as seen by playbook authors.

use serde_json::{json, Value};

use runbookpilot::adapters::{Adapter, AdapterConfig, Params, VirusTotalAdapter};

fn params(value: Value) -> Params {
    value.as_object().cloned().unwrap()
}

fn adapter() -> VirusTotalAdapter {
    let mut adapter = VirusTotalAdapter::new();
    adapter
        .initialize(AdapterConfig::new("vt", "virustotal"))
        .unwrap();
    adapter
}

#[test]
fn test_invalid_enum_value_is_named() {
    let result = adapter()
        .validate_parameters("enrich_ioc", &params(json!({"ioc": "abc", "ioc_type": "banana"})))
        .unwrap();

    assert!(!result.valid);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(
        result.errors[0],
        "Invalid ioc_type 'banana'. Must be one of: hash, domain, ip, url"
    );
}

#[test]
fn test_missing_required_fields() {
    let result = adapter()
        .validate_parameters("check_reputation", &params(json!({"ioc": ""})))
        .unwrap();

    assert!(!result.valid);
    assert_eq!(
        result.errors,
        vec![
            "Parameter 'ioc' is required for check_reputation".to_string(),
            "Parameter 'ioc_type' is required for check_reputation".to_string(),
        ]
    );
}

#[test]
fn test_optional_fields() {
    let vt = adapter();

    assert!(vt.validate_parameters("query_threat_feed", &Params::new()).unwrap().valid);
    assert!(vt
        .validate_parameters("calculate_hash", &params(json!({"data": "x"})))
        .unwrap()
        .valid);

    let bad_algorithm = vt
        .validate_parameters("calculate_hash", &params(json!({"data": "x", "algorithm": "crc32"})))
        .unwrap();
    assert!(!bad_algorithm.valid);
    assert!(bad_algorithm.errors[0].contains("'crc32'"));
}

#[test]
fn test_unknown_action() {
    let result = adapter()
        .validate_parameters("block_ip", &Params::new())
        .unwrap();
    assert!(!result.valid);
    assert_eq!(result.errors, vec!["Unsupported action: block_ip".to_string()]);
}
