//! Scenario: config hash is stable across key order and layering.
//!
//! # Invariant under test
//! The same effective configuration always hashes to the same value, no
//! matter how the YAML spells its key order. Overlays change the hash only
//! when they change a value.

use sfr_config::load_layered_yaml_from_strings;

const BASE_YAML: &str = r#"
engine:
  mode: "SANDBOX"
  gateway_timeout_ms: 10000
gateway:
  base_url: "https://api.paystack.co"
  keys_env:
    secret_key: "PAYSTACK_SECRET_KEY"
notifications:
  batch_size: 20
"#;

const BASE_YAML_REORDERED: &str = r#"
notifications:
  batch_size: 20
gateway:
  keys_env:
    secret_key: "PAYSTACK_SECRET_KEY"
  base_url: "https://api.paystack.co"
engine:
  gateway_timeout_ms: 10000
  mode: "SANDBOX"
"#;

const OVERLAY_YAML: &str = r#"
engine:
  mode: "LIVE"
notifications:
  batch_size: 50
"#;

#[test]
fn same_input_produces_identical_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
    assert_eq!(a.canonical_json, b.canonical_json);
}

#[test]
fn reordered_keys_produce_same_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML_REORDERED]).unwrap();
    assert_eq!(
        a.config_hash, b.config_hash,
        "reordering keys in YAML must not change the hash"
    );
}

#[test]
fn overlay_overrides_base_and_changes_hash() {
    let base = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let merged = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();

    assert_ne!(base.config_hash, merged.config_hash);
    assert_eq!(
        merged.config_json.pointer("/engine/mode").and_then(|v| v.as_str()),
        Some("LIVE")
    );
    // Untouched sibling keys survive the merge.
    assert_eq!(
        merged
            .config_json
            .pointer("/engine/gateway_timeout_ms")
            .and_then(|v| v.as_u64()),
        Some(10000)
    );
    assert_eq!(
        merged
            .config_json
            .pointer("/notifications/batch_size")
            .and_then(|v| v.as_u64()),
        Some(50)
    );
}

#[test]
fn empty_layer_is_ignored() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML, ""]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
}

#[test]
fn hash_is_64_hex_chars() {
    let loaded = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    assert_eq!(loaded.config_hash.len(), 64);
    assert!(loaded.config_hash.chars().all(|c| c.is_ascii_hexdigit()));
}
