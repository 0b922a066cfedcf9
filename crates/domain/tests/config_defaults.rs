use zw_domain::config::{Config, ConfigSeverity};
use zw_domain::NodeId;

const KEY_A: &str = "0102030405060708090a0b0c0d0e0f10";
const KEY_B: &str = "1112131415161718191a1b1c1d1e1f20";

#[test]
fn empty_file_uses_defaults() {
    let config: Config = toml::from_str("").unwrap();
    assert_eq!(config.controller.node_id, NodeId(1));
    assert_eq!(config.interview.attempts, 5);
    assert_eq!(config.interview.retry_delay_ms, 5000);
    assert!(config.interview.resume_on_startup);
    assert_eq!(config.scheduler.transaction_timeout_ms, 10_000);
    assert!(config.device_profiles.is_empty());
}

#[test]
fn default_config_only_warns_about_missing_keys() {
    let issues = Config::default().validate();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].severity, ConfigSeverity::Warning);
    assert_eq!(issues[0].field, "security");
}

#[test]
fn configured_keys_validate_cleanly() {
    let toml_str = format!(
        r#"
[security]
s2_authenticated = "{KEY_A}"
s0_legacy = "{KEY_B}"
"#
    );
    let config: Config = toml::from_str(&toml_str).unwrap();
    assert!(config.validate().is_empty());
    assert!(config.security.has_s2());
    assert!(config.security.has_s0());
}

#[test]
fn short_key_is_an_error() {
    let toml_str = r#"
[security]
s2_unauthenticated = "0102"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    let issues = config.validate();
    assert!(issues.iter().any(|e| e.severity == ConfigSeverity::Error
        && e.field == "security.s2_unauthenticated"));
}

#[test]
fn reused_key_is_an_error() {
    let toml_str = format!(
        r#"
[security]
s2_access_control = "{KEY_A}"
s0_legacy = "{KEY_A}"
"#
    );
    let config: Config = toml::from_str(&toml_str).unwrap();
    let issues = config.validate();
    assert!(issues
        .iter()
        .any(|e| e.field == "security.s0_legacy" && e.message.contains("s2_access_control")));
}

#[test]
fn zero_attempts_and_timeout_are_errors() {
    let toml_str = r#"
[interview]
attempts = 0

[scheduler]
transaction_timeout_ms = 0
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    let fields: Vec<String> = config
        .validate()
        .into_iter()
        .filter(|e| e.severity == ConfigSeverity::Error)
        .map(|e| e.field)
        .collect();
    assert!(fields.contains(&"interview.attempts".to_string()));
    assert!(fields.contains(&"scheduler.transaction_timeout_ms".to_string()));
}

#[test]
fn bad_firmware_range_in_profile_is_an_error() {
    let toml_str = r#"
[[device_profiles]]
manufacturer_id = 1
product_type = 2
product_id = 3
firmware_min = "three"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert!(config
        .validate()
        .iter()
        .any(|e| e.field == "device_profiles[0]" && e.severity == ConfigSeverity::Error));
}

#[test]
fn controller_id_out_of_range_is_an_error() {
    let toml_str = r#"
[controller]
node_id = 0
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert!(config.validate().iter().any(|e| e.field == "controller.node_id"));
}
