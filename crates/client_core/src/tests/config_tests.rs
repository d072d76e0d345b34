use super::{apply_env, apply_file, load_settings, ClientSettings};

use std::{collections::HashMap, fs, time::Duration};

fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn api_root_appends_version_prefix_once() {
    let mut settings = ClientSettings::default();
    settings.api_base_url = "http://10.0.0.2:5000/".to_string();
    assert_eq!(settings.api_root(), "http://10.0.0.2:5000/api/v1");

    settings.api_base_url = "http://10.0.0.2:5000/api/v1".to_string();
    assert_eq!(settings.api_root(), "http://10.0.0.2:5000/api/v1");
}

#[test]
fn legacy_host_and_port_build_api_base_url() {
    let mut settings = ClientSettings::default();
    apply_env(
        &mut settings,
        env_from(&[("API_SERVER_IP", "172.20.10.14"), ("API_SERVER_PORT", "5001")]),
    );
    assert_eq!(settings.api_base_url, "http://172.20.10.14:5001");
}

#[test]
fn prefixed_env_overrides_legacy_form() {
    let mut settings = ClientSettings::default();
    apply_env(
        &mut settings,
        env_from(&[
            ("API_SERVER_IP", "172.20.10.14"),
            ("APP__API_BASE_URL", "https://api.example.test"),
            ("RELAY_URL", "ws://relay.local/ws"),
            ("APP__RELAY_URL", "wss://relay.example.test/ws"),
            ("APP__ACK_TIMEOUT_MS", "250"),
        ]),
    );
    assert_eq!(settings.api_base_url, "https://api.example.test");
    assert_eq!(settings.relay_url, "wss://relay.example.test/ws");
    assert_eq!(settings.ack_timeout, Duration::from_millis(250));
}

#[test]
fn unparsable_ack_timeout_keeps_default() {
    let mut settings = ClientSettings::default();
    apply_env(&mut settings, env_from(&[("APP__ACK_TIMEOUT_MS", "soon")]));
    assert_eq!(settings.ack_timeout, ClientSettings::default().ack_timeout);
}

#[test]
fn file_values_are_applied() {
    let raw = r#"
        api_base_url = "http://backend:8080"
        relay_url = "ws://relay:3000/ws"
        session_file = "/tmp/zynko/session.json"
        ack_timeout_ms = 1500
        request_timeout_secs = 5
    "#;
    let file_cfg: HashMap<String, toml::Value> = toml::from_str(raw).expect("toml");
    let mut settings = ClientSettings::default();
    apply_file(&mut settings, &file_cfg);

    assert_eq!(settings.api_base_url, "http://backend:8080");
    assert_eq!(settings.relay_url, "ws://relay:3000/ws");
    assert_eq!(
        settings.session_file,
        std::path::PathBuf::from("/tmp/zynko/session.json")
    );
    assert_eq!(settings.ack_timeout, Duration::from_millis(1500));
    assert_eq!(settings.request_timeout, Duration::from_secs(5));
}

#[test]
fn validate_rejects_http_relay_url() {
    let mut settings = ClientSettings::default();
    settings.relay_url = "http://relay:3000".to_string();
    let err = settings.validate().expect_err("must reject");
    assert!(err.to_string().contains("relay_url"), "unexpected: {err}");
}

#[test]
fn load_settings_reads_explicit_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("client.toml");
    fs::write(
        &path,
        "api_base_url = \"http://file-host:7000\"\nrelay_url = \"ws://file-host:7001/ws\"\n",
    )
    .expect("write settings");

    let settings = load_settings(Some(&path)).expect("load");
    if std::env::var("APP__API_BASE_URL").is_err() && std::env::var("API_SERVER_IP").is_err() {
        assert_eq!(settings.api_base_url, "http://file-host:7000");
    }
}
